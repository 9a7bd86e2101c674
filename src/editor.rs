//! Editor session: one open program, its outcome catalog, and the autosave
//! coordinator bound to the program's id.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::autosave::{AutosaveCoordinator, ScheduleOutcome};
use crate::backend::{find_program_by_slug, BackendError, ContentBackend};
use crate::model::{Outcome, ProgramFields, ProgramRecord, WEEKS_PER_TERM};
use crate::outcomes::{group_outcomes, outcomes_for_stage, DesignatedSubject, OutcomeGroups, SUBJECT_ORDER};

/// Fields that never go through `handle_field_change`.
const RESERVED_FIELDS: [&str; 3] = ["id", "outcomes", "selectedOutcomes"];

const WEEK_PARTS: [&str; 3] = ["week", "focus", "activities"];

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("program not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid field name: {0:?}")]
    InvalidField(String),
    #[error("field {0} cannot be edited directly")]
    ReservedField(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("outcome catalog is incomplete: {0}")]
    CatalogIncomplete(String),
    #[error("{0}")]
    BadParams(String),
}

impl EditorError {
    pub fn code(&self) -> &'static str {
        match self {
            EditorError::NotFound(_) => "not_found",
            EditorError::Backend(e) => e.code(),
            EditorError::InvalidField(_) | EditorError::ReservedField(_) => "bad_field",
            EditorError::InvalidValue { .. } => "bad_value",
            EditorError::CatalogIncomplete(_) => "catalog_incomplete",
            EditorError::BadParams(_) => "bad_params",
        }
    }
}

#[derive(Debug, Error)]
#[error("outcome page {page} failed after {loaded} outcomes: {source}")]
pub struct CatalogError {
    pub page: u32,
    pub loaded: usize,
    #[source]
    pub source: BackendError,
}

#[derive(Debug, Clone)]
pub enum CatalogState {
    Complete(Vec<Outcome>),
    Failed { message: String },
}

impl CatalogState {
    pub fn outcomes(&self) -> Result<&[Outcome], EditorError> {
        match self {
            CatalogState::Complete(list) => Ok(list),
            CatalogState::Failed { message } => Err(EditorError::CatalogIncomplete(message.clone())),
        }
    }

    pub fn summary(&self) -> Value {
        match self {
            CatalogState::Complete(list) => serde_json::json!({
                "state": "complete",
                "count": list.len(),
            }),
            CatalogState::Failed { message } => serde_json::json!({
                "state": "failed",
                "message": message,
            }),
        }
    }
}

/// Fetch every outcome page until one comes back short. Any failing page
/// fails the whole load.
pub async fn load_outcome_catalog(
    backend: &dyn ContentBackend,
    page_size: u32,
) -> Result<Vec<Outcome>, CatalogError> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        let entries = backend
            .list_outcomes(page, page_size)
            .await
            .map_err(|source| CatalogError {
                page,
                loaded: all.len(),
                source,
            })?;
        let fetched = entries.len();
        all.extend(entries.iter().filter_map(Outcome::from_entry));
        if fetched < page_size as usize {
            break;
        }
        page += 1;
    }
    Ok(all)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub changed: bool,
    #[serde(serialize_with = "serialize_schedule")]
    pub autosave: Option<ScheduleOutcome>,
}

fn serialize_schedule<S>(v: &Option<ScheduleOutcome>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match v {
        Some(o) => s.serialize_str(o.as_str()),
        None => s.serialize_none(),
    }
}

impl FieldChange {
    const UNCHANGED: FieldChange = FieldChange {
        changed: false,
        autosave: None,
    };
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSelection {
    pub groups: OutcomeGroups,
    pub selected: Vec<String>,
    pub changes: Map<String, Value>,
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn valid_field_name(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn fields_to_map(fields: &ProgramFields) -> Result<Map<String, Value>, EditorError> {
    match serde_json::to_value(fields) {
        Ok(Value::Object(m)) => Ok(m),
        Ok(_) => Err(EditorError::BadParams("program is not an object".to_string())),
        Err(e) => Err(EditorError::BadParams(e.to_string())),
    }
}

pub struct EditorSession {
    slug: String,
    program: ProgramRecord,
    catalog: CatalogState,
    autosave: AutosaveCoordinator,
}

impl EditorSession {
    pub fn new(program: ProgramRecord, catalog: CatalogState, autosave: AutosaveCoordinator) -> Self {
        Self {
            slug: program.fields.slug.clone(),
            program,
            catalog,
            autosave,
        }
    }

    pub async fn open(
        backend: Arc<dyn ContentBackend>,
        slug: &str,
        debounce: Duration,
        outcome_page_size: u32,
    ) -> Result<Self, EditorError> {
        let entry = find_program_by_slug(backend.as_ref(), slug)
            .await?
            .ok_or_else(|| EditorError::NotFound(slug.to_string()))?;
        let program = ProgramRecord::from_entry(&entry).map_err(|reason| EditorError::InvalidValue {
            field: "program".to_string(),
            reason,
        })?;
        if program.id.is_none() {
            warn!(slug, "program has no usable id; autosave disabled");
        }

        let catalog = match load_outcome_catalog(backend.as_ref(), outcome_page_size).await {
            Ok(list) => {
                info!(count = list.len(), "outcome catalog loaded");
                CatalogState::Complete(list)
            }
            Err(e) => {
                error!(error = %e, "outcome catalog load failed");
                CatalogState::Failed {
                    message: e.to_string(),
                }
            }
        };

        let autosave = AutosaveCoordinator::new(backend, program.id, debounce);
        let mut session = Self::new(program, catalog, autosave);
        session.slug = slug.to_string();
        info!(slug, program_id = ?session.program.id, "editor session opened");
        Ok(session)
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn program(&self) -> &ProgramRecord {
        &self.program
    }

    pub fn catalog(&self) -> &CatalogState {
        &self.catalog
    }

    pub fn autosave(&self) -> &AutosaveCoordinator {
        &self.autosave
    }

    /// Apply one field edit. Unchanged values are dropped before they reach
    /// the autosave queue; invalid values leave the record untouched.
    pub fn handle_field_change(&mut self, field: &str, value: Value) -> Result<FieldChange, EditorError> {
        if !valid_field_name(field) {
            return Err(EditorError::InvalidField(field.to_string()));
        }
        if RESERVED_FIELDS.contains(&field) {
            return Err(EditorError::ReservedField(field.to_string()));
        }

        let mut map = fields_to_map(&self.program.fields)?;
        let current = map.get(field).cloned().unwrap_or(Value::Null);
        if current == value || (is_blank(&current) && is_blank(&value)) {
            return Ok(FieldChange::UNCHANGED);
        }

        let invalid = |reason: String| EditorError::InvalidValue {
            field: field.to_string(),
            reason,
        };
        if field == "weekly_plans" {
            let weeks = value.as_array().map(|a| a.len()).unwrap_or(0);
            if weeks != WEEKS_PER_TERM {
                return Err(invalid(format!("expected {WEEKS_PER_TERM} weeks, got {weeks}")));
            }
        }

        map.insert(field.to_string(), value.clone());
        let fields: ProgramFields =
            serde_json::from_value(Value::Object(map)).map_err(|e| invalid(e.to_string()))?;
        fields.validate().map_err(invalid)?;

        let normalized = fields_to_map(&fields)?
            .remove(field)
            .unwrap_or(Value::Null);
        if normalized.is_string() && !(value.is_string() || value.is_null()) {
            return Err(invalid("must be a string".to_string()));
        }

        self.program.fields = fields;
        let outcome = self.autosave.schedule(field, normalized);
        Ok(FieldChange {
            changed: true,
            autosave: Some(outcome),
        })
    }

    pub fn update_week(&mut self, index: usize, part: &str, text: &str) -> Result<FieldChange, EditorError> {
        if index >= WEEKS_PER_TERM {
            return Err(EditorError::BadParams(format!(
                "week index must be 0-{}, got {index}",
                WEEKS_PER_TERM - 1
            )));
        }
        if !WEEK_PARTS.contains(&part) {
            return Err(EditorError::BadParams(format!(
                "week field must be one of: {}",
                WEEK_PARTS.join(", ")
            )));
        }
        let mut weeks = self.program.fields.weekly_plans.clone();
        let entry = &mut weeks[index];
        match part {
            "week" => entry.week = text.to_string(),
            "focus" => entry.focus = text.to_string(),
            _ => entry.activities = text.to_string(),
        }
        let value = serde_json::to_value(&weeks).map_err(|e| EditorError::BadParams(e.to_string()))?;
        self.handle_field_change("weekly_plans", value)
    }

    pub fn available_outcomes(&self) -> Result<Vec<&Outcome>, EditorError> {
        let catalog = self.catalog.outcomes()?;
        let stage = self.program.fields.stage.map(|s| s.as_str()).unwrap_or("");
        Ok(outcomes_for_stage(catalog, stage))
    }

    /// Replace the outcome selection and rewrite the four outcome text fields.
    /// Refuses to run on a partially loaded catalog.
    pub fn select_outcomes(&mut self, codes: BTreeSet<String>) -> Result<OutcomeSelection, EditorError> {
        let available: Vec<Outcome> = self.available_outcomes()?.into_iter().cloned().collect();
        let groups = group_outcomes(&available, &SUBJECT_ORDER, &codes);

        let selected: BTreeSet<String> = codes
            .into_iter()
            .filter(|c| !groups.missing.contains(c))
            .collect();

        let mut changes = Map::new();
        let mut updates = vec![("nesa_outcomes_combined".to_string(), groups.combined.clone())];
        for subject in DesignatedSubject::ALL {
            updates.push((subject.outcomes_field(), groups.subject_text(subject).to_string()));
        }
        for (field, text) in updates {
            let change = self.handle_field_change(&field, Value::String(text))?;
            changes.insert(
                field,
                serde_json::to_value(change).map_err(|e| EditorError::BadParams(e.to_string()))?,
            );
        }

        if selected != self.program.selected_outcomes {
            let ids: Vec<Value> = available
                .iter()
                .filter(|o| selected.contains(&o.code))
                .filter_map(|o| o.id.map(Value::from))
                .collect();
            let outcome = self.autosave.schedule("outcomes", Value::Array(ids));
            changes.insert(
                "outcomes".to_string(),
                serde_json::json!({ "changed": true, "autosave": outcome.as_str() }),
            );
            self.program.selected_outcomes = selected.clone();
        }

        Ok(OutcomeSelection {
            groups,
            selected: selected.into_iter().collect(),
            changes,
        })
    }

    /// Codes from the current selection that belong to `subject`.
    pub fn selected_codes_for(&self, subject: DesignatedSubject) -> Vec<String> {
        let Ok(catalog) = self.catalog.outcomes() else {
            return Vec::new();
        };
        catalog
            .iter()
            .filter(|o| self.program.selected_outcomes.contains(&o.code))
            .filter(|o| subject.matches(&o.subject_area))
            .map(|o| o.code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn close(&self) -> usize {
        self.autosave.flush().await
    }
}

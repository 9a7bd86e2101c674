//! Program and outcome records as the editor sees them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::backend::{Entry, ProgramId};

pub const WEEKS_PER_TERM: usize = 6;
pub const ALL_STAGES: &str = "All Stages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "ES1")]
    Es1,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Es1 => "ES1",
            Stage::S1 => "S1",
            Stage::S2 => "S2",
            Stage::S3 => "S3",
            Stage::S4 => "S4",
            Stage::S5 => "S5",
            Stage::S6 => "S6",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        serde_json::from_value(Value::String(s.trim().to_string())).ok()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermFocus {
    #[serde(rename = "Term 1 – Identity")]
    Identity,
    #[serde(rename = "Term 2 – Nature")]
    Nature,
    #[serde(rename = "Term 3 – Life and Living")]
    LifeAndLiving,
    #[serde(rename = "Term 4 – Civilisation")]
    Civilisation,
    #[serde(rename = "Term 5 – Phenomena")]
    Phenomena,
    #[serde(rename = "Term 6 – Service")]
    Service,
}

impl TermFocus {
    pub const ALL: [TermFocus; 6] = [
        TermFocus::Identity,
        TermFocus::Nature,
        TermFocus::LifeAndLiving,
        TermFocus::Civilisation,
        TermFocus::Phenomena,
        TermFocus::Service,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TermFocus::Identity => "Term 1 – Identity",
            TermFocus::Nature => "Term 2 – Nature",
            TermFocus::LifeAndLiving => "Term 3 – Life and Living",
            TermFocus::Civilisation => "Term 4 – Civilisation",
            TermFocus::Phenomena => "Term 5 – Phenomena",
            TermFocus::Service => "Term 6 – Service",
        }
    }

    pub fn parse(s: &str) -> Option<TermFocus> {
        let s = s.trim();
        TermFocus::ALL.into_iter().find(|t| t.label() == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeekEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub week: String,
    #[serde(deserialize_with = "lenient_string")]
    pub focus: String,
    #[serde(deserialize_with = "lenient_string")]
    pub activities: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct EngagementRating(u8);

impl EngagementRating {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for EngagementRating {
    fn default() -> Self {
        EngagementRating(3)
    }
}

impl TryFrom<u8> for EngagementRating {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        if (1..=5).contains(&v) {
            Ok(EngagementRating(v))
        } else {
            Err(format!("engagement rating must be 1-5, got {v}"))
        }
    }
}

impl From<EngagementRating> for u8 {
    fn from(r: EngagementRating) -> u8 {
        r.0
    }
}

/// Rich-text fields may come back from the backend as block structures
/// instead of HTML strings; those read as empty.
fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Editable program fields, keyed by their backend attribute names.
/// Attributes the editor does not model are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramFields {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub slug: String,
    #[serde(deserialize_with = "lenient_string")]
    pub teacher_name: String,
    pub stage: Option<Stage>,
    pub term_focus: Option<TermFocus>,
    #[serde(deserialize_with = "lenient_string")]
    pub keystone_question: String,
    #[serde(deserialize_with = "lenient_string")]
    pub big_idea: String,
    #[serde(deserialize_with = "lenient_string")]
    pub questions_to_explore: String,

    #[serde(deserialize_with = "lenient_string")]
    pub nesa_outcomes_combined: String,
    #[serde(deserialize_with = "lenient_string")]
    pub english_outcomes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub maths_outcomes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub science_outcomes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub english_ideas: String,
    #[serde(deserialize_with = "lenient_string")]
    pub maths_ideas: String,
    #[serde(deserialize_with = "lenient_string")]
    pub science_ideas: String,

    pub weekly_plans: [WeekEntry; WEEKS_PER_TERM],

    #[serde(deserialize_with = "lenient_string")]
    pub assessment_method: String,
    #[serde(deserialize_with = "lenient_string")]
    pub evidence_of_learning: String,
    #[serde(deserialize_with = "lenient_string")]
    pub linked_outcomes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub rubric: String,
    #[serde(deserialize_with = "lenient_string")]
    pub due_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub adjustments: String,
    #[serde(deserialize_with = "lenient_string")]
    pub student_reflection_prompt: String,
    #[serde(deserialize_with = "lenient_string")]
    pub teacher_reflection: String,

    #[serde(deserialize_with = "lenient_string")]
    pub teacher_comment: String,
    #[serde(deserialize_with = "lenient_string")]
    pub student_voice: String,
    #[serde(deserialize_with = "lenient_string")]
    pub parent_summary: String,
    pub engagement_rating: EngagementRating,

    pub program_year: Option<i32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgramFields {
    /// Checks that serde cannot express on its own.
    pub fn validate(&self) -> Result<(), String> {
        let due = self.due_date.trim();
        if !due.is_empty() && NaiveDate::parse_from_str(due, "%Y-%m-%d").is_err() {
            return Err(format!("due_date must be YYYY-MM-DD, got {due:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramRecord {
    pub id: Option<ProgramId>,
    pub fields: ProgramFields,
    pub selected_outcomes: BTreeSet<String>,
}

impl ProgramRecord {
    /// Build the editor record from a backend entry. Loading is lenient:
    /// null ratings fall back to the default and the weekly plan is padded or
    /// truncated to six weeks.
    pub fn from_entry(entry: &Entry) -> Result<ProgramRecord, String> {
        let mut attrs = entry.attributes.clone();

        let selected_outcomes = match attrs.remove("outcomes") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|o| o.get("code").and_then(|c| c.as_str()))
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            _ => BTreeSet::new(),
        };

        let mut weeks = match attrs.remove("weekly_plans") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        weeks.truncate(WEEKS_PER_TERM);
        while weeks.len() < WEEKS_PER_TERM {
            weeks.push(serde_json::to_value(WeekEntry::default()).map_err(|e| e.to_string())?);
        }
        attrs.insert("weekly_plans".to_string(), Value::Array(weeks));

        for key in ["engagement_rating", "stage", "term_focus", "program_year"] {
            if attrs.get(key).map(|v| v.is_null()).unwrap_or(false) {
                attrs.remove(key);
            }
        }
        let rating_ok = attrs
            .get("engagement_rating")
            .map(|v| v.as_u64().map(|n| (1..=5).contains(&n)).unwrap_or(false))
            .unwrap_or(true);
        if !rating_ok {
            attrs.remove("engagement_rating");
        }
        if let Some(stage) = attrs.get("stage").and_then(|v| v.as_str()) {
            if Stage::parse(stage).is_none() {
                attrs.remove("stage");
            }
        }
        if let Some(term) = attrs.get("term_focus").and_then(|v| v.as_str()) {
            if TermFocus::parse(term).is_none() {
                attrs.remove("term_focus");
            }
        }

        let fields: ProgramFields =
            serde_json::from_value(Value::Object(attrs)).map_err(|e| e.to_string())?;
        Ok(ProgramRecord {
            id: entry.id,
            fields,
            selected_outcomes,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut out = match serde_json::to_value(&self.fields) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        out.insert(
            "id".to_string(),
            self.id.map(|id| Value::from(id.0)).unwrap_or(Value::Null),
        );
        out.insert(
            "selectedOutcomes".to_string(),
            Value::Array(
                self.selected_outcomes
                    .iter()
                    .map(|c| Value::String(c.clone()))
                    .collect(),
            ),
        );
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Backend id, used when the selection is written back as a relation.
    pub id: Option<u64>,
    pub code: String,
    pub description: String,
    pub subject_area: String,
    pub stage: String,
}

impl Outcome {
    /// Catalog entries without a code cannot be selected and are skipped.
    pub fn from_entry(entry: &Entry) -> Option<Outcome> {
        let text = |key: &str| {
            entry
                .attributes
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let code = text("code");
        if code.is_empty() {
            return None;
        }
        let subject_area = Some(text("subject_area"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Other".to_string());
        Some(Outcome {
            id: entry.id.map(|id| id.0),
            code,
            description: text("description"),
            subject_area,
            stage: text("stage"),
        })
    }
}

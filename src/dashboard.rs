//! Program listing, cloning and creation.

use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::backend::{attributes_for_create, find_program_by_slug, title_exists, BackendError, ContentBackend, Entry};
use crate::model::{Stage, TermFocus};

pub const PAGE_SIZE: u32 = 10;
pub const DEFAULT_TEACHER: &str = "John Stewart";
pub const DEFAULT_TERM: TermFocus = TermFocus::Identity;
pub const DEFAULT_STAGE: Stage = Stage::S3;

/// Upper bound on title probes during creation.
const MAX_TITLE_PROBES: i32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramFilter {
    pub term: Option<TermFocus>,
    pub subject: Option<String>,
    pub teacher: Option<String>,
    pub title: Option<String>,
    pub page: u32,
}

impl ProgramFilter {
    /// Backend query parameters for this filter. Blank text filters are
    /// omitted; page numbers start at 1.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut q: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: &str| q.push((k.to_string(), v.to_string()));
        if let Some(term) = self.term {
            push("filters[term_focus][$eq]", term.label());
        }
        let text_filters = [
            ("filters[subject_area][name][$containsi]", &self.subject),
            ("filters[teacher_name][$containsi]", &self.teacher),
            ("filters[title][$containsi]", &self.title),
        ];
        for (key, value) in text_filters {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                push(key, v);
            }
        }
        push("pagination[page]", &self.page.max(1).to_string());
        push("pagination[pageSize]", &PAGE_SIZE.to_string());
        push("populate", "*");
        push("publicationState", "preview");
        q
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSummary {
    pub id: Option<u64>,
    pub title: String,
    pub slug: Option<String>,
    pub term_focus: Option<String>,
    pub subject: Option<String>,
    pub teacher_name: Option<String>,
}

impl ProgramSummary {
    pub fn from_entry(entry: &Entry) -> Self {
        let text = |key: &str| {
            entry
                .attributes
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let subject = entry
            .attributes
            .get("subject_area")
            .and_then(|v| v.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Self {
            id: entry.id.map(|id| id.0),
            title: text("title").unwrap_or_else(|| "Untitled Program".to_string()),
            slug: text("slug"),
            term_focus: text("term_focus"),
            subject,
            teacher_name: text("teacher_name"),
        }
    }
}

pub async fn list_programs(
    backend: &dyn ContentBackend,
    filter: &ProgramFilter,
) -> Result<Vec<ProgramSummary>, BackendError> {
    let entries = backend.list_programs(&filter.to_query()).await?;
    Ok(entries.iter().map(ProgramSummary::from_entry).collect())
}

/// Lowercase, runs of anything outside `[a-z0-9]` become a single `-`,
/// no leading or trailing dashes.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if dash && !out.is_empty() {
                out.push('-');
            }
            dash = false;
            out.push(c);
        } else {
            dash = true;
        }
    }
    out
}

pub fn program_title(teacher: &str, term: TermFocus, year: i32) -> String {
    format!("{teacher} – {} ({year})", term.label())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProgram {
    pub id: Option<u64>,
    pub title: String,
    pub slug: String,
    pub editor_path: String,
}

impl CreatedProgram {
    fn from_entry(entry: &Entry, title: String, fallback_slug: String) -> Self {
        let slug = entry
            .attributes
            .get("slug")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or(fallback_slug);
        Self {
            id: entry.id.map(|id| id.0),
            editor_path: format!("/editor/{slug}"),
            title,
            slug,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProgram {
    pub teacher: String,
    pub term: TermFocus,
    pub stage: Stage,
    pub year: i32,
}

impl Default for NewProgram {
    fn default() -> Self {
        Self {
            teacher: DEFAULT_TEACHER.to_string(),
            term: DEFAULT_TERM,
            stage: DEFAULT_STAGE,
            year: Utc::now().year(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("program not found: {0}")]
    NotFound(String),
    #[error("no free title after {0} attempts")]
    TitleExhausted(i32),
}

impl DashboardError {
    pub fn code(&self) -> &'static str {
        match self {
            DashboardError::Backend(e) => e.code(),
            DashboardError::NotFound(_) => "not_found",
            DashboardError::TitleExhausted(_) => "title_exhausted",
        }
    }
}

/// Probe for a free `"<teacher> – <term> (<year>)"` title, bumping the year
/// on every collision, then create the program exactly once.
pub async fn create_program(
    backend: &dyn ContentBackend,
    new: &NewProgram,
) -> Result<CreatedProgram, DashboardError> {
    let mut year = new.year;
    let mut title = program_title(&new.teacher, new.term, year);
    let mut probes = 0;
    while title_exists(backend, &title).await? {
        probes += 1;
        if probes >= MAX_TITLE_PROBES {
            return Err(DashboardError::TitleExhausted(probes));
        }
        year += 1;
        title = program_title(&new.teacher, new.term, year);
    }

    let slug = slugify(&title);
    let mut data = Map::new();
    data.insert("title".to_string(), Value::String(title.clone()));
    data.insert("slug".to_string(), Value::String(slug.clone()));
    data.insert("stage".to_string(), Value::String(new.stage.as_str().to_string()));
    data.insert("term_focus".to_string(), Value::String(new.term.label().to_string()));
    data.insert("teacher_name".to_string(), Value::String(new.teacher.clone()));
    data.insert("program_year".to_string(), Value::from(year));

    let entry = backend.create_program(data).await?;
    let created = CreatedProgram::from_entry(&entry, title, slug);
    info!(title = %created.title, slug = %created.slug, "program created");
    Ok(created)
}

/// Duplicate a program under `"<title> (Copy)"` with a timestamped slug.
pub async fn clone_program(
    backend: &dyn ContentBackend,
    slug: &str,
) -> Result<CreatedProgram, DashboardError> {
    let source = find_program_by_slug(backend, slug)
        .await?
        .ok_or_else(|| DashboardError::NotFound(slug.to_string()))?;

    let mut data = attributes_for_create(&source.attributes);
    let source_title = data
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled")
        .to_string();
    let title = format!("{source_title} (Copy)");
    let new_slug = format!("{slug}-copy-{}", Utc::now().timestamp_millis());
    data.insert("title".to_string(), Value::String(title.clone()));
    data.insert("slug".to_string(), Value::String(new_slug.clone()));

    let entry = backend.create_program(data).await?;
    let created = CreatedProgram::from_entry(&entry, title, new_slug);
    info!(source = slug, slug = %created.slug, "program cloned");
    Ok(created)
}

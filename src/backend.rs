//! Content backend client.
//!
//! Everything that knows about the backend's wire shape lives here. Entries
//! come back either Strapi-v4 style (`{id, attributes: {...}}`, relations
//! wrapped in `{data: ...}`) or flat; `normalize_entry` turns both into an
//! [`Entry`] so the rest of the crate never sees the envelopes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a backend identifier. Numeric strings are accepted; anything else
/// is not a usable record id.
pub fn parse_id(v: &Value) -> Option<ProgramId> {
    match v {
        Value::Number(n) => n.as_u64().map(ProgramId),
        Value::String(s) => s.trim().parse::<u64>().ok().map(ProgramId),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: Option<ProgramId>,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Transport(_) => "backend_unreachable",
            BackendError::Timeout => "backend_timeout",
            BackendError::Http { .. } => "backend_status",
            BackendError::Malformed(_) => "backend_malformed",
        }
    }
}

pub fn normalize_entry(raw: &Value) -> Result<Entry, BackendError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| BackendError::Malformed("entry is not an object".to_string()))?;
    let id = obj.get("id").and_then(parse_id);
    let mut attributes = match obj.get("attributes").and_then(|v| v.as_object()) {
        Some(a) => a.clone(),
        None => {
            let mut a = obj.clone();
            a.remove("id");
            a
        }
    };
    for value in attributes.values_mut() {
        unwrap_relation(value);
    }
    Ok(Entry { id, attributes })
}

/// `{data: [...]}` → array of flat objects, `{data: {...}}` → flat object,
/// `{data: null}` → null. Anything else is left alone.
fn unwrap_relation(value: &mut Value) {
    let Some(obj) = value.as_object() else {
        return;
    };
    let is_wrapper = obj.contains_key("data") && obj.keys().all(|k| k == "data" || k == "meta");
    if !is_wrapper {
        return;
    }
    let inner = obj.get("data").cloned().unwrap_or(Value::Null);
    *value = match inner {
        Value::Array(items) => Value::Array(items.iter().map(flatten_related).collect()),
        Value::Object(_) => flatten_related(&inner),
        _ => Value::Null,
    };
}

fn flatten_related(item: &Value) -> Value {
    match normalize_entry(item) {
        Ok(entry) => {
            let mut out = entry.attributes;
            if let Some(id) = entry.id {
                out.insert("id".to_string(), json!(id.0));
            }
            Value::Object(out)
        }
        Err(_) => item.clone(),
    }
}

/// Body of a create request: relations become id references and
/// backend-managed bookkeeping fields are dropped.
pub fn attributes_for_create(attributes: &Map<String, Value>) -> Map<String, Value> {
    const MANAGED: [&str; 6] = [
        "id",
        "documentId",
        "createdAt",
        "updatedAt",
        "publishedAt",
        "locale",
    ];
    let mut out = Map::new();
    for (key, value) in attributes {
        if MANAGED.contains(&key.as_str()) {
            continue;
        }
        let value = match value {
            Value::Object(o) if o.contains_key("id") => o.get("id").cloned().unwrap_or(Value::Null),
            Value::Array(items) if items.iter().all(|i| i.get("id").is_some()) && !items.is_empty() => {
                Value::Array(items.iter().filter_map(|i| i.get("id").cloned()).collect())
            }
            other => other.clone(),
        };
        out.insert(key.clone(), value);
    }
    out
}

#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// `GET /api/programs` with backend query parameters.
    async fn list_programs(&self, query: &[(String, String)]) -> Result<Vec<Entry>, BackendError>;

    async fn create_program(&self, data: Map<String, Value>) -> Result<Entry, BackendError>;

    /// Partial update: writes a single field and leaves the rest untouched.
    async fn update_program_field(
        &self,
        id: ProgramId,
        field: &str,
        value: &Value,
    ) -> Result<(), BackendError>;

    async fn list_outcomes(&self, page: u32, page_size: u32) -> Result<Vec<Entry>, BackendError>;
}

pub async fn find_program_by_slug(
    backend: &dyn ContentBackend,
    slug: &str,
) -> Result<Option<Entry>, BackendError> {
    let query = vec![
        ("filters[slug][$eq]".to_string(), slug.to_string()),
        ("populate".to_string(), "outcomes".to_string()),
    ];
    let mut entries = backend.list_programs(&query).await?;
    if entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(entries.swap_remove(0)))
}

pub async fn title_exists(backend: &dyn ContentBackend, title: &str) -> Result<bool, BackendError> {
    let query = vec![("filters[title][$eq]".to_string(), title.to_string())];
    Ok(!backend.list_programs(&query).await?.is_empty())
}

pub struct StrapiClient {
    http: Client,
    base_url: String,
}

impl StrapiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("programd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, BackendError> {
        let res = request.send().await.map_err(map_reqwest_error)?;
        let status = res.status();
        let text = res.text().await.map_err(map_reqwest_error)?;
        let parsed: Result<Value, _> = serde_json::from_str(&text);

        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|body| error_message(&body))
                .unwrap_or_else(|| {
                    if text.trim().is_empty() {
                        "Unknown error".to_string()
                    } else {
                        text.chars().take(200).collect()
                    }
                });
            return Err(BackendError::Http {
                status: status.as_u16(),
                message,
            });
        }

        parsed.map_err(|e| BackendError::Malformed(format!("response is not json: {e}")))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}

fn error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| body.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

fn data_array(body: &Value) -> Result<Vec<Entry>, BackendError> {
    match body.get("data") {
        Some(Value::Array(items)) => items.iter().map(normalize_entry).collect(),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(BackendError::Malformed("data is not an array".to_string())),
    }
}

fn data_object(body: &Value) -> Result<Entry, BackendError> {
    match body.get("data") {
        Some(v @ Value::Object(_)) => normalize_entry(v),
        _ => Err(BackendError::Malformed("data is not an object".to_string())),
    }
}

#[async_trait]
impl ContentBackend for StrapiClient {
    async fn list_programs(&self, query: &[(String, String)]) -> Result<Vec<Entry>, BackendError> {
        debug!(?query, "listing programs");
        let body = self
            .send(self.http.get(self.url("programs")).query(query))
            .await?;
        data_array(&body)
    }

    async fn create_program(&self, data: Map<String, Value>) -> Result<Entry, BackendError> {
        let body = self
            .send(
                self.http
                    .post(self.url("programs"))
                    .json(&json!({ "data": data })),
            )
            .await?;
        data_object(&body)
    }

    async fn update_program_field(
        &self,
        id: ProgramId,
        field: &str,
        value: &Value,
    ) -> Result<(), BackendError> {
        let mut data = Map::new();
        data.insert(field.to_string(), value.clone());
        self.send(
            self.http
                .put(self.url(&format!("programs/{id}")))
                .json(&json!({ "data": data })),
        )
        .await?;
        Ok(())
    }

    async fn list_outcomes(&self, page: u32, page_size: u32) -> Result<Vec<Entry>, BackendError> {
        let query = [
            ("pagination[page]", page.to_string()),
            ("pagination[pageSize]", page_size.to_string()),
        ];
        let body = self
            .send(self.http.get(self.url("outcomes")).query(&query))
            .await?;
        data_array(&body)
    }
}

//! AI idea generation for the outcomes tab.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_IDEAS: usize = 3;

#[derive(Debug, Error)]
pub enum IdeasError {
    #[error("idea generation is not configured (missing provider api key)")]
    NotConfigured,
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider response could not be read: {0}")]
    Malformed(String),
}

impl IdeasError {
    pub fn code(&self) -> &'static str {
        match self {
            IdeasError::NotConfigured => "ai_not_configured",
            _ => "ai_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdeaRequest {
    pub subject: String,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub stage: String,
}

pub fn build_prompt(req: &IdeaRequest) -> String {
    let outcomes: Vec<&str> = req
        .outcomes
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect();
    format!(
        "Act as a highly experienced NSW Stage {stage} {subject} teacher in a progressive school.\n\
         The following outcomes are selected: {outcomes}.\n\
         Suggest {MAX_IDEAS} engaging, creative teaching ideas that help students deeply explore \
         and demonstrate these outcomes.",
        stage = req.stage.trim(),
        subject = req.subject.trim(),
        outcomes = outcomes.join(", "),
    )
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:[-*•]|\d+[.)])[ \t]+").expect("list marker pattern")
    })
}

/// Split free text on markdown list items. Text before the first item is an
/// introduction and is dropped when the response contains a list at all,
/// rather than being returned as an idea of its own.
pub fn split_ideas(text: &str) -> Vec<String> {
    let marker = list_marker();
    let mut chunks: Vec<&str> = marker.split(text).collect();
    if chunks.len() > 1 {
        chunks.remove(0);
    }
    chunks
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_IDEAS)
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone)]
pub struct IdeaClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl IdeaClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self, IdeasError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("programd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IdeasError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn generate(&self, req: &IdeaRequest) -> Result<Vec<String>, IdeasError> {
        let prompt = build_prompt(req);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &prompt }],
            }],
        };
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let res = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdeasError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "idea provider rejected request");
            return Err(IdeasError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| IdeasError::Malformed(e.to_string()))?;
        let ideas = split_ideas(&parsed.text());
        info!(subject = %req.subject, count = ideas.len(), "ideas generated");
        Ok(ideas)
    }
}

/// Response body shape used by the shell.
pub fn ideas_json(ideas: &[String]) -> serde_json::Value {
    json!({ "ideas": ideas })
}

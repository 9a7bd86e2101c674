use std::sync::Arc;

use serde::Deserialize;

use crate::backend::ContentBackend;
use crate::config::Config;
use crate::editor::EditorSession;
use crate::ideas::IdeaClient;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn ContentBackend>,
    pub ideas: Option<IdeaClient>,
    pub session: Option<EditorSession>,
}

impl AppState {
    pub fn new(config: Arc<Config>, backend: Arc<dyn ContentBackend>, ideas: Option<IdeaClient>) -> Self {
        Self {
            config,
            backend,
            ideas,
            session: None,
        }
    }

    /// Flush and drop the open editor session, if any.
    pub async fn close_session(&mut self) -> usize {
        match self.session.take() {
            Some(session) => session.close().await,
            None => 0,
        }
    }
}

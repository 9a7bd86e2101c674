mod autosave;
mod backend;
mod config;
mod dashboard;
mod editor;
mod export;
mod ideas;
mod ipc;
mod model;
mod outcomes;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::backend::StrapiClient;
use crate::config::Config;
use crate::ideas::IdeaClient;

fn init_tracing(json: bool) {
    // stdout carries the IPC channel, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "programd=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);
    config.validate().context("invalid configuration")?;

    let backend = StrapiClient::new(&config.backend_url, config.request_timeout())
        .context("building backend client")?;
    let ideas = match config.ai_api_key.as_deref().filter(|_| config.ai_configured()) {
        Some(key) => Some(
            IdeaClient::new(&config.ai_url, &config.ai_model, key.trim(), config.request_timeout())
                .context("building idea client")?,
        ),
        None => {
            info!("no idea provider credential; ideas.generate disabled");
            None
        }
    };
    info!(
        backend = %config.backend_url,
        debounce_ms = config.autosave_debounce_ms,
        "programd ready"
    );

    let mut state = ipc::AppState::new(Arc::new(config), Arc::new(backend), ideas);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req).await,
            Err(e) => {
                // No id to reply to.
                warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };

        let mut out = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    let flushed = state.close_session().await;
    info!(flushed, "stdin closed; shutting down");
    Ok(())
}

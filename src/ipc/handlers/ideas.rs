use serde_json::{json, Value};
use tracing::warn;

use crate::ideas::{ideas_json, IdeaRequest, IdeasError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str, parse_string_array, required_str};
use crate::ipc::types::{AppState, Request};
use crate::outcomes::DesignatedSubject;

/// Outcome codes and stage fall back to the open session when the caller
/// leaves them out.
fn build_request(state: &AppState, req: &Request) -> Result<IdeaRequest, Value> {
    let subject = required_str(req, "subject")?;
    let stage = opt_str(req, "stage")?;
    let outcomes = parse_string_array(req, "outcomes")?;

    let session = state.session.as_ref();
    let outcomes = match outcomes {
        Some(list) => list,
        None => {
            let Some(s) = session else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "missing outcomes (no program open)",
                    None,
                ));
            };
            let Some(designated) = DesignatedSubject::parse(&subject) else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("no outcome field for subject: {}", subject),
                    None,
                ));
            };
            s.selected_codes_for(designated)
        }
    };
    let stage = stage
        .or_else(|| {
            session
                .and_then(|s| s.program().fields.stage)
                .map(|st| st.to_string())
        })
        .unwrap_or_default();

    Ok(IdeaRequest {
        subject,
        outcomes,
        stage,
    })
}

async fn handle_generate(state: &mut AppState, req: &Request) -> Value {
    let Some(client) = state.ideas.clone() else {
        let e = IdeasError::NotConfigured;
        return err(&req.id, e.code(), e.to_string(), None);
    };
    let idea_req = match build_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match client.generate(&idea_req).await {
        Ok(ideas) => {
            let mut result = ideas_json(&ideas);
            result["field"] = json!(DesignatedSubject::parse(&idea_req.subject).map(|d| d.ideas_field()));
            ok(&req.id, result)
        }
        Err(e) => {
            warn!(subject = %idea_req.subject, error = %e, "idea generation failed");
            err(&req.id, e.code(), e.to_string(), None)
        }
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "ideas.generate" => Some(handle_generate(state, req).await),
        _ => None,
    }
}

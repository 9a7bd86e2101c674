use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::editor::{EditorError, EditorSession};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_string_array, required_str, session, session_mut};
use crate::ipc::types::{AppState, Request};

fn editor_err(req: &Request, e: EditorError) -> Value {
    warn!(method = %req.method, code = e.code(), error = %e, "editor request failed");
    err(&req.id, e.code(), e.to_string(), None)
}

fn session_json(session: &EditorSession) -> Value {
    let available = session.available_outcomes().ok();
    json!({
        "slug": session.slug(),
        "program": session.program().to_json(),
        "catalog": session.catalog().summary(),
        "availableOutcomes": available,
        "autosaveEnabled": session.autosave().record_id().is_some(),
    })
}

async fn handle_open(state: &mut AppState, req: &Request) -> Value {
    let slug = match required_str(req, "slug") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let flushed = state.close_session().await;
    if flushed > 0 {
        info!(flushed, "previous session flushed before open");
    }

    let opened = EditorSession::open(
        Arc::clone(&state.backend),
        &slug,
        state.config.autosave_debounce(),
        state.config.outcome_page_size,
    )
    .await;
    match opened {
        Ok(session) => {
            let result = session_json(&session);
            state.session = Some(session);
            ok(&req.id, result)
        }
        Err(e) => editor_err(req, e),
    }
}

fn handle_program(state: &mut AppState, req: &Request) -> Value {
    match session(state, req) {
        Ok(s) => ok(&req.id, session_json(s)),
        Err(e) => e,
    }
}

fn handle_field_change(state: &mut AppState, req: &Request) -> Value {
    let field = match required_str(req, "field") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(value) = req.params.get("value").cloned() else {
        return err(&req.id, "bad_params", "missing value", None);
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match session.handle_field_change(&field, value) {
        Ok(change) => ok(
            &req.id,
            json!({
                "field": field,
                "changed": change.changed,
                "autosave": change.autosave.map(|o| o.as_str()),
            }),
        ),
        Err(e) => editor_err(req, e),
    }
}

fn handle_week_update(state: &mut AppState, req: &Request) -> Value {
    let Some(index) = req.params.get("index").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing index", None);
    };
    let part = match required_str(req, "part") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing text", None);
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match session.update_week(index as usize, &part, text) {
        Ok(change) => ok(
            &req.id,
            json!({
                "changed": change.changed,
                "autosave": change.autosave.map(|o| o.as_str()),
                "weeklyPlans": session.program().fields.weekly_plans,
            }),
        ),
        Err(e) => editor_err(req, e),
    }
}

fn handle_outcomes_available(state: &mut AppState, req: &Request) -> Value {
    let session = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match session.available_outcomes() {
        Ok(list) => ok(
            &req.id,
            json!({
                "stage": session.program().fields.stage,
                "outcomes": list,
            }),
        ),
        Err(e) => editor_err(req, e),
    }
}

fn handle_outcomes_select(state: &mut AppState, req: &Request) -> Value {
    let codes = match parse_string_array(req, "codes") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing codes", None),
        Err(e) => return e,
    };
    let codes: BTreeSet<String> = codes
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match session.select_outcomes(codes) {
        Ok(selection) => ok(&req.id, json!(selection)),
        Err(e) => editor_err(req, e),
    }
}

fn handle_save_status(state: &mut AppState, req: &Request) -> Value {
    let session = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let autosave = session.autosave();
    ok(
        &req.id,
        json!({
            "programId": autosave.record_id().map(|id| id.0),
            "pending": autosave.pending_fields(),
            "fields": autosave.statuses(),
        }),
    )
}

async fn handle_close(state: &mut AppState, req: &Request) -> Value {
    let closed = state.session.is_some();
    let flushed = state.close_session().await;
    ok(&req.id, json!({ "closed": closed, "flushed": flushed }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "editor.open" => Some(handle_open(state, req).await),
        "editor.program" => Some(handle_program(state, req)),
        "editor.fieldChange" => Some(handle_field_change(state, req)),
        "editor.week.update" => Some(handle_week_update(state, req)),
        "editor.outcomes.available" => Some(handle_outcomes_available(state, req)),
        "editor.outcomes.select" => Some(handle_outcomes_select(state, req)),
        "editor.saveStatus" => Some(handle_save_status(state, req)),
        "editor.close" => Some(handle_close(state, req).await),
        _ => None,
    }
}

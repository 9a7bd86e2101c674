use serde_json::{json, Value};

use crate::export::{assessment_model, report_model, DocumentModel};
use crate::ipc::error::ok;
use crate::ipc::helpers::session;
use crate::ipc::types::{AppState, Request};
use crate::model::ProgramFields;

fn handle_model(
    state: &mut AppState,
    req: &Request,
    build: fn(&ProgramFields) -> DocumentModel,
) -> Value {
    match session(state, req) {
        Ok(s) => ok(&req.id, json!(build(&s.program().fields))),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "export.assessmentModel" => Some(handle_model(state, req, assessment_model)),
        "export.reportModel" => Some(handle_model(state, req, report_model)),
        _ => None,
    }
}

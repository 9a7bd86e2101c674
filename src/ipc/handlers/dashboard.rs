use serde_json::{json, Value};
use tracing::warn;

use crate::dashboard::{self, DashboardError, NewProgram, ProgramFilter, PAGE_SIZE};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Stage, TermFocus};

fn dashboard_err(req: &Request, e: DashboardError) -> Value {
    warn!(method = %req.method, error = %e, "dashboard request failed");
    err(&req.id, e.code(), e.to_string(), None)
}

fn parse_term(req: &Request) -> Result<Option<TermFocus>, Value> {
    match opt_str(req, "term")? {
        None => Ok(None),
        Some(raw) => TermFocus::parse(&raw).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("unknown term: {}", raw),
                Some(json!({ "allowed": TermFocus::ALL.iter().map(|t| t.label()).collect::<Vec<_>>() })),
            )
        }),
    }
}

async fn handle_programs_list(state: &mut AppState, req: &Request) -> Value {
    let term = match parse_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match opt_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher = match opt_str(req, "teacher") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match opt_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page = match req.params.get("page") {
        None | Some(Value::Null) => 1,
        Some(v) => match v.as_u64().filter(|p| *p >= 1 && *p <= u32::MAX as u64) {
            Some(p) => p as u32,
            None => return err(&req.id, "bad_params", "page must be a positive integer", None),
        },
    };
    let filter = ProgramFilter {
        term,
        subject,
        teacher,
        title,
        page,
    };

    match dashboard::list_programs(state.backend.as_ref(), &filter).await {
        Ok(programs) => ok(
            &req.id,
            json!({
                "programs": programs,
                "page": page,
                "pageSize": PAGE_SIZE,
            }),
        ),
        Err(e) => dashboard_err(req, e.into()),
    }
}

async fn handle_programs_clone(state: &mut AppState, req: &Request) -> Value {
    let slug = match required_str(req, "slug") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match dashboard::clone_program(state.backend.as_ref(), &slug).await {
        Ok(created) => ok(&req.id, json!(created)),
        Err(e) => dashboard_err(req, e),
    }
}

async fn handle_programs_create(state: &mut AppState, req: &Request) -> Value {
    let mut new = NewProgram::default();
    match opt_str(req, "teacher") {
        Ok(Some(t)) => new.teacher = t,
        Ok(None) => {}
        Err(e) => return e,
    }
    match parse_term(req) {
        Ok(Some(t)) => new.term = t,
        Ok(None) => {}
        Err(e) => return e,
    }
    match opt_str(req, "stage") {
        Ok(Some(raw)) => match Stage::parse(&raw) {
            Some(s) => new.stage = s,
            None => return err(&req.id, "bad_params", format!("unknown stage: {}", raw), None),
        },
        Ok(None) => {}
        Err(e) => return e,
    }
    match req.params.get("year") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_i64().and_then(|y| i32::try_from(y).ok()) {
            Some(y) => new.year = y,
            None => return err(&req.id, "bad_params", "year must be an integer", None),
        },
    }

    match dashboard::create_program(state.backend.as_ref(), &new).await {
        Ok(created) => ok(&req.id, json!(created)),
        Err(e) => dashboard_err(req, e),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.programs.list" => Some(handle_programs_list(state, req).await),
        "dashboard.programs.clone" => Some(handle_programs_clone(state, req).await),
        "dashboard.programs.create" => Some(handle_programs_create(state, req).await),
        _ => None,
    }
}

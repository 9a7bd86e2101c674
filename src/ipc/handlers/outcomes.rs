use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::warn;

use crate::backend::normalize_entry;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_string_array, session};
use crate::ipc::types::{AppState, Request};
use crate::model::Outcome;
use crate::outcomes::{group_outcomes, SUBJECT_ORDER};

/// Catalog items arrive either in the backend's shape or as serialized
/// `Outcome`s (camelCase).
fn parse_catalog(req: &Request, items: &[Value]) -> Result<Vec<Outcome>, Value> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let mut entry = normalize_entry(item).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("catalog[{}]: {}", idx, e),
                None,
            )
        })?;
        if !entry.attributes.contains_key("subject_area") {
            if let Some(v) = entry.attributes.get("subjectArea").cloned() {
                entry.attributes.insert("subject_area".to_string(), v);
            }
        }
        if let Some(o) = Outcome::from_entry(&entry) {
            out.push(o);
        }
    }
    Ok(out)
}

fn handle_group(state: &mut AppState, req: &Request) -> Value {
    let selected: BTreeSet<String> = match parse_string_array(req, "selected") {
        Ok(Some(v)) => v.into_iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect(),
        Ok(None) => return err(&req.id, "bad_params", "missing selected", None),
        Err(e) => return e,
    };

    let owned;
    let catalog: &[Outcome] = match req.params.get("catalog") {
        Some(Value::Array(items)) => match parse_catalog(req, items) {
            Ok(list) => {
                owned = list;
                &owned
            }
            Err(e) => return e,
        },
        None | Some(Value::Null) => {
            let s = match session(state, req) {
                Ok(s) => s,
                Err(e) => return e,
            };
            match s.catalog().outcomes() {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "refusing to group against a partial catalog");
                    return err(&req.id, e.code(), e.to_string(), None);
                }
            }
        }
        Some(_) => return err(&req.id, "bad_params", "catalog must be an array", None),
    };

    let order: Vec<String> = match parse_string_array(req, "subjectOrder") {
        Ok(Some(v)) => v,
        Ok(None) => SUBJECT_ORDER.iter().map(|s| s.to_string()).collect(),
        Err(e) => return e,
    };
    let order: Vec<&str> = order.iter().map(String::as_str).collect();

    let groups = group_outcomes(catalog, &order, &selected);
    ok(&req.id, json!(groups))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "outcomes.group" => Some(handle_group(state, req)),
        _ => None,
    }
}

use serde_json::Value;

use super::error::err;
use super::types::{AppState, Request};
use crate::editor::EditorSession;

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Optional trimmed string; blank counts as absent, non-strings are rejected.
pub fn opt_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        )),
    }
}

pub fn parse_string_array(req: &Request, key: &str) -> Result<Option<Vec<String>>, Value> {
    let Some(v) = req.params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(arr) = v.as_array() else {
        return Err(err(&req.id, "bad_params", format!("{} must be an array", key), None));
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(s) = item.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        out.push(s.to_string());
    }
    Ok(Some(out))
}

pub fn session<'a>(state: &'a AppState, req: &Request) -> Result<&'a EditorSession, Value> {
    state
        .session
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_session", "open a program first", None))
}

pub fn session_mut<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a mut EditorSession, Value> {
    state
        .session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_session", "open a program first", None))
}

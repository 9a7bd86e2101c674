use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub async fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::dashboard::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::editor::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::outcomes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::ideas::try_handle(state, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::export::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

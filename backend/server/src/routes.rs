use axum::{extract::State, response::Response};
use serde_json::json;

use crate::{error::AppError, state::SharedState, utils::ok};

pub mod admin;
pub mod auth;
pub mod children;
pub mod guidelines;
pub mod portal;
pub mod resources;
pub mod schedules;
pub mod users;

pub async fn health_handler(State(state): State<SharedState>) -> Response {
    ok(json!({
        "status": "ok",
        "store": state.store.backend_tag(),
    }))
}

pub async fn not_found_handler() -> AppError {
    AppError::not_found("Route")
}

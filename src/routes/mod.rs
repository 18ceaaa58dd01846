mod achievements;
mod activities;
mod admin;
mod completions;
mod health;
mod users;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Serialize;

use crate::db::DatabaseProxy;
use crate::response::{json_error, AppError};
use crate::state::AppState;

#[derive(Serialize)]
pub(crate) struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(completions::router())
        .merge(users::router())
        .merge(achievements::router())
        .merge(activities::router())
        .nest("/admin", admin::router());

    Router::new()
        .nest("/health", health::router())
        .nest("/api", api)
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}

pub(crate) fn require_db(state: &AppState) -> Result<Arc<DatabaseProxy>, AppError> {
    state
        .db_proxy()
        .ok_or_else(|| AppError::unavailable("database unavailable"))
}

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::response::AppError;
use crate::routes::{require_db, SuccessResponse};
use crate::services::stats;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/:userId/stats", get(get_stats))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    email: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    id: String,
    email: String,
    display_name: String,
    is_admin: bool,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Response, AppError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email is required"));
    }

    let proxy = require_db(&state)?;
    let pool = proxy.pool();
    let user_id = Uuid::new_v4().to_string();

    let inserted = sqlx::query(
        r#"INSERT INTO "users" ("id","email","displayName") VALUES ($1,$2,$3)"#,
    )
    .bind(&user_id)
    .bind(&email)
    .bind(&body.display_name)
    .execute(pool)
    .await;

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            return Err(AppError::conflict("email is already registered"));
        }
        tracing::error!(error = %err, "user insert failed");
        return Err(AppError::internal("registration failed"));
    }

    sqlx::query(r#"INSERT INTO "user_stats" ("userId") VALUES ($1) ON CONFLICT DO NOTHING"#)
        .bind(&user_id)
        .execute(pool)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "stats row insert failed");
            AppError::internal("registration failed")
        })?;

    // Best-effort; individual webhook failures never fail the registration.
    state
        .marketing()
        .announce_registration(&user_id, &email)
        .await;

    Ok(Json(SuccessResponse::new(UserDto {
        id: user_id,
        email,
        display_name: body.display_name,
        is_admin: false,
    }))
    .into_response())
}

async fn get_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let proxy = require_db(&state)?;
    let stats = stats::get_user_stats(proxy.pool(), &user_id).await?;
    Ok(Json(SuccessResponse::new(stats)).into_response())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

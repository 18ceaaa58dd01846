use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::response::AppError;
use crate::routes::{require_db, MessageResponse, SuccessResponse};
use crate::services::stats::{self, CompletionOutcome, QuizSubmission};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lessons/:lessonId/complete", post(complete_lesson))
        .route("/songs/:songId/complete", post(complete_song))
        .route("/chords/:chordId/complete", post(complete_chord))
        .route("/quizzes/:quizId/submit", post(submit_quiz))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteLessonBody {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteSongBody {
    user_id: String,
    #[serde(default)]
    song_title: String,
    #[serde(default)]
    mistakes_count: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteChordBody {
    user_id: String,
    #[serde(default)]
    chord_name: String,
    #[serde(default)]
    is_perfect: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitQuizBody {
    user_id: String,
    #[serde(default)]
    quiz_type: String,
    score: i64,
    total_questions: i64,
}

async fn complete_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<String>,
    Json(body): Json<CompleteLessonBody>,
) -> Result<Response, AppError> {
    validate_user_id(&body.user_id)?;
    let proxy = require_db(&state)?;

    let outcome = stats::record_lesson_completion(
        proxy.pool(),
        state.catalog_cache(),
        state.reward_policy(),
        &body.user_id,
        &lesson_id,
    )
    .await?;

    Ok(completion_response(outcome))
}

async fn complete_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    Json(body): Json<CompleteSongBody>,
) -> Result<Response, AppError> {
    validate_user_id(&body.user_id)?;
    let proxy = require_db(&state)?;

    let outcome = stats::record_song_completion(
        proxy.pool(),
        state.catalog_cache(),
        state.reward_policy(),
        &body.user_id,
        &song_id,
        &body.song_title,
        body.mistakes_count,
    )
    .await?;

    Ok(completion_response(outcome))
}

async fn complete_chord(
    State(state): State<AppState>,
    Path(chord_id): Path<String>,
    Json(body): Json<CompleteChordBody>,
) -> Result<Response, AppError> {
    validate_user_id(&body.user_id)?;
    let proxy = require_db(&state)?;

    let outcome = stats::record_chord_completion(
        proxy.pool(),
        state.catalog_cache(),
        state.reward_policy(),
        &body.user_id,
        &chord_id,
        &body.chord_name,
        body.is_perfect,
    )
    .await?;

    Ok(completion_response(outcome))
}

async fn submit_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<String>,
    Json(body): Json<SubmitQuizBody>,
) -> Result<Response, AppError> {
    validate_user_id(&body.user_id)?;
    let proxy = require_db(&state)?;

    let summary = stats::save_quiz_result(
        proxy.pool(),
        state.catalog_cache(),
        state.orchestrator().as_ref(),
        &body.user_id,
        QuizSubmission {
            quiz_id,
            quiz_type: body.quiz_type,
            score: body.score,
            total_questions: body.total_questions,
        },
    )
    .await?;

    Ok(Json(SuccessResponse::new(summary)).into_response())
}

fn completion_response(outcome: CompletionOutcome) -> Response {
    match outcome {
        CompletionOutcome::AlreadyCompleted => {
            Json(MessageResponse::new("already completed")).into_response()
        }
        CompletionOutcome::Applied(summary) => {
            Json(SuccessResponse::new(*summary)).into_response()
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::validation("userId is required"));
    }
    Ok(())
}

// src/handlers/sessions.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    engine::{
        progress::record_completed_session,
        scope::ScopeDescriptor,
        selection::{DifficultyMode, SelectionRequest, select_questions},
        session::{AnswerSubmission, create_test_session, record_answer},
    },
    error::AppError,
    models::{
        answer::{SubmitAnswerRequest, SubmitAnswerResponse},
        session::{CompleteTestResponse, CreateTestRequest, CreateTestResponse, PreviewResponse},
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Generates a test for the caller and opens a session for it.
///
/// Never-seen questions are served first in a random order; the response
/// carries no grading data.
pub async fn create_test(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let descriptor = ScopeDescriptor::from_request(&payload.scope)?;
    let mode = DifficultyMode::parse(payload.difficulty.as_deref())?;
    let request = SelectionRequest {
        user_id: &claims.sub,
        scope: &descriptor,
        count: payload.count,
        mode,
        shuffle_seed: Some(rand::random()),
    };

    let (session, questions) = create_test_session(
        state.catalog.as_ref(),
        state.repo.as_ref(),
        &request,
        state.config.selection_limits(),
        serde_json::to_value(&payload.scope)?,
        Utc::now(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTestResponse {
            session_id: session.id,
            questions,
        }),
    ))
}

/// Runs the selection without opening a session. Ids only, in serving order.
pub async fn preview_test(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let descriptor = ScopeDescriptor::from_request(&payload.scope)?;
    let request = SelectionRequest {
        user_id: &claims.sub,
        scope: &descriptor,
        count: payload.count,
        mode: DifficultyMode::parse(payload.difficulty.as_deref())?,
        shuffle_seed: None,
    };

    let question_ids = select_questions(
        state.catalog.as_ref(),
        state.repo.as_ref(),
        &request,
        state.config.selection_limits(),
    )
    .await?;

    Ok(Json(PreviewResponse { question_ids }))
}

pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let recorded = record_answer(
        state.catalog.as_ref(),
        state.repo.as_ref(),
        &AnswerSubmission {
            user_id: &claims.sub,
            session_id,
            question_id: payload.question_id,
            answer: &payload.answer,
            latency_ms: payload.latency_ms,
        },
        Utc::now(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitAnswerResponse {
            answer_id: recorded.event.id,
            is_correct: recorded.event.is_correct,
            answered: recorded.answered,
            remaining: recorded.remaining,
        }),
    ))
}

/// Closes the session and folds its answers into topic progress.
/// Repeating the call reports `already_recorded` and changes nothing.
pub async fn complete_test(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = record_completed_session(
        state.catalog.as_ref(),
        state.repo.as_ref(),
        &claims.sub,
        session_id,
        Utc::now(),
    )
    .await?;

    Ok(Json(CompleteTestResponse {
        session_id,
        already_recorded: outcome.already_recorded,
        topics_updated: outcome.topics_updated,
    }))
}

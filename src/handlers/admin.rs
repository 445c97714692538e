// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    engine::{progress::verify_topic_progress, ranking},
    error::AppError,
    handlers::ranking::period_from_params,
    models::{progress::VerifyProgressResponse, ranking::PeriodParams},
    state::AppState,
};

/// Awards champion and podium medals for a closed period.
/// Admin only. Safe to repeat: existing medals come back as `already_awarded`.
pub async fn award_medals(
    State(state): State<AppState>,
    Json(payload): Json<PeriodParams>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let period = period_from_params(&payload)?;
    let min_questions = payload
        .min_questions
        .unwrap_or(state.config.ranking_min_questions);

    let awards =
        ranking::award_medals(state.repo.as_ref(), &period, min_questions, Utc::now()).await?;

    Ok(Json(awards))
}

/// Rebuilds a user's progress cache from the answer log if it drifted.
/// Admin only.
pub async fn verify_progress(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome =
        verify_topic_progress(state.catalog.as_ref(), state.repo.as_ref(), &user_id).await?;

    Ok(Json(VerifyProgressResponse {
        user_id,
        topics_checked: outcome.topics_checked,
        topics_repaired: outcome.topics_repaired,
    }))
}

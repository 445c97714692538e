// src/handlers/progress.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    engine::{progress, readiness::get_exam_readiness, scope::ScopeDescriptor},
    error::AppError,
    models::{progress::TopicProgressView, scope::ScopeRequest},
    state::AppState,
    utils::jwt::Claims,
};

pub async fn get_topic_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(topic): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let view = progress::get_topic_progress(state.repo.as_ref(), &claims.sub, topic).await?;
    Ok(Json(view))
}

/// Every topic the caller has completed at least one test in.
pub async fn list_topic_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state.repo.all_topic_progress(&claims.sub).await?;
    let views: Vec<TopicProgressView> = rows.into_iter().map(Into::into).collect();
    Ok(Json(views))
}

/// Readiness over the posted scope. Returns `insufficient_data` until the
/// caller has answered enough questions in it.
pub async fn get_readiness(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(scope): Json<ScopeRequest>,
) -> Result<impl IntoResponse, AppError> {
    scope.validate()?;
    let descriptor = ScopeDescriptor::from_request(&scope)?;

    let report = get_exam_readiness(
        state.catalog.as_ref(),
        state.repo.as_ref(),
        &claims.sub,
        &descriptor,
        state.config.max_scope_candidates,
        Utc::now(),
    )
    .await?;

    Ok(Json(report))
}

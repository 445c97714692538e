// src/handlers/ranking.rs

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    engine::{
        ranking,
        window::{Period, PeriodKind, TimeWindow},
    },
    error::AppError,
    models::ranking::{PeriodParams, PeriodRankingResponse, RankingParams},
    state::AppState,
    utils::jwt::Claims,
};

/// Parses the period kind of a request into a calendar period.
pub(crate) fn period_from_params(params: &PeriodParams) -> Result<Period, AppError> {
    let kind = PeriodKind::parse(&params.kind).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown period kind '{}', expected day, week or month",
            params.kind
        ))
    })?;
    Ok(Period::containing(kind, params.date)?)
}

/// Leaderboard over an explicit `[start, end)` window.
pub async fn get_ranking(
    State(state): State<AppState>,
    Query(params): Query<RankingParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let window = TimeWindow::new(params.start, params.end)?;
    let min_questions = params
        .min_questions
        .unwrap_or(state.config.ranking_min_questions);

    let entries = ranking::get_ranking(state.repo.as_ref(), &window, min_questions).await?;
    Ok(Json(entries))
}

/// Leaderboard for the day, ISO week or month containing `date`.
pub async fn get_period_ranking(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let period = period_from_params(&params)?;
    let window = period.window()?;
    let min_questions = params
        .min_questions
        .unwrap_or(state.config.ranking_min_questions);

    let entries = ranking::get_ranking(state.repo.as_ref(), &window, min_questions).await?;

    Ok(Json(PeriodRankingResponse {
        period_key: period.key(),
        start: window.start(),
        end: window.end(),
        entries,
    }))
}

pub async fn list_my_medals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let medals = state.repo.user_medals(&claims.sub).await?;
    Ok(Json(medals))
}

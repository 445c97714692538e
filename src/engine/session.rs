// src/engine/session.rs

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::{
    engine::selection::{SelectionLimits, SelectionRequest, select_questions},
    error::{EngineError, StoreError},
    models::{
        answer::{AnswerEvent, NewAnswerEvent},
        question::PublicQuestion,
        session::{NewSession, TestSession},
    },
    store::{Catalog, Repository},
};

/// Selects a batch, stores it as a new test session and returns the
/// client-safe payloads in serving order.
pub async fn create_test_session(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    request: &SelectionRequest<'_>,
    limits: SelectionLimits,
    requested_scope: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(TestSession, Vec<PublicQuestion>), EngineError> {
    let ids = select_questions(catalog, repo, request, limits).await?;

    warn_on_stale_history(repo, request.user_id, &ids).await?;

    let session = repo
        .create_session(NewSession {
            user_id: request.user_id.to_string(),
            created_at: now,
            scope: requested_scope,
            difficulty_mode: request.mode.as_str().to_string(),
            question_ids: ids.clone(),
        })
        .await?;

    let mut by_id: HashMap<i64, PublicQuestion> = catalog
        .public_questions(&ids)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();

    let mut questions = Vec::with_capacity(ids.len());
    for id in &ids {
        let question = by_id.remove(id).ok_or_else(|| {
            StoreError::Corrupt(format!("question {} vanished from the catalog", id))
        })?;
        questions.push(question);
    }

    tracing::info!(
        session_id = session.id,
        user_id = request.user_id,
        questions = questions.len(),
        "test session created"
    );

    Ok((session, questions))
}

/// Logs `StaleHistoryRace` when the batch overlaps another open session
/// of the same user. Never fails the request.
async fn warn_on_stale_history(
    repo: &dyn Repository,
    user_id: &str,
    ids: &[i64],
) -> Result<(), EngineError> {
    let selected: HashSet<i64> = ids.iter().copied().collect();
    for open in repo.open_sessions(user_id).await? {
        let overlap = open
            .question_ids
            .iter()
            .filter(|id| selected.contains(id))
            .count();
        if overlap > 0 {
            tracing::warn!(
                user_id,
                open_session = open.id,
                overlap,
                "StaleHistoryRace: new batch overlaps an open session"
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct AnswerSubmission<'a> {
    pub user_id: &'a str,
    pub session_id: i64,
    pub question_id: i64,
    pub answer: &'a str,
    pub latency_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RecordedAnswer {
    pub event: AnswerEvent,
    pub answered: usize,
    pub remaining: usize,
}

/// Grades and appends one answer to the log.
/// Only the session owner may answer, only while the session is open,
/// and only questions that were served in it, once each.
pub async fn record_answer(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    submission: &AnswerSubmission<'_>,
    now: DateTime<Utc>,
) -> Result<RecordedAnswer, EngineError> {
    let AnswerSubmission {
        user_id,
        session_id,
        question_id,
        answer,
        latency_ms,
    } = *submission;
    let session = owned_session(repo, user_id, session_id).await?;
    if session.is_completed() {
        return Err(EngineError::SessionClosed(session_id));
    }
    if !session.question_ids.contains(&question_id) {
        return Err(EngineError::QuestionNotInSession {
            session_id,
            question_id,
        });
    }

    let key = catalog
        .answer_key(question_id)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("no answer key for question {}", question_id)))?;

    // Simple strict string matching
    let is_correct = answer == key.correct_option;

    let event = repo
        .append_answer(NewAnswerEvent {
            user_id: user_id.to_string(),
            question_id,
            session_id,
            is_correct,
            answered_at: now,
            latency_ms,
        })
        .await
        .map_err(|e| match e {
            StoreError::UniqueViolation(_) => EngineError::AlreadyAnswered(question_id),
            other => EngineError::Store(other),
        })?;

    let answered = repo.session_answers(session_id).await?.len();

    Ok(RecordedAnswer {
        event,
        answered,
        remaining: session.question_ids.len().saturating_sub(answered),
    })
}

/// Loads a session, treating someone else's session as missing.
pub async fn owned_session(
    repo: &dyn Repository,
    user_id: &str,
    session_id: i64,
) -> Result<TestSession, EngineError> {
    repo.get_session(session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or(EngineError::SessionNotFound(session_id))
}

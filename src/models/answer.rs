// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'answer_events' table in the database.
/// Append-only: rows are inserted once and never updated or deleted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AnswerEvent {
    pub id: i64,
    pub user_id: String,
    pub question_id: i64,
    pub session_id: i64,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
    pub latency_ms: i64,
}

/// Insert payload for the answer log.
#[derive(Debug, Clone)]
pub struct NewAnswerEvent {
    pub user_id: String,
    pub question_id: i64,
    pub session_id: i64,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
    pub latency_ms: i64,
}

/// Most recent answer a user gave to one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct LastAnswer {
    pub question_id: i64,
    pub answered_at: DateTime<Utc>,
    pub is_correct: bool,
}

/// DTO for answering one question of an open test.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    #[validate(length(min = 1, max = 500))]
    pub answer: String,
    /// Time the learner spent on the question, as reported by the client.
    #[validate(range(min = 0, max = 86_400_000))]
    pub latency_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub answer_id: i64,
    pub is_correct: bool,
    pub answered: usize,
    pub remaining: usize,
}

// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{question::PublicQuestion, scope::ScopeRequest};

/// Represents the 'test_sessions' table in the database.
/// A session owns the answer events recorded against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub id: i64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,

    /// Scope as requested, kept for auditing and readiness replays.
    pub scope: serde_json::Value,

    pub difficulty_mode: String,

    /// Served question ids, in the order they were served.
    pub question_ids: Vec<i64>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl TestSession {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Insert payload for a new test session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub scope: serde_json::Value,
    pub difficulty_mode: String,
    pub question_ids: Vec<i64>,
}

/// DTO for requesting a new test.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTestRequest {
    #[validate(nested)]
    pub scope: ScopeRequest,

    #[validate(range(min = 1, max = 1000))]
    pub count: usize,

    /// 'random', 'mixed', 'easy', 'medium', 'hard' or 'adaptive'.
    pub difficulty: Option<String>,
}

/// DTO for returning a generated test.
#[derive(Debug, Serialize)]
pub struct CreateTestResponse {
    pub session_id: i64,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub question_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct CompleteTestResponse {
    pub session_id: i64,
    pub already_recorded: bool,
    pub topics_updated: Vec<i32>,
}

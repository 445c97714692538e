// src/models/progress.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'user_topic_progress' table.
/// A cache derived from the answer log; recomputing from the log must
/// reproduce it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserTopicProgress {
    pub user_id: String,
    pub topic_number: i32,
    pub tests_completed: i64,
    /// Cumulative answered questions for the topic across completed tests.
    pub questions_answered: i64,
    /// Running mean of per-test accuracy, in percent.
    pub average_accuracy: f64,
    pub best_accuracy: f64,
    pub current_streak: i64,
    pub last_test_at: Option<DateTime<Utc>>,
    /// Session of the last folded test. With `last_test_at` it marks how
    /// far along the completion order the row is.
    #[serde(skip)]
    pub last_session_id: Option<i64>,
    pub mastered: bool,
    /// Optimistic concurrency counter. Not part of the derived value.
    #[serde(skip)]
    pub version: i64,
}

impl UserTopicProgress {
    pub fn empty(user_id: &str, topic_number: i32) -> Self {
        Self {
            user_id: user_id.to_string(),
            topic_number,
            tests_completed: 0,
            questions_answered: 0,
            average_accuracy: 0.0,
            best_accuracy: 0.0,
            current_streak: 0,
            last_test_at: None,
            last_session_id: None,
            mastered: false,
            version: 0,
        }
    }

    /// `(completed_at, session_id)` of the last folded test, the key
    /// completed sessions are folded by.
    pub fn last_folded(&self) -> Option<(DateTime<Utc>, i64)> {
        Some((self.last_test_at?, self.last_session_id?))
    }

    /// Compares derived fields only, ignoring the version counter.
    pub fn same_values(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.topic_number == other.topic_number
            && self.tests_completed == other.tests_completed
            && self.questions_answered == other.questions_answered
            && (self.average_accuracy - other.average_accuracy).abs() < 1e-9
            && (self.best_accuracy - other.best_accuracy).abs() < 1e-9
            && self.current_streak == other.current_streak
            && self.last_test_at == other.last_test_at
            && self.last_session_id == other.last_session_id
            && self.mastered == other.mastered
    }
}

/// DTO returned by the topic progress endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgressView {
    pub topic: i32,
    pub tests_completed: i64,
    pub questions_answered: i64,
    pub average_accuracy: f64,
    pub best_accuracy: f64,
    pub current_streak: i64,
    pub last_test_at: Option<DateTime<Utc>>,
    pub mastered: bool,
}

impl From<UserTopicProgress> for TopicProgressView {
    fn from(p: UserTopicProgress) -> Self {
        Self {
            topic: p.topic_number,
            tests_completed: p.tests_completed,
            questions_answered: p.questions_answered,
            average_accuracy: p.average_accuracy,
            best_accuracy: p.best_accuracy,
            current_streak: p.current_streak,
            last_test_at: p.last_test_at,
            mastered: p.mastered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadinessComponents {
    pub accuracy: f64,
    pub consistency: f64,
    pub coverage: f64,
    pub retention: f64,
}

/// Exam readiness, or a sentinel when there is too little evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadinessReport {
    InsufficientData {
        answered: i64,
        required: i64,
    },
    Ready {
        score: f64,
        components: ReadinessComponents,
        confidence: Confidence,
        answered: i64,
    },
}

#[derive(Debug, Serialize)]
pub struct VerifyProgressResponse {
    pub user_id: String,
    pub topics_checked: usize,
    pub topics_repaired: Vec<i32>,
}

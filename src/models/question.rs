// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Difficulty label carried by every catalog question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

/// A full catalog question, including grading data.
/// Never serialized to clients; see `PublicQuestion`.
#[derive(Debug, Clone)]
pub struct Question {
    pub id: i64,

    /// Article this question is linked to. Articles belong to laws,
    /// and topics are defined as sections of laws.
    pub article_id: i64,

    pub difficulty: Difficulty,

    pub content: String,

    pub options: Vec<String>,

    /// The correct option, compared verbatim against submitted answers.
    pub correct_option: String,

    pub explanation: Option<String>,

    pub is_active: bool,

    /// Question appeared in an official past exam.
    pub is_official_exam: bool,

    /// Reserve question of an official exam (not graded in the real sitting).
    pub is_reserva: bool,
}

impl Question {
    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            content: self.content.clone(),
            options: self.options.clone(),
            difficulty: self.difficulty,
        }
    }
}

/// DTO for sending a question to the client.
/// Has no answer or explanation field, so grading data cannot leak through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub content: String,
    pub options: Vec<String>,
    pub difficulty: Difficulty,
}

/// Lightweight projection used while resolving a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionMeta {
    pub id: i64,
    pub article_id: i64,
    pub difficulty: Difficulty,
}

/// Correct answer for grading a submission.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerKey {
    pub id: i64,
    pub correct_option: String,
}

/// Section of a law that makes up part of a topic.
/// `None` bounds mean the section covers the whole law.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TopicSection {
    pub topic_number: i32,
    pub law_id: i64,
    pub article_from: Option<i32>,
    pub article_to: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct ArticleRef {
    pub id: i64,
    pub law_id: i64,
    pub number: i32,
}

// src/models/ranking.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Per-user answer counts inside one time window, straight from the log.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserTally {
    pub user_id: String,
    pub total_questions: i64,
    pub correct_answers: i64,
}

/// One leaderboard row. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub position: usize,
    pub user_id: String,
    pub total_questions: i64,
    pub correct_answers: i64,
    /// Percent, 0 to 100.
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedalType {
    /// Rank 1 of the period.
    Champion,
    /// Ranks 2 and 3 of the period.
    Podium,
}

impl MedalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Champion => "champion",
            Self::Podium => "podium",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "champion" => Some(Self::Champion),
            "podium" => Some(Self::Podium),
            _ => None,
        }
    }
}

/// Represents the 'medals' table. Unique on (user_id, medal_type, period_key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medal {
    pub id: i64,
    pub user_id: String,
    pub medal_type: MedalType,
    pub period_key: String,
    pub rank: i32,
    pub accuracy: f64,
    pub awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMedal {
    pub user_id: String,
    pub medal_type: MedalType,
    pub period_key: String,
    pub rank: i32,
    pub accuracy: f64,
    pub awarded_at: DateTime<Utc>,
}

/// Represents the 'medal_periods' table: the one evaluation a closed
/// period gets. Later runs return the medals stored with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodEvaluation {
    pub period_key: String,
    pub min_questions: i64,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedalOutcome {
    Awarded,
    AlreadyAwarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct MedalAward {
    pub user_id: String,
    pub medal_type: MedalType,
    pub period_key: String,
    pub rank: i32,
    pub outcome: MedalOutcome,
}

impl MedalAward {
    pub fn awarded(medal: NewMedal) -> Self {
        Self {
            user_id: medal.user_id,
            medal_type: medal.medal_type,
            period_key: medal.period_key,
            rank: medal.rank,
            outcome: MedalOutcome::Awarded,
        }
    }

    pub fn already_awarded(medal: Medal) -> Self {
        Self {
            user_id: medal.user_id,
            medal_type: medal.medal_type,
            period_key: medal.period_key,
            rank: medal.rank,
            outcome: MedalOutcome::AlreadyAwarded,
        }
    }
}

/// Query parameters for an explicit-window ranking.
#[derive(Debug, Deserialize, Validate)]
pub struct RankingParams {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[validate(range(min = 1, max = 10_000))]
    pub min_questions: Option<i64>,
}

/// Query parameters for a calendar-period ranking or medal run.
#[derive(Debug, Deserialize, Validate)]
pub struct PeriodParams {
    /// 'day', 'week' or 'month'.
    pub kind: String,
    pub date: NaiveDate,
    #[validate(range(min = 1, max = 10_000))]
    pub min_questions: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PeriodRankingResponse {
    pub period_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub entries: Vec<RankingEntry>,
}

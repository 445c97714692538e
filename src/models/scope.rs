// src/models/scope.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Wire form of a scope descriptor. Every field is optional; the engine
/// normalizes it into a `ScopeDescriptor` before doing anything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRequest {
    #[validate(length(max = 200))]
    pub topic_numbers: Option<Vec<i32>>,

    #[validate(length(max = 200))]
    pub law_ids: Option<Vec<i64>>,

    #[validate(length(max = 200))]
    #[validate(nested)]
    pub article_ranges: Option<Vec<ArticleRangeRequest>>,

    pub official_exam_only: Option<bool>,

    pub exclude_reserva: Option<bool>,
}

/// Inclusive range of article numbers inside one law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRangeRequest {
    pub law_id: i64,
    #[validate(range(min = 0))]
    pub from: i32,
    #[validate(range(min = 0))]
    pub to: i32,
}

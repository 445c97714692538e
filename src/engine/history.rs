// src/engine/history.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    engine::scope::ResolvedScope,
    error::EngineError,
    models::answer::LastAnswer,
    store::Repository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenQuestion {
    pub question_id: i64,
    pub last_answered_at: DateTime<Utc>,
    pub last_was_correct: bool,
}

/// A scope's questions split by whether the user ever answered them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPartition {
    /// Ascending ids never answered by the user.
    pub never_seen: Vec<i64>,
    /// Previously answered ids, in ascending id order.
    pub seen: Vec<SeenQuestion>,
}

impl HistoryPartition {
    /// Splits `scope` using the user's latest answers.
    /// Answers for questions outside `scope` are ignored.
    pub fn build(scope: &ResolvedScope, last_answers: &[LastAnswer]) -> Self {
        let latest: HashMap<i64, &LastAnswer> = last_answers
            .iter()
            .filter(|a| scope.contains(a.question_id))
            .fold(HashMap::new(), |mut acc, a| {
                let keep = acc
                    .get(&a.question_id)
                    .is_none_or(|prev: &&LastAnswer| a.answered_at > prev.answered_at);
                if keep {
                    acc.insert(a.question_id, a);
                }
                acc
            });

        let mut partition = HistoryPartition::default();
        for id in scope.question_ids() {
            match latest.get(&id) {
                Some(answer) => partition.seen.push(SeenQuestion {
                    question_id: id,
                    last_answered_at: answer.answered_at,
                    last_was_correct: answer.is_correct,
                }),
                None => partition.never_seen.push(id),
            }
        }
        partition
    }
}

/// Reads a user's answer history for one scope.
/// History is always read against a resolved scope; there is no unscoped variant.
pub struct HistoryTracker<'a> {
    repo: &'a dyn Repository,
}

impl<'a> HistoryTracker<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self { repo }
    }

    pub async fn partition(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<HistoryPartition, EngineError> {
        if scope.is_empty() {
            return Ok(HistoryPartition::default());
        }
        let last_answers = self.repo.last_answers(user_id, scope).await?;
        let partition = HistoryPartition::build(scope, &last_answers);

        tracing::debug!(
            user_id,
            never_seen = partition.never_seen.len(),
            seen = partition.seen.len(),
            "history partitioned"
        );

        Ok(partition)
    }
}

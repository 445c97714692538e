// src/engine/selection.rs

//! Selection planner: composes scope resolution, the question pool and the
//! user's scoped history into an ordered batch of distinct question ids.

use std::collections::HashSet;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Serialize;

use crate::{
    engine::{
        history::{HistoryPartition, HistoryTracker, SeenQuestion},
        pool::QuestionPool,
        scope::{ScopeDescriptor, resolve_scope},
    },
    error::EngineError,
    models::question::Difficulty,
    store::{Catalog, Repository},
};

/// How difficulty shapes a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyMode {
    /// No filter.
    Random,
    /// Exact difficulty match.
    Fixed(Difficulty),
    /// No filter; previously failed questions are repeated first.
    Adaptive,
}

impl DifficultyMode {
    /// Parses the UI value. An absent value and "mixed" both mean random.
    pub fn parse(value: Option<&str>) -> Result<Self, EngineError> {
        let Some(value) = value else {
            return Ok(Self::Random);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "random" | "mixed" => Ok(Self::Random),
            "adaptive" => Ok(Self::Adaptive),
            other => Difficulty::parse(other).map(Self::Fixed).ok_or_else(|| {
                EngineError::InvalidRequest(format!("unknown difficulty mode '{}'", other))
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Fixed(d) => d.as_str(),
            Self::Adaptive => "adaptive",
        }
    }

    /// Filter applied by the pool. Adaptive ordering happens in the planner.
    fn pool_filter(&self) -> Option<Difficulty> {
        match self {
            Self::Fixed(d) => Some(*d),
            Self::Random | Self::Adaptive => None,
        }
    }
}

/// Limits passed in explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_candidates: usize,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub user_id: &'a str,
    pub scope: &'a ScopeDescriptor,
    pub count: usize,
    pub mode: DifficultyMode,
    /// Shuffles the never-seen block with a seeded RNG. `None` keeps
    /// ascending id order.
    pub shuffle_seed: Option<u64>,
}

/// Orders candidates and takes exactly `count` of them.
///
/// Never-seen questions come first, then seen ones from least to most
/// recently answered. In adaptive mode previously wrong answers precede
/// previously right ones. Fails instead of returning a short batch.
pub fn plan_batch(
    pool: &QuestionPool<'_>,
    partition: &HistoryPartition,
    count: usize,
    mode: DifficultyMode,
    shuffle_seed: Option<u64>,
) -> Result<Vec<i64>, EngineError> {
    let filter = mode.pool_filter();
    let available = pool.count_matching(filter);
    if available < count {
        return Err(EngineError::InsufficientPool {
            requested: count,
            available,
        });
    }

    let seen_ids: HashSet<i64> = partition.seen.iter().map(|s| s.question_id).collect();
    // Unshuffled, only the lowest `count` never-seen ids can make the batch.
    let limit = if shuffle_seed.is_some() {
        available
    } else {
        count
    };
    let mut never_seen = pool.sample(filter, &seen_ids, limit);
    if let Some(seed) = shuffle_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        never_seen.shuffle(&mut rng);
    }

    let mut seen: Vec<&SeenQuestion> = partition
        .seen
        .iter()
        .filter(|s| pool.admits(s.question_id, filter))
        .collect();
    seen.sort_by(|a, b| {
        let wrong_first = if mode == DifficultyMode::Adaptive {
            a.last_was_correct.cmp(&b.last_was_correct)
        } else {
            std::cmp::Ordering::Equal
        };
        wrong_first
            .then(a.last_answered_at.cmp(&b.last_answered_at))
            .then(a.question_id.cmp(&b.question_id))
    });

    let mut taken = HashSet::with_capacity(count);
    let mut batch = Vec::with_capacity(count);
    let candidates = never_seen
        .into_iter()
        .chain(seen.into_iter().map(|s| s.question_id));
    for id in candidates {
        if batch.len() == count {
            break;
        }
        if taken.insert(id) {
            batch.push(id);
        }
    }

    if batch.len() < count {
        return Err(EngineError::InsufficientPool {
            requested: count,
            available: batch.len(),
        });
    }

    Ok(batch)
}

/// `selectQuestions`: exactly `count` distinct ids from the scope, or a typed
/// failure the caller can act on.
pub async fn select_questions(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    request: &SelectionRequest<'_>,
    limits: SelectionLimits,
) -> Result<Vec<i64>, EngineError> {
    if request.count == 0 {
        return Err(EngineError::InvalidRequest(
            "count must be at least 1".to_string(),
        ));
    }
    if request.count > limits.max_batch_size {
        return Err(EngineError::InvalidRequest(format!(
            "count {} exceeds the maximum batch size of {}",
            request.count, limits.max_batch_size
        )));
    }

    let scope = resolve_scope(catalog, request.scope, limits.max_candidates).await?;
    let pool = QuestionPool::new(&scope);
    let partition = HistoryTracker::new(repo)
        .partition(request.user_id, &scope)
        .await?;

    let batch = plan_batch(
        &pool,
        &partition,
        request.count,
        request.mode,
        request.shuffle_seed,
    )
    .inspect_err(|e| {
        tracing::info!(
            user_id = request.user_id,
            pool = pool.count(),
            eligible = pool.count_matching(request.mode.pool_filter()),
            requested = request.count,
            "selection rejected: {}",
            e
        )
    })?;

    let fresh = batch
        .iter()
        .filter(|id| partition.never_seen.contains(id))
        .count();
    tracing::info!(
        user_id = request.user_id,
        mode = request.mode.as_str(),
        pool = pool.count(),
        selected = batch.len(),
        fresh,
        "questions selected"
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scope::{ResolvedScope, ScopedQuestion};
    use chrono::{DateTime, Utc};

    fn scope(levels: &[(i64, Difficulty)]) -> ResolvedScope {
        ResolvedScope::from_questions(levels.iter().map(|(id, d)| {
            (
                *id,
                ScopedQuestion {
                    difficulty: *d,
                    topics: Default::default(),
                },
            )
        }))
    }

    fn seen(question_id: i64, ts: &str, correct: bool) -> SeenQuestion {
        SeenQuestion {
            question_id,
            last_answered_at: ts.parse::<DateTime<Utc>>().unwrap(),
            last_was_correct: correct,
        }
    }

    fn medium_scope(n: i64) -> ResolvedScope {
        scope(&(1..=n).map(|i| (i, Difficulty::Medium)).collect::<Vec<_>>())
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(DifficultyMode::parse(None).unwrap(), DifficultyMode::Random);
        assert_eq!(DifficultyMode::parse(Some("mixed")).unwrap(), DifficultyMode::Random);
        assert_eq!(
            DifficultyMode::parse(Some("HARD")).unwrap(),
            DifficultyMode::Fixed(Difficulty::Hard)
        );
        assert_eq!(DifficultyMode::parse(Some("adaptive")).unwrap(), DifficultyMode::Adaptive);
        assert!(DifficultyMode::parse(Some("brutal")).is_err());
    }

    #[test]
    fn test_never_seen_only_when_enough() {
        let scope = medium_scope(10);
        let pool = QuestionPool::new(&scope);
        let partition = HistoryPartition {
            never_seen: vec![2, 4, 6, 8, 10],
            seen: vec![
                seen(1, "2026-01-01T00:00:00Z", true),
                seen(3, "2026-01-01T00:00:00Z", true),
                seen(5, "2026-01-01T00:00:00Z", true),
                seen(7, "2026-01-01T00:00:00Z", true),
                seen(9, "2026-01-01T00:00:00Z", true),
            ],
        };

        for seed in [None, Some(1), Some(42), Some(7_777)] {
            let batch = plan_batch(&pool, &partition, 5, DifficultyMode::Random, seed).unwrap();
            let mut sorted = batch.clone();
            sorted.sort();
            assert_eq!(sorted, vec![2, 4, 6, 8, 10]);
        }
    }

    #[test]
    fn test_seen_ordered_least_recent_first() {
        let scope = medium_scope(5);
        let pool = QuestionPool::new(&scope);
        let partition = HistoryPartition {
            never_seen: vec![5],
            seen: vec![
                seen(1, "2026-01-04T00:00:00Z", false),
                seen(2, "2026-01-02T00:00:00Z", true),
                seen(3, "2026-01-03T00:00:00Z", false),
                seen(4, "2026-01-01T00:00:00Z", true),
            ],
        };

        let batch = plan_batch(&pool, &partition, 5, DifficultyMode::Random, None).unwrap();
        assert_eq!(batch, vec![5, 4, 2, 3, 1]);
    }

    #[test]
    fn test_adaptive_repeats_wrong_answers_first() {
        let scope = medium_scope(5);
        let pool = QuestionPool::new(&scope);
        let partition = HistoryPartition {
            never_seen: vec![5],
            seen: vec![
                seen(1, "2026-01-04T00:00:00Z", false),
                seen(2, "2026-01-02T00:00:00Z", true),
                seen(3, "2026-01-03T00:00:00Z", false),
                seen(4, "2026-01-01T00:00:00Z", true),
            ],
        };

        let batch = plan_batch(&pool, &partition, 4, DifficultyMode::Adaptive, None).unwrap();
        assert_eq!(batch, vec![5, 3, 1, 4]);
    }

    #[test]
    fn test_fixed_difficulty_filters_before_counting() {
        let scope = scope(&[
            (1, Difficulty::Easy),
            (2, Difficulty::Hard),
            (3, Difficulty::Hard),
            (4, Difficulty::Easy),
        ]);
        let pool = QuestionPool::new(&scope);
        let partition = HistoryPartition {
            never_seen: vec![1, 2, 3, 4],
            seen: vec![],
        };

        let hard = DifficultyMode::Fixed(Difficulty::Hard);
        let batch = plan_batch(&pool, &partition, 2, hard, None).unwrap();
        assert_eq!(batch, vec![2, 3]);

        let err = plan_batch(&pool, &partition, 3, hard, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientPool {
                requested: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn test_exact_count_no_duplicates() {
        let scope = medium_scope(30);
        let pool = QuestionPool::new(&scope);
        let partition = HistoryPartition {
            never_seen: (1..=10).collect(),
            seen: (11..=30)
                .map(|id| seen(id, "2026-01-01T00:00:00Z", id % 2 == 0))
                .collect(),
        };

        for count in 1..=30 {
            let batch =
                plan_batch(&pool, &partition, count, DifficultyMode::Adaptive, Some(count as u64))
                    .unwrap();
            assert_eq!(batch.len(), count);
            let unique: HashSet<i64> = batch.iter().copied().collect();
            assert_eq!(unique.len(), count);
        }
    }

    #[test]
    fn test_only_pool_ids_are_selected() {
        let scope = medium_scope(3);
        let pool = QuestionPool::new(&scope);
        // Ids 7, 8 and 9 are not in the pool and must never be selected.
        let partition = HistoryPartition {
            never_seen: vec![1, 7, 8],
            seen: vec![seen(9, "2026-01-01T00:00:00Z", false)],
        };

        let batch = plan_batch(&pool, &partition, 3, DifficultyMode::Adaptive, None).unwrap();
        assert_eq!(batch, vec![1, 2, 3]);

        let err = plan_batch(&pool, &partition, 4, DifficultyMode::Random, None).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientPool { available: 3, .. }));
    }
}

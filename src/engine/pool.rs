// src/engine/pool.rs

use std::collections::HashSet;

use crate::{engine::scope::ResolvedScope, models::question::Difficulty};

/// Queryable view over a resolved scope.
///
/// `None` as a filter means any difficulty. UI-level values such as
/// "mixed" or "adaptive" never reach the pool; the planner maps them first.
#[derive(Debug, Clone, Copy)]
pub struct QuestionPool<'a> {
    scope: &'a ResolvedScope,
}

impl<'a> QuestionPool<'a> {
    pub fn new(scope: &'a ResolvedScope) -> Self {
        Self { scope }
    }

    pub fn count(&self) -> usize {
        self.scope.len()
    }

    pub fn count_matching(&self, filter: Option<Difficulty>) -> usize {
        self.matching(filter).count()
    }

    /// Up to `limit` ids matching `filter`, ascending, skipping `exclude`.
    pub fn sample(
        &self,
        filter: Option<Difficulty>,
        exclude: &HashSet<i64>,
        limit: usize,
    ) -> Vec<i64> {
        self.matching(filter)
            .filter(|id| !exclude.contains(id))
            .take(limit)
            .collect()
    }

    /// Whether `id` is in the pool and matches `filter`.
    pub fn admits(&self, id: i64, filter: Option<Difficulty>) -> bool {
        self.scope
            .get(id)
            .is_some_and(|q| filter.is_none_or(|d| q.difficulty == d))
    }

    fn matching(&self, filter: Option<Difficulty>) -> impl Iterator<Item = i64> + 'a {
        self.scope
            .iter()
            .filter(move |(_, q)| filter.is_none_or(|d| q.difficulty == d))
            .map(|(id, _)| id)
    }
}

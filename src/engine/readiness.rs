// src/engine/readiness.rs

//! Composite exam-readiness score for a scope.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::{
    engine::scope::{ResolvedScope, ScopeDescriptor, resolve_scope},
    error::EngineError,
    models::{
        answer::AnswerEvent,
        progress::{Confidence, ReadinessComponents, ReadinessReport},
    },
    store::{Catalog, Repository},
};

/// Below this many in-scope answers no score is produced.
pub const MIN_ANSWERS_FOR_READINESS: i64 = 20;

pub const ACCURACY_WEIGHT: f64 = 0.40;
pub const CONSISTENCY_WEIGHT: f64 = 0.20;
pub const COVERAGE_WEIGHT: f64 = 0.20;
pub const RETENTION_WEIGHT: f64 = 0.20;

/// Number of most recent completed tests used for consistency.
pub const CONSISTENCY_WINDOW: usize = 10;

/// Points lost per percentage point of standard deviation.
pub const CONSISTENCY_STDDEV_PENALTY: f64 = 2.0;

/// Consistency reported while fewer than two tests exist.
pub const NEUTRAL_CONSISTENCY: f64 = 50.0;

/// Questions last answered longer ago than this feed retention.
pub const RETENTION_AGE_DAYS: i64 = 14;

pub const LOW_CONFIDENCE_BELOW: i64 = 100;
pub const MEDIUM_CONFIDENCE_BELOW: i64 = 300;

pub fn confidence_for(answered: i64) -> Confidence {
    if answered < LOW_CONFIDENCE_BELOW {
        Confidence::Low
    } else if answered < MEDIUM_CONFIDENCE_BELOW {
        Confidence::Medium
    } else {
        Confidence::High
    }
}

/// Everything the score is computed from.
pub struct ReadinessInput<'a> {
    pub scope: &'a ResolvedScope,
    /// The user's in-scope answers.
    pub events: &'a [AnswerEvent],
    /// Completion time of each completed session of the user.
    pub completed_sessions: &'a HashMap<i64, DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub fn compute_readiness(input: &ReadinessInput<'_>) -> ReadinessReport {
    let events: Vec<&AnswerEvent> = input
        .events
        .iter()
        .filter(|e| input.scope.contains(e.question_id))
        .collect();
    let answered = events.len() as i64;

    if answered < MIN_ANSWERS_FOR_READINESS {
        return ReadinessReport::InsufficientData {
            answered,
            required: MIN_ANSWERS_FOR_READINESS,
        };
    }

    let correct = events.iter().filter(|e| e.is_correct).count() as f64;
    let accuracy = correct * 100.0 / answered as f64;

    let components = ReadinessComponents {
        accuracy,
        consistency: consistency(&events, input.completed_sessions),
        coverage: coverage(&events, input.scope, input.completed_sessions),
        retention: retention(&events, accuracy, input.now),
    };

    let score = ACCURACY_WEIGHT * components.accuracy
        + CONSISTENCY_WEIGHT * components.consistency
        + COVERAGE_WEIGHT * components.coverage
        + RETENTION_WEIGHT * components.retention;

    ReadinessReport::Ready {
        score: round1(score.clamp(0.0, 100.0)),
        components: ReadinessComponents {
            accuracy: round1(components.accuracy),
            consistency: round1(components.consistency),
            coverage: round1(components.coverage),
            retention: round1(components.retention),
        },
        confidence: confidence_for(answered),
        answered,
    }
}

/// Inverse spread of per-test accuracy over the most recent tests.
fn consistency(events: &[&AnswerEvent], completed: &HashMap<i64, DateTime<Utc>>) -> f64 {
    let mut per_test: HashMap<i64, (f64, f64)> = HashMap::new();
    for e in events {
        if completed.contains_key(&e.session_id) {
            let entry = per_test.entry(e.session_id).or_default();
            entry.0 += 1.0;
            if e.is_correct {
                entry.1 += 1.0;
            }
        }
    }

    let mut tests: Vec<(DateTime<Utc>, i64, f64)> = per_test
        .into_iter()
        .map(|(session_id, (n, c))| (completed[&session_id], session_id, c * 100.0 / n))
        .collect();
    tests.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let recent: Vec<f64> = tests
        .iter()
        .rev()
        .take(CONSISTENCY_WINDOW)
        .map(|t| t.2)
        .collect();
    if recent.len() < 2 {
        return NEUTRAL_CONSISTENCY;
    }

    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let variance = recent.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / recent.len() as f64;
    (100.0 - CONSISTENCY_STDDEV_PENALTY * variance.sqrt()).clamp(0.0, 100.0)
}

/// Share of scope topics with at least one completed test. Scopes without
/// topic linkage use the share of scope questions answered instead.
fn coverage(
    events: &[&AnswerEvent],
    scope: &ResolvedScope,
    completed: &HashMap<i64, DateTime<Utc>>,
) -> f64 {
    if scope.is_empty() {
        return 0.0;
    }

    if scope.topics().is_empty() {
        let seen: HashSet<i64> = events.iter().map(|e| e.question_id).collect();
        return seen.len() as f64 * 100.0 / scope.len() as f64;
    }

    let covered: BTreeSet<i32> = events
        .iter()
        .filter(|e| completed.contains_key(&e.session_id))
        .filter_map(|e| scope.get(e.question_id))
        .flat_map(|q| q.topics.iter().copied())
        .collect();

    covered.len() as f64 * 100.0 / scope.topics().len() as f64
}

/// Accuracy on questions not revisited for `RETENTION_AGE_DAYS`, relative
/// to overall accuracy. 100 means no sign of forgetting.
fn retention(events: &[&AnswerEvent], overall_accuracy: f64, now: DateTime<Utc>) -> f64 {
    let mut latest: BTreeMap<i64, &AnswerEvent> = BTreeMap::new();
    for e in events {
        let newer = latest
            .get(&e.question_id)
            .is_none_or(|prev| (e.answered_at, e.id) > (prev.answered_at, prev.id));
        if newer {
            latest.insert(e.question_id, e);
        }
    }

    let cutoff = now - Duration::days(RETENTION_AGE_DAYS);
    let stale: Vec<&&AnswerEvent> = latest.values().filter(|e| e.answered_at < cutoff).collect();
    if stale.is_empty() {
        return 100.0;
    }
    if overall_accuracy <= 0.0 {
        return 0.0;
    }

    let stale_accuracy =
        stale.iter().filter(|e| e.is_correct).count() as f64 * 100.0 / stale.len() as f64;
    (100.0 * stale_accuracy / overall_accuracy).min(100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `getExamReadiness` for a user over a scope.
pub async fn get_exam_readiness(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
    descriptor: &ScopeDescriptor,
    max_candidates: usize,
    now: DateTime<Utc>,
) -> Result<ReadinessReport, EngineError> {
    let scope = resolve_scope(catalog, descriptor, max_candidates).await?;
    let events = if scope.is_empty() {
        Vec::new()
    } else {
        repo.answers_in_scope(user_id, &scope).await?
    };
    let completed_sessions: HashMap<i64, DateTime<Utc>> = repo
        .completed_sessions(user_id)
        .await?
        .into_iter()
        .filter_map(|s| s.completed_at.map(|at| (s.id, at)))
        .collect();

    let report = compute_readiness(&ReadinessInput {
        scope: &scope,
        events: &events,
        completed_sessions: &completed_sessions,
        now,
    });

    match &report {
        ReadinessReport::InsufficientData { answered, .. } => {
            tracing::debug!(user_id, answered, "readiness: insufficient data")
        }
        ReadinessReport::Ready { score, .. } => {
            tracing::debug!(user_id, score, "readiness computed")
        }
    }

    Ok(report)
}

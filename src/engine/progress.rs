// src/engine/progress.rs

//! Per-user, per-topic progress folded from completed sessions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::{
    engine::session::owned_session,
    error::EngineError,
    models::{
        answer::AnswerEvent,
        progress::{TopicProgressView, UserTopicProgress},
    },
    store::{Catalog, Repository},
};

/// A test at or above this accuracy extends the streak.
pub const STREAK_ACCURACY_THRESHOLD: f64 = 70.0;

/// Cumulative answers needed before a topic can be mastered.
pub const MASTERY_MIN_ANSWERS: i64 = 10;

/// Average accuracy a topic must exceed to be mastered.
pub const MASTERY_ACCURACY_THRESHOLD: f64 = 80.0;

/// Compare-and-swap attempts per topic before giving up.
pub const MAX_AGGREGATION_RETRIES: usize = 5;

/// Outcome of one completed test for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicTestResult {
    pub topic: i32,
    pub answered: i64,
    pub correct: i64,
}

impl TopicTestResult {
    /// Accuracy in percent.
    pub fn accuracy(&self) -> f64 {
        if self.answered == 0 {
            return 0.0;
        }
        self.correct as f64 * 100.0 / self.answered as f64
    }
}

/// Groups a session's answers by the topics their questions belong to.
/// A question linked to several topics counts for each of them.
pub fn topic_results(
    events: &[AnswerEvent],
    topics_by_question: &HashMap<i64, BTreeSet<i32>>,
) -> Vec<TopicTestResult> {
    let mut by_topic: BTreeMap<i32, (i64, i64)> = BTreeMap::new();
    for event in events {
        let Some(topics) = topics_by_question.get(&event.question_id) else {
            continue;
        };
        for topic in topics {
            let entry = by_topic.entry(*topic).or_default();
            entry.0 += 1;
            if event.is_correct {
                entry.1 += 1;
            }
        }
    }
    by_topic
        .into_iter()
        .map(|(topic, (answered, correct))| TopicTestResult {
            topic,
            answered,
            correct,
        })
        .collect()
}

/// Folds one test into a topic's progress. Tests must be folded in
/// `(completed_at, session_id)` order for the row to match a recompute.
pub fn apply_test(
    progress: &UserTopicProgress,
    result: &TopicTestResult,
    session_id: i64,
    completed_at: DateTime<Utc>,
) -> UserTopicProgress {
    let accuracy = result.accuracy();
    let tests_completed = progress.tests_completed + 1;
    let average_accuracy = (progress.average_accuracy * progress.tests_completed as f64
        + accuracy)
        / tests_completed as f64;
    let best_accuracy = if progress.tests_completed == 0 {
        accuracy
    } else {
        progress.best_accuracy.max(accuracy)
    };
    let current_streak = if accuracy >= STREAK_ACCURACY_THRESHOLD {
        progress.current_streak + 1
    } else {
        0
    };
    let questions_answered = progress.questions_answered + result.answered;

    UserTopicProgress {
        user_id: progress.user_id.clone(),
        topic_number: progress.topic_number,
        tests_completed,
        questions_answered,
        average_accuracy,
        best_accuracy,
        current_streak,
        last_test_at: Some(completed_at),
        last_session_id: Some(session_id),
        mastered: questions_answered >= MASTERY_MIN_ANSWERS
            && average_accuracy > MASTERY_ACCURACY_THRESHOLD,
        version: progress.version,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub already_recorded: bool,
    pub topics_updated: Vec<i32>,
}

/// `recordCompletedSession`: marks the session completed once and folds its
/// answers into topic progress.
///
/// Calling it again reports `already_recorded` and only writes topics whose
/// rows are still missing this session, so a completion that failed halfway
/// can be retried.
pub async fn record_completed_session(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
    session_id: i64,
    now: DateTime<Utc>,
) -> Result<CompletionOutcome, EngineError> {
    let session = owned_session(repo, user_id, session_id).await?;
    let (completed_at, already_recorded) = match session.completed_at {
        Some(completed_at) => (completed_at, true),
        None if repo.mark_session_completed(session_id, now).await? => (now, false),
        None => {
            // Another request marked it between our read and our write
            let session = owned_session(repo, user_id, session_id).await?;
            let completed_at = session
                .completed_at
                .ok_or(EngineError::SessionNotFound(session_id))?;
            (completed_at, true)
        }
    };

    let events = repo.session_answers(session_id).await?;
    let question_ids: Vec<i64> = events.iter().map(|e| e.question_id).collect();
    let topics_by_question = if question_ids.is_empty() {
        HashMap::new()
    } else {
        catalog.topics_for_questions(&question_ids).await?
    };

    let mut topics_updated = Vec::new();
    for result in topic_results(&events, &topics_by_question) {
        if fold_with_retry(catalog, repo, user_id, &result, session_id, completed_at).await? {
            topics_updated.push(result.topic);
        }
    }

    if already_recorded {
        tracing::debug!(
            session_id,
            topics = topics_updated.len(),
            "session already recorded"
        );
    } else {
        tracing::info!(
            session_id,
            user_id,
            answers = events.len(),
            topics = topics_updated.len(),
            "session recorded"
        );
    }

    Ok(CompletionOutcome {
        already_recorded,
        topics_updated,
    })
}

/// Optimistic read-modify-write of one (user, topic) row.
///
/// A test later in completion order than the row's last folded test is
/// applied as a delta. One that sorts before it arrived out of order, so
/// the row is rebuilt from the log instead. Returns whether the row changed.
async fn fold_with_retry(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
    result: &TopicTestResult,
    session_id: i64,
    completed_at: DateTime<Utc>,
) -> Result<bool, EngineError> {
    let key = (completed_at, session_id);

    for attempt in 1..=MAX_AGGREGATION_RETRIES {
        let current = repo
            .topic_progress(user_id, result.topic)
            .await?
            .unwrap_or_else(|| UserTopicProgress::empty(user_id, result.topic));

        let next = match current.last_folded() {
            Some(last) if last == key => return Ok(false),
            Some(last) if last > key => {
                let mut rebuilt = recompute_topic(catalog, repo, user_id, result.topic).await?;
                if rebuilt.same_values(&current) {
                    return Ok(false);
                }
                tracing::debug!(
                    user_id,
                    topic = result.topic,
                    session_id,
                    "completion arrived out of order, rebuilding topic"
                );
                rebuilt.version = current.version;
                rebuilt
            }
            _ => apply_test(&current, result, session_id, completed_at),
        };

        if repo.save_topic_progress(&next).await? {
            return Ok(true);
        }
        tracing::debug!(
            user_id,
            topic = result.topic,
            attempt,
            "progress write conflicted, retrying"
        );
    }

    tracing::error!(user_id, topic = result.topic, "AggregationConflict: retries exhausted");
    Err(EngineError::AggregationConflict {
        topic: result.topic,
    })
}

async fn recompute_topic(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
    topic: i32,
) -> Result<UserTopicProgress, EngineError> {
    Ok(recompute_topic_progress(catalog, repo, user_id)
        .await?
        .into_iter()
        .find(|p| p.topic_number == topic)
        .unwrap_or_else(|| UserTopicProgress::empty(user_id, topic)))
}

/// Rebuilds every topic row of a user from the answer log alone, folding
/// completed sessions in `(completed_at, id)` order.
pub async fn recompute_topic_progress(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
) -> Result<Vec<UserTopicProgress>, EngineError> {
    let mut rows: BTreeMap<i32, UserTopicProgress> = BTreeMap::new();

    for session in repo.completed_sessions(user_id).await? {
        let Some(completed_at) = session.completed_at else {
            continue;
        };
        let events = repo.session_answers(session.id).await?;
        if events.is_empty() {
            continue;
        }
        let question_ids: Vec<i64> = events.iter().map(|e| e.question_id).collect();
        let topics_by_question = catalog.topics_for_questions(&question_ids).await?;

        for result in topic_results(&events, &topics_by_question) {
            let current = rows
                .remove(&result.topic)
                .unwrap_or_else(|| UserTopicProgress::empty(user_id, result.topic));
            rows.insert(
                result.topic,
                apply_test(&current, &result, session.id, completed_at),
            );
        }
    }

    Ok(rows.into_values().collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub topics_checked: usize,
    pub topics_repaired: Vec<i32>,
}

/// Compares the cached rows with a fresh recomputation and rewrites the
/// cache from the log when they disagree.
pub async fn verify_topic_progress(
    catalog: &dyn Catalog,
    repo: &dyn Repository,
    user_id: &str,
) -> Result<VerifyOutcome, EngineError> {
    let fresh = recompute_topic_progress(catalog, repo, user_id).await?;
    let cached: BTreeMap<i32, UserTopicProgress> = repo
        .all_topic_progress(user_id)
        .await?
        .into_iter()
        .map(|p| (p.topic_number, p))
        .collect();
    let fresh_by_topic: BTreeMap<i32, &UserTopicProgress> =
        fresh.iter().map(|p| (p.topic_number, p)).collect();

    let topics: BTreeSet<i32> = cached
        .keys()
        .chain(fresh_by_topic.keys())
        .copied()
        .collect();

    let repaired: Vec<i32> = topics
        .iter()
        .copied()
        .filter(|topic| match (cached.get(topic), fresh_by_topic.get(topic)) {
            (Some(c), Some(f)) => !c.same_values(f),
            _ => true,
        })
        .collect();

    if !repaired.is_empty() {
        tracing::warn!(
            user_id,
            topics = ?repaired,
            "progress cache disagrees with answer log, rebuilding"
        );
        repo.replace_topic_progress(user_id, &fresh).await?;
    }

    Ok(VerifyOutcome {
        topics_checked: topics.len(),
        topics_repaired: repaired,
    })
}

/// `getTopicProgress`. A topic without completed tests reads as zero.
pub async fn get_topic_progress(
    repo: &dyn Repository,
    user_id: &str,
    topic: i32,
) -> Result<TopicProgressView, EngineError> {
    let progress = repo
        .topic_progress(user_id, topic)
        .await?
        .unwrap_or_else(|| UserTopicProgress::empty(user_id, topic));
    Ok(progress.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn result(answered: i64, correct: i64) -> TopicTestResult {
        TopicTestResult {
            topic: 3,
            answered,
            correct,
        }
    }

    #[test]
    fn test_first_test_nine_of_ten() {
        let empty = UserTopicProgress::empty("u1", 3);
        let p = apply_test(&empty, &result(10, 9), 1, at("2026-01-10T12:00:00Z"));

        assert_eq!(p.tests_completed, 1);
        assert_eq!(p.questions_answered, 10);
        assert!((p.average_accuracy - 90.0).abs() < 1e-9);
        assert!((p.best_accuracy - 90.0).abs() < 1e-9);
        assert_eq!(p.current_streak, 1);
        assert!(p.mastered);
    }

    #[test]
    fn test_running_mean_and_best() {
        let t = at("2026-01-10T12:00:00Z");
        let mut p = UserTopicProgress::empty("u1", 3);
        p = apply_test(&p, &result(10, 5), 1, t);
        p = apply_test(&p, &result(4, 4), 1, t);
        p = apply_test(&p, &result(5, 3), 1, t);

        assert_eq!(p.tests_completed, 3);
        // (50 + 100 + 60) / 3
        assert!((p.average_accuracy - 70.0).abs() < 1e-9);
        assert!((p.best_accuracy - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_accuracy_can_be_zero() {
        let p = apply_test(
            &UserTopicProgress::empty("u1", 3),
            &result(4, 0),
            1,
            at("2026-01-10T12:00:00Z"),
        );
        assert_eq!(p.best_accuracy, 0.0);
        assert_eq!(p.current_streak, 0);
    }

    #[test]
    fn test_streak_resets_below_threshold() {
        let t = at("2026-01-10T12:00:00Z");
        let mut p = UserTopicProgress::empty("u1", 3);
        p = apply_test(&p, &result(10, 7), 1, t);
        p = apply_test(&p, &result(10, 8), 1, t);
        assert_eq!(p.current_streak, 2);
        p = apply_test(&p, &result(10, 6), 1, t);
        assert_eq!(p.current_streak, 0);
        p = apply_test(&p, &result(10, 10), 1, t);
        assert_eq!(p.current_streak, 1);
    }

    #[test]
    fn test_mastery_needs_volume_and_accuracy() {
        let t = at("2026-01-10T12:00:00Z");
        // 100% but only 5 answers.
        let p = apply_test(&UserTopicProgress::empty("u1", 3), &result(5, 5), 1, t);
        assert!(!p.mastered);

        // 10 answers at exactly 80% is not above the threshold.
        let p = apply_test(&UserTopicProgress::empty("u1", 3), &result(10, 8), 1, t);
        assert!(!p.mastered);

        let p = apply_test(&p, &result(5, 5), 1, t);
        assert!(p.mastered);
    }

    #[test]
    fn test_topic_results_groups_multi_topic_questions() {
        let event = |question_id: i64, is_correct: bool| AnswerEvent {
            id: question_id,
            user_id: "u1".to_string(),
            question_id,
            session_id: 1,
            is_correct,
            answered_at: at("2026-01-10T12:00:00Z"),
            latency_ms: 1_000,
        };
        let events = vec![event(1, true), event(2, false), event(3, true)];
        let topics = HashMap::from([
            (1, BTreeSet::from([1])),
            (2, BTreeSet::from([1, 2])),
            (3, BTreeSet::from([2])),
        ]);

        let results = topic_results(&events, &topics);

        assert_eq!(
            results,
            vec![
                TopicTestResult {
                    topic: 1,
                    answered: 2,
                    correct: 1
                },
                TopicTestResult {
                    topic: 2,
                    answered: 2,
                    correct: 1
                },
            ]
        );
    }
}

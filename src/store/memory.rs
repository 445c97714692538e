// src/store/memory.rs

//! In-process store. Mirrors the Postgres constraints (unique answers per
//! session, unique medals, versioned progress rows) so engine behaviour is
//! the same on both.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    engine::{scope::ResolvedScope, window::TimeWindow},
    error::StoreError,
    models::{
        answer::{AnswerEvent, LastAnswer, NewAnswerEvent},
        progress::UserTopicProgress,
        question::{
            AnswerKey, ArticleRef, Difficulty, PublicQuestion, Question, QuestionMeta,
            TopicSection,
        },
        ranking::{Medal, MedalType, NewMedal, PeriodEvaluation, UserTally},
        session::{NewSession, TestSession},
    },
    store::{ArticleSelector, Catalog, ContentFilter, Repository},
};

/// Catalog content for a `MemoryStore`, built up front.
#[derive(Debug, Clone, Default)]
pub struct CatalogData {
    topic_sections: Vec<TopicSection>,
    articles: BTreeMap<i64, ArticleRef>,
    questions: BTreeMap<i64, Question>,
    next_id: i64,
}

impl CatalogData {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_article(&mut self, law_id: i64, number: i32) -> i64 {
        let id = self.next_id();
        self.articles.insert(id, ArticleRef { id, law_id, number });
        id
    }

    pub fn add_topic_section(
        &mut self,
        topic_number: i32,
        law_id: i64,
        article_from: Option<i32>,
        article_to: Option<i32>,
    ) {
        self.topic_sections.push(TopicSection {
            topic_number,
            law_id,
            article_from,
            article_to,
        });
    }

    /// Adds an active question whose correct option is "A".
    pub fn add_question(&mut self, article_id: i64, difficulty: Difficulty) -> i64 {
        let id = self.next_id();
        self.questions.insert(
            id,
            Question {
                id,
                article_id,
                difficulty,
                content: format!("Question {}", id),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_option: "A".to_string(),
                explanation: None,
                is_active: true,
                is_official_exam: false,
                is_reserva: false,
            },
        );
        id
    }

    pub fn question_mut(&mut self, id: i64) -> Option<&mut Question> {
        self.questions.get_mut(&id)
    }

    fn topics_of_article(&self, article: &ArticleRef) -> BTreeSet<i32> {
        self.topic_sections
            .iter()
            .filter(|s| {
                ArticleSelector {
                    law_id: s.law_id,
                    from: s.article_from,
                    to: s.article_to,
                }
                .matches(article)
            })
            .map(|s| s.topic_number)
            .collect()
    }
}

#[derive(Debug, Default)]
struct LogData {
    answers: Vec<AnswerEvent>,
    sessions: BTreeMap<i64, TestSession>,
    progress: BTreeMap<(String, i32), UserTopicProgress>,
    medals: BTreeMap<(String, MedalType, String), Medal>,
    evaluated_periods: BTreeMap<String, PeriodEvaluation>,
    next_answer_id: i64,
    next_session_id: i64,
    next_medal_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<CatalogData>,
    log: RwLock<LogData>,
}

impl MemoryStore {
    pub fn new(catalog: CatalogData) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            log: RwLock::new(LogData::default()),
        }
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn topic_sections(&self, topics: &[i32]) -> Result<Vec<TopicSection>, StoreError> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .topic_sections
            .iter()
            .filter(|s| topics.contains(&s.topic_number))
            .cloned()
            .collect())
    }

    async fn articles_matching(
        &self,
        selectors: &[ArticleSelector],
        limit: usize,
    ) -> Result<Vec<ArticleRef>, StoreError> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .articles
            .values()
            .filter(|a| selectors.iter().any(|s| s.matches(a)))
            .take(limit)
            .copied()
            .collect())
    }

    async fn questions_for_articles(
        &self,
        article_ids: &[i64],
        filter: ContentFilter,
        limit: usize,
    ) -> Result<Vec<QuestionMeta>, StoreError> {
        let wanted: HashSet<i64> = article_ids.iter().copied().collect();
        let catalog = self.catalog.read().await;
        Ok(catalog
            .questions
            .values()
            .filter(|q| q.is_active && wanted.contains(&q.article_id))
            .filter(|q| !filter.official_exam_only || q.is_official_exam)
            .filter(|q| !filter.exclude_reserva || !q.is_reserva)
            .take(limit)
            .map(|q| QuestionMeta {
                id: q.id,
                article_id: q.article_id,
                difficulty: q.difficulty,
            })
            .collect())
    }

    async fn public_questions(&self, ids: &[i64]) -> Result<Vec<PublicQuestion>, StoreError> {
        let catalog = self.catalog.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| catalog.questions.get(id))
            .map(Question::to_public)
            .collect())
    }

    async fn answer_key(&self, question_id: i64) -> Result<Option<AnswerKey>, StoreError> {
        let catalog = self.catalog.read().await;
        Ok(catalog.questions.get(&question_id).map(|q| AnswerKey {
            id: q.id,
            correct_option: q.correct_option.clone(),
        }))
    }

    async fn topics_for_questions(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BTreeSet<i32>>, StoreError> {
        let catalog = self.catalog.read().await;
        let mut out = HashMap::new();
        for id in ids {
            let Some(question) = catalog.questions.get(id) else {
                continue;
            };
            let Some(article) = catalog.articles.get(&question.article_id) else {
                continue;
            };
            let topics = catalog.topics_of_article(article);
            if !topics.is_empty() {
                out.insert(*id, topics);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn last_answers(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<LastAnswer>, StoreError> {
        let log = self.log.read().await;
        let mut latest: BTreeMap<i64, &AnswerEvent> = BTreeMap::new();
        for answer in log
            .answers
            .iter()
            .filter(|a| a.user_id == user_id && scope.contains(a.question_id))
        {
            let newer = latest.get(&answer.question_id).is_none_or(|prev| {
                (answer.answered_at, answer.id) > (prev.answered_at, prev.id)
            });
            if newer {
                latest.insert(answer.question_id, answer);
            }
        }
        Ok(latest
            .values()
            .map(|a| LastAnswer {
                question_id: a.question_id,
                answered_at: a.answered_at,
                is_correct: a.is_correct,
            })
            .collect())
    }

    async fn answers_in_scope(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<AnswerEvent>, StoreError> {
        let log = self.log.read().await;
        let mut answers: Vec<AnswerEvent> = log
            .answers
            .iter()
            .filter(|a| a.user_id == user_id && scope.contains(a.question_id))
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.answered_at.cmp(&b.answered_at).then(a.id.cmp(&b.id)));
        Ok(answers)
    }

    async fn create_session(&self, session: NewSession) -> Result<TestSession, StoreError> {
        let mut log = self.log.write().await;
        log.next_session_id += 1;
        let stored = TestSession {
            id: log.next_session_id,
            user_id: session.user_id,
            created_at: session.created_at,
            scope: session.scope,
            difficulty_mode: session.difficulty_mode,
            question_ids: session.question_ids,
            completed_at: None,
        };
        log.sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_session(&self, session_id: i64) -> Result<Option<TestSession>, StoreError> {
        Ok(self.log.read().await.sessions.get(&session_id).cloned())
    }

    async fn open_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError> {
        let log = self.log.read().await;
        Ok(log
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.completed_at.is_none())
            .cloned()
            .collect())
    }

    async fn completed_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError> {
        let log = self.log.read().await;
        let mut sessions: Vec<TestSession> = log
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.completed_at.is_some())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn append_answer(&self, answer: NewAnswerEvent) -> Result<AnswerEvent, StoreError> {
        let mut log = self.log.write().await;
        let duplicate = log
            .answers
            .iter()
            .any(|a| a.session_id == answer.session_id && a.question_id == answer.question_id);
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "answer for question {} in session {}",
                answer.question_id, answer.session_id
            )));
        }
        log.next_answer_id += 1;
        let event = AnswerEvent {
            id: log.next_answer_id,
            user_id: answer.user_id,
            question_id: answer.question_id,
            session_id: answer.session_id,
            is_correct: answer.is_correct,
            answered_at: answer.answered_at,
            latency_ms: answer.latency_ms,
        };
        log.answers.push(event.clone());
        Ok(event)
    }

    async fn session_answers(&self, session_id: i64) -> Result<Vec<AnswerEvent>, StoreError> {
        let log = self.log.read().await;
        Ok(log
            .answers
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn mark_session_completed(
        &self,
        session_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut log = self.log.write().await;
        match log.sessions.get_mut(&session_id) {
            Some(session) if session.completed_at.is_none() => {
                session.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn topic_progress(
        &self,
        user_id: &str,
        topic: i32,
    ) -> Result<Option<UserTopicProgress>, StoreError> {
        let log = self.log.read().await;
        Ok(log.progress.get(&(user_id.to_string(), topic)).cloned())
    }

    async fn all_topic_progress(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserTopicProgress>, StoreError> {
        let log = self.log.read().await;
        Ok(log
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save_topic_progress(&self, progress: &UserTopicProgress) -> Result<bool, StoreError> {
        let mut log = self.log.write().await;
        let key = (progress.user_id.clone(), progress.topic_number);
        let current_version = log.progress.get(&key).map_or(0, |p| p.version);
        if current_version != progress.version {
            return Ok(false);
        }
        let mut stored = progress.clone();
        stored.version = current_version + 1;
        log.progress.insert(key, stored);
        Ok(true)
    }

    async fn replace_topic_progress(
        &self,
        user_id: &str,
        rows: &[UserTopicProgress],
    ) -> Result<(), StoreError> {
        let mut log = self.log.write().await;
        let previous: HashMap<i32, i64> = log
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .map(|p| (p.topic_number, p.version))
            .collect();
        log.progress.retain(|(user, _), _| user != user_id);
        for row in rows {
            let mut stored = row.clone();
            stored.user_id = user_id.to_string();
            stored.version = previous.get(&row.topic_number).copied().unwrap_or(0) + 1;
            log.progress
                .insert((user_id.to_string(), row.topic_number), stored);
        }
        Ok(())
    }

    async fn window_tallies(&self, window: &TimeWindow) -> Result<Vec<UserTally>, StoreError> {
        let log = self.log.read().await;
        let mut tallies: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for answer in log.answers.iter().filter(|a| window.contains(a.answered_at)) {
            let entry = tallies.entry(answer.user_id.as_str()).or_default();
            entry.0 += 1;
            if answer.is_correct {
                entry.1 += 1;
            }
        }
        Ok(tallies
            .into_iter()
            .map(|(user_id, (total, correct))| UserTally {
                user_id: user_id.to_string(),
                total_questions: total,
                correct_answers: correct,
            })
            .collect())
    }

    async fn record_period_medals(
        &self,
        evaluation: &PeriodEvaluation,
        medals: &[NewMedal],
    ) -> Result<bool, StoreError> {
        let mut log = self.log.write().await;
        if log.evaluated_periods.contains_key(&evaluation.period_key) {
            return Ok(false);
        }
        log.evaluated_periods
            .insert(evaluation.period_key.clone(), evaluation.clone());

        for medal in medals {
            let key = (
                medal.user_id.clone(),
                medal.medal_type,
                medal.period_key.clone(),
            );
            if log.medals.contains_key(&key) {
                continue;
            }
            log.next_medal_id += 1;
            let stored = Medal {
                id: log.next_medal_id,
                user_id: medal.user_id.clone(),
                medal_type: medal.medal_type,
                period_key: medal.period_key.clone(),
                rank: medal.rank,
                accuracy: medal.accuracy,
                awarded_at: medal.awarded_at,
            };
            log.medals.insert(key, stored);
        }
        Ok(true)
    }

    async fn period_medals(&self, period_key: &str) -> Result<Vec<Medal>, StoreError> {
        let log = self.log.read().await;
        let mut medals: Vec<Medal> = log
            .medals
            .values()
            .filter(|m| m.period_key == period_key)
            .cloned()
            .collect();
        medals.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.id.cmp(&b.id)));
        Ok(medals)
    }

    async fn user_medals(&self, user_id: &str) -> Result<Vec<Medal>, StoreError> {
        let log = self.log.read().await;
        let mut medals: Vec<Medal> = log
            .medals
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        medals.sort_by(|a, b| a.awarded_at.cmp(&b.awarded_at).then(a.id.cmp(&b.id)));
        Ok(medals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_compare_and_swap() {
        let store = MemoryStore::default();
        let mut row = UserTopicProgress::empty("u1", 4);
        row.tests_completed = 1;

        assert!(store.save_topic_progress(&row).await.unwrap());
        // Writing again with the version read before the first write loses.
        assert!(!store.save_topic_progress(&row).await.unwrap());

        let current = store.topic_progress("u1", 4).await.unwrap().unwrap();
        assert_eq!(current.version, 1);
        let mut next = current.clone();
        next.tests_completed = 2;
        assert!(store.save_topic_progress(&next).await.unwrap());
        assert_eq!(
            store.topic_progress("u1", 4).await.unwrap().unwrap().tests_completed,
            2
        );
    }

    #[tokio::test]
    async fn test_duplicate_answer_in_session_rejected() {
        let store = MemoryStore::default();
        let answer = NewAnswerEvent {
            user_id: "u1".to_string(),
            question_id: 9,
            session_id: 1,
            is_correct: true,
            answered_at: Utc::now(),
            latency_ms: 500,
        };
        store.append_answer(answer.clone()).await.unwrap();
        let err = store.append_answer(answer).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_period_is_recorded_once() {
        let store = MemoryStore::default();
        let evaluation = PeriodEvaluation {
            period_key: "2026-01-10".to_string(),
            min_questions: 5,
            evaluated_at: Utc::now(),
        };
        let medal = |user: &str, medal_type, rank| NewMedal {
            user_id: user.to_string(),
            medal_type,
            period_key: "2026-01-10".to_string(),
            rank,
            accuracy: 90.0,
            awarded_at: Utc::now(),
        };

        assert!(
            store
                .record_period_medals(&evaluation, &[medal("u1", MedalType::Champion, 1)])
                .await
                .unwrap()
        );
        // A second evaluation writes nothing, even with other winners.
        assert!(
            !store
                .record_period_medals(&evaluation, &[medal("u2", MedalType::Champion, 1)])
                .await
                .unwrap()
        );

        let stored = store.period_medals("2026-01-10").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, "u1");
        assert!(store.user_medals("u2").await.unwrap().is_empty());
    }
}

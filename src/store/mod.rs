// src/store/mod.rs

//! Storage seams of the engine.
//!
//! `Catalog` is the read-only content catalog owned by another system.
//! `Repository` holds the answer log and everything derived from it.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    engine::{scope::ResolvedScope, window::TimeWindow},
    error::StoreError,
    models::{
        answer::{AnswerEvent, LastAnswer, NewAnswerEvent},
        progress::UserTopicProgress,
        question::{AnswerKey, ArticleRef, PublicQuestion, QuestionMeta, TopicSection},
        ranking::{Medal, NewMedal, PeriodEvaluation, UserTally},
        session::{NewSession, TestSession},
    },
};

pub mod memory;
pub mod postgres;

/// Flags narrowing which catalog questions are eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentFilter {
    pub official_exam_only: bool,
    pub exclude_reserva: bool,
}

/// Law-level article selector produced while resolving a scope.
/// `None` bounds select every article of the law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleSelector {
    pub law_id: i64,
    pub from: Option<i32>,
    pub to: Option<i32>,
}

impl ArticleSelector {
    pub fn matches(&self, article: &ArticleRef) -> bool {
        article.law_id == self.law_id
            && self.from.is_none_or(|from| article.number >= from)
            && self.to.is_none_or(|to| article.number <= to)
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Sections (law plus optional article range) that make up each topic.
    async fn topic_sections(&self, topics: &[i32]) -> Result<Vec<TopicSection>, StoreError>;

    /// Articles matched by any of the selectors, at most `limit` rows.
    async fn articles_matching(
        &self,
        selectors: &[ArticleSelector],
        limit: usize,
    ) -> Result<Vec<ArticleRef>, StoreError>;

    /// Active questions linked to the given articles, at most `limit` rows.
    async fn questions_for_articles(
        &self,
        article_ids: &[i64],
        filter: ContentFilter,
        limit: usize,
    ) -> Result<Vec<QuestionMeta>, StoreError>;

    /// Client-safe payloads for the given ids. Order is unspecified.
    async fn public_questions(&self, ids: &[i64]) -> Result<Vec<PublicQuestion>, StoreError>;

    async fn answer_key(&self, question_id: i64) -> Result<Option<AnswerKey>, StoreError>;

    /// Topics whose sections contain each question's article.
    async fn topics_for_questions(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BTreeSet<i32>>, StoreError>;
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Latest answer per question, restricted to the questions of `scope`.
    async fn last_answers(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<LastAnswer>, StoreError>;

    /// Every answer the user gave to questions of `scope`, oldest first.
    async fn answers_in_scope(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<AnswerEvent>, StoreError>;

    async fn create_session(&self, session: NewSession) -> Result<TestSession, StoreError>;

    async fn get_session(&self, session_id: i64) -> Result<Option<TestSession>, StoreError>;

    /// Sessions of the user that have not been completed yet.
    async fn open_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError>;

    /// Completed sessions of the user, ordered by completion time then id.
    async fn completed_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError>;

    /// Appends to the log. Fails with `UniqueViolation` when the question
    /// was already answered in the same session.
    async fn append_answer(&self, answer: NewAnswerEvent) -> Result<AnswerEvent, StoreError>;

    async fn session_answers(&self, session_id: i64) -> Result<Vec<AnswerEvent>, StoreError>;

    /// Sets the completion flag. Returns `false` if it was already set.
    async fn mark_session_completed(
        &self,
        session_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn topic_progress(
        &self,
        user_id: &str,
        topic: i32,
    ) -> Result<Option<UserTopicProgress>, StoreError>;

    async fn all_topic_progress(&self, user_id: &str)
    -> Result<Vec<UserTopicProgress>, StoreError>;

    /// Compare-and-swap write. `progress.version` is the version that was
    /// read (0 when the row did not exist). Returns `false` when another
    /// writer got there first.
    async fn save_topic_progress(&self, progress: &UserTopicProgress) -> Result<bool, StoreError>;

    /// Replaces every cached row of the user with freshly recomputed ones.
    async fn replace_topic_progress(
        &self,
        user_id: &str,
        rows: &[UserTopicProgress],
    ) -> Result<(), StoreError>;

    /// Per-user answer counts for events inside `[window.start, window.end)`.
    async fn window_tallies(&self, window: &TimeWindow) -> Result<Vec<UserTally>, StoreError>;

    /// Stores the evaluation of a period together with its medals, all or
    /// nothing. Returns `false` and writes nothing when the period was
    /// already evaluated.
    async fn record_period_medals(
        &self,
        evaluation: &PeriodEvaluation,
        medals: &[NewMedal],
    ) -> Result<bool, StoreError>;

    /// Medals stored for a period, by rank.
    async fn period_medals(&self, period_key: &str) -> Result<Vec<Medal>, StoreError>;

    async fn user_medals(&self, user_id: &str) -> Result<Vec<Medal>, StoreError>;
}

// src/store/postgres.rs

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use crate::{
    engine::{scope::ResolvedScope, window::TimeWindow},
    error::StoreError,
    models::{
        answer::{AnswerEvent, LastAnswer, NewAnswerEvent},
        progress::UserTopicProgress,
        question::{AnswerKey, ArticleRef, Difficulty, PublicQuestion, QuestionMeta, TopicSection},
        ranking::{Medal, MedalType, NewMedal, PeriodEvaluation, UserTally},
        session::{NewSession, TestSession},
    },
    store::{ArticleSelector, Catalog, ContentFilter, Repository},
};

/// Postgres-backed catalog and repository.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_difficulty(value: &str) -> Result<Difficulty, StoreError> {
    Difficulty::parse(value).ok_or_else(|| StoreError::Corrupt(format!("difficulty '{}'", value)))
}

#[derive(FromRow)]
struct QuestionMetaRow {
    id: i64,
    article_id: i64,
    difficulty: String,
}

#[derive(FromRow)]
struct PublicQuestionRow {
    id: i64,
    content: String,
    options: Json<Vec<String>>,
    difficulty: String,
}

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    user_id: String,
    created_at: DateTime<Utc>,
    scope: Json<serde_json::Value>,
    difficulty_mode: String,
    question_ids: Vec<i64>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for TestSession {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            created_at: row.created_at,
            scope: row.scope.0,
            difficulty_mode: row.difficulty_mode,
            question_ids: row.question_ids,
            completed_at: row.completed_at,
        }
    }
}

#[derive(FromRow)]
struct MedalRow {
    id: i64,
    user_id: String,
    medal_type: String,
    period_key: String,
    rank: i32,
    accuracy: f64,
    awarded_at: DateTime<Utc>,
}

impl TryFrom<MedalRow> for Medal {
    type Error = StoreError;

    fn try_from(row: MedalRow) -> Result<Self, Self::Error> {
        let medal_type = MedalType::parse(&row.medal_type)
            .ok_or_else(|| StoreError::Corrupt(format!("medal type '{}'", row.medal_type)))?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            medal_type,
            period_key: row.period_key,
            rank: row.rank,
            accuracy: row.accuracy,
            awarded_at: row.awarded_at,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, created_at, scope, difficulty_mode, question_ids, completed_at";

const PROGRESS_COLUMNS: &str = "user_id, topic_number, tests_completed, questions_answered, \
     average_accuracy, best_accuracy, current_streak, last_test_at, last_session_id, mastered, \
     version";

#[async_trait]
impl Catalog for PgStore {
    async fn topic_sections(&self, topics: &[i32]) -> Result<Vec<TopicSection>, StoreError> {
        sqlx::query_as::<_, TopicSection>(
            r#"
            SELECT topic_number, law_id, article_from, article_to
            FROM topic_sections
            WHERE topic_number = ANY($1)
            ORDER BY topic_number, law_id
            "#,
        )
        .bind(topics)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn articles_matching(
        &self,
        selectors: &[ArticleSelector],
        limit: usize,
    ) -> Result<Vec<ArticleRef>, StoreError> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }

        // One OR-ed predicate per selector
        let mut query_builder =
            QueryBuilder::<Postgres>::new("SELECT id, law_id, number FROM articles WHERE ");
        for (i, selector) in selectors.iter().enumerate() {
            if i > 0 {
                query_builder.push(" OR ");
            }
            query_builder.push("(law_id = ").push_bind(selector.law_id);
            if let Some(from) = selector.from {
                query_builder.push(" AND number >= ").push_bind(from);
            }
            if let Some(to) = selector.to {
                query_builder.push(" AND number <= ").push_bind(to);
            }
            query_builder.push(")");
        }
        query_builder
            .push(" ORDER BY id LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn questions_for_articles(
        &self,
        article_ids: &[i64],
        filter: ContentFilter,
        limit: usize,
    ) -> Result<Vec<QuestionMeta>, StoreError> {
        if article_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, QuestionMetaRow>(
            r#"
            SELECT id, article_id, difficulty
            FROM questions
            WHERE is_active
              AND article_id = ANY($1)
              AND (NOT $2 OR is_official_exam)
              AND (NOT $3 OR NOT is_reserva)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(article_ids)
        .bind(filter.official_exam_only)
        .bind(filter.exclude_reserva)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                Ok(QuestionMeta {
                    id: row.id,
                    article_id: row.article_id,
                    difficulty: parse_difficulty(&row.difficulty)?,
                })
            })
            .collect()
    }

    async fn public_questions(&self, ids: &[i64]) -> Result<Vec<PublicQuestion>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(
            "SELECT id, content, options, difficulty FROM questions WHERE id IN (",
        );
        let mut separated = query_builder.separated(",");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<PublicQuestionRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                Ok(PublicQuestion {
                    id: row.id,
                    content: row.content,
                    options: row.options.0,
                    difficulty: parse_difficulty(&row.difficulty)?,
                })
            })
            .collect()
    }

    async fn answer_key(&self, question_id: i64) -> Result<Option<AnswerKey>, StoreError> {
        sqlx::query_as::<_, AnswerKey>("SELECT id, correct_option FROM questions WHERE id = $1")
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn topics_for_questions(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BTreeSet<i32>>, StoreError> {
        let rows: Vec<(i64, i32)> = sqlx::query_as(
            r#"
            SELECT q.id, ts.topic_number
            FROM questions q
            JOIN articles a ON a.id = q.article_id
            JOIN topic_sections ts
              ON ts.law_id = a.law_id
             AND (ts.article_from IS NULL OR a.number >= ts.article_from)
             AND (ts.article_to IS NULL OR a.number <= ts.article_to)
            WHERE q.id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let mut topics: HashMap<i64, BTreeSet<i32>> = HashMap::new();
        for (question_id, topic) in rows {
            topics.entry(question_id).or_default().insert(topic);
        }
        Ok(topics)
    }
}

#[async_trait]
impl Repository for PgStore {
    async fn last_answers(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<LastAnswer>, StoreError> {
        sqlx::query_as::<_, LastAnswer>(
            r#"
            SELECT DISTINCT ON (question_id) question_id, answered_at, is_correct
            FROM answer_events
            WHERE user_id = $1 AND question_id = ANY($2)
            ORDER BY question_id, answered_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(scope.question_ids())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn answers_in_scope(
        &self,
        user_id: &str,
        scope: &ResolvedScope,
    ) -> Result<Vec<AnswerEvent>, StoreError> {
        sqlx::query_as::<_, AnswerEvent>(
            r#"
            SELECT id, user_id, question_id, session_id, is_correct, answered_at, latency_ms
            FROM answer_events
            WHERE user_id = $1 AND question_id = ANY($2)
            ORDER BY answered_at, id
            "#,
        )
        .bind(user_id)
        .bind(scope.question_ids())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn create_session(&self, session: NewSession) -> Result<TestSession, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO test_sessions (user_id, created_at, scope, difficulty_mode, question_ids)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(Json(&session.scope))
        .bind(&session.difficulty_mode)
        .bind(&session.question_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.into())
    }

    async fn get_session(&self, session_id: i64) -> Result<Option<TestSession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM test_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.map(Into::into))
    }

    async fn open_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM test_sessions WHERE user_id = $1 AND completed_at IS NULL ORDER BY id",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn completed_sessions(&self, user_id: &str) -> Result<Vec<TestSession>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {}
            FROM test_sessions
            WHERE user_id = $1 AND completed_at IS NOT NULL
            ORDER BY completed_at, id
            "#,
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append_answer(&self, answer: NewAnswerEvent) -> Result<AnswerEvent, StoreError> {
        sqlx::query_as::<_, AnswerEvent>(
            r#"
            INSERT INTO answer_events
                (user_id, question_id, session_id, is_correct, answered_at, latency_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, question_id, session_id, is_correct, answered_at, latency_ms
            "#,
        )
        .bind(&answer.user_id)
        .bind(answer.question_id)
        .bind(answer.session_id)
        .bind(answer.is_correct)
        .bind(answer.answered_at)
        .bind(answer.latency_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn session_answers(&self, session_id: i64) -> Result<Vec<AnswerEvent>, StoreError> {
        sqlx::query_as::<_, AnswerEvent>(
            r#"
            SELECT id, user_id, question_id, session_id, is_correct, answered_at, latency_ms
            FROM answer_events
            WHERE session_id = $1
            ORDER BY id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn mark_session_completed(
        &self,
        session_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE test_sessions SET completed_at = $2 WHERE id = $1 AND completed_at IS NULL",
        )
        .bind(session_id)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn topic_progress(
        &self,
        user_id: &str,
        topic: i32,
    ) -> Result<Option<UserTopicProgress>, StoreError> {
        sqlx::query_as::<_, UserTopicProgress>(&format!(
            "SELECT {} FROM user_topic_progress WHERE user_id = $1 AND topic_number = $2",
            PROGRESS_COLUMNS
        ))
        .bind(user_id)
        .bind(topic)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn all_topic_progress(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserTopicProgress>, StoreError> {
        sqlx::query_as::<_, UserTopicProgress>(&format!(
            "SELECT {} FROM user_topic_progress WHERE user_id = $1 ORDER BY topic_number",
            PROGRESS_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn save_topic_progress(&self, progress: &UserTopicProgress) -> Result<bool, StoreError> {
        let sql = if progress.version == 0 {
            r#"
            INSERT INTO user_topic_progress
                (user_id, topic_number, tests_completed, questions_answered, average_accuracy,
                 best_accuracy, current_streak, last_test_at, last_session_id, mastered, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)
            ON CONFLICT (user_id, topic_number) DO NOTHING
            "#
        } else {
            r#"
            UPDATE user_topic_progress
            SET tests_completed = $3,
                questions_answered = $4,
                average_accuracy = $5,
                best_accuracy = $6,
                current_streak = $7,
                last_test_at = $8,
                last_session_id = $9,
                mastered = $10,
                version = version + 1
            WHERE user_id = $1 AND topic_number = $2 AND version = $11
            "#
        };

        let mut query = sqlx::query(sql)
            .bind(&progress.user_id)
            .bind(progress.topic_number)
            .bind(progress.tests_completed)
            .bind(progress.questions_answered)
            .bind(progress.average_accuracy)
            .bind(progress.best_accuracy)
            .bind(progress.current_streak)
            .bind(progress.last_test_at)
            .bind(progress.last_session_id)
            .bind(progress.mastered);
        if progress.version != 0 {
            query = query.bind(progress.version);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_topic_progress(
        &self,
        user_id: &str,
        rows: &[UserTopicProgress],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let topics: Vec<i32> = rows.iter().map(|r| r.topic_number).collect();
        sqlx::query(
            "DELETE FROM user_topic_progress WHERE user_id = $1 AND NOT (topic_number = ANY($2))",
        )
        .bind(user_id)
        .bind(&topics)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO user_topic_progress
                    (user_id, topic_number, tests_completed, questions_answered, average_accuracy,
                     best_accuracy, current_streak, last_test_at, last_session_id, mastered,
                     version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)
                ON CONFLICT (user_id, topic_number) DO UPDATE SET
                    tests_completed = EXCLUDED.tests_completed,
                    questions_answered = EXCLUDED.questions_answered,
                    average_accuracy = EXCLUDED.average_accuracy,
                    best_accuracy = EXCLUDED.best_accuracy,
                    current_streak = EXCLUDED.current_streak,
                    last_test_at = EXCLUDED.last_test_at,
                    last_session_id = EXCLUDED.last_session_id,
                    mastered = EXCLUDED.mastered,
                    version = user_topic_progress.version + 1
                "#,
            )
            .bind(user_id)
            .bind(row.topic_number)
            .bind(row.tests_completed)
            .bind(row.questions_answered)
            .bind(row.average_accuracy)
            .bind(row.best_accuracy)
            .bind(row.current_streak)
            .bind(row.last_test_at)
            .bind(row.last_session_id)
            .bind(row.mastered)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)
    }

    async fn window_tallies(&self, window: &TimeWindow) -> Result<Vec<UserTally>, StoreError> {
        sqlx::query_as::<_, UserTally>(
            r#"
            SELECT
                user_id,
                COUNT(*) AS total_questions,
                COUNT(*) FILTER (WHERE is_correct) AS correct_answers
            FROM answer_events
            WHERE answered_at >= $1 AND answered_at < $2
            GROUP BY user_id
            ORDER BY user_id
            "#,
        )
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn record_period_medals(
        &self,
        evaluation: &PeriodEvaluation,
        medals: &[NewMedal],
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        // Concurrent evaluations of the same period serialize on this key
        let claimed = sqlx::query(
            r#"
            INSERT INTO medal_periods (period_key, min_questions, evaluated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (period_key) DO NOTHING
            "#,
        )
        .bind(&evaluation.period_key)
        .bind(evaluation.min_questions)
        .bind(evaluation.evaluated_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(false);
        }

        for medal in medals {
            sqlx::query(
                r#"
                INSERT INTO medals (user_id, medal_type, period_key, rank, accuracy, awarded_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, medal_type, period_key) DO NOTHING
                "#,
            )
            .bind(&medal.user_id)
            .bind(medal.medal_type.as_str())
            .bind(&medal.period_key)
            .bind(medal.rank)
            .bind(medal.accuracy)
            .bind(medal.awarded_at)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(true)
    }

    async fn period_medals(&self, period_key: &str) -> Result<Vec<Medal>, StoreError> {
        let rows = sqlx::query_as::<_, MedalRow>(
            r#"
            SELECT id, user_id, medal_type, period_key, rank, accuracy, awarded_at
            FROM medals
            WHERE period_key = $1
            ORDER BY rank, id
            "#,
        )
        .bind(period_key)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(Medal::try_from).collect()
    }

    async fn user_medals(&self, user_id: &str) -> Result<Vec<Medal>, StoreError> {
        let rows = sqlx::query_as::<_, MedalRow>(
            r#"
            SELECT id, user_id, medal_type, period_key, rank, accuracy, awarded_at
            FROM medals
            WHERE user_id = $1
            ORDER BY awarded_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter().map(Medal::try_from).collect()
    }
}

// tests/pg_store_tests.rs

//! Runs the engine against Postgres. Needs DATABASE_URL; without it every
//! test returns early. Each test seeds its own law, topic, users and dates so
//! runs against the same database do not interfere.

use chrono::{DateTime, Days, NaiveDate, Utc};
use prep_engine::{
    engine::{
        progress::{record_completed_session, verify_topic_progress},
        ranking::{award_medals, get_ranking},
        scope::{ScopeDescriptor, resolve_scope},
        window::{Period, PeriodKind, TimeWindow},
    },
    models::{
        answer::NewAnswerEvent, progress::UserTopicProgress, ranking::MedalOutcome,
        session::NewSession,
    },
    store::{Repository, postgres::PgStore},
};
use sqlx::{postgres::PgPoolOptions, types::Json};

async fn connect() -> Option<PgStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(PgStore::new(pool))
}

fn user(name: &str) -> String {
    format!("{}-{}", name, &uuid::Uuid::new_v4().to_string()[..8])
}

/// A day no other run is likely to have used.
fn random_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(1000, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(rand::random_range(0..300_000)))
        .unwrap()
}

fn at(day: NaiveDate, time: &str) -> DateTime<Utc> {
    format!("{}T{}Z", day, time).parse().unwrap()
}

/// One law with one article, a fresh topic over it, and `questions`
/// active medium questions whose correct option is "A".
async fn seed_catalog(store: &PgStore, questions: usize) -> (i32, Vec<i64>) {
    let pool = store.pool();
    let (law_id,): (i64,) = sqlx::query_as("INSERT INTO laws (name) VALUES ($1) RETURNING id")
        .bind(user("law"))
        .fetch_one(pool)
        .await
        .unwrap();
    let (article_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (law_id, number) VALUES ($1, 1) RETURNING id")
            .bind(law_id)
            .fetch_one(pool)
            .await
            .unwrap();

    let topic: i32 = rand::random_range(1_000_000..i32::MAX);
    sqlx::query("INSERT INTO topic_sections (topic_number, law_id) VALUES ($1, $2)")
        .bind(topic)
        .bind(law_id)
        .execute(pool)
        .await
        .unwrap();

    let mut ids = Vec::with_capacity(questions);
    for i in 0..questions {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO questions (article_id, difficulty, content, options, correct_option)
            VALUES ($1, 'medium', $2, $3, 'A')
            RETURNING id
            "#,
        )
        .bind(article_id)
        .bind(format!("Question {}", i))
        .bind(Json(vec!["A", "B", "C", "D"]))
        .fetch_one(pool)
        .await
        .unwrap();
        ids.push(id);
    }
    (topic, ids)
}

async fn seed_answers(
    store: &PgStore,
    user_id: &str,
    answers: &[(i64, DateTime<Utc>, bool)],
) -> i64 {
    let session = store
        .create_session(NewSession {
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            scope: serde_json::json!({}),
            difficulty_mode: "random".to_string(),
            question_ids: answers.iter().map(|a| a.0).collect(),
        })
        .await
        .unwrap();

    for (question_id, answered_at, is_correct) in answers {
        store
            .append_answer(NewAnswerEvent {
                user_id: user_id.to_string(),
                question_id: *question_id,
                session_id: session.id,
                is_correct: *is_correct,
                answered_at: *answered_at,
                latency_ms: 1_000,
            })
            .await
            .unwrap();
    }
    session.id
}

#[tokio::test]
async fn window_excludes_its_end_on_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let (_, ids) = seed_catalog(&store, 2).await;
    let ana = user("ana");
    let day = random_day();
    let next = day.succ_opt().unwrap();
    seed_answers(
        &store,
        &ana,
        &[
            (ids[0], at(day, "23:59:59"), true),
            (ids[1], at(next, "00:00:00"), true),
        ],
    )
    .await;

    let today = Period::containing(PeriodKind::Day, day)
        .unwrap()
        .window()
        .unwrap();
    let ranking = get_ranking(&store, &today, 1).await.unwrap();
    let entry = ranking.iter().find(|e| e.user_id == ana).unwrap();
    assert_eq!(entry.total_questions, 1);

    let tomorrow = TimeWindow::new(at(next, "00:00:00"), at(next, "23:59:59")).unwrap();
    let ranking = get_ranking(&store, &tomorrow, 1).await.unwrap();
    let entry = ranking.iter().find(|e| e.user_id == ana).unwrap();
    assert_eq!(entry.total_questions, 1);
}

#[tokio::test]
async fn last_answers_keep_the_latest_per_question() {
    let Some(store) = connect().await else {
        return;
    };
    let (topic, ids) = seed_catalog(&store, 3).await;
    let ana = user("ana");
    let day = random_day();
    seed_answers(
        &store,
        &ana,
        &[(ids[0], at(day, "09:00:00"), false), (ids[1], at(day, "09:00:00"), true)],
    )
    .await;
    seed_answers(&store, &ana, &[(ids[0], at(day, "10:00:00"), true)]).await;

    let descriptor = ScopeDescriptor::topics(&[topic]).unwrap();
    let scope = resolve_scope(&store, &descriptor, 100).await.unwrap();
    assert_eq!(scope.question_ids(), ids);

    let last = store.last_answers(&ana, &scope).await.unwrap();
    assert_eq!(last.len(), 2);
    let first = last.iter().find(|a| a.question_id == ids[0]).unwrap();
    assert!(first.is_correct);
    assert_eq!(first.answered_at, at(day, "10:00:00"));
}

#[tokio::test]
async fn progress_writes_are_compare_and_swap() {
    let Some(store) = connect().await else {
        return;
    };
    let ana = user("ana");
    let mut row = UserTopicProgress::empty(&ana, 7);
    row.tests_completed = 1;

    assert!(store.save_topic_progress(&row).await.unwrap());
    // A second insert from a stale read loses.
    assert!(!store.save_topic_progress(&row).await.unwrap());

    let current = store.topic_progress(&ana, 7).await.unwrap().unwrap();
    assert_eq!(current.version, 1);

    let mut next = current.clone();
    next.tests_completed = 2;
    assert!(store.save_topic_progress(&next).await.unwrap());
    // Same read version again: the row has moved on.
    assert!(!store.save_topic_progress(&next).await.unwrap());

    let stored = store.topic_progress(&ana, 7).await.unwrap().unwrap();
    assert_eq!(stored.tests_completed, 2);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn out_of_order_completions_match_recompute_on_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let (topic, ids) = seed_catalog(&store, 4).await;
    let ana = user("ana");
    let day = random_day();
    let earlier = seed_answers(
        &store,
        &ana,
        &[(ids[0], at(day, "11:00:00"), true), (ids[1], at(day, "11:00:00"), false)],
    )
    .await;
    let later = seed_answers(
        &store,
        &ana,
        &[(ids[2], at(day, "11:00:00"), true), (ids[3], at(day, "11:00:00"), true)],
    )
    .await;

    record_completed_session(&store, &store, &ana, later, at(day, "11:00:02"))
        .await
        .unwrap();
    record_completed_session(&store, &store, &ana, earlier, at(day, "11:00:01"))
        .await
        .unwrap();

    let cached = store.topic_progress(&ana, topic).await.unwrap().unwrap();
    assert_eq!(cached.tests_completed, 2);
    assert_eq!(cached.current_streak, 1);
    assert_eq!(cached.last_session_id, Some(later));

    let outcome = verify_topic_progress(&store, &store, &ana).await.unwrap();
    assert!(outcome.topics_repaired.is_empty());
}

#[tokio::test]
async fn double_medal_award_creates_one_medal_on_postgres() {
    let Some(store) = connect().await else {
        return;
    };
    let (_, ids) = seed_catalog(&store, 6).await;
    let ana = user("ana");
    let bob = user("bob");
    let day = random_day();
    let answers: Vec<(i64, DateTime<Utc>, bool)> =
        ids.iter().map(|id| (*id, at(day, "12:00:00"), true)).collect();
    seed_answers(&store, &ana, &answers).await;
    seed_answers(&store, &bob, &answers[..5]).await;

    let period = Period::containing(PeriodKind::Day, day).unwrap();
    let later = at(day.succ_opt().unwrap(), "08:00:00");

    let first = award_medals(&store, &period, 5, later).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].user_id, ana);
    assert!(first.iter().all(|a| a.outcome == MedalOutcome::Awarded));

    let second = award_medals(&store, &period, 1, later).await.unwrap();
    assert_eq!(second.len(), 2);
    assert!(
        second
            .iter()
            .all(|a| a.outcome == MedalOutcome::AlreadyAwarded)
    );

    assert_eq!(store.period_medals(&period.key()).await.unwrap().len(), 2);
    assert_eq!(store.user_medals(&ana).await.unwrap().len(), 1);
    assert_eq!(store.user_medals(&bob).await.unwrap().len(), 1);
}

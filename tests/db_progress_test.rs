//! Database-backed progress tests. Ignored by default; run against a live
//! Postgres with:
//!
//! ```sh
//! DATABASE_URL=postgres://... cargo test --test db_progress_test -- --ignored
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use piano_backend_rust::db::migrate::run_migrations;
use piano_backend_rust::services::achievements::CatalogCache;
use piano_backend_rust::services::rewards::{
    CelebrationOutcome, CelebrationRequest, RewardError, RewardOrchestrator, RewardPolicy,
};
use piano_backend_rust::services::stats::{self, CompletionOutcome, QuizSubmission};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for db tests");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");
    run_migrations(&pool).await.expect("run migrations");
    pool
}

async fn create_user(pool: &PgPool) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(r#"INSERT INTO "users" ("id","email") VALUES ($1,$2)"#)
        .bind(&id)
        .bind(format!("{id}@example.test"))
        .execute(pool)
        .await
        .expect("insert test user");
    id
}

struct CountingOrchestrator {
    calls: AtomicUsize,
}

impl CountingOrchestrator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RewardOrchestrator for CountingOrchestrator {
    async fn celebrate(
        &self,
        _pool: &PgPool,
        _request: CelebrationRequest,
    ) -> Result<CelebrationOutcome, RewardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CelebrationOutcome {
            xp_earned: 100,
            leveled_up: false,
            level: 1,
            total_xp: 100,
            already_rewarded: false,
        })
    }
}

#[tokio::test]
#[ignore]
async fn imperfect_quiz_never_reaches_the_reward_path() {
    let pool = test_pool().await;
    let user_id = create_user(&pool).await;
    let cache = CatalogCache::default();
    let orchestrator = CountingOrchestrator::new();

    let before = stats::fetch_stats(&pool, &user_id).await.unwrap();
    let summary = stats::save_quiz_result(
        &pool,
        &cache,
        &orchestrator,
        &user_id,
        QuizSubmission {
            quiz_id: Uuid::new_v4().to_string(),
            quiz_type: "notes".to_string(),
            score: 3,
            total_questions: 5,
        },
    )
    .await
    .unwrap();

    assert!(!summary.is_perfect);
    assert_eq!(summary.xp_earned, 0);
    assert!(summary.celebration.is_none());
    assert_eq!(orchestrator.call_count(), 0);
    assert_eq!(summary.stats.total_xp, before.total_xp);
    assert_eq!(summary.stats.quizzes_completed, before.quizzes_completed + 1);
}

#[tokio::test]
#[ignore]
async fn perfect_quiz_invokes_the_reward_path_exactly_once() {
    let pool = test_pool().await;
    let user_id = create_user(&pool).await;
    let cache = CatalogCache::default();
    let orchestrator = CountingOrchestrator::new();

    let summary = stats::save_quiz_result(
        &pool,
        &cache,
        &orchestrator,
        &user_id,
        QuizSubmission {
            quiz_id: Uuid::new_v4().to_string(),
            quiz_type: "chords".to_string(),
            score: 5,
            total_questions: 5,
        },
    )
    .await
    .unwrap();

    assert!(summary.is_perfect);
    assert_eq!(orchestrator.call_count(), 1);
    assert_eq!(summary.xp_earned, 100);
    assert!(summary.celebration.is_some());
}

#[tokio::test]
#[ignore]
async fn repeated_lesson_completion_credits_once() {
    let pool = test_pool().await;
    let user_id = create_user(&pool).await;
    let cache = CatalogCache::default();
    let policy = RewardPolicy::default();

    let lesson_id = Uuid::new_v4().to_string();
    sqlx::query(r#"INSERT INTO "lessons" ("id","title","xpReward") VALUES ($1,$2,40)"#)
        .bind(&lesson_id)
        .bind("Posture basics")
        .execute(&pool)
        .await
        .unwrap();

    let first = stats::record_lesson_completion(&pool, &cache, &policy, &user_id, &lesson_id)
        .await
        .unwrap();
    assert!(matches!(first, CompletionOutcome::Applied(_)));
    let after_first = stats::fetch_stats(&pool, &user_id).await.unwrap();
    assert_eq!(after_first.lessons_completed, 1);

    let second = stats::record_lesson_completion(&pool, &cache, &policy, &user_id, &lesson_id)
        .await
        .unwrap();
    assert!(matches!(second, CompletionOutcome::AlreadyCompleted));

    let after_second = stats::fetch_stats(&pool, &user_id).await.unwrap();
    assert_eq!(after_second.lessons_completed, 1);
    assert_eq!(after_second.total_xp, after_first.total_xp);
}

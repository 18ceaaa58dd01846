use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::services::achievements::{self, CatalogCache, EarnedAchievement};
use crate::services::rewards::{
    CelebrationOutcome, CelebrationRequest, RewardError, RewardOrchestrator, RewardPolicy,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub user_id: String,
    pub total_xp: i64,
    pub level: i64,
    pub lessons_completed: i64,
    pub songs_completed: i64,
    pub quizzes_completed: i64,
    pub chords_completed: i64,
    pub current_streak: i64,
    pub best_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

impl UserStats {
    fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_xp: 0,
            level: 1,
            lessons_completed: 0,
            songs_completed: 0,
            quizzes_completed: 0,
            chords_completed: 0,
            current_streak: 0,
            best_streak: 0,
            last_activity_date: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Reward(#[from] RewardError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub stats: UserStats,
    pub xp_earned: i64,
    pub leveled_up: bool,
    pub new_achievements: Vec<EarnedAchievement>,
}

#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// An identical completion already exists; nothing was mutated.
    AlreadyCompleted,
    Applied(Box<CompletionSummary>),
}

#[derive(Debug, Clone)]
pub struct QuizSubmission {
    pub quiz_id: String,
    pub quiz_type: String,
    pub score: i64,
    pub total_questions: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultSummary {
    pub is_perfect: bool,
    pub xp_earned: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celebration: Option<CelebrationOutcome>,
    pub stats: UserStats,
    pub new_achievements: Vec<EarnedAchievement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub current: i64,
    pub best: i64,
}

/// `level = floor(total_xp / 100) + 1` for non-negative XP.
pub fn level_for_xp(total_xp: i64) -> i64 {
    total_xp / 100 + 1
}

/// Calendar-day streak continuity: yesterday extends, today is neutral,
/// anything older (or no prior activity) resets to 1.
pub fn advance_streak(
    last_activity: Option<NaiveDate>,
    today: NaiveDate,
    current: i64,
    best: i64,
) -> StreakUpdate {
    // `pred_opt` has no predecessor only at the date origin, where no
    // earlier activity can exist; the reset arm covers it.
    let current = match (last_activity, today.pred_opt()) {
        (Some(date), Some(yesterday)) if date == yesterday => current + 1,
        (Some(date), _) if date == today => current,
        _ => 1,
    };
    StreakUpdate {
        current,
        best: best.max(current),
    }
}

pub fn quiz_is_perfect(score: i64, total_questions: i64) -> bool {
    total_questions > 0 && score >= total_questions
}

#[derive(Debug, Clone, Copy)]
enum CompletionKind {
    Lesson,
    Song,
    Quiz,
    Chord,
}

impl CompletionKind {
    fn counter_column(self) -> &'static str {
        match self {
            Self::Lesson => "lessonsCompleted",
            Self::Song => "songsCompleted",
            Self::Quiz => "quizzesCompleted",
            Self::Chord => "chordsCompleted",
        }
    }
}

pub async fn record_lesson_completion(
    pool: &PgPool,
    cache: &CatalogCache,
    policy: &RewardPolicy,
    user_id: &str,
    lesson_id: &str,
) -> Result<CompletionOutcome, StatsError> {
    validate_id(user_id, "userId")?;
    validate_id(lesson_id, "lessonId")?;
    ensure_user_exists(pool, user_id).await?;

    let lesson = sqlx::query(r#"SELECT "xpReward" FROM "lessons" WHERE "id" = $1"#)
        .bind(lesson_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StatsError::NotFound(format!("lesson {lesson_id} does not exist")))?;
    let xp = lesson
        .try_get::<Option<i64>, _>("xpReward")
        .ok()
        .flatten()
        .unwrap_or(policy.default_lesson_xp);

    let today = Utc::now().date_naive();
    let mut tx = pool.begin().await?;

    // Repeated UI triggers for an already-completed lesson are a silent
    // no-op. The conflict target carries the check, so two concurrent
    // submissions cannot both credit the lesson.
    let inserted = sqlx::query(
        r#"INSERT INTO "lesson_completions" ("id","userId","lessonId","completed","xpEarned")
           VALUES ($1,$2,$3,TRUE,$4)
           ON CONFLICT ("userId","lessonId") DO UPDATE
           SET "completed" = TRUE, "xpEarned" = EXCLUDED."xpEarned", "completedAt" = NOW()
           WHERE NOT "lesson_completions"."completed""#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(lesson_id)
    .bind(xp)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(CompletionOutcome::AlreadyCompleted);
    }

    let transition =
        apply_stats_mutation(&mut tx, user_id, xp, CompletionKind::Lesson, today).await?;
    tx.commit().await?;

    finish_completion(pool, cache, user_id, xp, transition).await
}

pub async fn record_song_completion(
    pool: &PgPool,
    cache: &CatalogCache,
    policy: &RewardPolicy,
    user_id: &str,
    song_id: &str,
    song_title: &str,
    mistakes_count: i64,
) -> Result<CompletionOutcome, StatsError> {
    validate_id(user_id, "userId")?;
    validate_id(song_id, "songId")?;
    if mistakes_count < 0 {
        return Err(StatsError::Validation(
            "mistakesCount must not be negative".to_string(),
        ));
    }
    ensure_user_exists(pool, user_id).await?;

    let is_perfect = mistakes_count == 0;
    let xp = policy.song_reward(is_perfect);
    let today = Utc::now().date_naive();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO "song_completions"
           ("id","userId","songId","songTitle","mistakesCount","isPerfect","xpEarned")
           VALUES ($1,$2,$3,$4,$5,$6,$7)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(song_id)
    .bind(song_title)
    .bind(mistakes_count)
    .bind(is_perfect)
    .bind(xp)
    .execute(&mut *tx)
    .await?;

    let transition = apply_stats_mutation(&mut tx, user_id, xp, CompletionKind::Song, today).await?;
    tx.commit().await?;

    finish_completion(pool, cache, user_id, xp, transition).await
}

pub async fn record_chord_completion(
    pool: &PgPool,
    cache: &CatalogCache,
    policy: &RewardPolicy,
    user_id: &str,
    chord_id: &str,
    chord_name: &str,
    is_perfect: bool,
) -> Result<CompletionOutcome, StatsError> {
    validate_id(user_id, "userId")?;
    validate_id(chord_id, "chordId")?;
    ensure_user_exists(pool, user_id).await?;

    let xp = policy.chord_reward(is_perfect);
    let today = Utc::now().date_naive();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO "chord_completions"
           ("id","userId","chordId","chordName","isPerfect","xpEarned")
           VALUES ($1,$2,$3,$4,$5,$6)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(chord_id)
    .bind(chord_name)
    .bind(is_perfect)
    .bind(xp)
    .execute(&mut *tx)
    .await?;

    let transition =
        apply_stats_mutation(&mut tx, user_id, xp, CompletionKind::Chord, today).await?;
    tx.commit().await?;

    finish_completion(pool, cache, user_id, xp, transition).await
}

/// Perfect results flow through the reward orchestrator; imperfect results
/// are written as history-only rows and never touch `totalXp`.
pub async fn save_quiz_result<O: RewardOrchestrator>(
    pool: &PgPool,
    cache: &CatalogCache,
    orchestrator: &O,
    user_id: &str,
    submission: QuizSubmission,
) -> Result<QuizResultSummary, StatsError> {
    validate_id(user_id, "userId")?;
    validate_id(&submission.quiz_id, "quizId")?;
    if submission.total_questions <= 0 {
        return Err(StatsError::Validation(
            "totalQuestions must be positive".to_string(),
        ));
    }
    if submission.score < 0 || submission.score > submission.total_questions {
        return Err(StatsError::Validation(
            "score must be between 0 and totalQuestions".to_string(),
        ));
    }
    ensure_user_exists(pool, user_id).await?;

    let is_perfect = quiz_is_perfect(submission.score, submission.total_questions);
    let today = Utc::now().date_naive();

    if is_perfect {
        let celebration = orchestrator
            .celebrate(
                pool,
                CelebrationRequest {
                    user_id: user_id.to_string(),
                    quiz_id: submission.quiz_id.clone(),
                    quiz_type: submission.quiz_type.clone(),
                    score: submission.score,
                    total_questions: submission.total_questions,
                },
            )
            .await?;

        if celebration.already_rewarded {
            // Retry within the dedup window: nothing else to record.
            let stats = fetch_stats(pool, user_id).await?;
            return Ok(QuizResultSummary {
                is_perfect,
                xp_earned: 0,
                celebration: Some(celebration),
                stats,
                new_achievements: Vec::new(),
            });
        }

        // The orchestrator already applied the XP; counters and streak are ours.
        let mut tx = pool.begin().await?;
        apply_stats_mutation(&mut tx, user_id, 0, CompletionKind::Quiz, today).await?;
        tx.commit().await?;

        let stats = fetch_stats(pool, user_id).await?;
        let new_achievements = evaluate_or_warn(pool, cache, user_id, &stats).await;
        let stats = refresh_after_awards(pool, user_id, stats, &new_achievements).await?;

        return Ok(QuizResultSummary {
            is_perfect,
            xp_earned: celebration.xp_earned,
            celebration: Some(celebration),
            stats,
            new_achievements,
        });
    }

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO "quiz_results"
           ("id","userId","quizId","quizType","score","totalQuestions","isPerfect","xpEarned")
           VALUES ($1,$2,$3,$4,$5,$6,FALSE,0)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&submission.quiz_id)
    .bind(&submission.quiz_type)
    .bind(submission.score)
    .bind(submission.total_questions)
    .execute(&mut *tx)
    .await?;

    let transition = apply_stats_mutation(&mut tx, user_id, 0, CompletionKind::Quiz, today).await?;
    tx.commit().await?;

    let new_achievements = evaluate_or_warn(pool, cache, user_id, &transition.after).await;
    let stats = refresh_after_awards(pool, user_id, transition.after, &new_achievements).await?;

    Ok(QuizResultSummary {
        is_perfect,
        xp_earned: 0,
        celebration: None,
        stats,
        new_achievements,
    })
}

pub async fn get_user_stats(pool: &PgPool, user_id: &str) -> Result<UserStats, StatsError> {
    validate_id(user_id, "userId")?;
    ensure_user_exists(pool, user_id).await?;
    Ok(fetch_stats(pool, user_id).await?)
}

/// Current stats row, or an all-zero snapshot when the user has none yet.
pub async fn fetch_stats(pool: &PgPool, user_id: &str) -> Result<UserStats, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT "totalXp","level","lessonsCompleted","songsCompleted","quizzesCompleted",
                  "chordsCompleted","currentStreak","bestStreak","lastActivityDate"
           FROM "user_stats" WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(row) => stats_from_row(user_id, &row),
        None => UserStats::empty(user_id),
    })
}

struct StatsTransition {
    before: UserStats,
    after: UserStats,
}

/// One logical stats mutation: XP, level, counter, streak and activity date
/// change together inside the caller's transaction. Records a level-up row
/// when the level increased.
async fn apply_stats_mutation(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    xp_delta: i64,
    kind: CompletionKind,
    today: NaiveDate,
) -> Result<StatsTransition, sqlx::Error> {
    sqlx::query(r#"INSERT INTO "user_stats" ("userId") VALUES ($1) ON CONFLICT DO NOTHING"#)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let row = sqlx::query(
        r#"SELECT "totalXp","level","lessonsCompleted","songsCompleted","quizzesCompleted",
                  "chordsCompleted","currentStreak","bestStreak","lastActivityDate"
           FROM "user_stats" WHERE "userId" = $1 FOR UPDATE"#,
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    let before = stats_from_row(user_id, &row);

    let streak = advance_streak(
        before.last_activity_date,
        today,
        before.current_streak,
        before.best_streak,
    );
    let new_total = before.total_xp + xp_delta;
    let new_level = level_for_xp(new_total);

    let counter = kind.counter_column();
    let sql = format!(
        r#"UPDATE "user_stats"
           SET "totalXp" = $2, "level" = $3, "{counter}" = "{counter}" + 1,
               "currentStreak" = $4, "bestStreak" = $5, "lastActivityDate" = $6,
               "updatedAt" = NOW()
           WHERE "userId" = $1"#
    );
    sqlx::query(&sql)
        .bind(user_id)
        .bind(new_total)
        .bind(new_level)
        .bind(streak.current)
        .bind(streak.best)
        .bind(today)
        .execute(&mut **tx)
        .await?;

    if new_level > before.level {
        sqlx::query(
            r#"INSERT INTO "level_ups" ("id","userId","newLevel","totalXpAtLevelUp")
               VALUES ($1,$2,$3,$4)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(new_level)
        .bind(new_total)
        .execute(&mut **tx)
        .await?;
    }

    let mut after = before.clone();
    after.total_xp = new_total;
    after.level = new_level;
    after.current_streak = streak.current;
    after.best_streak = streak.best;
    after.last_activity_date = Some(today);
    match kind {
        CompletionKind::Lesson => after.lessons_completed += 1,
        CompletionKind::Song => after.songs_completed += 1,
        CompletionKind::Quiz => after.quizzes_completed += 1,
        CompletionKind::Chord => after.chords_completed += 1,
    }

    Ok(StatsTransition { before, after })
}

async fn finish_completion(
    pool: &PgPool,
    cache: &CatalogCache,
    user_id: &str,
    xp_earned: i64,
    transition: StatsTransition,
) -> Result<CompletionOutcome, StatsError> {
    let leveled_up = transition.after.level > transition.before.level;
    let new_achievements = evaluate_or_warn(pool, cache, user_id, &transition.after).await;
    let stats = refresh_after_awards(pool, user_id, transition.after, &new_achievements).await?;

    Ok(CompletionOutcome::Applied(Box::new(CompletionSummary {
        stats,
        xp_earned,
        leveled_up,
        new_achievements,
    })))
}

/// Achievement evaluation runs after the stats commit; a failure there must
/// not roll back an already-recorded completion, so it degrades to "none".
async fn evaluate_or_warn(
    pool: &PgPool,
    cache: &CatalogCache,
    user_id: &str,
    snapshot: &UserStats,
) -> Vec<EarnedAchievement> {
    match achievements::evaluate_and_award(pool, cache, user_id, snapshot).await {
        Ok(awarded) => awarded,
        Err(err) => {
            tracing::warn!(error = %err, user_id, "achievement evaluation failed");
            Vec::new()
        }
    }
}

async fn refresh_after_awards(
    pool: &PgPool,
    user_id: &str,
    current: UserStats,
    awarded: &[EarnedAchievement],
) -> Result<UserStats, sqlx::Error> {
    if awarded.is_empty() {
        return Ok(current);
    }
    fetch_stats(pool, user_id).await
}

async fn ensure_user_exists(pool: &PgPool, user_id: &str) -> Result<(), StatsError> {
    let exists: Option<i32> = sqlx::query_scalar(r#"SELECT 1 FROM "users" WHERE "id" = $1"#)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(StatsError::NotFound(format!(
            "user {user_id} does not exist"
        )));
    }
    Ok(())
}

fn validate_id(value: &str, field: &str) -> Result<(), StatsError> {
    if value.trim().is_empty() {
        return Err(StatsError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn stats_from_row(user_id: &str, row: &sqlx::postgres::PgRow) -> UserStats {
    UserStats {
        user_id: user_id.to_string(),
        total_xp: row.try_get("totalXp").unwrap_or(0),
        level: row.try_get("level").unwrap_or(1),
        lessons_completed: row.try_get("lessonsCompleted").unwrap_or(0),
        songs_completed: row.try_get("songsCompleted").unwrap_or(0),
        quizzes_completed: row.try_get("quizzesCompleted").unwrap_or(0),
        chords_completed: row.try_get("chordsCompleted").unwrap_or(0),
        current_streak: row.try_get("currentStreak").unwrap_or(0),
        best_streak: row.try_get("bestStreak").unwrap_or(0),
        last_activity_date: row.try_get("lastActivityDate").ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn level_formula() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(520), 6);
    }

    #[test]
    fn streak_extends_after_yesterday() {
        let update = advance_streak(Some(date("2026-03-01")), date("2026-03-02"), 4, 7);
        assert_eq!(update.current, 5);
        assert_eq!(update.best, 7);
    }

    #[test]
    fn streak_unchanged_same_day() {
        let update = advance_streak(Some(date("2026-03-02")), date("2026-03-02"), 4, 4);
        assert_eq!(update.current, 4);
        assert_eq!(update.best, 4);
    }

    #[test]
    fn streak_resets_after_gap() {
        let update = advance_streak(Some(date("2026-02-20")), date("2026-03-02"), 9, 9);
        assert_eq!(update.current, 1);
        assert_eq!(update.best, 9);
    }

    #[test]
    fn streak_starts_at_one_for_first_activity() {
        let update = advance_streak(None, date("2026-03-02"), 0, 0);
        assert_eq!(update.current, 1);
        assert_eq!(update.best, 1);
    }

    #[test]
    fn streak_at_date_origin_never_extends() {
        // No predecessor exists for the first representable date.
        let same_day = advance_streak(Some(NaiveDate::MIN), NaiveDate::MIN, 3, 3);
        assert_eq!(same_day.current, 3);

        let stale = advance_streak(Some(date("2026-03-01")), NaiveDate::MIN, 5, 5);
        assert_eq!(stale.current, 1);
    }

    #[test]
    fn best_streak_follows_new_record() {
        let update = advance_streak(Some(date("2026-03-01")), date("2026-03-02"), 7, 7);
        assert_eq!(update.current, 8);
        assert_eq!(update.best, 8);
    }

    #[test]
    fn perfect_quiz_requires_full_score() {
        assert!(quiz_is_perfect(10, 10));
        assert!(!quiz_is_perfect(9, 10));
        assert!(!quiz_is_perfect(0, 0));
    }
}

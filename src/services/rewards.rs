use serde::Serialize;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::services::stats::level_for_xp;

/// Minutes within which a repeated perfect submission for the same quiz is
/// treated as a UI retry and not rewarded again.
const REWARD_DEDUP_WINDOW_MINUTES: f64 = 10.0;

/// XP amounts for every completion kind. Injected explicitly instead of being
/// read from ambient global state, so callers and tests control the values.
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    pub default_lesson_xp: i64,
    pub perfect_song_xp: i64,
    pub song_xp: i64,
    pub perfect_chord_xp: i64,
    pub chord_xp: i64,
    pub perfect_quiz_xp: i64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            default_lesson_xp: 50,
            perfect_song_xp: 100,
            song_xp: 50,
            perfect_chord_xp: 50,
            chord_xp: 25,
            perfect_quiz_xp: 100,
        }
    }
}

impl RewardPolicy {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            default_lesson_xp: env_i64("XP_LESSON_DEFAULT", base.default_lesson_xp),
            perfect_song_xp: env_i64("XP_SONG_PERFECT", base.perfect_song_xp),
            song_xp: env_i64("XP_SONG", base.song_xp),
            perfect_chord_xp: env_i64("XP_CHORD_PERFECT", base.perfect_chord_xp),
            chord_xp: env_i64("XP_CHORD", base.chord_xp),
            perfect_quiz_xp: env_i64("XP_QUIZ_PERFECT", base.perfect_quiz_xp),
        }
    }

    pub fn song_reward(&self, is_perfect: bool) -> i64 {
        if is_perfect {
            self.perfect_song_xp
        } else {
            self.song_xp
        }
    }

    pub fn chord_reward(&self, is_perfect: bool) -> i64 {
        if is_perfect {
            self.perfect_chord_xp
        } else {
            self.chord_xp
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= 0)
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct CelebrationRequest {
    pub user_id: String,
    pub quiz_id: String,
    pub quiz_type: String,
    pub score: i64,
    pub total_questions: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CelebrationOutcome {
    pub xp_earned: i64,
    pub leveled_up: bool,
    pub level: i64,
    pub total_xp: i64,
    pub already_rewarded: bool,
}

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Consumed contract of the celebration path. Only qualifying (perfect)
/// results go through `celebrate`; imperfect results are persisted as
/// history-only rows elsewhere and never reach this trait.
#[allow(async_fn_in_trait)]
pub trait RewardOrchestrator {
    async fn celebrate(
        &self,
        pool: &PgPool,
        request: CelebrationRequest,
    ) -> Result<CelebrationOutcome, RewardError>;
}

#[derive(Debug, Clone)]
pub struct DbRewardOrchestrator {
    policy: RewardPolicy,
}

impl DbRewardOrchestrator {
    pub fn new(policy: RewardPolicy) -> Self {
        Self { policy }
    }
}

impl RewardOrchestrator for DbRewardOrchestrator {
    async fn celebrate(
        &self,
        pool: &PgPool,
        request: CelebrationRequest,
    ) -> Result<CelebrationOutcome, RewardError> {
        if request.user_id.trim().is_empty() {
            return Err(RewardError::Validation("userId is required".to_string()));
        }
        if request.quiz_id.trim().is_empty() {
            return Err(RewardError::Validation("quizId is required".to_string()));
        }

        // Recent perfect row for the same quiz means this is a retry.
        let recent: Option<(i64,)> = sqlx::query_as(
            r#"SELECT "xpEarned" FROM "quiz_results"
               WHERE "userId" = $1 AND "quizId" = $2 AND "isPerfect" = TRUE
                 AND "completedAt" > NOW() - ($3 * INTERVAL '1 minute')
               LIMIT 1"#,
        )
        .bind(&request.user_id)
        .bind(&request.quiz_id)
        .bind(REWARD_DEDUP_WINDOW_MINUTES)
        .fetch_optional(pool)
        .await?;

        if recent.is_some() {
            let row = sqlx::query(
                r#"SELECT "totalXp", "level" FROM "user_stats" WHERE "userId" = $1"#,
            )
            .bind(&request.user_id)
            .fetch_optional(pool)
            .await?;

            let (total_xp, level) = row
                .map(|r| {
                    (
                        r.try_get::<i64, _>("totalXp").unwrap_or(0),
                        r.try_get::<i64, _>("level").unwrap_or(1),
                    )
                })
                .unwrap_or((0, 1));

            return Ok(CelebrationOutcome {
                xp_earned: 0,
                leveled_up: false,
                level,
                total_xp,
                already_rewarded: true,
            });
        }

        let xp = self.policy.perfect_quiz_xp;
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO "quiz_results"
               ("id","userId","quizId","quizType","score","totalQuestions","isPerfect","xpEarned")
               VALUES ($1,$2,$3,$4,$5,$6,TRUE,$7)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&request.user_id)
        .bind(&request.quiz_id)
        .bind(&request.quiz_type)
        .bind(request.score)
        .bind(request.total_questions)
        .bind(xp)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"INSERT INTO "user_stats" ("userId") VALUES ($1) ON CONFLICT DO NOTHING"#)
            .bind(&request.user_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"SELECT "totalXp", "level" FROM "user_stats" WHERE "userId" = $1 FOR UPDATE"#,
        )
        .bind(&request.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let old_total: i64 = row.try_get("totalXp").unwrap_or(0);
        let old_level: i64 = row.try_get("level").unwrap_or(1);
        let new_total = old_total + xp;
        let new_level = level_for_xp(new_total);
        let leveled_up = new_level > old_level;

        sqlx::query(
            r#"UPDATE "user_stats"
               SET "totalXp" = $2, "level" = $3, "updatedAt" = NOW()
               WHERE "userId" = $1"#,
        )
        .bind(&request.user_id)
        .bind(new_total)
        .bind(new_level)
        .execute(&mut *tx)
        .await?;

        if leveled_up {
            sqlx::query(
                r#"INSERT INTO "level_ups" ("id","userId","newLevel","totalXpAtLevelUp")
                   VALUES ($1,$2,$3,$4)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&request.user_id)
            .bind(new_level)
            .bind(new_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(CelebrationOutcome {
            xp_earned: xp,
            leveled_up,
            level: new_level,
            total_xp: new_total,
            already_rewarded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let policy = RewardPolicy::default();
        assert_eq!(policy.default_lesson_xp, 50);
        assert_eq!(policy.song_reward(true), 100);
        assert_eq!(policy.song_reward(false), 50);
        assert_eq!(policy.chord_reward(true), 50);
        assert_eq!(policy.chord_reward(false), 25);
        assert_eq!(policy.perfect_quiz_xp, 100);
    }
}

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::services::stats::UserStats;

pub const CATALOG_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    LessonsCompleted,
    SongsCompleted,
    QuizzesCompleted,
    ChordsCompleted,
    CurrentStreak,
    TotalXp,
    Level,
}

impl RequirementType {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "songs_completed" => Self::SongsCompleted,
            "quizzes_completed" => Self::QuizzesCompleted,
            "chords_completed" => Self::ChordsCompleted,
            "current_streak" | "streak" => Self::CurrentStreak,
            "total_xp" | "xp" => Self::TotalXp,
            "level" => Self::Level,
            _ => Self::LessonsCompleted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LessonsCompleted => "lessons_completed",
            Self::SongsCompleted => "songs_completed",
            Self::QuizzesCompleted => "quizzes_completed",
            Self::ChordsCompleted => "chords_completed",
            Self::CurrentStreak => "current_streak",
            Self::TotalXp => "total_xp",
            Self::Level => "level",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub requirement_type: RequirementType,
    pub requirement_value: i64,
    pub xp_reward: i64,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnedAchievement {
    pub id: String,
    pub achievement_id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub xp_reward: i64,
    pub earned_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementStatus {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub requirement_type: RequirementType,
    pub requirement_value: i64,
    pub xp_reward: i64,
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<String>,
    pub progress: i64,
}

#[derive(Debug, Error)]
pub enum AchievementError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// In-process catalog cache. Stale after [`CATALOG_TTL`]; invalidated
/// explicitly whenever admin tooling edits the catalog.
pub struct CatalogCache {
    entry: RwLock<Option<CacheEntry>>,
    ttl: Duration,
}

struct CacheEntry {
    fetched_at: Instant,
    definitions: Vec<AchievementDefinition>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    pub fn get(&self) -> Option<Vec<AchievementDefinition>> {
        let guard = self.entry.read();
        let entry = guard.as_ref()?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.definitions.clone())
    }

    pub fn store(&self, definitions: Vec<AchievementDefinition>) {
        let mut guard = self.entry.write();
        *guard = Some(CacheEntry {
            fetched_at: Instant::now(),
            definitions,
        });
    }

    pub fn invalidate(&self) {
        let mut guard = self.entry.write();
        *guard = None;
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(CATALOG_TTL)
    }
}

pub async fn load_catalog(
    pool: &PgPool,
    cache: &CatalogCache,
) -> Result<Vec<AchievementDefinition>, sqlx::Error> {
    if let Some(definitions) = cache.get() {
        return Ok(definitions);
    }

    let rows = sqlx::query(
        r#"SELECT "id","title","description","icon","requirementType","requirementValue",
                  "xpReward","sortOrder"
           FROM "achievement_definitions" WHERE "isActive" = TRUE
           ORDER BY "sortOrder", "id""#,
    )
    .fetch_all(pool)
    .await?;

    let definitions: Vec<AchievementDefinition> =
        rows.iter().map(definition_from_row).collect();
    cache.store(definitions.clone());
    Ok(definitions)
}

/// The stat the requirement compares against, keyed by requirement type.
pub fn comparison_value(requirement: RequirementType, snapshot: &UserStats) -> i64 {
    match requirement {
        RequirementType::LessonsCompleted => snapshot.lessons_completed,
        RequirementType::SongsCompleted => snapshot.songs_completed,
        RequirementType::QuizzesCompleted => snapshot.quizzes_completed,
        RequirementType::ChordsCompleted => snapshot.chords_completed,
        RequirementType::CurrentStreak => snapshot.current_streak,
        RequirementType::TotalXp => snapshot.total_xp,
        RequirementType::Level => snapshot.level,
    }
}

/// Definitions whose threshold the snapshot meets and that are not yet earned.
pub fn eligible_definitions<'a>(
    definitions: &'a [AchievementDefinition],
    earned: &HashSet<String>,
    snapshot: &UserStats,
) -> Vec<&'a AchievementDefinition> {
    definitions
        .iter()
        .filter(|def| !earned.contains(&def.id))
        .filter(|def| comparison_value(def.requirement_type, snapshot) >= def.requirement_value)
        .collect()
}

/// Single evaluation pass: each newly-qualified definition is awarded at most
/// once (uniqueness enforced by the DB constraint) and its XP reward applied.
/// XP added by an award is only compared against other thresholds on the next
/// triggering event; awarding never cascades within one pass.
pub async fn evaluate_and_award(
    pool: &PgPool,
    cache: &CatalogCache,
    user_id: &str,
    snapshot: &UserStats,
) -> Result<Vec<EarnedAchievement>, AchievementError> {
    let definitions = load_catalog(pool, cache).await?;
    let earned = earned_achievement_ids(pool, user_id).await?;

    let mut awarded = Vec::new();
    for def in eligible_definitions(&definitions, &earned, snapshot) {
        let row_id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            r#"INSERT INTO "user_achievements" ("id","userId","achievementId")
               VALUES ($1,$2,$3)
               ON CONFLICT ("userId","achievementId") DO NOTHING"#,
        )
        .bind(&row_id)
        .bind(user_id)
        .bind(&def.id)
        .execute(pool)
        .await;

        match inserted {
            Ok(result) if result.rows_affected() == 0 => {
                // A concurrent evaluation already awarded this one.
                tracing::debug!(user_id, achievement = %def.id, "achievement already awarded");
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                // One failed award must not abort the rest of the catalog.
                tracing::warn!(error = %err, achievement = %def.id, "achievement insert failed");
                continue;
            }
        }

        if def.xp_reward > 0 {
            let applied = sqlx::query(
                r#"UPDATE "user_stats"
                   SET "totalXp" = "totalXp" + $2,
                       "level" = ("totalXp" + $2) / 100 + 1,
                       "updatedAt" = NOW()
                   WHERE "userId" = $1"#,
            )
            .bind(user_id)
            .bind(def.xp_reward)
            .execute(pool)
            .await;
            if let Err(err) = applied {
                tracing::warn!(error = %err, achievement = %def.id, "achievement xp grant failed");
            }
        }

        tracing::info!(user_id, achievement = %def.id, xp = def.xp_reward, "achievement awarded");
        awarded.push(EarnedAchievement {
            id: row_id,
            achievement_id: def.id.clone(),
            title: def.title.clone(),
            description: def.description.clone(),
            icon: def.icon.clone(),
            xp_reward: def.xp_reward,
            earned_at: Utc::now().to_rfc3339(),
        });
    }

    Ok(awarded)
}

pub async fn get_user_achievements(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<EarnedAchievement>, AchievementError> {
    let rows = sqlx::query(
        r#"SELECT ua."id", ua."achievementId", ua."earnedAt",
                  d."title", d."description", d."icon", d."xpReward"
           FROM "user_achievements" ua
           JOIN "achievement_definitions" d ON ua."achievementId" = d."id"
           WHERE ua."userId" = $1 ORDER BY ua."earnedAt" DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| EarnedAchievement {
            id: row.try_get("id").unwrap_or_default(),
            achievement_id: row.try_get("achievementId").unwrap_or_default(),
            title: row.try_get("title").unwrap_or_default(),
            description: row.try_get("description").unwrap_or_default(),
            icon: row.try_get("icon").unwrap_or_default(),
            xp_reward: row.try_get("xpReward").unwrap_or(0),
            earned_at: timestamp_to_rfc3339(row, "earnedAt"),
        })
        .collect())
}

pub async fn get_all_with_status(
    pool: &PgPool,
    cache: &CatalogCache,
    user_id: &str,
) -> Result<Vec<AchievementStatus>, AchievementError> {
    let definitions = load_catalog(pool, cache).await?;
    let unlocked = earned_achievement_map(pool, user_id).await?;
    let snapshot = crate::services::stats::fetch_stats(pool, user_id).await?;

    Ok(definitions
        .into_iter()
        .map(|def| {
            let unlocked_at = unlocked.get(&def.id).cloned();
            let is_unlocked = unlocked_at.is_some();
            let progress = if is_unlocked {
                100
            } else if def.requirement_value > 0 {
                let current = comparison_value(def.requirement_type, &snapshot);
                ((current * 100) / def.requirement_value).clamp(0, 100)
            } else {
                0
            };

            AchievementStatus {
                id: def.id,
                title: def.title,
                description: def.description,
                icon: def.icon,
                requirement_type: def.requirement_type,
                requirement_value: def.requirement_value,
                xp_reward: def.xp_reward,
                unlocked: is_unlocked,
                unlocked_at,
                progress,
            }
        })
        .collect())
}

pub async fn get_definition(
    pool: &PgPool,
    achievement_id: &str,
) -> Result<AchievementDefinition, AchievementError> {
    let row = sqlx::query(
        r#"SELECT "id","title","description","icon","requirementType","requirementValue",
                  "xpReward","sortOrder"
           FROM "achievement_definitions" WHERE "id" = $1"#,
    )
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        AchievementError::NotFound(format!("achievement {achievement_id} does not exist"))
    })?;

    Ok(definition_from_row(&row))
}

pub async fn stored_earned_at(
    pool: &PgPool,
    user_id: &str,
    achievement_id: &str,
) -> Result<Option<String>, AchievementError> {
    let row = sqlx::query(
        r#"SELECT "earnedAt" FROM "user_achievements"
           WHERE "userId" = $1 AND "achievementId" = $2 LIMIT 1"#,
    )
    .bind(user_id)
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| timestamp_to_rfc3339(&r, "earnedAt")))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionInput {
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub requirement_type: String,
    pub requirement_value: i64,
    #[serde(default)]
    pub xp_reward: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i64,
}

fn default_true() -> bool {
    true
}

/// Admin catalog upsert. Invalidates the in-process cache so the next
/// evaluation sees the edit immediately.
pub async fn upsert_definition(
    pool: &PgPool,
    cache: &CatalogCache,
    input: DefinitionInput,
) -> Result<AchievementDefinition, AchievementError> {
    let id = input
        .id
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let requirement_type = RequirementType::parse(&input.requirement_type);

    sqlx::query(
        r#"INSERT INTO "achievement_definitions"
           ("id","title","description","icon","requirementType","requirementValue",
            "xpReward","isActive","sortOrder")
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
           ON CONFLICT ("id") DO UPDATE SET
             "title" = EXCLUDED."title",
             "description" = EXCLUDED."description",
             "icon" = EXCLUDED."icon",
             "requirementType" = EXCLUDED."requirementType",
             "requirementValue" = EXCLUDED."requirementValue",
             "xpReward" = EXCLUDED."xpReward",
             "isActive" = EXCLUDED."isActive",
             "sortOrder" = EXCLUDED."sortOrder""#,
    )
    .bind(&id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.icon)
    .bind(requirement_type.as_str())
    .bind(input.requirement_value)
    .bind(input.xp_reward)
    .bind(input.is_active)
    .bind(input.sort_order)
    .execute(pool)
    .await?;

    cache.invalidate();

    Ok(AchievementDefinition {
        id,
        title: input.title,
        description: input.description,
        icon: input.icon,
        requirement_type,
        requirement_value: input.requirement_value,
        xp_reward: input.xp_reward,
        sort_order: input.sort_order,
    })
}

async fn earned_achievement_ids(
    pool: &PgPool,
    user_id: &str,
) -> Result<HashSet<String>, sqlx::Error> {
    let rows =
        sqlx::query(r#"SELECT "achievementId" FROM "user_achievements" WHERE "userId" = $1"#)
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    Ok(rows
        .iter()
        .map(|r| r.try_get("achievementId").unwrap_or_default())
        .collect())
}

async fn earned_achievement_map(
    pool: &PgPool,
    user_id: &str,
) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "achievementId","earnedAt" FROM "user_achievements" WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let achievement_id: String = r.try_get("achievementId").unwrap_or_default();
            (achievement_id, timestamp_to_rfc3339(r, "earnedAt"))
        })
        .collect())
}

fn definition_from_row(row: &sqlx::postgres::PgRow) -> AchievementDefinition {
    let requirement_raw: String = row.try_get("requirementType").unwrap_or_default();
    AchievementDefinition {
        id: row.try_get("id").unwrap_or_default(),
        title: row.try_get("title").unwrap_or_default(),
        description: row.try_get("description").unwrap_or_default(),
        icon: row.try_get("icon").unwrap_or_default(),
        requirement_type: RequirementType::parse(&requirement_raw),
        requirement_value: row.try_get("requirementValue").unwrap_or(0),
        xp_reward: row.try_get("xpReward").unwrap_or(0),
        sort_order: row.try_get("sortOrder").unwrap_or(0),
    }
}

fn timestamp_to_rfc3339(row: &sqlx::postgres::PgRow, column: &str) -> String {
    let naive: NaiveDateTime = row
        .try_get(column)
        .unwrap_or_else(|_| Utc::now().naive_utc());
    chrono::DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> UserStats {
        UserStats {
            user_id: "u1".to_string(),
            total_xp: 520,
            level: 6,
            lessons_completed: 12,
            songs_completed: 3,
            quizzes_completed: 5,
            chords_completed: 2,
            current_streak: 4,
            best_streak: 9,
            last_activity_date: None,
        }
    }

    fn definition(id: &str, requirement: RequirementType, value: i64) -> AchievementDefinition {
        AchievementDefinition {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            icon: String::new(),
            requirement_type: requirement,
            requirement_value: value,
            xp_reward: 25,
            sort_order: 0,
        }
    }

    #[test]
    fn parse_accepts_aliases_and_defaults() {
        assert_eq!(RequirementType::parse("streak"), RequirementType::CurrentStreak);
        assert_eq!(RequirementType::parse("XP"), RequirementType::TotalXp);
        assert_eq!(RequirementType::parse("level"), RequirementType::Level);
        assert_eq!(
            RequirementType::parse("unknown"),
            RequirementType::LessonsCompleted
        );
    }

    #[test]
    fn comparison_reads_matching_stat() {
        let s = snapshot();
        assert_eq!(comparison_value(RequirementType::TotalXp, &s), 520);
        assert_eq!(comparison_value(RequirementType::CurrentStreak, &s), 4);
        assert_eq!(comparison_value(RequirementType::LessonsCompleted, &s), 12);
        assert_eq!(comparison_value(RequirementType::Level, &s), 6);
    }

    #[test]
    fn threshold_crossing_awards_exactly_once() {
        // 480 -> 520 XP crosses a 500 XP requirement.
        let defs = vec![
            definition("xp-500", RequirementType::TotalXp, 500),
            definition("xp-1000", RequirementType::TotalXp, 1000),
        ];
        let earned = HashSet::new();

        let mut before = snapshot();
        before.total_xp = 480;
        assert!(eligible_definitions(&defs, &earned, &before).is_empty());

        let eligible = eligible_definitions(&defs, &earned, &snapshot());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "xp-500");
    }

    #[test]
    fn already_earned_definitions_are_skipped() {
        let defs = vec![definition("xp-500", RequirementType::TotalXp, 500)];
        let earned: HashSet<String> = ["xp-500".to_string()].into_iter().collect();
        assert!(eligible_definitions(&defs, &earned, &snapshot()).is_empty());
    }

    #[test]
    fn exact_threshold_qualifies() {
        let defs = vec![definition("streak-4", RequirementType::CurrentStreak, 4)];
        let earned = HashSet::new();
        assert_eq!(eligible_definitions(&defs, &earned, &snapshot()).len(), 1);
    }

    #[test]
    fn cache_expires_and_invalidates() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());

        cache.store(vec![definition("a", RequirementType::Level, 2)]);
        assert_eq!(cache.get().map(|d| d.len()), Some(1));

        cache.invalidate();
        assert!(cache.get().is_none());

        let expired = CatalogCache::new(Duration::from_secs(0));
        expired.store(vec![definition("a", RequirementType::Level, 2)]);
        assert!(expired.get().is_none());
    }
}

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::services::achievements::RequirementType;

/// Per-kind cap for the dashboard feed; bounds query cost.
pub const RECENT_PER_KIND_LIMIT: i64 = 3;

pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Lesson,
    Song,
    Quiz,
    Chord,
    DailyGoal,
    LevelUp,
}

/// Computed feed entry; never persisted. The feed is reconstructed from the
/// completion tables on every read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub kind: ActivityKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub date: DateTime<Utc>,
    pub xp: i64,
    pub icon: String,
    pub is_special: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementActivities {
    pub activities: Vec<ActivityItem>,
    /// Timestamp of the last contributing event; display code uses it to
    /// correct a possibly-stale stored award timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_at: Option<DateTime<Utc>>,
}

pub fn quiz_type_label(quiz_type: &str) -> &'static str {
    match quiz_type {
        "notes" => "Kvíz: noty",
        "chords" => "Kvíz: akordy",
        "rhythm" => "Kvíz: rytmus",
        "intervals" => "Kvíz: intervaly",
        _ => "Kvíz",
    }
}

/// Dashboard feed: the freshest few events of each kind, merged and
/// re-sorted. Each source is isolated so one failing query degrades to an
/// empty contribution instead of blanking the whole feed.
pub async fn get_recent_activities(
    pool: &PgPool,
    user_id: &str,
    limit: usize,
) -> Vec<ActivityItem> {
    let songs = isolate(
        "song_completions",
        fetch_songs(pool, user_id, Some(RECENT_PER_KIND_LIMIT), false).await,
    );
    let quizzes = isolate(
        "quiz_results",
        fetch_quizzes(pool, user_id, Some(RECENT_PER_KIND_LIMIT), false).await,
    );
    let lessons = isolate(
        "lesson_completions",
        fetch_lessons(pool, user_id, Some(RECENT_PER_KIND_LIMIT), false).await,
    );

    merge_and_sort(vec![songs, quizzes, lessons], Some(limit))
}

/// Full history view: unbounded per kind, plus daily-goal and level-up
/// records flagged as special.
pub async fn get_all_user_activities(pool: &PgPool, user_id: &str) -> Vec<ActivityItem> {
    let songs = isolate(
        "song_completions",
        fetch_songs(pool, user_id, None, false).await,
    );
    let quizzes = isolate(
        "quiz_results",
        fetch_quizzes(pool, user_id, None, false).await,
    );
    let lessons = isolate(
        "lesson_completions",
        fetch_lessons(pool, user_id, None, false).await,
    );
    let goals = isolate(
        "daily_goal_completions",
        fetch_daily_goals(pool, user_id).await,
    );
    let level_ups = isolate("level_ups", fetch_level_ups(pool, user_id).await);

    merge_and_sort(vec![songs, quizzes, lessons, goals, level_ups], None)
}

/// The specific events that made an achievement eligible. Read-only.
pub async fn get_activities_for_achievement(
    pool: &PgPool,
    user_id: &str,
    requirement_type: RequirementType,
    requirement_value: i64,
) -> Result<AchievementActivities, sqlx::Error> {
    let activities = match requirement_type {
        RequirementType::LessonsCompleted => {
            let mut items = fetch_lessons(pool, user_id, None, true).await?;
            items.truncate(requirement_value.max(0) as usize);
            items
        }
        RequirementType::SongsCompleted => {
            let mut items = fetch_songs(pool, user_id, None, true).await?;
            items.truncate(requirement_value.max(0) as usize);
            items
        }
        RequirementType::QuizzesCompleted => {
            let mut items = fetch_quizzes(pool, user_id, None, true).await?;
            items.truncate(requirement_value.max(0) as usize);
            items
        }
        RequirementType::ChordsCompleted => {
            let mut items = fetch_chords(pool, user_id, None, true).await?;
            items.truncate(requirement_value.max(0) as usize);
            items
        }
        RequirementType::CurrentStreak => {
            let cutoff = Utc::now() - Duration::days(requirement_value.max(0));
            let mut items = merge_xp_sources(pool, user_id).await?;
            items.retain(|item| item.date >= cutoff);
            items.sort_by(|a, b| b.date.cmp(&a.date));
            items
        }
        RequirementType::TotalXp | RequirementType::Level => {
            let threshold = match requirement_type {
                RequirementType::Level => (requirement_value - 1).max(0) * 100,
                _ => requirement_value,
            };
            let events = merge_xp_sources(pool, user_id).await?;
            take_until_xp(events, threshold)
        }
    };

    let earned_at = match requirement_type {
        // Descending window: the most recent event is first.
        RequirementType::CurrentStreak => activities.first().map(|item| item.date),
        // Ascending selections end with the crossing event.
        _ => activities.last().map(|item| item.date),
    };

    Ok(AchievementActivities {
        activities,
        earned_at,
    })
}

/// Merges pre-sorted batches into a single descending-by-date sequence.
pub fn merge_and_sort(
    batches: Vec<Vec<ActivityItem>>,
    limit: Option<usize>,
) -> Vec<ActivityItem> {
    let mut items: Vec<ActivityItem> = batches.into_iter().flatten().collect();
    items.sort_by(|a, b| b.date.cmp(&a.date));
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// Ascending XP-bearing events up to and including the one whose cumulative
/// sum first reaches `threshold`.
pub fn take_until_xp(events: Vec<ActivityItem>, threshold: i64) -> Vec<ActivityItem> {
    let mut out = Vec::new();
    let mut sum = 0i64;
    for event in events {
        if sum >= threshold {
            break;
        }
        sum += event.xp;
        out.push(event);
    }
    out
}

fn isolate(source: &str, result: Result<Vec<ActivityItem>, sqlx::Error>) -> Vec<ActivityItem> {
    match result {
        Ok(items) => items,
        Err(err) => {
            tracing::warn!(error = %err, source, "activity source read failed, skipping");
            Vec::new()
        }
    }
}

async fn merge_xp_sources(pool: &PgPool, user_id: &str) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let mut items = fetch_lessons(pool, user_id, None, true).await?;
    items.extend(fetch_songs(pool, user_id, None, true).await?);
    items.extend(fetch_quizzes(pool, user_id, None, true).await?);
    items.extend(fetch_chords(pool, user_id, None, true).await?);
    items.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(items)
}

async fn fetch_lessons(
    pool: &PgPool,
    user_id: &str,
    limit: Option<i64>,
    ascending: bool,
) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let sql = build_query(
        r#"SELECT lc."id", lc."xpEarned", lc."completedAt", l."title"
           FROM "lesson_completions" lc
           LEFT JOIN "lessons" l ON lc."lessonId" = l."id"
           WHERE lc."userId" = $1 AND lc."completed" = TRUE
           ORDER BY lc."completedAt""#,
        ascending,
        limit,
    );

    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let title: Option<String> = row.try_get("title").ok();
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::Lesson,
                title: title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Lekce".to_string()),
                subtitle: None,
                date: row_timestamp(row, "completedAt"),
                xp: row.try_get("xpEarned").unwrap_or(0),
                icon: "📚".to_string(),
                is_special: false,
            }
        })
        .collect())
}

async fn fetch_songs(
    pool: &PgPool,
    user_id: &str,
    limit: Option<i64>,
    ascending: bool,
) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let sql = build_query(
        r#"SELECT "id", "songTitle", "isPerfect", "xpEarned", "completedAt"
           FROM "song_completions"
           WHERE "userId" = $1
           ORDER BY "completedAt""#,
        ascending,
        limit,
    );

    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let title: String = row.try_get("songTitle").unwrap_or_default();
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::Song,
                title: if title.is_empty() {
                    "Píseň".to_string()
                } else {
                    title
                },
                subtitle: None,
                date: row_timestamp(row, "completedAt"),
                xp: row.try_get("xpEarned").unwrap_or(0),
                icon: "🎵".to_string(),
                is_special: false,
            }
        })
        .collect())
}

async fn fetch_quizzes(
    pool: &PgPool,
    user_id: &str,
    limit: Option<i64>,
    ascending: bool,
) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let sql = build_query(
        r#"SELECT "id", "quizType", "xpEarned", "completedAt"
           FROM "quiz_results"
           WHERE "userId" = $1
           ORDER BY "completedAt""#,
        ascending,
        limit,
    );

    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let quiz_type: String = row.try_get("quizType").unwrap_or_default();
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::Quiz,
                title: quiz_type_label(&quiz_type).to_string(),
                subtitle: None,
                date: row_timestamp(row, "completedAt"),
                xp: row.try_get("xpEarned").unwrap_or(0),
                icon: "❓".to_string(),
                is_special: false,
            }
        })
        .collect())
}

async fn fetch_chords(
    pool: &PgPool,
    user_id: &str,
    limit: Option<i64>,
    ascending: bool,
) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let sql = build_query(
        r#"SELECT "id", "chordName", "xpEarned", "completedAt"
           FROM "chord_completions"
           WHERE "userId" = $1
           ORDER BY "completedAt""#,
        ascending,
        limit,
    );

    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.try_get("chordName").unwrap_or_default();
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::Chord,
                title: if name.is_empty() {
                    "Akord".to_string()
                } else {
                    format!("Akord {name}")
                },
                subtitle: None,
                date: row_timestamp(row, "completedAt"),
                xp: row.try_get("xpEarned").unwrap_or(0),
                icon: "🎹".to_string(),
                is_special: false,
            }
        })
        .collect())
}

async fn fetch_daily_goals(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "id", "lessonsRequired", "xpEarned", "completedAt"
           FROM "daily_goal_completions"
           WHERE "userId" = $1
           ORDER BY "completedAt" DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let lessons: i64 = row.try_get("lessonsRequired").unwrap_or(0);
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::DailyGoal,
                title: format!("{lessons} lekcí"),
                subtitle: Some("🎯 Denní cíl splněn!".to_string()),
                date: row_timestamp(row, "completedAt"),
                xp: row.try_get("xpEarned").unwrap_or(0),
                icon: "🎯".to_string(),
                is_special: true,
            }
        })
        .collect())
}

async fn fetch_level_ups(pool: &PgPool, user_id: &str) -> Result<Vec<ActivityItem>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "id", "newLevel", "achievedAt"
           FROM "level_ups"
           WHERE "userId" = $1
           ORDER BY "achievedAt" DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let level: i64 = row.try_get("newLevel").unwrap_or(1);
            ActivityItem {
                id: row.try_get("id").unwrap_or_default(),
                kind: ActivityKind::LevelUp,
                title: format!("Úroveň {level}"),
                subtitle: Some("⬆️ Nová úroveň!".to_string()),
                date: row_timestamp(row, "achievedAt"),
                xp: 0,
                icon: "⭐".to_string(),
                is_special: true,
            }
        })
        .collect())
}

fn build_query(base: &str, ascending: bool, limit: Option<i64>) -> String {
    let mut sql = String::from(base);
    sql.push_str(if ascending { " ASC" } else { " DESC" });
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

fn row_timestamp(row: &sqlx::postgres::PgRow, column: &str) -> DateTime<Utc> {
    let naive: NaiveDateTime = row
        .try_get(column)
        .unwrap_or_else(|_| Utc::now().naive_utc());
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, ts_secs: i64, xp: i64) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            kind: ActivityKind::Song,
            title: id.to_string(),
            subtitle: None,
            date: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            xp,
            icon: String::new(),
            is_special: false,
        }
    }

    #[test]
    fn merge_orders_descending_across_kinds() {
        let songs = vec![item("s1", 10, 100), item("s2", 30, 100)];
        let quizzes = vec![item("q1", 20, 50)];

        let merged = merge_and_sort(vec![songs, quizzes], Some(3));
        let ids: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "q1", "s1"]);
    }

    #[test]
    fn merge_truncates_to_limit() {
        let batch = vec![item("a", 1, 0), item("b", 2, 0), item("c", 3, 0)];
        let merged = merge_and_sort(vec![batch], Some(2));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "c");
    }

    #[test]
    fn take_until_xp_includes_crossing_event() {
        // 50 + 60 = 110 < 150; the 70 event crosses, so all three are kept.
        let events = vec![item("a", 1, 50), item("b", 2, 60), item("c", 3, 70)];
        let taken = take_until_xp(events, 150);
        assert_eq!(taken.len(), 3);
    }

    #[test]
    fn take_until_xp_stops_after_threshold() {
        let events = vec![item("a", 1, 100), item("b", 2, 100), item("c", 3, 100)];
        let taken = take_until_xp(events, 150);
        assert_eq!(taken.len(), 2);
    }

    #[test]
    fn take_until_xp_zero_threshold_is_empty() {
        let events = vec![item("a", 1, 100)];
        assert!(take_until_xp(events, 0).is_empty());
    }

    #[test]
    fn quiz_label_falls_back() {
        assert_eq!(quiz_type_label("notes"), "Kvíz: noty");
        assert_eq!(quiz_type_label("whatever"), "Kvíz");
    }
}

//! # Database Module
//!
//! SQLite persistence for user profiles, meal logs and reminder schedules.
//!
//! Timestamps are stored as UTC text in the `CURRENT_TIMESTAMP` format
//! (`YYYY-MM-DD HH:MM:SS`), so string comparison orders them chronologically.
//! "Today", "week" and "month" are local-calendar windows computed here from a
//! fixed UTC offset and turned into UTC bounds for the queries.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqlitePool};
use tracing::{debug, info};

use crate::calculator::{ActivityLevel, GoalType, MacroTargets, Sex};
use crate::nutrition::Nutrients;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns read into a [`UserProfile`], in a fixed order
const USER_COLUMNS: &str = "user_id, name, weight, height, age, sex, activity, daily_calories, \
     protein_norm, fat_norm, carbs_norm, goal, target_weight, goal_pace, goal_start, \
     notifications_enabled, last_menu_request, language_code";

/// Columns added to `users` after the first schema version, with their definitions
const USER_COLUMN_MIGRATIONS: &[(&str, &str)] = &[
    ("goal", "TEXT NOT NULL DEFAULT 'maintain'"),
    ("target_weight", "REAL"),
    ("goal_pace", "REAL"),
    ("goal_start", "TEXT"),
    ("notifications_enabled", "INTEGER NOT NULL DEFAULT 1"),
    ("last_menu_request", "TEXT"),
    ("language_code", "TEXT"),
];

/// Body metrics plus the targets derived from them
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileData {
    pub name: String,
    pub weight: f64,
    pub height: u32,
    pub age: u32,
    pub sex: Sex,
    pub activity: ActivityLevel,
    pub daily_calories: f64,
    pub macros: MacroTargets,
}

/// Goal type with its optional target weight and weekly pace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSettings {
    pub goal: GoalType,
    pub target_weight: Option<f64>,
    pub kg_per_week: Option<f64>,
}

impl GoalSettings {
    pub fn maintain() -> Self {
        Self {
            goal: GoalType::Maintain,
            target_weight: None,
            kg_per_week: None,
        }
    }
}

/// Stored user record
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: i64,
    pub data: ProfileData,
    pub goal: GoalSettings,
    pub goal_start: Option<DateTime<Utc>>,
    pub notifications_enabled: bool,
    pub last_menu_request: Option<DateTime<Utc>>,
    pub language_code: Option<String>,
}

/// One logged meal
#[derive(Debug, Clone, PartialEq)]
pub struct MealEntry {
    pub id: i64,
    pub user_id: i64,
    pub description: String,
    pub nutrients: Nutrients,
    pub created_at: DateTime<Utc>,
}

/// One slot of a user's reminder schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealReminder {
    pub slot: i64,
    pub name: String,
    pub time: String,
}

/// Reminder ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub user_id: i64,
    pub name: String,
    pub language_code: Option<String>,
}

/// Aggregation period in local calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
}

impl Period {
    pub fn days(&self) -> u32 {
        match self {
            Period::Today => 1,
            Period::Week => 7,
            Period::Month => 30,
        }
    }
}

/// UTC bounds `[start, end)` covering whole local days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// The last `days` local days, today included
    pub fn last_days(now: DateTime<Utc>, offset: FixedOffset, days: u32) -> Self {
        let today = local_date(now, offset);
        let first = today - Duration::days(i64::from(days.max(1)) - 1);
        let tomorrow = today + Duration::days(1);
        Self {
            start: local_midnight_utc(first, offset),
            end: local_midnight_utc(tomorrow, offset),
        }
    }

    pub fn for_period(period: Period, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self::last_days(now, offset, period.days())
    }
}

/// Calendar date of `instant` in the bot's time zone
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

fn local_midnight_utc(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match offset.from_local_datetime(&midnight).single() {
        Some(local) => local.with_timezone(&Utc),
        // A fixed offset is never ambiguous; fall back to treating it as UTC
        None => Utc.from_utc_datetime(&midnight),
    }
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Open (creating if needed) the database file and bring the schema up to date.
///
/// The schema is created and migrated on a dedicated connection that is closed
/// before the pool opens, so no pooled connection ever sees a pre-migration table.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let mut conn = options
        .connect()
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    init_database_schema(&mut conn).await?;
    conn.close().await.context("Failed to close migration connection")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(pool)
}

/// Create missing tables and add missing columns without touching existing rows
pub async fn init_database_schema(conn: &mut SqliteConnection) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            weight REAL NOT NULL,
            height INTEGER NOT NULL,
            age INTEGER NOT NULL,
            sex TEXT NOT NULL,
            activity TEXT NOT NULL,
            daily_calories REAL NOT NULL,
            protein_norm INTEGER NOT NULL DEFAULT 0,
            fat_norm INTEGER NOT NULL DEFAULT 0,
            carbs_norm INTEGER NOT NULL DEFAULT 0,
            goal TEXT NOT NULL DEFAULT 'maintain',
            target_weight REAL,
            goal_pace REAL,
            goal_start TEXT,
            notifications_enabled INTEGER NOT NULL DEFAULT 1,
            last_menu_request TEXT,
            language_code TEXT
        )",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            calories REAL NOT NULL DEFAULT 0,
            protein REAL NOT NULL DEFAULT 0,
            fat REAL NOT NULL DEFAULT 0,
            carbs REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create meals table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meal_reminders (
            user_id INTEGER NOT NULL,
            slot INTEGER NOT NULL,
            name TEXT NOT NULL,
            time TEXT NOT NULL,
            PRIMARY KEY (user_id, slot)
        )",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create meal_reminders table")?;

    // Databases created by older versions lack the later users columns
    add_missing_columns(conn, "users", USER_COLUMN_MIGRATIONS).await?;

    info!("Database schema initialized successfully");
    Ok(())
}

async fn add_missing_columns(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("Failed to read columns of {table}"))?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    for (name, definition) in columns {
        if existing.iter().any(|column| column == name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {name} {definition}"))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to add column {table}.{name}"))?;
        info!(table, column = name, "Added missing column");
    }
    Ok(())
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("Column {column} holds out-of-range value {value}"))
}

fn row_to_profile(row: &SqliteRow) -> Result<UserProfile> {
    let sex: Sex = row.try_get::<String, _>("sex")?.parse()?;
    let activity: ActivityLevel = row.try_get::<String, _>("activity")?.parse()?;
    let goal: GoalType = row.try_get::<String, _>("goal")?.parse()?;

    Ok(UserProfile {
        user_id: row.try_get("user_id")?,
        data: ProfileData {
            name: row.try_get("name")?,
            weight: row.try_get("weight")?,
            height: to_u32(row.try_get("height")?, "height")?,
            age: to_u32(row.try_get("age")?, "age")?,
            sex,
            activity,
            daily_calories: row.try_get("daily_calories")?,
            macros: MacroTargets {
                protein_g: row.try_get("protein_norm")?,
                fat_g: row.try_get("fat_norm")?,
                carbs_g: row.try_get("carbs_norm")?,
            },
        },
        goal: GoalSettings {
            goal,
            target_weight: row.try_get("target_weight")?,
            kg_per_week: row.try_get("goal_pace")?,
        },
        goal_start: row
            .try_get::<Option<String>, _>("goal_start")?
            .as_deref()
            .and_then(parse_timestamp),
        notifications_enabled: row.try_get("notifications_enabled")?,
        last_menu_request: row
            .try_get::<Option<String>, _>("last_menu_request")?
            .as_deref()
            .and_then(parse_timestamp),
        language_code: row.try_get("language_code")?,
    })
}

/// A goal being saved together with the moment it was set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalChange<'a> {
    pub settings: &'a GoalSettings,
    pub started_at: DateTime<Utc>,
}

/// Insert or overwrite a profile.
///
/// Goal columns, including the goal start, are written only when `goal` is
/// supplied; otherwise the stored goal survives. Notification and
/// menu-request state is never touched here.
pub async fn upsert_profile(
    pool: &SqlitePool,
    user_id: i64,
    data: &ProfileData,
    goal: Option<GoalChange<'_>>,
    language_code: Option<&str>,
) -> Result<()> {
    debug!(user_id, with_goal = goal.is_some(), "Upserting profile");

    let goal_update = if goal.is_some() {
        ", goal = excluded.goal, target_weight = excluded.target_weight, goal_pace = excluded.goal_pace, \
         goal_start = excluded.goal_start"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO users (user_id, name, weight, height, age, sex, activity, daily_calories,
                            protein_norm, fat_norm, carbs_norm, goal, target_weight, goal_pace, goal_start,
                            language_code)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            name = excluded.name,
            weight = excluded.weight,
            height = excluded.height,
            age = excluded.age,
            sex = excluded.sex,
            activity = excluded.activity,
            daily_calories = excluded.daily_calories,
            protein_norm = excluded.protein_norm,
            fat_norm = excluded.fat_norm,
            carbs_norm = excluded.carbs_norm,
            language_code = COALESCE(excluded.language_code, users.language_code){goal_update}"
    );

    let goal_values = goal.map(|change| *change.settings).unwrap_or_else(GoalSettings::maintain);
    let goal_start = goal.map(|change| format_timestamp(change.started_at));
    sqlx::query(&sql)
        .bind(user_id)
        .bind(&data.name)
        .bind(data.weight)
        .bind(i64::from(data.height))
        .bind(i64::from(data.age))
        .bind(data.sex.as_str())
        .bind(data.activity.as_str())
        .bind(data.daily_calories)
        .bind(data.macros.protein_g)
        .bind(data.macros.fat_g)
        .bind(data.macros.carbs_g)
        .bind(goal_values.goal.as_str())
        .bind(goal_values.target_weight)
        .bind(goal_values.kg_per_week)
        .bind(goal_start)
        .bind(language_code)
        .execute(pool)
        .await
        .context("Failed to upsert profile")?;

    info!(user_id, daily_calories = data.daily_calories, "Profile saved");
    Ok(())
}

pub async fn get_profile(pool: &SqlitePool, user_id: i64) -> Result<Option<UserProfile>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to read profile")?;

    row.as_ref().map(row_to_profile).transpose()
}

/// Store a confirmed meal, returning its id. Negative values are stored as zero.
pub async fn insert_meal(
    pool: &SqlitePool,
    user_id: i64,
    description: &str,
    nutrients: &Nutrients,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO meals (user_id, description, calories, protein, fat, carbs, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(description)
    .bind(nutrients.calories.max(0.0))
    .bind(nutrients.protein.max(0.0))
    .bind(nutrients.fat.max(0.0))
    .bind(nutrients.carbs.max(0.0))
    .bind(format_timestamp(created_at))
    .execute(pool)
    .await
    .context("Failed to insert meal")?;

    let meal_id = result.last_insert_rowid();
    info!(user_id, meal_id, calories = nutrients.calories, "Meal logged");
    Ok(meal_id)
}

/// Delete the user's meals for the current local day; true when anything was removed
pub async fn delete_meals_for_day(
    pool: &SqlitePool,
    user_id: i64,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<bool> {
    let window = DayWindow::last_days(now, offset, 1);
    let result = sqlx::query("DELETE FROM meals WHERE user_id = ? AND created_at >= ? AND created_at < ?")
        .bind(user_id)
        .bind(format_timestamp(window.start))
        .bind(format_timestamp(window.end))
        .execute(pool)
        .await
        .context("Failed to delete meals")?;

    let deleted = result.rows_affected();
    info!(user_id, deleted, "Deleted meals");
    Ok(deleted > 0)
}

/// Calorie and macro sums inside the window, zero when nothing matches
pub async fn meal_totals(pool: &SqlitePool, user_id: i64, window: DayWindow) -> Result<Nutrients> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(calories), 0.0) AS calories,
                COALESCE(SUM(protein), 0.0) AS protein,
                COALESCE(SUM(fat), 0.0) AS fat,
                COALESCE(SUM(carbs), 0.0) AS carbs
         FROM meals WHERE user_id = ? AND created_at >= ? AND created_at < ?",
    )
    .bind(user_id)
    .bind(format_timestamp(window.start))
    .bind(format_timestamp(window.end))
    .fetch_one(pool)
    .await
    .context("Failed to aggregate meals")?;

    Ok(Nutrients {
        calories: row.try_get("calories")?,
        protein: row.try_get("protein")?,
        fat: row.try_get("fat")?,
        carbs: row.try_get("carbs")?,
    })
}

pub async fn meal_totals_for_period(
    pool: &SqlitePool,
    user_id: i64,
    period: Period,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Nutrients> {
    meal_totals(pool, user_id, DayWindow::for_period(period, now, offset)).await
}

/// Meals inside the window, oldest first
pub async fn meals_in(pool: &SqlitePool, user_id: i64, window: DayWindow) -> Result<Vec<MealEntry>> {
    let rows = sqlx::query(
        "SELECT id, user_id, description, calories, protein, fat, carbs, created_at
         FROM meals WHERE user_id = ? AND created_at >= ? AND created_at < ?
         ORDER BY created_at, id",
    )
    .bind(user_id)
    .bind(format_timestamp(window.start))
    .bind(format_timestamp(window.end))
    .fetch_all(pool)
    .await
    .context("Failed to list meals")?;

    rows.iter()
        .map(|row| -> Result<MealEntry> {
            let created_at: String = row.try_get("created_at")?;
            Ok(MealEntry {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                description: row.try_get("description")?,
                nutrients: Nutrients {
                    calories: row.try_get("calories")?,
                    protein: row.try_get("protein")?,
                    fat: row.try_get("fat")?,
                    carbs: row.try_get("carbs")?,
                },
                created_at: parse_timestamp(&created_at)
                    .with_context(|| format!("Malformed meal timestamp '{created_at}'"))?,
            })
        })
        .collect()
}

/// Calories per local day for the last `days` days, oldest first, zero-filled
pub async fn daily_calorie_series(
    pool: &SqlitePool,
    user_id: i64,
    days: u32,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Vec<(NaiveDate, f64)>> {
    let window = DayWindow::last_days(now, offset, days);
    let meals = meals_in(pool, user_id, window).await?;

    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let first = local_date(window.start, offset);
    for day in 0..days.max(1) {
        per_day.insert(first + Duration::days(i64::from(day)), 0.0);
    }
    for meal in meals {
        *per_day.entry(local_date(meal.created_at, offset)).or_insert(0.0) += meal.nutrients.calories;
    }
    Ok(per_day.into_iter().collect())
}

/// Replace the user's whole reminder schedule; slots are numbered from 1
pub async fn replace_reminders(pool: &SqlitePool, user_id: i64, reminders: &[(String, String)]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    sqlx::query("DELETE FROM meal_reminders WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear reminders")?;

    for (index, (name, time)) in reminders.iter().enumerate() {
        sqlx::query("INSERT INTO meal_reminders (user_id, slot, name, time) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(index as i64 + 1)
            .bind(name)
            .bind(time)
            .execute(&mut *tx)
            .await
            .context("Failed to insert reminder")?;
    }

    tx.commit().await.context("Failed to commit reminders")?;
    info!(user_id, count = reminders.len(), "Reminder schedule replaced");
    Ok(())
}

pub async fn list_reminders(pool: &SqlitePool, user_id: i64) -> Result<Vec<MealReminder>> {
    let rows = sqlx::query("SELECT slot, name, time FROM meal_reminders WHERE user_id = ? ORDER BY slot")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list reminders")?;

    rows.iter()
        .map(|row| -> Result<MealReminder> {
            Ok(MealReminder {
                slot: row.try_get("slot")?,
                name: row.try_get("name")?,
                time: row.try_get("time")?,
            })
        })
        .collect()
}

/// Reminders scheduled at `time` ("HH:MM") for users with notifications on
pub async fn reminders_due(pool: &SqlitePool, time: &str) -> Result<Vec<DueReminder>> {
    let rows = sqlx::query(
        "SELECT r.user_id, r.name, u.language_code
         FROM meal_reminders r
         JOIN users u ON u.user_id = r.user_id
         WHERE r.time = ? AND u.notifications_enabled = 1
         ORDER BY r.user_id, r.slot",
    )
    .bind(time)
    .fetch_all(pool)
    .await
    .context("Failed to read due reminders")?;

    rows.iter()
        .map(|row| -> Result<DueReminder> {
            Ok(DueReminder {
                user_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                language_code: row.try_get("language_code")?,
            })
        })
        .collect()
}

/// Notification flag; users without a profile count as enabled
pub async fn get_notifications(pool: &SqlitePool, user_id: i64) -> Result<bool> {
    let enabled: Option<bool> = sqlx::query_scalar("SELECT notifications_enabled FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to read notification flag")?;
    Ok(enabled.unwrap_or(true))
}

pub async fn set_notifications(pool: &SqlitePool, user_id: i64, enabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE users SET notifications_enabled = ? WHERE user_id = ?")
        .bind(enabled)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to update notification flag")?;
    Ok(result.rows_affected() > 0)
}

/// Record a successful menu generation; the menu cooldown runs from here
pub async fn set_last_menu_request(pool: &SqlitePool, user_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE users SET last_menu_request = ? WHERE user_id = ?")
        .bind(format_timestamp(at))
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to update last_menu_request")?;
    debug!(user_id, "Menu request recorded");
    Ok(())
}

/// Users with notifications on whose last meal is older than `cutoff` (or who never logged one)
pub async fn users_inactive_since(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<(i64, Option<String>)>> {
    let rows = sqlx::query(
        "SELECT u.user_id, u.language_code
         FROM users u
         LEFT JOIN (SELECT user_id, MAX(created_at) AS last_meal FROM meals GROUP BY user_id) m
           ON u.user_id = m.user_id
         WHERE u.notifications_enabled = 1
           AND (m.last_meal IS NULL OR m.last_meal < ?)
         ORDER BY u.user_id",
    )
    .bind(format_timestamp(cutoff))
    .fetch_all(pool)
    .await
    .context("Failed to find inactive users")?;

    rows.iter()
        .map(|row| -> Result<(i64, Option<String>)> {
            Ok((row.try_get("user_id")?, row.try_get("language_code")?))
        })
        .collect()
}

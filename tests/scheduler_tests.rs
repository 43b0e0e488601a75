//! Reminder dispatch against a temporary database and a recording notifier

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use calorie_bot::calculator::{ActivityLevel, MacroTargets, Sex};
use calorie_bot::db::{self, ProfileData};
use calorie_bot::localization::{t_args_lang, t_lang};
use calorie_bot::nutrition::Nutrients;
use calorie_bot::scheduler::{dispatch_inactivity_reminders, dispatch_meal_reminders, Notifier};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Records deliveries; refuses to deliver to `blocked`
struct RecordingNotifier {
    blocked: Option<i64>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    fn new(blocked: Option<i64>) -> Self {
        Self {
            blocked,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: i64, text: String) -> Result<()> {
        if self.blocked == Some(user_id) {
            return Err(anyhow!("bot was blocked by the user"));
        }
        self.sent.lock().unwrap().push((user_id, text));
        Ok(())
    }
}

async fn setup() -> Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let pool = db::connect(&dir.path().join("users.db")).await?;
    Ok((dir, pool))
}

fn msk() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).unwrap()
}

/// 08:30 in Moscow
fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 5, 30, 0).unwrap()
}

async fn add_user(pool: &SqlitePool, user_id: i64, language: &str) -> Result<()> {
    let data = ProfileData {
        name: format!("user {user_id}"),
        weight: 70.0,
        height: 175,
        age: 30,
        sex: Sex::Male,
        activity: ActivityLevel::Low,
        daily_calories: 2200.0,
        macros: MacroTargets {
            protein_g: 126,
            fat_g: 70,
            carbs_g: 330,
        },
    };
    db::upsert_profile(pool, user_id, &data, None, Some(language)).await
}

#[tokio::test]
async fn test_meal_reminders_fire_at_local_minute() -> Result<()> {
    let (_dir, pool) = setup().await?;
    add_user(&pool, 1, "en").await?;
    add_user(&pool, 2, "ru").await?;
    db::replace_reminders(&pool, 1, &[("Breakfast".to_string(), "08:30".to_string())]).await?;
    db::replace_reminders(&pool, 2, &[("Завтрак".to_string(), "08:30".to_string())]).await?;

    let notifier = RecordingNotifier::new(None);
    let delivered = dispatch_meal_reminders(&pool, &notifier, morning(), msk()).await?;
    assert_eq!(delivered, 2);
    assert_eq!(
        notifier.sent(),
        vec![
            (1, t_args_lang("reminder-meal", &[("name", "Breakfast")], Some("en"))),
            (2, t_args_lang("reminder-meal", &[("name", "Завтрак")], Some("ru"))),
        ]
    );

    // A minute later nothing is due
    let later = RecordingNotifier::new(None);
    let delivered = dispatch_meal_reminders(&pool, &later, morning() + Duration::minutes(1), msk()).await?;
    assert_eq!(delivered, 0);
    assert!(later.sent().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_failed_delivery_does_not_stop_batch() -> Result<()> {
    let (_dir, pool) = setup().await?;
    for user_id in [1, 2, 3] {
        add_user(&pool, user_id, "en").await?;
        db::replace_reminders(&pool, user_id, &[("Lunch".to_string(), "08:30".to_string())]).await?;
    }

    let notifier = RecordingNotifier::new(Some(2));
    let delivered = dispatch_meal_reminders(&pool, &notifier, morning(), msk()).await?;
    assert_eq!(delivered, 2);
    let recipients: Vec<i64> = notifier.sent().iter().map(|(user_id, _)| *user_id).collect();
    assert_eq!(recipients, vec![1, 3]);

    Ok(())
}

#[tokio::test]
async fn test_inactivity_reminders_skip_active_and_muted_users() -> Result<()> {
    let (_dir, pool) = setup().await?;
    for user_id in [1, 2, 3, 4] {
        add_user(&pool, user_id, "ru").await?;
    }
    let meal = Nutrients {
        calories: 400.0,
        ..Nutrients::default()
    };
    db::insert_meal(&pool, 1, "Суп", &meal, morning() - Duration::hours(3)).await?;
    db::insert_meal(&pool, 2, "Каша", &meal, morning() - Duration::hours(48)).await?;
    db::set_notifications(&pool, 4, false).await?;

    let notifier = RecordingNotifier::new(None);
    let delivered = dispatch_inactivity_reminders(&pool, &notifier, morning(), 24).await?;
    assert_eq!(delivered, 2);
    assert_eq!(
        notifier.sent(),
        vec![
            (2, t_lang("reminder-inactive", Some("ru"))),
            (3, t_lang("reminder-inactive", Some("ru"))),
        ]
    );

    Ok(())
}

//! # Scheduler Module
//!
//! Background reminders: a daily nudge for users who have not logged a meal
//! recently, and per-minute dispatch of configured meal reminders. Both read
//! persisted state only. A failed delivery to one user is logged and the
//! batch continues.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::db;
use crate::localization::{t_args_lang, t_lang};

/// Outbound message channel for reminders
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, text: String) -> Result<()>;
}

/// Remind users with notifications on who logged nothing within `inactivity_hours`
pub async fn dispatch_inactivity_reminders(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
    inactivity_hours: i64,
) -> Result<usize> {
    let cutoff = now - Duration::hours(inactivity_hours);
    let recipients = db::users_inactive_since(pool, cutoff).await?;
    debug!(count = recipients.len(), "Inactivity reminder recipients");

    let mut delivered = 0;
    for (user_id, language_code) in recipients {
        let text = t_lang("reminder-inactive", language_code.as_deref());
        match notifier.notify(user_id, text).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(user_id, error = %e, "Failed to deliver inactivity reminder"),
        }
    }
    info!(delivered, "Inactivity reminders dispatched");
    Ok(delivered)
}

/// Send every meal reminder scheduled for the current local minute
pub async fn dispatch_meal_reminders(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<usize> {
    let minute = now.with_timezone(&offset).format("%H:%M").to_string();
    let due = db::reminders_due(pool, &minute).await?;

    let mut delivered = 0;
    for reminder in due {
        let text = t_args_lang(
            "reminder-meal",
            &[("name", &reminder.name)],
            reminder.language_code.as_deref(),
        );
        match notifier.notify(reminder.user_id, text).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(user_id = reminder.user_id, error = %e, "Failed to deliver meal reminder"),
        }
    }
    if delivered > 0 {
        info!(minute = %minute, delivered, "Meal reminders dispatched");
    }
    Ok(delivered)
}

/// Whether the daily inactivity check should run at this local time
pub fn daily_check_due(local: DateTime<FixedOffset>, hour: u32, last_run: Option<NaiveDate>) -> bool {
    local.hour() == hour && last_run != Some(local.date_naive())
}

/// Run both reminder jobs forever, ticking at the start of every minute
pub async fn run_scheduler(pool: SqlitePool, notifier: Arc<dyn Notifier>, config: SchedulerConfig) -> Result<()> {
    let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
        .with_context(|| format!("UTC offset of {} hours is out of range", config.utc_offset_hours))?;
    info!(
        daily_reminder_hour = config.daily_reminder_hour,
        inactivity_hours = config.inactivity_hours,
        "Scheduler started"
    );

    let into_minute = u64::from(Utc::now().second());
    sleep(StdDuration::from_secs(60 - into_minute)).await;

    let mut ticker = interval(StdDuration::from_secs(60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_daily_run: Option<NaiveDate> = None;

    loop {
        ticker.tick().await;
        let now = Utc::now();

        if let Err(e) = dispatch_meal_reminders(&pool, notifier.as_ref(), now, offset).await {
            error!(error = %e, "Meal reminder dispatch failed");
        }

        let local = now.with_timezone(&offset);
        if daily_check_due(local, config.daily_reminder_hour, last_daily_run) {
            last_daily_run = Some(local.date_naive());
            if let Err(e) =
                dispatch_inactivity_reminders(&pool, notifier.as_ref(), now, config.inactivity_hours).await
            {
                error!(error = %e, "Inactivity reminder dispatch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_check_runs_once_per_day() {
        let msk = FixedOffset::east_opt(3 * 3600).unwrap();
        let at_ten = msk.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let at_ten_later = msk.with_ymd_and_hms(2024, 3, 4, 10, 30, 0).unwrap();
        let at_nine = msk.with_ymd_and_hms(2024, 3, 4, 9, 59, 0).unwrap();

        assert!(daily_check_due(at_ten, 10, None));
        assert!(!daily_check_due(at_ten_later, 10, Some(at_ten.date_naive())));
        assert!(!daily_check_due(at_nine, 10, None));
        assert!(daily_check_due(at_ten, 10, at_ten.date_naive().pred_opt()));
    }
}

//! Statistics, meal history and charts.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Duration;
use tracing::info;

use super::{Engine, Keyboard, Outcome, Reply, Turn};
use crate::calculator::GoalType;
use crate::db::{self, DayWindow, MealEntry, Period, ProfileData, UserProfile};
use crate::dialogue::{Action, StatsView};
use crate::nutrition::Nutrients;
use crate::presentation::{
    goal_chart, goal_projection, monthly_line_chart, progress_bar, progress_chart, truncate_chars,
    weekly_bar_chart,
};

const HISTORY_DAYS: u32 = 7;
const DATE_FORMAT: &str = "%d.%m.%Y";
const HISTORY_DESCRIPTION_CHARS: usize = 60;

/// Today's intake against the profile targets, one progress bar per metric
pub fn progress_lines(turn: &Turn, today: &Nutrients, data: &ProfileData) -> String {
    let rows = [
        ("stats-calories", today.calories, data.daily_calories),
        ("stats-protein", today.protein, data.macros.protein_g as f64),
        ("stats-fat", today.fat, data.macros.fat_g as f64),
        ("stats-carbs", today.carbs, data.macros.carbs_g as f64),
    ];
    rows.iter()
        .map(|(key, current, target)| {
            format!(
                "{}: {:.0} / {:.0}\n{}",
                turn.t(key),
                current,
                target,
                progress_bar(*current, *target)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn stats_keyboard(turn: &Turn) -> Keyboard {
    let button = |key: &str, action: Action| (turn.t(key), action);
    Keyboard::Inline(vec![
        vec![
            button("button-chart-week", Action::Stats(StatsView::WeekChart)),
            button("button-chart-month", Action::Stats(StatsView::MonthChart)),
        ],
        vec![
            button("button-chart-goal", Action::Stats(StatsView::GoalChart)),
            button("button-chart-progress", Action::Stats(StatsView::ProgressChart)),
        ],
        vec![
            button("button-history", Action::Stats(StatsView::History)),
            button("button-clear-today", Action::ClearToday),
        ],
    ])
}

fn period_summary(turn: &Turn, key: &str, totals: &Nutrients, days: u32) -> String {
    turn.t_args(
        key,
        &[
            ("calories", format!("{:.0}", totals.calories)),
            ("average", format!("{:.0}", totals.calories / f64::from(days.max(1)))),
            ("protein", format!("{:.0}", totals.protein)),
            ("fat", format!("{:.0}", totals.fat)),
            ("carbs", format!("{:.0}", totals.carbs)),
        ],
    )
}

impl Engine {
    pub(super) async fn show_stats(&self, turn: &Turn, profile: &UserProfile) -> Result<Outcome> {
        let totals_for = |period| {
            db::meal_totals_for_period(&self.pool, turn.user_id, period, turn.now, self.utc_offset)
        };
        let today = totals_for(Period::Today).await?;
        let week = totals_for(Period::Week).await?;
        let month = totals_for(Period::Month).await?;

        let text = format!(
            "{}\n\n{}\n\n{}\n\n{}",
            turn.t("stats-today-title"),
            progress_lines(turn, &today, &profile.data),
            period_summary(turn, "stats-week", &week, Period::Week.days()),
            period_summary(turn, "stats-month", &month, Period::Month.days()),
        );
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, stats_keyboard(turn))]))
    }

    pub(super) async fn stats_view(&self, turn: &Turn, view: StatsView) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };
        info!(user_id = turn.user_id, view = view.as_str(), "Statistics view requested");

        let reply = match view {
            StatsView::WeekChart => self.calorie_chart(turn, &profile, Period::Week).await?,
            StatsView::MonthChart => self.calorie_chart(turn, &profile, Period::Month).await?,
            StatsView::GoalChart => self.goal_progress_chart(turn, &profile)?,
            StatsView::ProgressChart => {
                let today =
                    db::meal_totals_for_period(&self.pool, turn.user_id, Period::Today, turn.now, self.utc_offset)
                        .await?;
                let data = &profile.data;
                let png = progress_chart(&[
                    (today.calories, data.daily_calories),
                    (today.protein, data.macros.protein_g as f64),
                    (today.fat, data.macros.fat_g as f64),
                    (today.carbs, data.macros.carbs_g as f64),
                ])?;
                Reply::Photo {
                    png,
                    caption: format!(
                        "{}\n\n{}",
                        turn.t("chart-progress-caption"),
                        progress_lines(turn, &today, data)
                    ),
                }
            }
            StatsView::History => {
                let window = DayWindow::last_days(turn.now, self.utc_offset, HISTORY_DAYS);
                let meals = db::meals_in(&self.pool, turn.user_id, window).await?;
                Reply::text(self.history_text(turn, &meals))
            }
        };
        Ok(Outcome::idle(vec![reply]))
    }

    async fn calorie_chart(&self, turn: &Turn, profile: &UserProfile, period: Period) -> Result<Reply> {
        let series =
            db::daily_calorie_series(&self.pool, turn.user_id, period.days(), turn.now, self.utc_offset).await?;
        let target = profile.data.daily_calories;

        let total: f64 = series.iter().map(|(_, calories)| calories).sum();
        let logged_days = series.iter().filter(|(_, calories)| *calories > 0.0).count();
        let average = if logged_days > 0 { total / logged_days as f64 } else { 0.0 };

        let (png, caption_key) = match period {
            Period::Month => (monthly_line_chart(&series, target)?, "chart-month-caption"),
            _ => (weekly_bar_chart(&series, target)?, "chart-week-caption"),
        };

        let mut caption = turn.t_args(
            caption_key,
            &[
                ("average", format!("{average:.0}")),
                ("target", format!("{target:.0}")),
                ("days", logged_days.to_string()),
            ],
        );
        if period == Period::Week {
            for (date, calories) in &series {
                caption.push_str(&format!("\n{}: {calories:.0}", date.format("%d.%m")));
            }
        }
        Ok(Reply::Photo { png, caption })
    }

    fn goal_progress_chart(&self, turn: &Turn, profile: &UserProfile) -> Result<Reply> {
        let goal = profile.goal;
        let (Some(target_weight), Some(kg_per_week)) = (goal.target_weight, goal.kg_per_week) else {
            return Ok(Reply::text(turn.t("chart-goal-unavailable")));
        };
        if goal.goal == GoalType::Maintain {
            return Ok(Reply::text(turn.t("chart-goal-unavailable")));
        }

        let projection = goal_projection(profile.data.weight, target_weight, kg_per_week);
        let weeks = projection.last().map(|(week, _)| *week).unwrap_or(0);
        let start = profile.goal_start.unwrap_or(turn.now);
        let finish = start + Duration::weeks(i64::from(weeks));

        let png = goal_chart(&projection, target_weight)?;
        let caption = turn.t_args(
            "chart-goal-caption",
            &[
                ("weight", profile.data.weight.to_string()),
                ("target", target_weight.to_string()),
                ("kg", kg_per_week.to_string()),
                ("start", start.with_timezone(&self.utc_offset).format(DATE_FORMAT).to_string()),
                ("finish", finish.with_timezone(&self.utc_offset).format(DATE_FORMAT).to_string()),
            ],
        );
        Ok(Reply::Photo { png, caption })
    }

    fn history_text(&self, turn: &Turn, meals: &[MealEntry]) -> String {
        if meals.is_empty() {
            return turn.t("history-empty");
        }

        let mut by_day: BTreeMap<chrono::NaiveDate, Vec<&MealEntry>> = BTreeMap::new();
        for meal in meals {
            by_day
                .entry(db::local_date(meal.created_at, self.utc_offset))
                .or_default()
                .push(meal);
        }

        let mut text = turn.t("history-title");
        for (date, entries) in by_day.iter().rev() {
            let day_total: f64 = entries.iter().map(|meal| meal.nutrients.calories).sum();
            text.push_str(&format!(
                "\n\n{} — {:.0} {}",
                date.format(DATE_FORMAT),
                day_total,
                turn.t("unit-kcal")
            ));
            for meal in entries {
                let time = meal.created_at.with_timezone(&self.utc_offset).format("%H:%M");
                text.push_str(&format!(
                    "\n{time} {} — {:.0}",
                    truncate_chars(&meal.description, HISTORY_DESCRIPTION_CHARS),
                    meal.nutrients.calories
                ));
            }
        }
        text
    }

    pub(super) async fn clear_today(&self, turn: &Turn) -> Result<Outcome> {
        let deleted = db::delete_meals_for_day(&self.pool, turn.user_id, turn.now, self.utc_offset).await?;
        info!(user_id = turn.user_id, deleted, "Clear today requested");
        let key = if deleted { "stats-cleared" } else { "stats-nothing-to-clear" };
        Ok(Outcome::idle(vec![Reply::with_keyboard(turn.t(key), Keyboard::MainMenu)]))
    }
}

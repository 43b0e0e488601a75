//! Settings: notification toggle and the meal reminder schedule.

use anyhow::Result;
use tracing::info;

use super::{invalid, prompt, Engine, Keyboard, Outcome, Reply, Turn};
use crate::db::{self, MealReminder, UserProfile};
use crate::dialogue::{
    validate_text, validate_time, Action, ConversationState, Input, ReminderDraft, ReminderStep,
    MAX_NAME_LEN, MAX_REMINDERS,
};

fn in_reminders(step: ReminderStep) -> ConversationState {
    ConversationState::Reminders(step)
}

fn reminder_list(turn: &Turn, reminders: &[MealReminder]) -> String {
    if reminders.is_empty() {
        return turn.t("reminders-none");
    }
    reminders
        .iter()
        .map(|reminder| format!("{} — {}", reminder.time, reminder.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ask_reminder_name(turn: &Turn, total: u8, collected: Vec<ReminderDraft>) -> Outcome {
    let index = collected.len() + 1;
    let text = turn.t_args(
        "reminder-ask-name",
        &[("index", index.to_string()), ("total", total.to_string())],
    );
    Outcome::stay(
        in_reminders(ReminderStep::Name { total, collected }),
        vec![prompt(turn, text)],
    )
}

impl Engine {
    pub(super) async fn show_settings(&self, turn: &Turn, profile: &UserProfile) -> Result<Outcome> {
        let reminders = db::list_reminders(&self.pool, turn.user_id).await?;
        let status_key = if profile.notifications_enabled {
            "notifications-on"
        } else {
            "notifications-off"
        };
        let toggle_key = if profile.notifications_enabled {
            "button-notifications-off"
        } else {
            "button-notifications-on"
        };

        let text = format!(
            "{}\n{}\n\n{}\n{}",
            turn.t("settings-title"),
            turn.t(status_key),
            turn.t("reminders-title"),
            reminder_list(turn, &reminders)
        );
        let keyboard = Keyboard::Inline(vec![
            vec![(turn.t(toggle_key), Action::ToggleNotifications)],
            vec![(turn.t("button-setup-reminders"), Action::SetupReminders)],
            vec![(turn.t("button-clear-reminders"), Action::ClearReminders)],
        ]);
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, keyboard)]))
    }

    pub(super) async fn toggle_notifications(&self, turn: &Turn) -> Result<Outcome> {
        let enabled = !db::get_notifications(&self.pool, turn.user_id).await?;
        if !db::set_notifications(&self.pool, turn.user_id, enabled).await? {
            return Ok(self.start_registration(turn, "registration-required"));
        }
        info!(user_id = turn.user_id, enabled, "Notifications toggled");

        let key = if enabled { "notifications-on" } else { "notifications-off" };
        Ok(Outcome::idle(vec![Reply::with_keyboard(turn.t(key), Keyboard::MainMenu)]))
    }

    pub(super) async fn start_reminders(&self, turn: &Turn) -> Result<Outcome> {
        if db::get_profile(&self.pool, turn.user_id).await?.is_none() {
            return Ok(self.start_registration(turn, "registration-required"));
        }
        let counts = (1..=MAX_REMINDERS)
            .map(|count| (count.to_string(), Action::ReminderCount(count)))
            .collect();
        Ok(Outcome::stay(
            in_reminders(ReminderStep::Count),
            vec![Reply::with_keyboard(
                turn.t("reminder-ask-count"),
                Keyboard::Inline(vec![counts, super::cancel_row(turn)]),
            )],
        ))
    }

    pub(super) async fn clear_reminders(&self, turn: &Turn) -> Result<Outcome> {
        db::replace_reminders(&self.pool, turn.user_id, &[]).await?;
        info!(user_id = turn.user_id, "Reminders cleared");
        Ok(Outcome::idle(vec![Reply::with_keyboard(
            turn.t("reminders-cleared"),
            Keyboard::MainMenu,
        )]))
    }

    pub(super) async fn reminder_step(&self, turn: &Turn, step: ReminderStep, input: Input) -> Result<Outcome> {
        match (step, input) {
            (ReminderStep::Count, Input::Action(Action::ReminderCount(total))) => {
                Ok(ask_reminder_name(turn, total, Vec::new()))
            }
            (ReminderStep::Name { total, collected }, Input::Text(text)) => {
                match validate_text(&text, MAX_NAME_LEN) {
                    Ok(name) => {
                        let question = turn.t_args("reminder-ask-time", &[("name", name.clone())]);
                        Ok(Outcome::stay(
                            in_reminders(ReminderStep::Time {
                                total,
                                collected,
                                name,
                            }),
                            vec![prompt(turn, question)],
                        ))
                    }
                    Err(e) => Ok(invalid(
                        turn,
                        e,
                        "reminder-retry-name",
                        in_reminders(ReminderStep::Name { total, collected }),
                    )),
                }
            }
            (
                ReminderStep::Time {
                    total,
                    mut collected,
                    name,
                },
                Input::Text(text),
            ) => match validate_time(&text) {
                Ok(time) => {
                    collected.push(ReminderDraft { name, time });
                    if collected.len() >= usize::from(total) {
                        self.save_reminders(turn, collected).await
                    } else {
                        Ok(ask_reminder_name(turn, total, collected))
                    }
                }
                Err(e) => Ok(invalid(
                    turn,
                    e,
                    "reminder-retry-time",
                    in_reminders(ReminderStep::Time {
                        total,
                        collected,
                        name,
                    }),
                )),
            },
            (_, input) => Ok(self.fallback(turn, &input)),
        }
    }

    async fn save_reminders(&self, turn: &Turn, collected: Vec<ReminderDraft>) -> Result<Outcome> {
        let schedule: Vec<(String, String)> = collected
            .into_iter()
            .map(|draft| (draft.name, draft.time))
            .collect();
        db::replace_reminders(&self.pool, turn.user_id, &schedule).await?;
        info!(user_id = turn.user_id, count = schedule.len(), "Reminder schedule replaced");

        let saved = db::list_reminders(&self.pool, turn.user_id).await?;
        let text = format!("{}\n{}", turn.t("reminders-saved"), reminder_list(turn, &saved));
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }
}

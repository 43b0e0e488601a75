//! # Conversation Engine
//!
//! Drives every multi-step flow of the bot without touching the chat
//! transport. Each turn takes the current [`ConversationState`] and one
//! [`Input`] and yields an [`Outcome`]: the next state plus the replies to
//! deliver, in order.
//!
//! Cross-cutting rules live here:
//! - `/cancel` or the cancel button ends any flow, discarding its scratch data.
//! - A command or main-menu label in the middle of a flow cancels the flow and
//!   then runs.
//! - Input a flow step cannot use (stray text, a stale button) ends the flow.
//! - Storage failures are logged and answered with a generic message and the
//!   main menu.

mod goal;
mod meal;
mod menu;
mod profile;
mod registration;
mod settings;
mod stats;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::dialogue::{Action, Command, ConversationState, Input, MenuItem, ValidationError};
use crate::errors::NutritionError;
use crate::localization::{t_args_lang, t_lang, SUPPORTED_LANGUAGES};
use crate::nutrition::NutritionClient;
use crate::rate_limiter::MenuCooldown;

pub use stats::progress_lines;

/// Who is talking and when
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_id: i64,
    pub language_code: Option<String>,
    pub now: DateTime<Utc>,
}

impl Turn {
    pub fn new(user_id: i64, language_code: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            language_code,
            now,
        }
    }

    pub fn lang(&self) -> Option<&str> {
        self.language_code.as_deref()
    }

    fn t(&self, key: &str) -> String {
        t_lang(key, self.lang())
    }

    fn t_args(&self, key: &str, args: &[(&str, String)]) -> String {
        let pairs: Vec<(&str, &str)> = args.iter().map(|(name, value)| (*name, value.as_str())).collect();
        t_args_lang(key, &pairs, self.lang())
    }
}

/// Keyboard attached to a text reply
#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// Rows of inline buttons
    Inline(Vec<Vec<(String, Action)>>),
    /// The persistent main-menu reply keyboard
    MainMenu,
    /// Hide the reply keyboard
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        keyboard: Option<Keyboard>,
    },
    /// Monospace block, rendered as-is
    Preformatted { text: String },
    Photo { png: Vec<u8>, caption: String },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Reply::Text {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    /// The text or caption of the reply
    pub fn content(&self) -> &str {
        match self {
            Reply::Text { text, .. } | Reply::Preformatted { text } => text,
            Reply::Photo { caption, .. } => caption,
        }
    }
}

/// Result of one conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub next: ConversationState,
    pub replies: Vec<Reply>,
}

impl Outcome {
    fn stay(next: ConversationState, replies: Vec<Reply>) -> Self {
        Self { next, replies }
    }

    fn idle(replies: Vec<Reply>) -> Self {
        Self {
            next: ConversationState::Idle,
            replies,
        }
    }
}

/// Main-menu entry whose label (in any supported language) equals `text`
pub fn menu_item_for_label(text: &str) -> Option<MenuItem> {
    let text = text.trim();
    MenuItem::ALL.into_iter().find(|item| {
        SUPPORTED_LANGUAGES
            .iter()
            .any(|lang| t_lang(item.label_key(), Some(lang)) == text)
    })
}

fn cancel_row(turn: &Turn) -> Vec<(String, Action)> {
    vec![(turn.t("button-cancel"), Action::Cancel)]
}

/// Question that can be abandoned with the cancel button
fn prompt(turn: &Turn, text: impl Into<String>) -> Reply {
    Reply::with_keyboard(text, Keyboard::Inline(vec![cancel_row(turn)]))
}

/// Re-ask the same question after rejected input
fn invalid(turn: &Turn, error: ValidationError, prompt_key: &str, stay: ConversationState) -> Outcome {
    debug!(user_id = turn.user_id, %error, "Input rejected");
    let text = format!("{}\n{}", turn.t(error.message_key()), turn.t(prompt_key));
    Outcome::stay(stay, vec![prompt(turn, text)])
}

/// Transport-agnostic conversation driver
pub struct Engine {
    pool: SqlitePool,
    nutrition: NutritionClient,
    menu_cooldown: MenuCooldown,
    utc_offset: FixedOffset,
}

impl Engine {
    pub fn new(
        pool: SqlitePool,
        nutrition: NutritionClient,
        menu_cooldown_hours: i64,
        utc_offset_hours: i32,
    ) -> Result<Self> {
        let utc_offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .with_context(|| format!("UTC offset of {utc_offset_hours} hours is out of range"))?;
        Ok(Self {
            pool,
            nutrition,
            menu_cooldown: MenuCooldown::new(menu_cooldown_hours),
            utc_offset,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Run one turn. Never fails: storage errors become a generic reply.
    pub async fn handle(&self, turn: &Turn, state: ConversationState, input: Input) -> Outcome {
        debug!(user_id = turn.user_id, ?state, ?input, "Handling conversation input");
        match self.route(turn, state, input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(user_id = turn.user_id, error = format!("{e:#}"), "Conversation step failed");
                Outcome::idle(vec![Reply::with_keyboard(
                    turn.t("error-generic"),
                    Keyboard::MainMenu,
                )])
            }
        }
    }

    async fn route(&self, turn: &Turn, state: ConversationState, input: Input) -> Result<Outcome> {
        let entry = match &input {
            Input::Command(Command::Cancel) | Input::Action(Action::Cancel) => {
                return Ok(self.cancel(turn, &state));
            }
            Input::Command(command) => Some(*command),
            Input::Text(text) => menu_item_for_label(text).map(Command::from),
            _ => None,
        };

        if let Some(command) = entry {
            let mut outcome = self.run_command(turn, command).await?;
            if !state.is_idle() {
                info!(user_id = turn.user_id, ?command, "Flow interrupted by a new request");
                outcome.replies.insert(0, Reply::text(turn.t("flow-cancelled")));
            }
            return Ok(outcome);
        }

        // Inside a flow a transcript is just typed text
        let input = match input {
            Input::Transcript(text) if !state.is_idle() => Input::Text(text),
            other => other,
        };

        match state {
            ConversationState::Idle => self.on_idle(turn, input).await,
            ConversationState::Registration(step) => self.registration_step(turn, step, input).await,
            ConversationState::ProfileEdit(step) => self.profile_edit_step(turn, step, input).await,
            ConversationState::Goal(step) => self.goal_step(turn, step, input).await,
            ConversationState::Meal(step) => self.meal_step(turn, step, input).await,
            ConversationState::Menu(step) => self.menu_step(turn, step, input).await,
            ConversationState::Reminders(step) => self.reminder_step(turn, step, input).await,
        }
    }

    async fn run_command(&self, turn: &Turn, command: Command) -> Result<Outcome> {
        match command {
            Command::Help => {
                return Ok(Outcome::idle(vec![Reply::with_keyboard(
                    turn.t("help-text"),
                    Keyboard::MainMenu,
                )]))
            }
            Command::Cancel => return Ok(self.cancel(turn, &ConversationState::Idle)),
            _ => {}
        }

        let Some(profile) = crate::db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(if command == Command::Start {
                self.start_registration(turn, "welcome-new")
            } else {
                self.start_registration(turn, "registration-required")
            });
        };

        match command {
            Command::Start => {
                let text = turn.t_args("welcome-back", &[("name", profile.data.name.clone())]);
                Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
            }
            Command::Profile => Ok(self.show_profile(turn, &profile)),
            Command::Stats => self.show_stats(turn, &profile).await,
            Command::Meal => Ok(self.start_meal(turn)),
            Command::Menu => Ok(self.start_menu(turn, &profile)),
            Command::Goal => Ok(self.start_goal(turn, &profile)),
            Command::Settings => self.show_settings(turn, &profile).await,
            Command::Help | Command::Cancel => Ok(self.cancel(turn, &ConversationState::Idle)),
        }
    }

    async fn on_idle(&self, turn: &Turn, input: Input) -> Result<Outcome> {
        match input {
            Input::Transcript(text) => {
                if crate::db::get_profile(&self.pool, turn.user_id).await?.is_none() {
                    return Ok(self.start_registration(turn, "registration-required"));
                }
                self.analyze_meal(turn, &text).await
            }
            Input::Text(_) => Ok(Outcome::idle(vec![Reply::with_keyboard(
                turn.t("idle-hint"),
                Keyboard::MainMenu,
            )])),
            Input::Command(command) => self.run_command(turn, command).await,
            Input::Action(action) => match action {
                Action::EditProfile => self.start_profile_edit(turn).await,
                Action::Stats(view) => self.stats_view(turn, view).await,
                Action::ClearToday => self.clear_today(turn).await,
                Action::ToggleNotifications => self.toggle_notifications(turn).await,
                Action::SetupReminders => self.start_reminders(turn).await,
                Action::ClearReminders => self.clear_reminders(turn).await,
                other => {
                    debug!(user_id = turn.user_id, action = %other, "Button pressed outside its flow");
                    Ok(Outcome::idle(vec![Reply::with_keyboard(
                        turn.t("action-outdated"),
                        Keyboard::MainMenu,
                    )]))
                }
            },
        }
    }

    fn cancel(&self, turn: &Turn, state: &ConversationState) -> Outcome {
        let key = if state.is_idle() {
            "nothing-to-cancel"
        } else {
            info!(user_id = turn.user_id, "Flow cancelled");
            "flow-cancelled"
        };
        Outcome::idle(vec![Reply::with_keyboard(turn.t(key), Keyboard::MainMenu)])
    }

    /// Input the current step has no transition for ends the flow
    fn fallback(&self, turn: &Turn, input: &Input) -> Outcome {
        info!(user_id = turn.user_id, ?input, "Unexpected input, leaving the flow");
        Outcome::idle(vec![Reply::with_keyboard(turn.t("flow-fallback"), Keyboard::MainMenu)])
    }

    /// Answer for a failed nutrition service call; the user stays where they can resend
    fn service_failure(&self, turn: &Turn, error: &NutritionError, stay: ConversationState) -> Outcome {
        warn!(user_id = turn.user_id, error = %error, "Nutrition service call failed");
        let text = match error {
            NutritionError::RateLimited(limit) => turn.t_args(
                "error-rate-limited",
                &[("seconds", limit.retry_after_secs.to_string())],
            ),
            NutritionError::Parse(_) => turn.t("error-service-parse"),
            NutritionError::Network(_) | NutritionError::Timeout(_) | NutritionError::CircuitOpen => {
                turn.t("error-service-unavailable")
            }
        };
        Outcome::stay(stay, vec![prompt(turn, text)])
    }
}

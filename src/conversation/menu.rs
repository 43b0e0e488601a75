//! Daily menu generation, gated by a persisted per-user cooldown.

use anyhow::Result;
use tracing::info;

use super::{invalid, Engine, Keyboard, Outcome, Reply, Turn};
use crate::db::{self, UserProfile};
use crate::dialogue::{
    validate_text, Action, ConversationState, Input, MenuStep, MAX_MEALS_PER_DAY,
};
use crate::nutrition::MenuRequest;
use crate::presentation::menu_table;
use crate::rate_limiter::RateLimitExceeded;

const MAX_PREFERENCES_LEN: usize = 300;

fn in_menu(step: MenuStep) -> ConversationState {
    ConversationState::Menu(step)
}

fn cooldown_reply(turn: &Turn, limit: RateLimitExceeded) -> Outcome {
    let hours = limit.retry_after_secs / 3600;
    let minutes = (limit.retry_after_secs % 3600).div_ceil(60);
    Outcome::idle(vec![Reply::with_keyboard(
        turn.t_args(
            "menu-cooldown",
            &[("hours", hours.to_string()), ("minutes", minutes.to_string())],
        ),
        Keyboard::MainMenu,
    )])
}

impl Engine {
    pub(super) fn start_menu(&self, turn: &Turn, profile: &UserProfile) -> Outcome {
        if let Err(limit) = self.menu_cooldown.check(profile.last_menu_request, turn.now) {
            info!(user_id = turn.user_id, retry_after = limit.retry_after_secs, "Menu request inside cooldown");
            return cooldown_reply(turn, limit);
        }

        let counts = (1..=MAX_MEALS_PER_DAY)
            .map(|count| (count.to_string(), Action::MealCount(count)))
            .collect();
        Outcome::stay(
            in_menu(MenuStep::MealCount),
            vec![Reply::with_keyboard(
                turn.t("menu-ask-count"),
                Keyboard::Inline(vec![counts, super::cancel_row(turn)]),
            )],
        )
    }

    pub(super) async fn menu_step(&self, turn: &Turn, step: MenuStep, input: Input) -> Result<Outcome> {
        match (step, input) {
            (MenuStep::MealCount, Input::Action(Action::MealCount(meals_per_day))) => Ok(Outcome::stay(
                in_menu(MenuStep::Preferences { meals_per_day }),
                vec![Reply::with_keyboard(
                    turn.t("menu-ask-preferences"),
                    Keyboard::Inline(vec![
                        vec![(turn.t("button-skip"), Action::SkipPreferences)],
                        super::cancel_row(turn),
                    ]),
                )],
            )),
            (MenuStep::Preferences { meals_per_day }, Input::Action(Action::SkipPreferences)) => {
                self.generate_menu(turn, meals_per_day, None).await
            }
            (MenuStep::Preferences { meals_per_day }, Input::Text(text)) => {
                match validate_text(&text, MAX_PREFERENCES_LEN) {
                    Ok(preferences) => self.generate_menu(turn, meals_per_day, Some(preferences)).await,
                    Err(e) => Ok(invalid(
                        turn,
                        e,
                        "menu-ask-preferences",
                        in_menu(MenuStep::Preferences { meals_per_day }),
                    )),
                }
            }
            (_, input) => Ok(self.fallback(turn, &input)),
        }
    }

    async fn generate_menu(
        &self,
        turn: &Turn,
        meals_per_day: u8,
        preferences: Option<String>,
    ) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };
        // Checked again: the cooldown may have started in another chat since the flow began
        if let Err(limit) = self.menu_cooldown.check(profile.last_menu_request, turn.now) {
            return Ok(cooldown_reply(turn, limit));
        }

        let request = MenuRequest {
            goal: profile.goal.goal,
            daily_calories: profile.data.daily_calories,
            protein_norm: profile.data.macros.protein_g,
            fat_norm: profile.data.macros.fat_g,
            carbs_norm: profile.data.macros.carbs_g,
            meals_per_day,
            preferences,
        };

        let plan = match self.nutrition.generate_menu(turn.user_id, &request).await {
            Ok(plan) => plan,
            Err(e) => {
                return Ok(self.service_failure(
                    turn,
                    &e,
                    in_menu(MenuStep::Preferences { meals_per_day }),
                ))
            }
        };

        db::set_last_menu_request(&self.pool, turn.user_id, turn.now).await?;
        info!(
            user_id = turn.user_id,
            meals = plan.meals.len(),
            calories = plan.totals.calories,
            "Menu generated"
        );

        Ok(Outcome::idle(vec![
            Reply::with_keyboard(
                turn.t_args(
                    "menu-ready",
                    &[
                        ("calories", format!("{:.0}", plan.totals.calories)),
                        ("target", format!("{:.0}", request.daily_calories)),
                    ],
                ),
                Keyboard::MainMenu,
            ),
            Reply::Preformatted {
                text: menu_table(&plan, turn.lang()),
            },
        ]))
    }
}

//! Meal entry: description, breakdown by the nutrition service, confirmation.

use anyhow::Result;
use tracing::info;

use super::{invalid, prompt, Engine, Keyboard, Outcome, Reply, Turn};
use crate::db::{self, Period};
use crate::dialogue::{
    validate_text, Action, ConversationState, Input, MealStep, PendingMeal, MAX_MEAL_DESCRIPTION_LEN,
};
use crate::presentation::format_meal_breakdown;

fn in_meal(step: MealStep) -> ConversationState {
    ConversationState::Meal(step)
}

fn confirmation_keyboard(turn: &Turn) -> Keyboard {
    Keyboard::Inline(vec![
        vec![(turn.t("button-confirm"), Action::ConfirmMeal)],
        vec![
            (turn.t("button-retry"), Action::RetryMeal),
            (turn.t("button-cancel"), Action::Cancel),
        ],
    ])
}

impl Engine {
    pub(super) fn start_meal(&self, turn: &Turn) -> Outcome {
        Outcome::stay(
            in_meal(MealStep::AwaitDescription),
            vec![prompt(turn, turn.t("meal-ask-description"))],
        )
    }

    pub(super) async fn meal_step(&self, turn: &Turn, step: MealStep, input: Input) -> Result<Outcome> {
        match (step, input) {
            (MealStep::AwaitDescription, Input::Text(text)) => {
                match validate_text(&text, MAX_MEAL_DESCRIPTION_LEN) {
                    Ok(description) => self.analyze_meal(turn, &description).await,
                    Err(e) => Ok(invalid(
                        turn,
                        e,
                        "meal-ask-description",
                        in_meal(MealStep::AwaitDescription),
                    )),
                }
            }
            (MealStep::AwaitConfirmation { pending }, Input::Action(Action::ConfirmMeal)) => {
                self.save_meal(turn, pending).await
            }
            (MealStep::AwaitConfirmation { .. }, Input::Action(Action::RetryMeal)) => Ok(Outcome::stay(
                in_meal(MealStep::AwaitDescription),
                vec![prompt(turn, turn.t("meal-retry"))],
            )),
            (_, input) => Ok(self.fallback(turn, &input)),
        }
    }

    /// Ask the nutrition service for a breakdown and hold it for confirmation
    pub(super) async fn analyze_meal(&self, turn: &Turn, description: &str) -> Result<Outcome> {
        match self.nutrition.parse_meal(turn.user_id, description).await {
            Ok(analysis) => {
                let text = format!(
                    "{}\n\n{}\n\n{}",
                    turn.t("meal-breakdown-title"),
                    format_meal_breakdown(&analysis, turn.lang()),
                    turn.t("meal-confirm-question")
                );
                let pending = PendingMeal {
                    description: description.to_string(),
                    analysis,
                };
                Ok(Outcome::stay(
                    in_meal(MealStep::AwaitConfirmation { pending }),
                    vec![Reply::with_keyboard(text, confirmation_keyboard(turn))],
                ))
            }
            Err(e) => Ok(self.service_failure(turn, &e, in_meal(MealStep::AwaitDescription))),
        }
    }

    async fn save_meal(&self, turn: &Turn, pending: PendingMeal) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };

        let total = pending.analysis.total;
        let meal_id = db::insert_meal(&self.pool, turn.user_id, &pending.description, &total, turn.now).await?;
        info!(user_id = turn.user_id, meal_id, calories = total.calories, "Meal confirmed");

        let today =
            db::meal_totals_for_period(&self.pool, turn.user_id, Period::Today, turn.now, self.utc_offset).await?;
        let text = format!(
            "{}\n\n{}",
            turn.t_args("meal-saved", &[("calories", format!("{:.0}", total.calories))]),
            super::progress_lines(turn, &today, &profile.data)
        );
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }
}

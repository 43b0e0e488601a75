//! Registration: name, weight, height, age, sex, activity, then save.

use anyhow::Result;
use tracing::info;

use super::{invalid, prompt, Engine, Keyboard, Outcome, Reply, Turn};
use crate::calculator::{energy_plan, ActivityLevel, GoalType, Sex};
use crate::db::{self, GoalSettings, ProfileData};
use crate::dialogue::{
    validate_age, validate_height, validate_text, validate_weight, Action, ConversationState, Input,
    RegistrationDraft, RegistrationStep, MAX_NAME_LEN,
};

pub(super) fn sex_keyboard(turn: &Turn) -> Keyboard {
    Keyboard::Inline(vec![
        [Sex::Male, Sex::Female]
            .into_iter()
            .map(|sex| (turn.t(&format!("sex-{}", sex.as_str())), Action::Sex(sex)))
            .collect(),
        super::cancel_row(turn),
    ])
}

pub(super) fn activity_keyboard(turn: &Turn) -> Keyboard {
    let mut rows: Vec<Vec<(String, Action)>> = ActivityLevel::ALL
        .into_iter()
        .map(|level| {
            vec![(
                turn.t(&format!("activity-{}", level.as_str())),
                Action::Activity(level),
            )]
        })
        .collect();
    rows.push(super::cancel_row(turn));
    Keyboard::Inline(rows)
}

fn in_registration(step: RegistrationStep) -> ConversationState {
    ConversationState::Registration(step)
}

impl Engine {
    pub(super) fn start_registration(&self, turn: &Turn, intro_key: &str) -> Outcome {
        info!(user_id = turn.user_id, "Starting registration");
        Outcome::stay(
            in_registration(RegistrationStep::Name),
            vec![
                Reply::with_keyboard(turn.t(intro_key), Keyboard::Remove),
                prompt(turn, turn.t("ask-name")),
            ],
        )
    }

    pub(super) async fn registration_step(
        &self,
        turn: &Turn,
        step: RegistrationStep,
        input: Input,
    ) -> Result<Outcome> {
        let outcome = match (step, input) {
            (RegistrationStep::Name, Input::Text(text)) => match validate_text(&text, MAX_NAME_LEN) {
                Ok(name) => Outcome::stay(
                    in_registration(RegistrationStep::Weight { name }),
                    vec![prompt(turn, turn.t("ask-weight"))],
                ),
                Err(e) => invalid(turn, e, "ask-name", in_registration(RegistrationStep::Name)),
            },
            (RegistrationStep::Weight { name }, Input::Text(text)) => match validate_weight(&text) {
                Ok(weight) => Outcome::stay(
                    in_registration(RegistrationStep::Height { name, weight }),
                    vec![prompt(turn, turn.t("ask-height"))],
                ),
                Err(e) => invalid(turn, e, "ask-weight", in_registration(RegistrationStep::Weight { name })),
            },
            (RegistrationStep::Height { name, weight }, Input::Text(text)) => {
                match validate_height(&text) {
                    Ok(height) => Outcome::stay(
                        in_registration(RegistrationStep::Age { name, weight, height }),
                        vec![prompt(turn, turn.t("ask-age"))],
                    ),
                    Err(e) => invalid(
                        turn,
                        e,
                        "ask-height",
                        in_registration(RegistrationStep::Height { name, weight }),
                    ),
                }
            }
            (RegistrationStep::Age { name, weight, height }, Input::Text(text)) => {
                match validate_age(&text) {
                    Ok(age) => Outcome::stay(
                        in_registration(RegistrationStep::Sex {
                            draft: RegistrationDraft {
                                name,
                                weight,
                                height,
                                age,
                            },
                        }),
                        vec![Reply::with_keyboard(turn.t("ask-sex"), sex_keyboard(turn))],
                    ),
                    Err(e) => invalid(
                        turn,
                        e,
                        "ask-age",
                        in_registration(RegistrationStep::Age { name, weight, height }),
                    ),
                }
            }
            (RegistrationStep::Sex { draft }, Input::Action(Action::Sex(sex))) => Outcome::stay(
                in_registration(RegistrationStep::Activity { draft, sex }),
                vec![Reply::with_keyboard(turn.t("ask-activity"), activity_keyboard(turn))],
            ),
            (RegistrationStep::Activity { draft, sex }, Input::Action(Action::Activity(activity))) => {
                return self.complete_registration(turn, draft, sex, activity).await;
            }
            (_, input) => self.fallback(turn, &input),
        };
        Ok(outcome)
    }

    async fn complete_registration(
        &self,
        turn: &Turn,
        draft: RegistrationDraft,
        sex: Sex,
        activity: ActivityLevel,
    ) -> Result<Outcome> {
        let plan = energy_plan(
            draft.weight,
            draft.height,
            draft.age,
            sex,
            activity,
            GoalType::Maintain,
            None,
        )?;

        let data = ProfileData {
            name: draft.name,
            weight: draft.weight,
            height: draft.height,
            age: draft.age,
            sex,
            activity,
            daily_calories: plan.daily_calories,
            macros: plan.macros,
        };
        db::upsert_profile(&self.pool, turn.user_id, &data, None, turn.lang()).await?;
        info!(user_id = turn.user_id, daily_calories = data.daily_calories, "Registration completed");

        let text = format!(
            "{}\n\n{}",
            turn.t_args("registration-complete", &[("name", data.name.clone())]),
            super::profile::targets_text(turn, &data, &GoalSettings::maintain())
        );
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }
}

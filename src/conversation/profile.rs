//! Profile view and single-field editing.
//!
//! An edit overlays exactly one field on the stored record and recomputes the
//! calorie and macro targets from the result before saving.

use anyhow::Result;
use tracing::{info, warn};

use super::registration::{activity_keyboard, sex_keyboard};
use super::{invalid, prompt, Engine, Keyboard, Outcome, Reply, Turn};
use crate::calculator::{energy_plan, ActivityLevel, CalculatorError, GoalType, Sex};
use crate::db::{self, GoalChange, GoalSettings, ProfileData, UserProfile};
use crate::dialogue::{
    validate_age, validate_height, validate_text, validate_weight, Action, ConversationState, Input,
    ProfileEditStep, ProfileField, MAX_NAME_LEN,
};

/// New value for one profile field
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Name(String),
    Weight(f64),
    Height(u32),
    Age(u32),
    Sex(Sex),
    Activity(ActivityLevel),
}

impl FieldValue {
    fn apply(self, data: &mut ProfileData) {
        match self {
            FieldValue::Name(name) => data.name = name,
            FieldValue::Weight(weight) => data.weight = weight,
            FieldValue::Height(height) => data.height = height,
            FieldValue::Age(age) => data.age = age,
            FieldValue::Sex(sex) => data.sex = sex,
            FieldValue::Activity(activity) => data.activity = activity,
        }
    }
}

/// Why an edit dropped the active goal back to maintenance
#[derive(Debug, Clone, Copy, PartialEq)]
enum GoalReset {
    TargetReached { target: f64 },
    BelowFloor,
}

/// A lose/gain target the new weight has already reached or passed
fn passed_target(goal: &GoalSettings, weight: f64) -> Option<f64> {
    match (goal.goal, goal.target_weight) {
        (GoalType::Lose, Some(target)) if weight <= target => Some(target),
        (GoalType::Gain, Some(target)) if weight >= target => Some(target),
        _ => None,
    }
}

fn goal_label(turn: &Turn, goal: &GoalSettings) -> String {
    let name = turn.t(&format!("goal-{}", goal.goal.as_str()));
    match (goal.goal, goal.target_weight) {
        (GoalType::Maintain, _) | (_, None) => name,
        (_, Some(target)) => turn.t_args(
            "goal-with-target",
            &[("goal", name), ("target", target.to_string())],
        ),
    }
}

/// Calorie and macro targets block
pub(super) fn targets_text(turn: &Turn, data: &ProfileData, goal: &GoalSettings) -> String {
    turn.t_args(
        "profile-targets",
        &[
            ("calories", format!("{:.0}", data.daily_calories)),
            ("protein", data.macros.protein_g.to_string()),
            ("fat", data.macros.fat_g.to_string()),
            ("carbs", data.macros.carbs_g.to_string()),
            ("goal", goal_label(turn, goal)),
        ],
    )
}

pub(super) fn profile_text(turn: &Turn, data: &ProfileData, goal: &GoalSettings) -> String {
    format!(
        "{}\n\n{}",
        turn.t_args(
            "profile-view",
            &[
                ("name", data.name.clone()),
                ("weight", data.weight.to_string()),
                ("height", data.height.to_string()),
                ("age", data.age.to_string()),
                ("sex", turn.t(&format!("sex-{}", data.sex.as_str()))),
                ("activity", turn.t(&format!("activity-{}", data.activity.as_str()))),
            ],
        ),
        targets_text(turn, data, goal)
    )
}

fn field_keyboard(turn: &Turn) -> Keyboard {
    let mut rows: Vec<Vec<(String, Action)>> = ProfileField::ALL
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|field| {
                    (
                        turn.t(&format!("field-{}", field.as_str())),
                        Action::EditField(*field),
                    )
                })
                .collect()
        })
        .collect();
    rows.push(super::cancel_row(turn));
    Keyboard::Inline(rows)
}

fn value_prompt_key(field: ProfileField) -> &'static str {
    match field {
        ProfileField::Name => "ask-name",
        ProfileField::Weight => "ask-weight",
        ProfileField::Height => "ask-height",
        ProfileField::Age => "ask-age",
        ProfileField::Sex => "ask-sex",
        ProfileField::Activity => "ask-activity",
    }
}

fn in_edit(step: ProfileEditStep) -> ConversationState {
    ConversationState::ProfileEdit(step)
}

impl Engine {
    pub(super) fn show_profile(&self, turn: &Turn, profile: &UserProfile) -> Outcome {
        let text = profile_text(turn, &profile.data, &profile.goal);
        Outcome::idle(vec![Reply::with_keyboard(
            text,
            Keyboard::Inline(vec![vec![(turn.t("button-edit-profile"), Action::EditProfile)]]),
        )])
    }

    pub(super) async fn start_profile_edit(&self, turn: &Turn) -> Result<Outcome> {
        if db::get_profile(&self.pool, turn.user_id).await?.is_none() {
            return Ok(self.start_registration(turn, "registration-required"));
        }
        Ok(Outcome::stay(
            in_edit(ProfileEditStep::ChooseField),
            vec![Reply::with_keyboard(turn.t("edit-choose-field"), field_keyboard(turn))],
        ))
    }

    pub(super) async fn profile_edit_step(
        &self,
        turn: &Turn,
        step: ProfileEditStep,
        input: Input,
    ) -> Result<Outcome> {
        match (step, input) {
            (ProfileEditStep::ChooseField, Input::Action(Action::EditField(field))) => {
                let outcome = match field {
                    ProfileField::Sex => Outcome::stay(
                        in_edit(ProfileEditStep::AwaitChoice { field }),
                        vec![Reply::with_keyboard(turn.t("ask-sex"), sex_keyboard(turn))],
                    ),
                    ProfileField::Activity => Outcome::stay(
                        in_edit(ProfileEditStep::AwaitChoice { field }),
                        vec![Reply::with_keyboard(turn.t("ask-activity"), activity_keyboard(turn))],
                    ),
                    _ => Outcome::stay(
                        in_edit(ProfileEditStep::AwaitValue { field }),
                        vec![prompt(turn, turn.t(value_prompt_key(field)))],
                    ),
                };
                Ok(outcome)
            }
            (ProfileEditStep::AwaitValue { field }, Input::Text(text)) => {
                let parsed = match field {
                    ProfileField::Name => validate_text(&text, MAX_NAME_LEN).map(FieldValue::Name),
                    ProfileField::Weight => validate_weight(&text).map(FieldValue::Weight),
                    ProfileField::Height => validate_height(&text).map(FieldValue::Height),
                    ProfileField::Age => validate_age(&text).map(FieldValue::Age),
                    ProfileField::Sex | ProfileField::Activity => {
                        return Ok(self.fallback(turn, &Input::Text(text)));
                    }
                };
                match parsed {
                    Ok(value) => self.commit_profile_edit(turn, value).await,
                    Err(e) => Ok(invalid(
                        turn,
                        e,
                        value_prompt_key(field),
                        in_edit(ProfileEditStep::AwaitValue { field }),
                    )),
                }
            }
            (
                ProfileEditStep::AwaitChoice {
                    field: ProfileField::Sex,
                },
                Input::Action(Action::Sex(sex)),
            ) => self.commit_profile_edit(turn, FieldValue::Sex(sex)).await,
            (
                ProfileEditStep::AwaitChoice {
                    field: ProfileField::Activity,
                },
                Input::Action(Action::Activity(level)),
            ) => self.commit_profile_edit(turn, FieldValue::Activity(level)).await,
            (_, input) => Ok(self.fallback(turn, &input)),
        }
    }

    async fn commit_profile_edit(&self, turn: &Turn, value: FieldValue) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };

        let mut data = profile.data.clone();
        value.apply(&mut data);

        let maintenance_plan = |data: &ProfileData| {
            energy_plan(
                data.weight,
                data.height,
                data.age,
                data.sex,
                data.activity,
                GoalType::Maintain,
                None,
            )
        };

        let goal = profile.goal;
        let (plan, goal_reset) = if let Some(target) = passed_target(&goal, data.weight) {
            info!(
                user_id = turn.user_id,
                target_weight = target,
                weight = data.weight,
                "Target weight passed, resetting goal"
            );
            (maintenance_plan(&data)?, Some(GoalReset::TargetReached { target }))
        } else {
            match energy_plan(
                data.weight,
                data.height,
                data.age,
                data.sex,
                data.activity,
                goal.goal,
                goal.kg_per_week,
            ) {
                Ok(plan) => (plan, None),
                Err(CalculatorError::BelowSafeFloor { calories, floor }) => {
                    warn!(
                        user_id = turn.user_id,
                        calories, floor, "Goal target fell below the safe floor after edit, resetting goal"
                    );
                    (maintenance_plan(&data)?, Some(GoalReset::BelowFloor))
                }
                Err(e) => return Err(e.into()),
            }
        };
        data.daily_calories = plan.daily_calories;
        data.macros = plan.macros;

        let maintain = GoalSettings::maintain();
        let goal_update = goal_reset.map(|_| GoalChange {
            settings: &maintain,
            started_at: turn.now,
        });
        db::upsert_profile(&self.pool, turn.user_id, &data, goal_update, turn.lang()).await?;
        info!(user_id = turn.user_id, daily_calories = data.daily_calories, "Profile field updated");

        let effective_goal = if goal_reset.is_some() { maintain } else { goal };
        let mut text = format!(
            "{}\n\n{}",
            turn.t("profile-updated"),
            profile_text(turn, &data, &effective_goal)
        );
        let notice = match goal_reset {
            Some(GoalReset::TargetReached { target }) => {
                Some(turn.t_args("goal-reset-target", &[("target", target.to_string())]))
            }
            Some(GoalReset::BelowFloor) => Some(turn.t("goal-reset-floor")),
            None => None,
        };
        if let Some(notice) = notice {
            text.push_str("\n\n");
            text.push_str(&notice);
        }
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }
}

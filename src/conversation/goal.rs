//! Goal setting: maintain, or lose/gain toward a target weight at a chosen pace.

use anyhow::{Context, Result};
use tracing::info;

use super::{invalid, prompt, Engine, Keyboard, Outcome, Reply, Turn};
use crate::calculator::{energy_plan, CalculatorError, GoalType, Pace};
use crate::db::{self, GoalChange, GoalSettings, UserProfile};
use crate::dialogue::{validate_target_weight, Action, ConversationState, GoalStep, Input};

fn in_goal(step: GoalStep) -> ConversationState {
    ConversationState::Goal(step)
}

fn goal_keyboard(turn: &Turn) -> Keyboard {
    let mut rows: Vec<Vec<(String, Action)>> = [GoalType::Lose, GoalType::Gain, GoalType::Maintain]
        .into_iter()
        .map(|goal| vec![(turn.t(&format!("goal-{}", goal.as_str())), Action::Goal(goal))])
        .collect();
    rows.push(super::cancel_row(turn));
    Keyboard::Inline(rows)
}

fn pace_keyboard(turn: &Turn, goal: GoalType) -> Keyboard {
    let mut rows: Vec<Vec<(String, Action)>> = Pace::ALL
        .into_iter()
        .filter_map(|pace| {
            let kg = pace.kg_per_week(goal)?;
            let label = turn.t_args(
                "pace-button",
                &[
                    ("pace", turn.t(&format!("pace-{}", pace.as_str()))),
                    ("kg", kg.to_string()),
                ],
            );
            Some(vec![(label, Action::Pace(pace))])
        })
        .collect();
    rows.push(super::cancel_row(turn));
    Keyboard::Inline(rows)
}

fn target_prompt_key(goal: GoalType) -> &'static str {
    match goal {
        GoalType::Gain => "goal-ask-target-gain",
        _ => "goal-ask-target-lose",
    }
}

impl Engine {
    pub(super) fn start_goal(&self, turn: &Turn, profile: &UserProfile) -> Outcome {
        let current = super::profile::targets_text(turn, &profile.data, &profile.goal);
        let text = format!("{}\n\n{}", current, turn.t("goal-ask"));
        Outcome::stay(
            in_goal(GoalStep::ChooseGoal),
            vec![Reply::with_keyboard(text, goal_keyboard(turn))],
        )
    }

    pub(super) async fn goal_step(&self, turn: &Turn, step: GoalStep, input: Input) -> Result<Outcome> {
        match (step, input) {
            (GoalStep::ChooseGoal, Input::Action(Action::Goal(GoalType::Maintain))) => {
                self.commit_maintain(turn).await
            }
            (GoalStep::ChooseGoal, Input::Action(Action::Goal(goal))) => {
                let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
                    return Ok(self.start_registration(turn, "registration-required"));
                };
                let text = turn.t_args(
                    target_prompt_key(goal),
                    &[("weight", profile.data.weight.to_string())],
                );
                Ok(Outcome::stay(
                    in_goal(GoalStep::TargetWeight { goal }),
                    vec![prompt(turn, text)],
                ))
            }
            (GoalStep::TargetWeight { goal }, Input::Text(text)) => {
                let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
                    return Ok(self.start_registration(turn, "registration-required"));
                };
                match validate_target_weight(&text, goal, profile.data.weight) {
                    Ok(target_weight) => Ok(Outcome::stay(
                        in_goal(GoalStep::Pace { goal, target_weight }),
                        vec![Reply::with_keyboard(turn.t("goal-ask-pace"), pace_keyboard(turn, goal))],
                    )),
                    Err(e) => {
                        let mut outcome = invalid(turn, e, "goal-retry-target", in_goal(GoalStep::TargetWeight { goal }));
                        outcome.replies.push(Reply::text(turn.t_args(
                            "goal-current-weight",
                            &[("weight", profile.data.weight.to_string())],
                        )));
                        Ok(outcome)
                    }
                }
            }
            (GoalStep::Pace { goal, target_weight }, Input::Action(Action::Pace(pace))) => {
                self.commit_pace(turn, goal, target_weight, pace).await
            }
            (_, input) => Ok(self.fallback(turn, &input)),
        }
    }

    async fn commit_maintain(&self, turn: &Turn) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };
        let mut data = profile.data;
        let plan = energy_plan(
            data.weight,
            data.height,
            data.age,
            data.sex,
            data.activity,
            GoalType::Maintain,
            None,
        )?;
        data.daily_calories = plan.daily_calories;
        data.macros = plan.macros;

        let goal = GoalSettings::maintain();
        let change = GoalChange {
            settings: &goal,
            started_at: turn.now,
        };
        db::upsert_profile(&self.pool, turn.user_id, &data, Some(change), turn.lang()).await?;
        info!(user_id = turn.user_id, "Goal set to maintain");

        let text = format!(
            "{}\n\n{}",
            turn.t("goal-saved-maintain"),
            super::profile::targets_text(turn, &data, &goal)
        );
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }

    async fn commit_pace(
        &self,
        turn: &Turn,
        goal: GoalType,
        target_weight: f64,
        pace: Pace,
    ) -> Result<Outcome> {
        let Some(profile) = db::get_profile(&self.pool, turn.user_id).await? else {
            return Ok(self.start_registration(turn, "registration-required"));
        };
        let kg_per_week = pace
            .kg_per_week(goal)
            .with_context(|| format!("No pace for the {goal} goal"))?;

        let mut data = profile.data;
        let plan = match energy_plan(
            data.weight,
            data.height,
            data.age,
            data.sex,
            data.activity,
            goal,
            Some(kg_per_week),
        ) {
            Ok(plan) => plan,
            Err(CalculatorError::BelowSafeFloor { calories, floor }) => {
                info!(user_id = turn.user_id, calories, floor, "Pace rejected by the safe calorie floor");
                let text = turn.t_args(
                    "goal-below-floor",
                    &[
                        ("calories", format!("{calories:.0}")),
                        ("floor", format!("{floor:.0}")),
                    ],
                );
                return Ok(Outcome::stay(
                    in_goal(GoalStep::Pace { goal, target_weight }),
                    vec![Reply::with_keyboard(text, pace_keyboard(turn, goal))],
                ));
            }
            Err(e) => return Err(e.into()),
        };
        data.daily_calories = plan.daily_calories;
        data.macros = plan.macros;

        let settings = GoalSettings {
            goal,
            target_weight: Some(target_weight),
            kg_per_week: Some(kg_per_week),
        };
        let change = GoalChange {
            settings: &settings,
            started_at: turn.now,
        };
        db::upsert_profile(&self.pool, turn.user_id, &data, Some(change), turn.lang()).await?;
        info!(
            user_id = turn.user_id,
            goal = %goal,
            kg_per_week,
            daily_calories = data.daily_calories,
            "Goal saved"
        );

        let weeks = ((data.weight - target_weight).abs() / kg_per_week).ceil();
        let text = format!(
            "{}\n\n{}",
            turn.t_args(
                "goal-saved",
                &[
                    ("target", target_weight.to_string()),
                    ("kg", kg_per_week.to_string()),
                    ("weeks", format!("{weeks:.0}")),
                ],
            ),
            super::profile::targets_text(turn, &data, &settings)
        );
        Ok(Outcome::idle(vec![Reply::with_keyboard(text, Keyboard::MainMenu)]))
    }
}

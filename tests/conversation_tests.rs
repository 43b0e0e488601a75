//! End-to-end conversation flows against a temporary database and a scripted
//! nutrition backend

mod common;

use std::sync::Arc;

use anyhow::Result;
use calorie_bot::calculator::{ActivityLevel, GoalType, Pace, Sex};
use calorie_bot::conversation::{Engine, Keyboard, Outcome, Reply, Turn};
use calorie_bot::db;
use calorie_bot::dialogue::{
    Action, Command, ConversationState, GoalStep, Input, MealStep, ProfileField, RegistrationStep,
    StatsView,
};
use calorie_bot::errors::NutritionError;
use calorie_bot::localization::{t_lang, t_args_lang};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{client, meal_json, menu_json, ScriptedBackend};
use tempfile::TempDir;

const USER: i64 = 1001;
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

struct Harness {
    _dir: TempDir,
    engine: Engine,
    backend: Arc<ScriptedBackend>,
    state: ConversationState,
    now: DateTime<Utc>,
}

impl Harness {
    async fn new() -> Result<Self> {
        Self::with_quota(10).await
    }

    async fn with_quota(max_requests: usize) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pool = db::connect(&dir.path().join("users.db")).await?;
        let backend = ScriptedBackend::new(Vec::new());
        let engine = Engine::new(pool, client(backend.clone(), max_requests), 6, 3)?;
        Ok(Self {
            _dir: dir,
            engine,
            backend,
            state: ConversationState::Idle,
            // Noon in Moscow
            now: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        })
    }

    fn turn(&self) -> Turn {
        Turn::new(USER, Some("en".to_string()), self.now)
    }

    async fn send(&mut self, input: Input) -> Outcome {
        let outcome = self.engine.handle(&self.turn(), self.state.clone(), input).await;
        self.state = outcome.next.clone();
        outcome
    }

    async fn text(&mut self, text: &str) -> Outcome {
        self.send(Input::Text(text.to_string())).await
    }

    async fn action(&mut self, action: Action) -> Outcome {
        self.send(Input::Action(action)).await
    }

    async fn command(&mut self, command: Command) -> Outcome {
        self.send(Input::Command(command)).await
    }

    async fn register(&mut self, weight: &str, height: &str, age: &str, sex: Sex, activity: ActivityLevel) {
        self.command(Command::Start).await;
        self.text("Ivan").await;
        self.text(weight).await;
        self.text(height).await;
        self.text(age).await;
        self.action(Action::Sex(sex)).await;
        let outcome = self.action(Action::Activity(activity)).await;
        assert!(outcome.next.is_idle(), "registration did not finish: {outcome:?}");
    }

    async fn profile(&self) -> db::UserProfile {
        db::get_profile(self.engine.pool(), USER)
            .await
            .unwrap()
            .expect("profile stored")
    }
}

fn en(key: &str) -> String {
    t_lang(key, Some("en"))
}

fn first_text(outcome: &Outcome) -> &str {
    outcome.replies.first().map(Reply::content).unwrap_or("")
}

fn all_text(outcome: &Outcome) -> String {
    outcome
        .replies
        .iter()
        .map(Reply::content)
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_registration_computes_targets() -> Result<()> {
    let mut h = Harness::new().await?;

    let outcome = h.command(Command::Start).await;
    assert_eq!(outcome.next, ConversationState::Registration(RegistrationStep::Name));
    assert_eq!(first_text(&outcome), en("welcome-new"));

    h.text("Ivan").await;
    h.text("70").await;
    h.text("175").await;
    let outcome = h.text("30").await;
    assert!(matches!(
        outcome.next,
        ConversationState::Registration(RegistrationStep::Sex { .. })
    ));

    h.action(Action::Sex(Sex::Male)).await;
    let outcome = h.action(Action::Activity(ActivityLevel::Medium)).await;
    assert!(outcome.next.is_idle());
    assert!(matches!(
        outcome.replies.last(),
        Some(Reply::Text {
            keyboard: Some(Keyboard::MainMenu),
            ..
        })
    ));

    let profile = h.profile().await;
    // round(1695.667 * 1.55, 1)
    assert!((profile.data.daily_calories - 2628.3).abs() < 1e-9);
    assert_eq!(profile.data.macros.protein_g, 126);
    assert_eq!(profile.data.macros.fat_g, 70);
    // (2628.3 - 126*4 - 70*9) / 4 = 373.575
    assert_eq!(profile.data.macros.carbs_g, 374);
    assert_eq!(profile.goal.goal, GoalType::Maintain);
    assert_eq!(profile.language_code.as_deref(), Some("en"));

    Ok(())
}

#[tokio::test]
async fn test_invalid_registration_input_reprompts() -> Result<()> {
    let mut h = Harness::new().await?;
    h.command(Command::Start).await;
    h.text("Ivan").await;

    let before = h.state.clone();
    let outcome = h.text("seventy").await;
    assert_eq!(outcome.next, before);
    assert!(first_text(&outcome).starts_with(&en("error-not-number")));

    let outcome = h.text("-3").await;
    assert_eq!(outcome.next, before);
    assert!(first_text(&outcome).starts_with(&en("error-not-positive")));

    let outcome = h.text("70,5").await;
    assert_eq!(
        outcome.next,
        ConversationState::Registration(RegistrationStep::Height {
            name: "Ivan".to_string(),
            weight: 70.5
        })
    );

    let outcome = h.text("175.5").await;
    assert!(first_text(&outcome).starts_with(&en("error-not-integer")));

    Ok(())
}

#[tokio::test]
async fn test_out_of_range_metrics_keep_registration_going() -> Result<()> {
    let mut h = Harness::new().await?;
    h.command(Command::Start).await;
    h.text("Ivan").await;

    let outcome = h.text("5").await;
    assert!(first_text(&outcome).starts_with(&en("error-weight-range")));
    h.text("40").await;

    let outcome = h.text("1000").await;
    assert!(first_text(&outcome).starts_with(&en("error-height-range")));
    h.text("100").await;

    let before = h.state.clone();
    let outcome = h.text("400").await;
    assert_eq!(outcome.next, before);
    assert!(first_text(&outcome).starts_with(&en("error-age-range")));

    // The draft survives the rejection and registration still completes
    h.text("40").await;
    h.action(Action::Sex(Sex::Male)).await;
    let outcome = h.action(Action::Activity(ActivityLevel::Low)).await;
    assert!(outcome.next.is_idle());
    assert_ne!(first_text(&outcome), en("error-generic"));

    let profile = h.profile().await;
    assert_eq!(profile.data.weight, 40.0);
    assert_eq!(profile.data.height, 100);
    assert_eq!(profile.data.age, 40);
    assert!(profile.data.daily_calories > 0.0);

    Ok(())
}

#[tokio::test]
async fn test_commands_require_profile() -> Result<()> {
    let mut h = Harness::new().await?;

    let outcome = h.command(Command::Stats).await;
    assert_eq!(outcome.next, ConversationState::Registration(RegistrationStep::Name));
    assert_eq!(first_text(&outcome), en("registration-required"));

    // Help works without a profile and leaves the flow
    let outcome = h.command(Command::Help).await;
    assert!(outcome.next.is_idle());
    assert!(all_text(&outcome).contains(&en("help-text")));

    Ok(())
}

#[tokio::test]
async fn test_lose_goal_adjusts_calories() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    let outcome = h.command(Command::Goal).await;
    assert_eq!(outcome.next, ConversationState::Goal(GoalStep::ChooseGoal));

    h.action(Action::Goal(GoalType::Lose)).await;
    let outcome = h.text("75").await;
    assert!(first_text(&outcome).starts_with(&en("error-target-not-below")));
    assert_eq!(outcome.next, ConversationState::Goal(GoalStep::TargetWeight { goal: GoalType::Lose }));

    h.text("65").await;
    let outcome = h.action(Action::Pace(Pace::Medium)).await;
    assert!(outcome.next.is_idle());

    let profile = h.profile().await;
    // 2628.3 - 0.5 * 7700 / 7
    assert!((profile.data.daily_calories - 2078.3).abs() < 1e-9);
    assert_eq!(profile.goal.goal, GoalType::Lose);
    assert_eq!(profile.goal.target_weight, Some(65.0));
    assert_eq!(profile.goal.kg_per_week, Some(0.5));
    assert_eq!(profile.goal_start, Some(h.now));

    // The goal chart is now available
    let outcome = h.action(Action::Stats(StatsView::GoalChart)).await;
    match &outcome.replies[0] {
        Reply::Photo { png, .. } => assert_eq!(png[..8], PNG_SIGNATURE),
        other => panic!("expected a chart, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_pace_below_safe_floor_is_rejected() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("45", "150", "60", Sex::Female, ActivityLevel::None).await;
    let before = h.profile().await;

    h.command(Command::Goal).await;
    h.action(Action::Goal(GoalType::Lose)).await;
    h.text("40").await;
    let outcome = h.action(Action::Pace(Pace::Fast)).await;

    assert_eq!(
        outcome.next,
        ConversationState::Goal(GoalStep::Pace {
            goal: GoalType::Lose,
            target_weight: 40.0
        })
    );
    assert!(first_text(&outcome).contains("1200"));
    assert_eq!(h.profile().await, before);

    Ok(())
}

#[tokio::test]
async fn test_profile_edit_recomputes_and_is_idempotent() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    h.action(Action::EditProfile).await;
    h.action(Action::EditField(ProfileField::Weight)).await;
    let outcome = h.text("80").await;
    assert!(outcome.next.is_idle());
    let edited = h.profile().await;
    assert_eq!(edited.data.weight, 80.0);
    assert!(edited.data.daily_calories > 2628.3);
    assert_eq!(edited.data.macros.protein_g, 144);

    h.action(Action::EditProfile).await;
    h.action(Action::EditField(ProfileField::Weight)).await;
    h.text("80").await;
    assert_eq!(h.profile().await, edited);

    Ok(())
}

#[tokio::test]
async fn test_profile_edit_rejects_out_of_range_age() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    let before = h.profile().await;

    h.action(Action::EditProfile).await;
    h.action(Action::EditField(ProfileField::Age)).await;
    let outcome = h.text("400").await;
    assert!(first_text(&outcome).starts_with(&en("error-age-range")));
    assert!(!outcome.next.is_idle());
    assert_eq!(h.profile().await, before);

    Ok(())
}

#[tokio::test]
async fn test_weight_past_target_resets_goal() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    h.command(Command::Goal).await;
    h.action(Action::Goal(GoalType::Lose)).await;
    h.text("65").await;
    h.action(Action::Pace(Pace::Medium)).await;
    assert_eq!(h.profile().await.goal.goal, GoalType::Lose);

    h.now += Duration::days(30);
    h.action(Action::EditProfile).await;
    h.action(Action::EditField(ProfileField::Weight)).await;
    let outcome = h.text("60").await;
    assert!(outcome.next.is_idle());
    let expected = t_args_lang("goal-reset-target", &[("target", "65")], Some("en"));
    assert!(all_text(&outcome).contains(&expected));

    let profile = h.profile().await;
    assert_eq!(profile.data.weight, 60.0);
    assert_eq!(profile.goal.goal, GoalType::Maintain);
    assert_eq!(profile.goal.target_weight, None);
    assert_eq!(profile.goal_start, Some(h.now));
    // Maintenance targets for the new weight
    assert_eq!(profile.data.macros.protein_g, 108);
    assert_eq!(profile.data.macros.fat_g, 60);

    Ok(())
}

#[tokio::test]
async fn test_cancel_discards_flow_data() -> Result<()> {
    let mut h = Harness::new().await?;
    h.command(Command::Start).await;
    h.text("Ivan").await;
    h.text("70").await;

    let outcome = h.command(Command::Cancel).await;
    assert!(outcome.next.is_idle());
    assert_eq!(first_text(&outcome), en("flow-cancelled"));
    assert!(db::get_profile(h.engine.pool(), USER).await?.is_none());

    let outcome = h.action(Action::Cancel).await;
    assert_eq!(first_text(&outcome), en("nothing-to-cancel"));

    // Starting over begins from an empty draft
    let outcome = h.command(Command::Start).await;
    assert_eq!(outcome.next, ConversationState::Registration(RegistrationStep::Name));

    Ok(())
}

#[tokio::test]
async fn test_menu_label_interrupts_flow() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    h.command(Command::Goal).await;
    h.action(Action::Goal(GoalType::Gain)).await;

    let label = t_lang("menu-profile", Some("ru"));
    let outcome = h.text(&label).await;
    assert!(outcome.next.is_idle());
    assert_eq!(first_text(&outcome), en("flow-cancelled"));
    assert!(all_text(&outcome).contains("Ivan"));
    assert_eq!(h.profile().await.goal.goal, GoalType::Maintain);

    Ok(())
}

#[tokio::test]
async fn test_unexpected_input_leaves_flow() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    h.command(Command::Goal).await;
    let outcome = h.text("just chatting").await;
    assert!(outcome.next.is_idle());
    assert_eq!(first_text(&outcome), en("flow-fallback"));

    let outcome = h.action(Action::Pace(Pace::Slow)).await;
    assert_eq!(first_text(&outcome), en("action-outdated"));

    Ok(())
}

#[tokio::test]
async fn test_meal_is_saved_then_cleared() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Ok(meal_json(450.0)));

    h.command(Command::Meal).await;
    let outcome = h.text("oatmeal with banana").await;
    match &outcome.next {
        ConversationState::Meal(MealStep::AwaitConfirmation { pending }) => {
            assert_eq!(pending.analysis.total.calories, 450.0);
            assert_eq!(pending.description, "oatmeal with banana");
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert!(all_text(&outcome).contains("Овсянка"));

    let outcome = h.action(Action::ConfirmMeal).await;
    assert!(outcome.next.is_idle());
    assert!(first_text(&outcome).starts_with(&t_args_lang("meal-saved", &[("calories", "450")], Some("en"))));

    let week = h.action(Action::Stats(StatsView::WeekChart)).await;
    match &week.replies[0] {
        Reply::Photo { png, caption } => {
            assert_eq!(png[..8], PNG_SIGNATURE);
            assert!(caption.contains("450"));
        }
        other => panic!("expected a chart, got {other:?}"),
    }

    let history = h.action(Action::Stats(StatsView::History)).await;
    assert!(first_text(&history).contains("oatmeal with banana"));

    let outcome = h.action(Action::ClearToday).await;
    assert_eq!(first_text(&outcome), en("stats-cleared"));
    let today = db::meal_totals_for_period(h.engine.pool(), USER, db::Period::Today, h.now, h.engine.utc_offset()).await?;
    assert_eq!(today.calories, 0.0);

    let outcome = h.action(Action::ClearToday).await;
    assert_eq!(first_text(&outcome), en("stats-nothing-to-clear"));

    Ok(())
}

#[tokio::test]
async fn test_voice_transcript_starts_meal_analysis() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Ok(meal_json(320.0)));

    let outcome = h.send(Input::Transcript("two eggs and toast".to_string())).await;
    assert!(matches!(
        outcome.next,
        ConversationState::Meal(MealStep::AwaitConfirmation { .. })
    ));
    assert!(h.backend.prompts()[0].contains("two eggs and toast"));

    // Retrying goes back to the description step without saving
    let outcome = h.action(Action::RetryMeal).await;
    assert_eq!(outcome.next, ConversationState::Meal(MealStep::AwaitDescription));
    assert!(db::meals_in(
        h.engine.pool(),
        USER,
        db::DayWindow::last_days(h.now, h.engine.utc_offset(), 1)
    )
    .await?
    .is_empty());

    Ok(())
}

#[tokio::test]
async fn test_service_failure_keeps_user_in_step() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Ok("no json here".to_string()));
    h.backend.push(Err(NutritionError::CircuitOpen));

    h.command(Command::Meal).await;
    let outcome = h.text("soup").await;
    assert_eq!(outcome.next, ConversationState::Meal(MealStep::AwaitDescription));
    assert_eq!(first_text(&outcome), en("error-service-parse"));

    let outcome = h.text("soup").await;
    assert_eq!(outcome.next, ConversationState::Meal(MealStep::AwaitDescription));
    assert_eq!(first_text(&outcome), en("error-service-unavailable"));

    Ok(())
}

#[tokio::test]
async fn test_rate_limit_reported_with_wait_time() -> Result<()> {
    let mut h = Harness::with_quota(1).await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Ok(meal_json(200.0)));

    h.command(Command::Meal).await;
    h.text("apple").await;
    h.action(Action::ConfirmMeal).await;

    h.command(Command::Meal).await;
    let outcome = h.text("pear").await;
    assert_eq!(outcome.next, ConversationState::Meal(MealStep::AwaitDescription));
    assert_eq!(h.backend.calls(), 1);
    // The window is one minute long and the first call just happened
    let reported = (55..=60).any(|seconds: u32| {
        first_text(&outcome)
            == t_args_lang("error-rate-limited", &[("seconds", &seconds.to_string())], Some("en"))
    });
    assert!(reported, "unexpected reply: {}", first_text(&outcome));

    Ok(())
}

#[tokio::test]
async fn test_menu_generation_and_cooldown() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Ok(menu_json(3, 870.0)));

    h.command(Command::Menu).await;
    h.action(Action::MealCount(3)).await;
    let outcome = h.action(Action::SkipPreferences).await;
    assert!(outcome.next.is_idle());
    assert_eq!(outcome.replies.len(), 2);
    assert!(matches!(&outcome.replies[1], Reply::Preformatted { text } if text.contains("Dish 1")));
    assert_eq!(h.profile().await.last_menu_request, Some(h.now));

    // Inside the cooldown no flow starts
    h.now += Duration::hours(2);
    let outcome = h.command(Command::Menu).await;
    assert!(outcome.next.is_idle());
    assert_eq!(
        first_text(&outcome),
        t_args_lang("menu-cooldown", &[("hours", "4"), ("minutes", "0")], Some("en"))
    );
    assert_eq!(h.backend.calls(), 1);

    h.now += Duration::hours(4);
    let outcome = h.command(Command::Menu).await;
    assert!(!outcome.next.is_idle());

    Ok(())
}

#[tokio::test]
async fn test_failed_menu_does_not_start_cooldown() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;
    h.backend.push(Err(NutritionError::Timeout(60)));

    h.command(Command::Menu).await;
    h.action(Action::MealCount(2)).await;
    let outcome = h.text("vegetarian").await;
    assert_eq!(first_text(&outcome), en("error-service-unavailable"));
    assert!(!outcome.next.is_idle());
    assert_eq!(h.profile().await.last_menu_request, None);

    Ok(())
}

#[tokio::test]
async fn test_reminder_setup_and_notifications() -> Result<()> {
    let mut h = Harness::new().await?;
    h.register("70", "175", "30", Sex::Male, ActivityLevel::Medium).await;

    h.command(Command::Settings).await;
    h.action(Action::SetupReminders).await;
    h.action(Action::ReminderCount(2)).await;
    h.text("Breakfast").await;
    let outcome = h.text("25:00").await;
    assert!(first_text(&outcome).starts_with(&en("error-invalid-time")));
    h.text("8:30").await;
    h.text("Dinner").await;
    let outcome = h.text("19.00").await;
    assert!(outcome.next.is_idle());

    let reminders = db::list_reminders(h.engine.pool(), USER).await?;
    let schedule: Vec<(&str, &str)> = reminders
        .iter()
        .map(|r| (r.name.as_str(), r.time.as_str()))
        .collect();
    assert_eq!(schedule, vec![("Breakfast", "08:30"), ("Dinner", "19:00")]);

    let outcome = h.action(Action::ToggleNotifications).await;
    assert_eq!(first_text(&outcome), en("notifications-off"));
    assert!(!h.profile().await.notifications_enabled);
    assert!(db::reminders_due(h.engine.pool(), "08:30").await?.is_empty());

    let outcome = h.action(Action::ClearReminders).await;
    assert_eq!(first_text(&outcome), en("reminders-cleared"));
    assert!(db::list_reminders(h.engine.pool(), USER).await?.is_empty());

    Ok(())
}

//! Conversation state, user actions and input validation.
//!
//! Every multi-step flow owns a typed scratch area inside its state variant.
//! Leaving a flow (commit, cancel or fallback) replaces the whole state with
//! [`ConversationState::Idle`], so nothing collected in one flow can leak into
//! the next one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};
use thiserror::Error;

use crate::calculator::{ActivityLevel, GoalType, Pace, Sex};
use crate::nutrition::MealAnalysis;

/// Telegram limits callback data to 64 bytes
pub const MAX_CALLBACK_DATA_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_MEAL_DESCRIPTION_LEN: usize = 1000;
pub const MAX_MEALS_PER_DAY: u8 = 5;
pub const MAX_REMINDERS: u8 = 5;

/// Conversation state of one chat
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ConversationState {
    #[default]
    Idle,
    Registration(RegistrationStep),
    ProfileEdit(ProfileEditStep),
    Goal(GoalStep),
    Meal(MealStep),
    Menu(MenuStep),
    Reminders(ReminderStep),
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }
}

/// Fields collected before sex and activity are chosen
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub name: String,
    pub weight: f64,
    pub height: u32,
    pub age: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RegistrationStep {
    Name,
    Weight { name: String },
    Height { name: String, weight: f64 },
    Age { name: String, weight: f64, height: u32 },
    Sex { draft: RegistrationDraft },
    Activity { draft: RegistrationDraft, sex: Sex },
}

/// Single editable profile field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileField {
    Name,
    Weight,
    Height,
    Age,
    Sex,
    Activity,
}

impl ProfileField {
    pub const ALL: [ProfileField; 6] = [
        ProfileField::Name,
        ProfileField::Weight,
        ProfileField::Height,
        ProfileField::Age,
        ProfileField::Sex,
        ProfileField::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Name => "name",
            ProfileField::Weight => "weight",
            ProfileField::Height => "height",
            ProfileField::Age => "age",
            ProfileField::Sex => "sex",
            ProfileField::Activity => "activity",
        }
    }
}

impl FromStr for ProfileField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProfileEditStep {
    ChooseField,
    AwaitValue { field: ProfileField },
    AwaitChoice { field: ProfileField },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GoalStep {
    ChooseGoal,
    TargetWeight { goal: GoalType },
    Pace { goal: GoalType, target_weight: f64 },
}

/// Parsed meal waiting for the user's confirmation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingMeal {
    pub description: String,
    pub analysis: MealAnalysis,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MealStep {
    AwaitDescription,
    AwaitConfirmation { pending: PendingMeal },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MenuStep {
    MealCount,
    Preferences { meals_per_day: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDraft {
    pub name: String,
    pub time: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderStep {
    Count,
    Name {
        total: u8,
        collected: Vec<ReminderDraft>,
    },
    Time {
        total: u8,
        collected: Vec<ReminderDraft>,
        name: String,
    },
}

/// Type alias for the bot's dialogue handle
pub type ConversationDialogue = Dialogue<ConversationState, InMemStorage<ConversationState>>;

/// Chart or listing offered under the statistics view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsView {
    WeekChart,
    MonthChart,
    GoalChart,
    ProgressChart,
    History,
}

impl StatsView {
    pub const ALL: [StatsView; 5] = [
        StatsView::WeekChart,
        StatsView::MonthChart,
        StatsView::GoalChart,
        StatsView::ProgressChart,
        StatsView::History,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatsView::WeekChart => "week",
            StatsView::MonthChart => "month",
            StatsView::GoalChart => "goal",
            StatsView::ProgressChart => "progress",
            StatsView::History => "history",
        }
    }
}

/// Every inline button the bot can show. Serialized as `kind` or `kind:value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Cancel,
    Sex(Sex),
    Activity(ActivityLevel),
    EditProfile,
    EditField(ProfileField),
    Goal(GoalType),
    Pace(Pace),
    ConfirmMeal,
    RetryMeal,
    MealCount(u8),
    SkipPreferences,
    Stats(StatsView),
    ClearToday,
    ToggleNotifications,
    SetupReminders,
    ClearReminders,
    ReminderCount(u8),
}

impl Action {
    /// Every action, for startup validation of the callback table
    pub fn all() -> Vec<Action> {
        let mut actions = vec![
            Action::Cancel,
            Action::Sex(Sex::Male),
            Action::Sex(Sex::Female),
            Action::EditProfile,
            Action::Goal(GoalType::Lose),
            Action::Goal(GoalType::Gain),
            Action::Goal(GoalType::Maintain),
            Action::ConfirmMeal,
            Action::RetryMeal,
            Action::SkipPreferences,
            Action::ClearToday,
            Action::ToggleNotifications,
            Action::SetupReminders,
            Action::ClearReminders,
        ];
        actions.extend(ActivityLevel::ALL.into_iter().map(Action::Activity));
        actions.extend(ProfileField::ALL.into_iter().map(Action::EditField));
        actions.extend(Pace::ALL.into_iter().map(Action::Pace));
        actions.extend((1..=MAX_MEALS_PER_DAY).map(Action::MealCount));
        actions.extend(StatsView::ALL.into_iter().map(Action::Stats));
        actions.extend((1..=MAX_REMINDERS).map(Action::ReminderCount));
        actions
    }

    pub fn payload(&self) -> String {
        match self {
            Action::Cancel => "cancel".to_string(),
            Action::Sex(sex) => format!("sex:{}", sex.as_str()),
            Action::Activity(level) => format!("act:{}", level.as_str()),
            Action::EditProfile => "edit".to_string(),
            Action::EditField(field) => format!("field:{}", field.as_str()),
            Action::Goal(goal) => format!("goal:{}", goal.as_str()),
            Action::Pace(pace) => format!("pace:{}", pace.as_str()),
            Action::ConfirmMeal => "meal:confirm".to_string(),
            Action::RetryMeal => "meal:retry".to_string(),
            Action::MealCount(count) => format!("menu:{count}"),
            Action::SkipPreferences => "menu:skip".to_string(),
            Action::Stats(view) => format!("stats:{}", view.as_str()),
            Action::ClearToday => "stats:clear".to_string(),
            Action::ToggleNotifications => "set:notify".to_string(),
            Action::SetupReminders => "set:reminders".to_string(),
            Action::ClearReminders => "set:clear".to_string(),
            Action::ReminderCount(count) => format!("rem:{count}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload())
    }
}

/// Callback data that does not name a known action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown callback payload '{0}'")]
pub struct UnknownAction(pub String);

fn bounded_count(value: &str, max: u8) -> Option<u8> {
    value.parse::<u8>().ok().filter(|n| (1..=max).contains(n))
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownAction(s.to_string());
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value)),
            None => (s, None),
        };

        let action = match (kind, value) {
            ("cancel", None) => Action::Cancel,
            ("edit", None) => Action::EditProfile,
            ("sex", Some(v)) => Action::Sex(v.parse().map_err(|_| unknown())?),
            ("act", Some(v)) => Action::Activity(v.parse().map_err(|_| unknown())?),
            ("field", Some(v)) => Action::EditField(v.parse().map_err(|_| unknown())?),
            ("goal", Some(v)) => Action::Goal(v.parse().map_err(|_| unknown())?),
            ("pace", Some(v)) => Action::Pace(v.parse().map_err(|_| unknown())?),
            ("meal", Some("confirm")) => Action::ConfirmMeal,
            ("meal", Some("retry")) => Action::RetryMeal,
            ("menu", Some("skip")) => Action::SkipPreferences,
            ("menu", Some(v)) => Action::MealCount(bounded_count(v, MAX_MEALS_PER_DAY).ok_or_else(unknown)?),
            ("stats", Some("clear")) => Action::ClearToday,
            ("stats", Some(v)) => Action::Stats(
                StatsView::ALL
                    .into_iter()
                    .find(|view| view.as_str() == v)
                    .ok_or_else(unknown)?,
            ),
            ("set", Some("notify")) => Action::ToggleNotifications,
            ("set", Some("reminders")) => Action::SetupReminders,
            ("set", Some("clear")) => Action::ClearReminders,
            ("rem", Some(v)) => Action::ReminderCount(bounded_count(v, MAX_REMINDERS).ok_or_else(unknown)?),
            _ => return Err(unknown()),
        };
        Ok(action)
    }
}

/// Check that every action serializes within Telegram's limit and parses back
pub fn validate_action_table() -> Result<usize, String> {
    let actions = Action::all();
    for action in &actions {
        let payload = action.payload();
        if payload.len() > MAX_CALLBACK_DATA_LEN {
            return Err(format!("payload '{payload}' exceeds {MAX_CALLBACK_DATA_LEN} bytes"));
        }
        match payload.parse::<Action>() {
            Ok(parsed) if parsed == *action => {}
            _ => return Err(format!("payload '{payload}' does not round-trip")),
        }
    }
    Ok(actions.len())
}

/// Slash commands understood by the bot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Cancel,
    Profile,
    Stats,
    Meal,
    Menu,
    Goal,
    Settings,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::Start,
        Command::Help,
        Command::Cancel,
        Command::Profile,
        Command::Stats,
        Command::Meal,
        Command::Menu,
        Command::Goal,
        Command::Settings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Cancel => "cancel",
            Command::Profile => "profile",
            Command::Stats => "stats",
            Command::Meal => "meal",
            Command::Menu => "menu",
            Command::Goal => "goal",
            Command::Settings => "settings",
        }
    }

    /// Parse "/name", "/name@botname" or "/name args"
    pub fn parse(text: &str) -> Option<Command> {
        let word = text.trim().strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next()?.to_lowercase();
        Command::ALL.into_iter().find(|command| command.name() == name)
    }
}

/// Main menu entries shown on the reply keyboard
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MenuItem {
    Profile,
    AddMeal,
    Stats,
    DailyMenu,
    Goal,
    Settings,
}

impl MenuItem {
    pub const ALL: [MenuItem; 6] = [
        MenuItem::Profile,
        MenuItem::AddMeal,
        MenuItem::Stats,
        MenuItem::DailyMenu,
        MenuItem::Goal,
        MenuItem::Settings,
    ];

    /// Localization key of the button label
    pub fn label_key(&self) -> &'static str {
        match self {
            MenuItem::Profile => "menu-profile",
            MenuItem::AddMeal => "menu-add-meal",
            MenuItem::Stats => "menu-stats",
            MenuItem::DailyMenu => "menu-daily-menu",
            MenuItem::Goal => "menu-goal",
            MenuItem::Settings => "menu-settings",
        }
    }
}

impl From<MenuItem> for Command {
    fn from(item: MenuItem) -> Self {
        match item {
            MenuItem::Profile => Command::Profile,
            MenuItem::AddMeal => Command::Meal,
            MenuItem::Stats => Command::Stats,
            MenuItem::DailyMenu => Command::Menu,
            MenuItem::Goal => Command::Goal,
            MenuItem::Settings => Command::Settings,
        }
    }
}

/// One user event as seen by the conversation engine
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Text(String),
    /// Transcript of a voice note; behaves like typed text, and starts meal entry when idle
    Transcript(String),
    Action(Action),
    Command(Command),
}

/// Rejected user input; each variant is re-prompted with its own message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty input")]
    Empty,
    #[error("input too long")]
    TooLong,
    #[error("not a number")]
    NotANumber,
    #[error("not a whole number")]
    NotAnInteger,
    #[error("value must be positive")]
    NotPositive,
    #[error("weight out of range")]
    WeightOutOfRange,
    #[error("height out of range")]
    HeightOutOfRange,
    #[error("age out of range")]
    AgeOutOfRange,
    #[error("target weight must be below current weight")]
    TargetNotBelowCurrent,
    #[error("target weight must be above current weight")]
    TargetNotAboveCurrent,
    #[error("time must be HH:MM")]
    InvalidTime,
}

impl ValidationError {
    /// Localization key of the re-prompt message
    pub fn message_key(&self) -> &'static str {
        match self {
            ValidationError::Empty => "error-empty",
            ValidationError::TooLong => "error-too-long",
            ValidationError::NotANumber => "error-not-number",
            ValidationError::NotAnInteger => "error-not-integer",
            ValidationError::NotPositive => "error-not-positive",
            ValidationError::WeightOutOfRange => "error-weight-range",
            ValidationError::HeightOutOfRange => "error-height-range",
            ValidationError::AgeOutOfRange => "error-age-range",
            ValidationError::TargetNotBelowCurrent => "error-target-not-below",
            ValidationError::TargetNotAboveCurrent => "error-target-not-above",
            ValidationError::InvalidTime => "error-invalid-time",
        }
    }
}

/// Trimmed non-empty text up to `max_chars` characters
pub fn validate_text(input: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::TooLong);
    }
    Ok(trimmed.to_string())
}

/// Strictly positive decimal; a comma is accepted as the decimal separator
pub fn validate_positive_float(input: &str) -> Result<f64, ValidationError> {
    let normalized = input.trim().replace(',', ".");
    if normalized.is_empty() {
        return Err(ValidationError::Empty);
    }
    let value: f64 = normalized.parse().map_err(|_| ValidationError::NotANumber)?;
    if !value.is_finite() {
        return Err(ValidationError::NotANumber);
    }
    if value <= 0.0 {
        return Err(ValidationError::NotPositive);
    }
    Ok(value)
}

/// Strictly positive whole number
pub fn validate_positive_int(input: &str) -> Result<u32, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value <= 0 => Err(ValidationError::NotPositive),
        Ok(value) => u32::try_from(value).map_err(|_| ValidationError::NotANumber),
        Err(_) => match trimmed.replace(',', ".").parse::<f64>() {
            Ok(_) => Err(ValidationError::NotAnInteger),
            Err(_) => Err(ValidationError::NotANumber),
        },
    }
}

// Inside these bounds the basal metabolic rate stays positive for both sexes
pub const MIN_WEIGHT_KG: f64 = 30.0;
pub const MAX_WEIGHT_KG: f64 = 300.0;
pub const MIN_HEIGHT_CM: u32 = 100;
pub const MAX_HEIGHT_CM: u32 = 250;
pub const MIN_AGE: u32 = 10;
pub const MAX_AGE: u32 = 120;

/// Body weight in kilograms within the supported range
pub fn validate_weight(input: &str) -> Result<f64, ValidationError> {
    let weight = validate_positive_float(input)?;
    if !(MIN_WEIGHT_KG..=MAX_WEIGHT_KG).contains(&weight) {
        return Err(ValidationError::WeightOutOfRange);
    }
    Ok(weight)
}

/// Height in whole centimetres within the supported range
pub fn validate_height(input: &str) -> Result<u32, ValidationError> {
    let height = validate_positive_int(input)?;
    if !(MIN_HEIGHT_CM..=MAX_HEIGHT_CM).contains(&height) {
        return Err(ValidationError::HeightOutOfRange);
    }
    Ok(height)
}

/// Age in whole years within the supported range
pub fn validate_age(input: &str) -> Result<u32, ValidationError> {
    let age = validate_positive_int(input)?;
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(ValidationError::AgeOutOfRange);
    }
    Ok(age)
}

/// Target weight relative to the current weight: below it to lose, above it to gain
pub fn validate_target_weight(
    input: &str,
    goal: GoalType,
    current_weight: f64,
) -> Result<f64, ValidationError> {
    let target = validate_weight(input)?;
    match goal {
        GoalType::Lose if target >= current_weight => Err(ValidationError::TargetNotBelowCurrent),
        GoalType::Gain if target <= current_weight => Err(ValidationError::TargetNotAboveCurrent),
        _ => Ok(target),
    }
}

/// "H:MM" or "HH:MM" between 00:00 and 23:59, normalized to "HH:MM"
pub fn validate_time(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let (hours, minutes) = trimmed
        .split_once(':')
        .or_else(|| trimmed.split_once('.'))
        .ok_or(ValidationError::InvalidTime)?;

    let valid_digits = |part: &str, max_len: usize| {
        !part.is_empty() && part.len() <= max_len && part.chars().all(|c| c.is_ascii_digit())
    };
    if !valid_digits(hours, 2) || !valid_digits(minutes, 2) || minutes.len() != 2 {
        return Err(ValidationError::InvalidTime);
    }

    let hours: u32 = hours.parse().map_err(|_| ValidationError::InvalidTime)?;
    let minutes: u32 = minutes.parse().map_err(|_| ValidationError::InvalidTime)?;
    if hours > 23 || minutes > 59 {
        return Err(ValidationError::InvalidTime);
    }
    Ok(format!("{hours:02}:{minutes:02}"))
}

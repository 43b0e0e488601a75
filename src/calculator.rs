//! # Metabolic Calculator Module
//!
//! Pure functions computing daily calorie needs and macronutrient targets from
//! body metrics.
//!
//! - Basal metabolic rate uses the revised Harris-Benedict equation with
//!   sex-specific coefficients, multiplied by an activity factor.
//! - Macro targets derive protein and fat from body weight; the remaining
//!   energy becomes carbohydrates.
//! - Goal targets shift maintenance calories by the energy equivalent of the
//!   chosen weekly pace (7700 kcal per kg of body mass).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Approximate energy content of one kilogram of body mass
pub const KCAL_PER_KG: f64 = 7700.0;
pub const KCAL_PER_GRAM_PROTEIN: f64 = 4.0;
pub const KCAL_PER_GRAM_FAT: f64 = 9.0;
pub const KCAL_PER_GRAM_CARBS: f64 = 4.0;
pub const MIN_CALORIES_FEMALE: f64 = 1200.0;
pub const MIN_CALORIES_MALE: f64 = 1500.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Daily target {calories} kcal is below the safe minimum of {floor} kcal")]
    BelowSafeFloor { calories: f64, floor: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    /// Lowest daily calorie target the bot will store for this sex
    pub fn calorie_floor(&self) -> f64 {
        match self {
            Sex::Male => MIN_CALORIES_MALE,
            Sex::Female => MIN_CALORIES_FEMALE,
        }
    }
}

impl FromStr for Sex {
    type Err = CalculatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            other => Err(CalculatorError::InvalidInput(format!("unknown sex '{other}'"))),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-reported exercise frequency, ordered from least to most active
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivityLevel {
    None,
    Low,
    Medium,
    High,
}

impl ActivityLevel {
    pub const ALL: [ActivityLevel; 4] = [
        ActivityLevel::None,
        ActivityLevel::Low,
        ActivityLevel::Medium,
        ActivityLevel::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::None => "none",
            ActivityLevel::Low => "low",
            ActivityLevel::Medium => "medium",
            ActivityLevel::High => "high",
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            ActivityLevel::None => 1.2,
            ActivityLevel::Low => 1.375,
            ActivityLevel::Medium => 1.55,
            ActivityLevel::High => 1.725,
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = CalculatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| CalculatorError::InvalidInput(format!("unknown activity level '{s}'")))
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalType {
    Lose,
    Gain,
    Maintain,
}

impl GoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalType::Lose => "lose",
            GoalType::Gain => "gain",
            GoalType::Maintain => "maintain",
        }
    }
}

impl FromStr for GoalType {
    type Err = CalculatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lose" => Ok(GoalType::Lose),
            "gain" => Ok(GoalType::Gain),
            "maintain" => Ok(GoalType::Maintain),
            other => Err(CalculatorError::InvalidInput(format!("unknown goal '{other}'"))),
        }
    }
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preset weekly paces offered for lose/gain goals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pace {
    Slow,
    Medium,
    Fast,
}

impl Pace {
    pub const ALL: [Pace; 3] = [Pace::Slow, Pace::Medium, Pace::Fast];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Slow => "slow",
            Pace::Medium => "medium",
            Pace::Fast => "fast",
        }
    }

    /// Body-mass change per week for this pace. `None` for the maintain goal.
    pub fn kg_per_week(&self, goal: GoalType) -> Option<f64> {
        match (goal, self) {
            (GoalType::Lose, Pace::Slow) => Some(0.25),
            (GoalType::Lose, Pace::Medium) => Some(0.5),
            (GoalType::Lose, Pace::Fast) => Some(0.75),
            (GoalType::Gain, Pace::Slow) => Some(0.1),
            (GoalType::Gain, Pace::Medium) => Some(0.25),
            (GoalType::Gain, Pace::Fast) => Some(0.5),
            (GoalType::Maintain, _) => None,
        }
    }
}

impl FromStr for Pace {
    type Err = CalculatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pace::ALL
            .into_iter()
            .find(|pace| pace.as_str() == s)
            .ok_or_else(|| CalculatorError::InvalidInput(format!("unknown pace '{s}'")))
    }
}

/// Grams of protein and fat per kilogram of body weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroFactors {
    pub protein: f64,
    pub fat: f64,
}

impl Default for MacroFactors {
    fn default() -> Self {
        Self {
            protein: 1.8,
            fat: 1.0,
        }
    }
}

impl MacroFactors {
    /// Weight loss keeps protein high; weight gain relaxes it in favour of energy
    pub fn for_goal(goal: GoalType) -> Self {
        match goal {
            GoalType::Maintain => Self::default(),
            GoalType::Lose => Self {
                protein: 2.0,
                fat: 0.9,
            },
            GoalType::Gain => Self {
                protein: 1.6,
                fat: 1.1,
            },
        }
    }
}

/// Daily gram targets for the three macronutrients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MacroTargets {
    pub protein_g: i64,
    pub fat_g: i64,
    pub carbs_g: i64,
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Basal metabolic rate (revised Harris-Benedict)
pub fn basal_metabolic_rate(
    weight_kg: f64,
    height_cm: f64,
    age: f64,
    sex: Sex,
) -> Result<f64, CalculatorError> {
    if !(weight_kg > 0.0) || !(height_cm > 0.0) || !(age > 0.0) {
        return Err(CalculatorError::InvalidInput(format!(
            "weight={weight_kg}, height={height_cm}, age={age} must all be positive"
        )));
    }

    let bmr = match sex {
        Sex::Male => 88.362 + 13.397 * weight_kg + 4.799 * height_cm - 5.677 * age,
        Sex::Female => 447.593 + 9.247 * weight_kg + 3.098 * height_cm - 4.330 * age,
    };
    Ok(bmr)
}

/// Maintenance calories: BMR times the activity factor, rounded to 0.1 kcal
pub fn daily_calories(
    weight_kg: f64,
    height_cm: u32,
    age: u32,
    sex: Sex,
    activity: ActivityLevel,
) -> Result<f64, CalculatorError> {
    let bmr = basal_metabolic_rate(weight_kg, f64::from(height_cm), f64::from(age), sex)?;
    let calories = round_to_tenth(bmr * activity.factor());
    if calories <= 0.0 {
        return Err(CalculatorError::InvalidInput(format!(
            "metrics produce a non-positive calorie need ({calories})"
        )));
    }
    Ok(calories)
}

/// Protein and fat from body weight, carbohydrates from the remaining energy.
///
/// Carbohydrates never go below zero, however large the factors are.
pub fn macro_targets(weight_kg: f64, daily_calories: f64, factors: MacroFactors) -> MacroTargets {
    let protein_g = weight_kg * factors.protein;
    let fat_g = weight_kg * factors.fat;
    let remaining =
        daily_calories - protein_g * KCAL_PER_GRAM_PROTEIN - fat_g * KCAL_PER_GRAM_FAT;
    let carbs_g = (remaining / KCAL_PER_GRAM_CARBS).max(0.0);

    MacroTargets {
        protein_g: protein_g.round() as i64,
        fat_g: fat_g.round() as i64,
        carbs_g: carbs_g.round() as i64,
    }
}

/// Daily calorie shift implied by a weekly pace
pub fn daily_adjustment(kg_per_week: f64) -> f64 {
    kg_per_week * KCAL_PER_KG / 7.0
}

/// Maintenance calories shifted for the goal, rounded to 0.1 kcal
pub fn goal_adjusted_calories(maintenance: f64, goal: GoalType, kg_per_week: f64) -> f64 {
    let adjustment = daily_adjustment(kg_per_week);
    let adjusted = match goal {
        GoalType::Lose => maintenance - adjustment,
        GoalType::Gain => maintenance + adjustment,
        GoalType::Maintain => maintenance,
    };
    round_to_tenth(adjusted)
}

/// Rejects targets under the sex-specific minimum safe intake
pub fn check_calorie_floor(calories: f64, sex: Sex) -> Result<(), CalculatorError> {
    let floor = sex.calorie_floor();
    if calories < floor {
        return Err(CalculatorError::BelowSafeFloor { calories, floor });
    }
    Ok(())
}

/// Everything derived from body metrics and goal, computed together
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyPlan {
    pub daily_calories: f64,
    pub macros: MacroTargets,
}

/// Computes the calorie target and the matching macros in one step.
///
/// For lose/gain goals with a pace the goal-adjusted target must clear the
/// safety floor.
pub fn energy_plan(
    weight_kg: f64,
    height_cm: u32,
    age: u32,
    sex: Sex,
    activity: ActivityLevel,
    goal: GoalType,
    kg_per_week: Option<f64>,
) -> Result<EnergyPlan, CalculatorError> {
    let maintenance = daily_calories(weight_kg, height_cm, age, sex, activity)?;
    let calories = match (goal, kg_per_week) {
        (GoalType::Maintain, _) | (_, None) => maintenance,
        (goal, Some(pace)) => {
            let adjusted = goal_adjusted_calories(maintenance, goal, pace);
            check_calorie_floor(adjusted, sex)?;
            adjusted
        }
    };
    let factors = match kg_per_week {
        Some(_) => MacroFactors::for_goal(goal),
        None => MacroFactors::default(),
    };
    Ok(EnergyPlan {
        daily_calories: calories,
        macros: macro_targets(weight_kg, calories, factors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_calories_reference_male() {
        let calories = daily_calories(70.0, 175, 30, Sex::Male, ActivityLevel::Medium).unwrap();
        // BMR 1695.667 * 1.55
        assert!((calories - 2628.3).abs() < 1e-9);
    }

    #[test]
    fn test_daily_calories_reference_female() {
        let calories = daily_calories(60.0, 165, 25, Sex::Female, ActivityLevel::None).unwrap();
        let bmr: f64 = 447.593 + 9.247 * 60.0 + 3.098 * 165.0 - 4.330 * 25.0;
        assert!((calories - (bmr * 1.2 * 10.0).round() / 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_calories_rejects_non_positive_input() {
        assert!(daily_calories(0.0, 175, 30, Sex::Male, ActivityLevel::Low).is_err());
        assert!(daily_calories(-5.0, 175, 30, Sex::Male, ActivityLevel::Low).is_err());
        assert!(daily_calories(70.0, 0, 30, Sex::Male, ActivityLevel::Low).is_err());
        assert!(daily_calories(70.0, 175, 0, Sex::Female, ActivityLevel::Low).is_err());
    }

    #[test]
    fn test_every_accepted_body_metric_gives_a_plan() {
        use crate::dialogue::{MAX_AGE, MAX_HEIGHT_CM, MAX_WEIGHT_KG, MIN_AGE, MIN_HEIGHT_CM, MIN_WEIGHT_KG};

        for sex in [Sex::Male, Sex::Female] {
            for weight in [MIN_WEIGHT_KG, MAX_WEIGHT_KG] {
                for height in [MIN_HEIGHT_CM, MAX_HEIGHT_CM] {
                    for age in [MIN_AGE, MAX_AGE] {
                        let plan = energy_plan(weight, height, age, sex, ActivityLevel::None, GoalType::Maintain, None);
                        assert!(
                            plan.is_ok(),
                            "{sex} {weight} kg {height} cm {age} y: {plan:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_unknown_enum_values_are_invalid_input() {
        assert!(matches!("other".parse::<Sex>(), Err(CalculatorError::InvalidInput(_))));
        assert!(matches!(
            "extreme".parse::<ActivityLevel>(),
            Err(CalculatorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_daily_calories_monotonic_in_weight_and_activity() {
        for sex in [Sex::Male, Sex::Female] {
            let mut previous = 0.0;
            for weight in (40..=150).step_by(5) {
                let calories =
                    daily_calories(f64::from(weight), 170, 35, sex, ActivityLevel::Low).unwrap();
                assert!(calories > 0.0);
                assert!(calories > previous);
                previous = calories;
            }

            let mut previous = 0.0;
            for level in ActivityLevel::ALL {
                let calories = daily_calories(80.0, 180, 40, sex, level).unwrap();
                assert!(calories > previous);
                previous = calories;
            }
        }
    }

    #[test]
    fn test_macro_targets_reference() {
        let macros = macro_targets(70.0, 2628.3, MacroFactors::default());
        assert_eq!(macros.protein_g, 126);
        assert_eq!(macros.fat_g, 70);
        // (2628.3 - 504 - 630) / 4 = 373.575
        assert_eq!(macros.carbs_g, 374);
    }

    #[test]
    fn test_macro_targets_carbs_never_negative() {
        let factors = MacroFactors {
            protein: 10.0,
            fat: 10.0,
        };
        let macros = macro_targets(120.0, 1500.0, factors);
        assert_eq!(macros.carbs_g, 0);
        assert_eq!(macros.protein_g, 1200);
    }

    #[test]
    fn test_goal_adjustment_for_lose_medium() {
        let adjustment = daily_adjustment(0.5);
        assert!((adjustment - 550.0).abs() < 1e-9);

        let calories = goal_adjusted_calories(2628.3, GoalType::Lose, 0.5);
        assert!((calories - 2078.3).abs() < 1e-9);

        let calories = goal_adjusted_calories(2628.3, GoalType::Gain, 0.5);
        assert!((calories - 3178.3).abs() < 1e-9);
    }

    #[test]
    fn test_calorie_floor() {
        assert!(check_calorie_floor(1499.9, Sex::Male).is_err());
        assert!(check_calorie_floor(1500.0, Sex::Male).is_ok());
        assert!(check_calorie_floor(1250.0, Sex::Female).is_ok());
        assert!(check_calorie_floor(1199.0, Sex::Female).is_err());
    }

    #[test]
    fn test_energy_plan_rejects_unsafe_pace() {
        let result = energy_plan(
            45.0,
            150,
            60,
            Sex::Female,
            ActivityLevel::None,
            GoalType::Lose,
            Some(0.75),
        );
        assert!(matches!(result, Err(CalculatorError::BelowSafeFloor { .. })));
    }

    #[test]
    fn test_energy_plan_uses_goal_factors() {
        let plan = energy_plan(
            70.0,
            175,
            30,
            Sex::Male,
            ActivityLevel::Medium,
            GoalType::Lose,
            Some(0.5),
        )
        .unwrap();
        assert!((plan.daily_calories - 2078.3).abs() < 1e-9);
        assert_eq!(plan.macros.protein_g, 140);
        assert_eq!(plan.macros.fat_g, 63);
    }

    #[test]
    fn test_pace_table() {
        assert_eq!(Pace::Medium.kg_per_week(GoalType::Lose), Some(0.5));
        assert_eq!(Pace::Fast.kg_per_week(GoalType::Gain), Some(0.5));
        assert_eq!(Pace::Slow.kg_per_week(GoalType::Maintain), None);
    }
}

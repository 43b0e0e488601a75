//! Post-processing of generated menus.
//!
//! The model's arithmetic is not trusted: totals are rebuilt from the items,
//! an overshoot is scaled down proportionally, and a shortfall is judged here
//! so the client can decide on its single corrective request.

use lazy_static::lazy_static;
use regex::Regex;

use super::{MenuPlan, Nutrients};

/// Below this fraction of the target a menu counts as short
pub const SHORTFALL_THRESHOLD: f64 = 0.95;

lazy_static! {
    static ref QUANTITY_NUMBER: Regex =
        Regex::new(r"^(\s*)(\d+(?:[.,]\d+)?)").expect("Quantity pattern should be valid");
}

/// Percentage of the daily calories assigned to each meal, by meal count
pub fn meal_shares(meals_per_day: u8) -> &'static [u32] {
    match meals_per_day {
        1 => &[100],
        2 => &[45, 55],
        3 => &[25, 45, 30],
        4 => &[25, 10, 40, 25],
        _ => &[20, 8, 40, 8, 24],
    }
}

/// Names used when the model leaves a meal unnamed
pub fn default_meal_names(meals_per_day: u8) -> Vec<&'static str> {
    match meals_per_day {
        1 => vec!["Обед"],
        2 => vec!["Завтрак", "Ужин"],
        3 => vec!["Завтрак", "Обед", "Ужин"],
        4 => vec!["Завтрак", "Перекус", "Обед", "Ужин"],
        _ => vec!["Завтрак", "Перекус", "Обед", "Полдник", "Ужин"],
    }
}

/// Per-meal calorie targets for the prompt
pub fn meal_targets(meals_per_day: u8, daily_calories: f64) -> Vec<(&'static str, f64)> {
    default_meal_names(meals_per_day)
        .into_iter()
        .zip(meal_shares(meals_per_day))
        .map(|(name, share)| (name, (daily_calories * f64::from(*share) / 100.0).round()))
        .collect()
}

/// Rebuild per-meal and grand totals from item values
pub fn recompute_totals(plan: &mut MenuPlan) {
    let mut grand = Nutrients::default();
    for meal in &mut plan.meals {
        let mut totals = Nutrients::default();
        for item in &meal.items {
            totals.add(&item.nutrients);
        }
        meal.totals = totals;
        grand.add(&totals);
    }
    plan.totals = grand;
}

/// Scale the leading number of a quantity string ("150 г" -> "120 г").
/// Quantities without a leading number are returned unchanged.
pub fn scale_quantity(quantity: &str, ratio: f64) -> String {
    let Some(captures) = QUANTITY_NUMBER.captures(quantity) else {
        return quantity.to_string();
    };
    let (Some(whole), Some(number)) = (captures.get(0), captures.get(2)) else {
        return quantity.to_string();
    };
    let Ok(value) = number.as_str().replace(',', ".").parse::<f64>() else {
        return quantity.to_string();
    };

    let scaled = value * ratio;
    let formatted = if value >= 10.0 && value.fract() == 0.0 {
        format!("{}", scaled.round())
    } else {
        let rounded = (scaled * 10.0).round() / 10.0;
        if rounded.fract() == 0.0 {
            format!("{}", rounded)
        } else {
            format!("{:.1}", rounded)
        }
    };

    format!(
        "{}{}{}",
        captures.get(1).map_or("", |m| m.as_str()),
        formatted,
        &quantity[whole.end()..]
    )
}

/// Multiply every item by `ratio` and recompute totals
pub fn scale_menu(plan: &mut MenuPlan, ratio: f64) {
    for meal in &mut plan.meals {
        for item in &mut meal.items {
            item.nutrients = item.nutrients.scaled(ratio);
            item.quantity = scale_quantity(&item.quantity, ratio);
        }
    }
    recompute_totals(plan);
}

/// Recompute totals and scale down when the menu exceeds the target.
/// Returns the applied ratio when scaling happened.
pub fn fit_to_target(plan: &mut MenuPlan, daily_calories: f64) -> Option<f64> {
    recompute_totals(plan);
    let total = plan.totals.calories;
    if total > daily_calories && total > 0.0 {
        let ratio = daily_calories / total;
        scale_menu(plan, ratio);
        Some(ratio)
    } else {
        None
    }
}

pub fn is_short_of_target(plan: &MenuPlan, daily_calories: f64) -> bool {
    plan.totals.calories < daily_calories * SHORTFALL_THRESHOLD
}

pub fn deviation(plan: &MenuPlan, daily_calories: f64) -> f64 {
    (plan.totals.calories - daily_calories).abs()
}

/// Keep the retried menu only if it is strictly closer to the target
pub fn closer_to_target(original: MenuPlan, retried: MenuPlan, daily_calories: f64) -> MenuPlan {
    if deviation(&retried, daily_calories) < deviation(&original, daily_calories) {
        retried
    } else {
        original
    }
}

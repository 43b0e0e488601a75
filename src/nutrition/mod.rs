//! # Nutrition Service Module
//!
//! Client for the hosted text-to-nutrition model. The module owns prompt
//! construction and every check on the model's answer:
//!
//! - `prompts`: prompt text for meal breakdown and menu generation
//! - `response`: JSON extraction, schema validation and lenient number parsing
//! - `menu`: local recomputation, scaling and retry selection for menus
//! - `backend`: the HTTP completion backend with retries and a circuit breaker
//!
//! Calls go through the shared [`RateLimiter`], so a rejected, failed or
//! timed-out request never consumes the user's quota.

pub mod backend;
pub mod menu;
pub mod prompts;
pub mod response;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calculator::GoalType;
use crate::errors::NutritionError;
use crate::rate_limiter::RateLimiter;

pub use backend::{CompletionBackend, CompletionOptions, YandexGptBackend};

/// Energy and macronutrient amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
}

impl Nutrients {
    pub fn add(&mut self, other: &Nutrients) {
        self.calories += other.calories;
        self.protein += other.protein;
        self.fat += other.fat;
        self.carbs += other.carbs;
    }

    pub fn scaled(&self, ratio: f64) -> Nutrients {
        Nutrients {
            calories: self.calories * ratio,
            protein: self.protein * ratio,
            fat: self.fat * ratio,
            carbs: self.carbs * ratio,
        }
    }

    /// Rounds every field to a whole number
    pub fn rounded(&self) -> Nutrients {
        Nutrients {
            calories: self.calories.round(),
            protein: self.protein.round(),
            fat: self.fat.round(),
            carbs: self.carbs.round(),
        }
    }
}

/// One ingredient of a meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub product: String,
    pub quantity: String,
    #[serde(flatten)]
    pub nutrients: Nutrients,
}

/// Breakdown of a free-text meal description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealAnalysis {
    pub items: Vec<FoodItem>,
    pub total: Nutrients,
}

/// One meal of a generated daily menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMeal {
    pub name: String,
    pub items: Vec<FoodItem>,
    pub totals: Nutrients,
}

/// Generated daily menu with locally computed totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuPlan {
    pub meals: Vec<PlannedMeal>,
    pub totals: Nutrients,
}

/// Everything the menu prompt needs
#[derive(Debug, Clone, PartialEq)]
pub struct MenuRequest {
    pub goal: GoalType,
    pub daily_calories: f64,
    pub protein_norm: i64,
    pub fat_norm: i64,
    pub carbs_norm: i64,
    pub meals_per_day: u8,
    pub preferences: Option<String>,
}

/// Rate-limited client for meal parsing and menu generation
#[derive(Clone)]
pub struct NutritionClient {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
}

impl NutritionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, limiter: Arc<RateLimiter>) -> Self {
        Self { backend, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decompose a meal description into items with macro estimates
    pub async fn parse_meal(&self, user_id: i64, text: &str) -> Result<MealAnalysis, NutritionError> {
        let prompt = prompts::meal_prompt(text);
        debug!(user_id, text_length = text.len(), "Requesting meal breakdown");

        let analysis = self
            .limiter
            .call(user_id, || async {
                let raw = self
                    .backend
                    .complete(&prompt, CompletionOptions::meal_breakdown())
                    .await?;
                response::parse_meal_response(&raw)
            })
            .await?;

        info!(
            user_id,
            items = analysis.items.len(),
            calories = analysis.total.calories,
            "Meal breakdown received"
        );
        Ok(analysis)
    }

    /// Generate a daily menu close to the calorie target.
    ///
    /// Totals are recomputed from the items, an overshoot is scaled down, and a
    /// shortfall of more than 5% triggers exactly one corrective request whose
    /// result is kept only if it lands closer to the target.
    pub async fn generate_menu(
        &self,
        user_id: i64,
        request: &MenuRequest,
    ) -> Result<MenuPlan, NutritionError> {
        let target = request.daily_calories;

        self.limiter
            .call(user_id, || async {
                let raw = self
                    .backend
                    .complete(&prompts::menu_prompt(request), CompletionOptions::menu())
                    .await?;
                let mut plan = response::parse_menu_response(&raw, request.meals_per_day)?;
                menu::fit_to_target(&mut plan, target);

                if !menu::is_short_of_target(&plan, target) {
                    return Ok(plan);
                }

                let shortfall = target - plan.totals.calories;
                info!(user_id, shortfall, "Menu below target, issuing corrective request");
                let retry_prompt = prompts::menu_retry_prompt(request, plan.totals.calories);
                let retry = match self
                    .backend
                    .complete(&retry_prompt, CompletionOptions::menu())
                    .await
                {
                    Ok(raw) => response::parse_menu_response(&raw, request.meals_per_day),
                    Err(e) => Err(e),
                };

                match retry {
                    Ok(mut retried) => {
                        menu::fit_to_target(&mut retried, target);
                        Ok(menu::closer_to_target(plan, retried, target))
                    }
                    Err(e) => {
                        warn!(user_id, error = %e, "Corrective menu request failed, keeping first menu");
                        Ok(plan)
                    }
                }
            })
            .await
    }
}

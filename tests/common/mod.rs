//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calorie_bot::config::RateLimitConfig;
use calorie_bot::errors::NutritionError;
use calorie_bot::nutrition::{CompletionBackend, CompletionOptions, NutritionClient};
use calorie_bot::rate_limiter::RateLimiter;

/// Completion backend answering from a fixed script, recording every prompt
#[derive(Default)]
pub struct ScriptedBackend {
    answers: Mutex<VecDeque<Result<String, NutritionError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(answers: Vec<Result<String, NutritionError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, answer: Result<String, NutritionError>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<String, NutritionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(NutritionError::Network("script exhausted".to_string())))
    }
}

pub fn limiter(max_requests: usize) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimitConfig {
        max_requests,
        window: Duration::from_secs(60),
        max_concurrent: 4,
        call_timeout: Duration::from_secs(5),
    }))
}

pub fn client(backend: Arc<ScriptedBackend>, max_requests: usize) -> NutritionClient {
    NutritionClient::new(backend, limiter(max_requests))
}

/// Meal breakdown answer whose items sum to `calories`
pub fn meal_json(calories: f64) -> String {
    let half = calories / 2.0;
    format!(
        r#"{{"items": [
            {{"product": "Овсянка", "quantity": "200 г", "calories": {half}, "protein": 10, "fat": 5, "carbs": 60}},
            {{"product": "Банан", "quantity": "1 шт", "calories": {half}, "protein": 2, "fat": 1, "carbs": 25}}
        ], "total": {{"calories": {calories}, "protein": 12, "fat": 6, "carbs": 85}}}}"#
    )
}

/// Menu answer with one item per meal, each worth `per_meal` kcal
pub fn menu_json(meals: u8, per_meal: f64) -> String {
    let meals: Vec<String> = (1..=meals)
        .map(|i| {
            format!(
                r#"{{"name": "Meal {i}", "items": [{{"product": "Dish {i}", "quantity": "100 g", "calories": {per_meal}, "protein": 20, "fat": 10, "carbs": 50}}]}}"#
            )
        })
        .collect();
    format!(r#"{{"meals": [{}]}}"#, meals.join(","))
}

//! Nutrition client behaviour against a scripted completion backend

mod common;

use anyhow::Result;
use calorie_bot::calculator::GoalType;
use calorie_bot::errors::NutritionError;
use calorie_bot::nutrition::MenuRequest;
use common::{client, meal_json, menu_json, ScriptedBackend};

fn menu_request(daily_calories: f64, meals_per_day: u8) -> MenuRequest {
    MenuRequest {
        goal: GoalType::Maintain,
        daily_calories,
        protein_norm: 126,
        fat_norm: 70,
        carbs_norm: 374,
        meals_per_day,
        preferences: Some("без рыбы".to_string()),
    }
}

#[tokio::test]
async fn test_parse_meal_returns_breakdown() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(format!("```json\n{}\n```", meal_json(450.0)))]);
    let nutrition = client(backend.clone(), 5);

    let analysis = nutrition.parse_meal(1, "овсянка с бананом").await?;
    assert_eq!(analysis.items.len(), 2);
    assert_eq!(analysis.items[0].product, "Овсянка");
    assert_eq!(analysis.total.calories, 450.0);
    assert!(backend.prompts()[0].contains("овсянка с бананом"));

    Ok(())
}

#[tokio::test]
async fn test_unparsable_answer_does_not_consume_quota() -> Result<()> {
    let backend = ScriptedBackend::new(vec![
        Ok("Sorry, I cannot help with that".to_string()),
        Ok(meal_json(300.0)),
    ]);
    let nutrition = client(backend.clone(), 1);

    let first = nutrition.parse_meal(1, "суп").await;
    assert!(matches!(first, Err(NutritionError::Parse(_))));
    assert_eq!(nutrition.limiter().reserved_count(1).await, 0);

    // The single slot is still free for the next attempt
    let second = nutrition.parse_meal(1, "суп").await?;
    assert_eq!(second.total.calories, 300.0);
    assert_eq!(nutrition.limiter().reserved_count(1).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_rate_limited_call_never_reaches_backend() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(meal_json(100.0)), Ok(meal_json(100.0))]);
    let nutrition = client(backend.clone(), 1);

    nutrition.parse_meal(7, "чай").await?;
    match nutrition.parse_meal(7, "чай").await {
        Err(NutritionError::RateLimited(limit)) => assert!(limit.retry_after_secs >= 1),
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert_eq!(backend.calls(), 1);

    // Another user is unaffected
    nutrition.parse_meal(8, "чай").await?;
    assert_eq!(backend.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_menu_close_to_target_is_kept() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(menu_json(3, 650.0))]);
    let nutrition = client(backend.clone(), 5);

    let plan = nutrition.generate_menu(1, &menu_request(2000.0, 3)).await?;
    assert_eq!(plan.meals.len(), 3);
    assert_eq!(plan.totals.calories, 1950.0);
    assert_eq!(backend.calls(), 1);
    assert!(backend.prompts()[0].contains("без рыбы"));

    Ok(())
}

#[tokio::test]
async fn test_menu_overshoot_is_scaled_down() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(menu_json(2, 1250.0))]);
    let nutrition = client(backend.clone(), 5);

    let plan = nutrition.generate_menu(1, &menu_request(2000.0, 2)).await?;
    assert!((plan.totals.calories - 2000.0).abs() < 1e-6);
    assert_eq!(plan.meals[0].items[0].quantity, "80 g");
    assert_eq!(backend.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_short_menu_retried_once_and_better_answer_kept() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(menu_json(3, 500.0)), Ok(menu_json(3, 640.0))]);
    let nutrition = client(backend.clone(), 5);

    let plan = nutrition.generate_menu(1, &menu_request(2000.0, 3)).await?;
    assert_eq!(plan.totals.calories, 1920.0);
    assert_eq!(backend.calls(), 2);

    // Both requests ran inside a single rate-limited call
    assert_eq!(nutrition.limiter().reserved_count(1).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_worse_retry_is_discarded() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(menu_json(3, 500.0)), Ok(menu_json(3, 300.0))]);
    let nutrition = client(backend.clone(), 5);

    let plan = nutrition.generate_menu(1, &menu_request(2000.0, 3)).await?;
    assert_eq!(plan.totals.calories, 1500.0);
    assert_eq!(backend.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_failed_retry_keeps_first_menu() -> Result<()> {
    let backend = ScriptedBackend::new(vec![
        Ok(menu_json(3, 500.0)),
        Err(NutritionError::Network("connection reset".to_string())),
    ]);
    let nutrition = client(backend.clone(), 5);

    let plan = nutrition.generate_menu(1, &menu_request(2000.0, 3)).await?;
    assert_eq!(plan.totals.calories, 1500.0);
    assert_eq!(backend.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_menu_without_meals_is_a_parse_error() -> Result<()> {
    let backend = ScriptedBackend::new(vec![Ok(r#"{"meals": []}"#.to_string())]);
    let nutrition = client(backend.clone(), 5);

    let result = nutrition.generate_menu(1, &menu_request(2000.0, 3)).await;
    assert!(matches!(result, Err(NutritionError::Parse(_))));
    assert_eq!(nutrition.limiter().reserved_count(1).await, 0);

    Ok(())
}

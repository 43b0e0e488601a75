//! Prompt text sent to the completion service. The model is asked to answer in
//! Russian with a bare JSON document matching a fixed schema.

use super::menu::meal_targets;
use super::MenuRequest;
use crate::calculator::GoalType;

const MEAL_SCHEMA: &str = r#"{
  "items": [
    {"product": "название продукта", "quantity": "количество с единицами", "calories": число, "protein": число, "fat": число, "carbs": число}
  ],
  "total": {"calories": число, "protein": число, "fat": число, "carbs": число}
}"#;

const MENU_SCHEMA: &str = r#"{
  "meals": [
    {
      "name": "название приёма пищи",
      "items": [
        {"product": "продукт", "quantity": "количество с единицами", "calories": число, "protein": число, "fat": число, "carbs": число}
      ]
    }
  ]
}"#;

/// Prompt for breaking a free-text meal description into ingredients
pub fn meal_prompt(description: &str) -> String {
    format!(
        r#"Ты — эксперт по питанию и подсчёту калорий. Проанализируй, что человек съел.

### Правила:
1. Разбей блюдо на основные ингредиенты (например: "омлет" → яйца, молоко, масло).
2. Если указан вес или объём (граммы, мл, штуки), используй его для точного расчёта.
3. Если вес не указан, оцени стандартную порцию (1 яйцо = 50 г, 1 ломтик хлеба = 30 г).
4. Учитывай калории всех компонентов, включая масло, майонез, соусы.
5. Калории в ккал, белки, жиры и углеводы в граммах.
6. Верни ТОЛЬКО валидный JSON, без ```json, без пояснений.

### Формат ответа:
{MEAL_SCHEMA}

### Пример:
Ввод: "200 г творога 9%"
Выход:
{{"items": [{{"product": "творог", "quantity": "200 г", "calories": 318, "protein": 33, "fat": 18, "carbs": 4}}], "total": {{"calories": 318, "protein": 33, "fat": 18, "carbs": 4}}}}

Теперь проанализируй:
"{description}""#
    )
}

fn goal_phrase(goal: GoalType) -> &'static str {
    match goal {
        GoalType::Lose => "снижение веса",
        GoalType::Gain => "набор массы",
        GoalType::Maintain => "поддержание веса",
    }
}

/// Prompt for a full-day menu with per-meal calorie shares
pub fn menu_prompt(request: &MenuRequest) -> String {
    let targets = meal_targets(request.meals_per_day, request.daily_calories)
        .into_iter()
        .map(|(name, calories)| format!("- {name}: около {calories} ккал"))
        .collect::<Vec<_>>()
        .join("\n");

    let preferences = match request.preferences.as_deref() {
        Some(text) if !text.trim().is_empty() => format!("\nПожелания пользователя: {}", text.trim()),
        _ => String::new(),
    };

    format!(
        r#"Ты — диетолог. Составь меню на один день.

Цель: {goal}.
Суточная норма: {calories} ккал, белки {protein} г, жиры {fat} г, углеводы {carbs} г.
Количество приёмов пищи: ровно {count}.
Распределение калорий:
{targets}{preferences}

### Правила:
1. Используй простые продукты из обычного магазина.
2. Для каждого продукта укажи количество в граммах или штуках и его КБЖУ.
3. Сумма калорий всех продуктов должна быть близка к суточной норме и не превышать её.
4. Верни ТОЛЬКО валидный JSON, без пояснений.

### Формат ответа:
{MENU_SCHEMA}"#,
        goal = goal_phrase(request.goal),
        calories = request.daily_calories.round(),
        protein = request.protein_norm,
        fat = request.fat_norm,
        carbs = request.carbs_norm,
        count = request.meals_per_day,
    )
}

/// Corrective prompt after a menu came in below the calorie target
pub fn menu_retry_prompt(request: &MenuRequest, previous_calories: f64) -> String {
    let shortfall = (request.daily_calories - previous_calories).max(0.0).round();
    format!(
        "{}\n\nПредыдущий вариант меню содержал только {} ккал, это на {} ккал меньше нормы. \
         Увеличь порции или добавь продукты, чтобы сумма была близка к {} ккал.",
        menu_prompt(request),
        previous_calories.round(),
        shortfall,
        request.daily_calories.round()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MenuRequest {
        MenuRequest {
            goal: GoalType::Lose,
            daily_calories: 2078.3,
            protein_norm: 140,
            fat_norm: 63,
            carbs_norm: 237,
            meals_per_day: 3,
            preferences: Some("без рыбы".to_string()),
        }
    }

    #[test]
    fn test_meal_prompt_contains_description() {
        let prompt = meal_prompt("гречка с тушенкой");
        assert!(prompt.contains("\"гречка с тушенкой\""));
        assert!(prompt.contains("\"total\""));
    }

    #[test]
    fn test_menu_prompt_lists_targets() {
        let prompt = menu_prompt(&request());
        assert!(prompt.contains("ровно 3"));
        assert!(prompt.contains("2078 ккал"));
        assert!(prompt.contains("Завтрак: около 520 ккал"));
        assert!(prompt.contains("без рыбы"));
        assert!(prompt.contains("снижение веса"));
    }

    #[test]
    fn test_menu_prompt_skips_blank_preferences() {
        let mut request = request();
        request.preferences = Some("   ".to_string());
        assert!(!menu_prompt(&request).contains("Пожелания"));
    }

    #[test]
    fn test_retry_prompt_states_shortfall() {
        let prompt = menu_retry_prompt(&request(), 1500.0);
        assert!(prompt.contains("только 1500 ккал"));
        assert!(prompt.contains("на 578 ккал"));
    }
}

//! Parsing of completion-service answers.
//!
//! Models wrap JSON in Markdown fences, add prose around it, quote numbers or
//! leave fields out. Everything here is tolerant about presentation and strict
//! about shape: a missing `total` object or a non-JSON answer is a
//! [`NutritionError::Parse`], while absent numbers become zero.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::menu::{default_meal_names, recompute_totals};
use super::{FoodItem, MealAnalysis, MenuPlan, Nutrients, PlannedMeal};
use crate::errors::NutritionError;

lazy_static! {
    // Greedy: from the first opening brace/bracket to the last closing one
    static ref JSON_BODY: Regex =
        Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("JSON body pattern should be valid");
    static ref LEADING_NUMBER: Regex =
        Regex::new(r"-?\d+(?:[.,]\d+)?").expect("Number pattern should be valid");
}

/// Remove a surrounding Markdown code fence (with or without a language tag)
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag line, if any
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Extract the JSON document from a model answer
pub fn extract_json(text: &str) -> Result<Value, NutritionError> {
    let cleaned = strip_code_fences(text);

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    let candidate = JSON_BODY
        .find(cleaned)
        .ok_or_else(|| NutritionError::Parse("response contains no JSON".to_string()))?;
    debug!(start = candidate.start(), end = candidate.end(), "Located JSON body inside prose");

    serde_json::from_str::<Value>(candidate.as_str())
        .map_err(|e| NutritionError::Parse(format!("invalid JSON: {e}")))
}

/// Read a number that may be a JSON number or a numeric string ("150", "12,5 г").
/// Missing, unparsable and negative values become zero.
pub fn number_field(object: &Map<String, Value>, key: &str) -> f64 {
    let value = match object.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => LEADING_NUMBER
            .find(s)
            .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn nutrients_from(object: &Map<String, Value>) -> Nutrients {
    Nutrients {
        calories: number_field(object, "calories"),
        protein: number_field(object, "protein"),
        fat: number_field(object, "fat"),
        carbs: number_field(object, "carbs"),
    }
}

fn items_from(value: Option<&Value>) -> Vec<FoodItem> {
    let Some(Value::Array(items)) = value else {
        if value.is_some() {
            warn!("Field 'items' is not a list, treating as empty");
        }
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| FoodItem {
            product: text_field(item, "product"),
            quantity: text_field(item, "quantity"),
            nutrients: nutrients_from(item),
        })
        .collect()
}

/// Validate and convert a meal-breakdown answer
pub fn parse_meal_response(text: &str) -> Result<MealAnalysis, NutritionError> {
    let value = extract_json(text)?;
    let Value::Object(root) = value else {
        return Err(NutritionError::Parse("response is not a JSON object".to_string()));
    };

    let total = match root.get("total") {
        Some(Value::Object(total)) => nutrients_from(total),
        Some(_) => return Err(NutritionError::Parse("field 'total' is not an object".to_string())),
        None => return Err(NutritionError::Parse("field 'total' is missing".to_string())),
    };

    Ok(MealAnalysis {
        items: items_from(root.get("items")),
        total,
    })
}

/// Validate and convert a menu answer.
///
/// Accepts `{"meals": [...]}` or a bare list of meals. Extra meals beyond
/// `meals_per_day` are dropped; totals are always recomputed from the items.
pub fn parse_menu_response(text: &str, meals_per_day: u8) -> Result<MenuPlan, NutritionError> {
    let value = extract_json(text)?;
    let meals = match value {
        Value::Object(mut root) => match root.remove("meals") {
            Some(Value::Array(meals)) => meals,
            _ => return Err(NutritionError::Parse("field 'meals' is missing".to_string())),
        },
        Value::Array(meals) => meals,
        _ => return Err(NutritionError::Parse("response is not a JSON object".to_string())),
    };

    let fallback_names = default_meal_names(meals_per_day);
    let mut planned: Vec<PlannedMeal> = meals
        .iter()
        .filter_map(Value::as_object)
        .take(usize::from(meals_per_day))
        .enumerate()
        .map(|(index, meal)| {
            let name = text_field(meal, "name");
            PlannedMeal {
                name: if name.is_empty() {
                    fallback_names
                        .get(index)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("#{}", index + 1))
                } else {
                    name
                },
                items: items_from(meal.get("items")),
                totals: Nutrients::default(),
            }
        })
        .collect();

    if planned.is_empty() {
        return Err(NutritionError::Parse("menu contains no meals".to_string()));
    }
    if planned.len() < usize::from(meals_per_day) {
        warn!(
            requested = meals_per_day,
            received = planned.len(),
            "Menu has fewer meals than requested"
        );
    }

    let mut plan = MenuPlan {
        meals: std::mem::take(&mut planned),
        totals: Nutrients::default(),
    };
    recompute_totals(&mut plan);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Вот результат: {\"total\": {\"calories\": 100}} Приятного аппетита!";
        let value = extract_json(text).unwrap();
        assert_eq!(value["total"]["calories"], 100);
    }

    #[test]
    fn test_extract_json_rejects_plain_text() {
        assert!(matches!(
            extract_json("I cannot help with that"),
            Err(NutritionError::Parse(_))
        ));
    }

    #[test]
    fn test_number_field_is_lenient() {
        let object: Map<String, Value> = serde_json::from_str(
            r#"{"a": 12.5, "b": "150", "c": "12,5 г", "d": null, "e": -4, "f": "много"}"#,
        )
        .unwrap();
        assert_eq!(number_field(&object, "a"), 12.5);
        assert_eq!(number_field(&object, "b"), 150.0);
        assert_eq!(number_field(&object, "c"), 12.5);
        assert_eq!(number_field(&object, "d"), 0.0);
        assert_eq!(number_field(&object, "e"), 0.0);
        assert_eq!(number_field(&object, "f"), 0.0);
        assert_eq!(number_field(&object, "missing"), 0.0);
    }

    #[test]
    fn test_parse_meal_response_full() {
        let text = r#"```json
{
  "items": [
    {"product": "гречка", "quantity": "150 г", "calories": 150, "protein": 5, "fat": 1, "carbs": 30},
    {"product": "тушенка", "quantity": "100 г", "calories": 300}
  ],
  "total": {"calories": 450, "protein": 20, "fat": 20, "carbs": 30}
}
```"#;
        let analysis = parse_meal_response(text).unwrap();
        assert_eq!(analysis.items.len(), 2);
        assert_eq!(analysis.items[1].nutrients.protein, 0.0);
        assert_eq!(analysis.total.calories, 450.0);
    }

    #[test]
    fn test_parse_meal_response_missing_total() {
        let text = r#"{"items": []}"#;
        assert!(matches!(parse_meal_response(text), Err(NutritionError::Parse(_))));

        let text = r#"{"items": [], "total": 450}"#;
        assert!(matches!(parse_meal_response(text), Err(NutritionError::Parse(_))));
    }

    #[test]
    fn test_parse_meal_response_non_object() {
        assert!(matches!(parse_meal_response("[1, 2, 3]"), Err(NutritionError::Parse(_))));
    }

    #[test]
    fn test_parse_meal_response_items_not_list() {
        let text = r#"{"items": "омлет", "total": {"calories": 250}}"#;
        let analysis = parse_meal_response(text).unwrap();
        assert!(analysis.items.is_empty());
        assert_eq!(analysis.total.calories, 250.0);
        assert_eq!(analysis.total.fat, 0.0);
    }

    #[test]
    fn test_parse_menu_response_recomputes_totals() {
        let text = r#"{"meals": [
            {"name": "Завтрак", "calories": 9999, "items": [
                {"product": "овсянка", "quantity": "60 г", "calories": 220, "protein": 8, "fat": 4, "carbs": 38},
                {"product": "банан", "quantity": "1 шт", "calories": 100, "carbs": 23}
            ]},
            {"name": "Ужин", "items": [
                {"product": "курица", "quantity": "150 г", "calories": 250, "protein": 45, "fat": 6}
            ]}
        ], "totals": {"calories": 1}}"#;

        let plan = parse_menu_response(text, 2).unwrap();
        assert_eq!(plan.meals.len(), 2);
        assert_eq!(plan.meals[0].totals.calories, 320.0);
        assert_eq!(plan.meals[0].totals.carbs, 61.0);
        assert_eq!(plan.totals.calories, 570.0);
        assert_eq!(plan.totals.protein, 53.0);
    }

    #[test]
    fn test_parse_menu_response_truncates_and_names() {
        let text = r#"[
            {"items": [{"product": "a", "calories": 100}]},
            {"name": "", "items": [{"product": "b", "calories": 100}]},
            {"name": "extra", "items": [{"product": "c", "calories": 100}]}
        ]"#;
        let plan = parse_menu_response(text, 2).unwrap();
        assert_eq!(plan.meals.len(), 2);
        assert!(!plan.meals[0].name.is_empty());
        assert!(!plan.meals[1].name.is_empty());
        assert_eq!(plan.totals.calories, 200.0);
    }

    #[test]
    fn test_parse_menu_response_without_meals() {
        assert!(parse_menu_response(r#"{"meals": []}"#, 3).is_err());
        assert!(parse_menu_response(r#"{"menu": "none"}"#, 3).is_err());
    }
}

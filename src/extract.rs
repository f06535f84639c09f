//! Pulls the structured payload out of free-form model output.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{GenerationError, GenerationFailure},
    locale::TextDirection,
    models::{RecipeMeta, RecipeResponse},
};

/// Finds the first balanced `{...}` span, ignoring braces inside JSON strings.
///
/// If the object opened by the first `{` never closes, the scan restarts at the
/// next `{`, so stray prose braces before the payload do not hide it.
pub fn find_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            return Some(&text[start..start + end]);
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object at the start of `text`, if it closes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn mismatch(detail: impl Into<String>) -> GenerationError {
    GenerationError::new(GenerationFailure::SchemaMismatch, detail)
}

fn non_empty_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_steps(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>, GenerationError> {
    let items = obj
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| mismatch(format!("`{key}` must be an array")))?;
    if items.is_empty() {
        return Err(mismatch(format!("`{key}` must not be empty")));
    }
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| mismatch(format!("`{key}` must contain only strings"))))
        .collect()
}

/// Optional metadata never fails the whole payload; a field of the wrong shape is dropped.
fn lenient<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    let value = obj.get(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Ignoring malformed `{}` in model output: {}", key, e);
            None
        }
    }
}

fn meta_from(obj: &Map<String, Value>) -> RecipeMeta {
    RecipeMeta {
        tags: lenient(obj, "tags").unwrap_or_default(),
        difficulty: lenient(obj, "difficulty"),
        prep_time: lenient(obj, "prepTime"),
        cook_time: lenient(obj, "cookTime"),
        calories: lenient(obj, "calories"),
        timers: lenient(obj, "timers").unwrap_or_default(),
        nutrition: lenient(obj, "nutrition"),
        seasonality: lenient(obj, "seasonality"),
        cuisine: lenient(obj, "cuisine"),
        servings: lenient(obj, "servings"),
    }
}

/// Extracts, parses and validates a recipe or non-recipe payload.
///
/// `detected` is the direction inferred from the user's request; an explicit
/// `isRTL` in the payload takes precedence.
pub fn parse_recipe_response(raw: &str, detected: TextDirection) -> Result<RecipeResponse, GenerationError> {
    let span = find_json_object(raw)
        .ok_or_else(|| GenerationError::new(GenerationFailure::NoJsonFound, "model output contains no JSON object"))?;

    let value: Value = serde_json::from_str(span)
        .map_err(|e| GenerationError::new(GenerationFailure::InvalidJson, e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(mismatch("payload is not an object"));
    };

    let is_rtl = obj.get("isRTL").and_then(Value::as_bool).unwrap_or(detected.is_rtl());
    let is_recipe = obj.get("isRecipe").and_then(Value::as_bool).unwrap_or(true);

    if !is_recipe {
        let content = non_empty_string(&obj, "content")
            .ok_or_else(|| mismatch("non-recipe payload needs `content`"))?;
        return Ok(RecipeResponse {
            name: non_empty_string(&obj, "name").unwrap_or_default(),
            ingredients: Vec::new(),
            instructions: Vec::new(),
            is_rtl,
            ingredients_label: None,
            instructions_label: None,
            content: Some(content),
            is_recipe: false,
            meta: RecipeMeta::default(),
        });
    }

    let name = non_empty_string(&obj, "name").ok_or_else(|| mismatch("recipe payload needs a non-empty `name`"))?;
    let ingredients = required_steps(&obj, "ingredients")?;
    let instructions = required_steps(&obj, "instructions")?;

    Ok(RecipeResponse {
        name,
        ingredients,
        instructions,
        is_rtl,
        ingredients_label: non_empty_string(&obj, "ingredientsLabel"),
        instructions_label: non_empty_string(&obj, "instructionsLabel"),
        content: non_empty_string(&obj, "content"),
        is_recipe: true,
        meta: meta_from(&obj),
    })
}

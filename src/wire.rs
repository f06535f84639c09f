//! Row shapes of the hosted store and the translation to and from the in-memory model.
//!
//! The store speaks snake_case and some of its columns are text, so list-like and
//! map-like fields may come back either as native JSON or as a JSON-encoded string.
//! Everything past this module only ever sees the structured form.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    locale::TextDirection,
    models::{Difficulty, Nutrition, Preferences, Recipe, RecipeMeta, RecipePatch, RecipeResponse, RecipeStatus, TimerMarker},
};

pub const DEFAULT_SERVINGS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed `{field}` field: {reason}")]
pub struct Malformed {
    pub field: &'static str,
    pub reason: String,
}

/// Accepts a field either as native JSON or as a JSON-encoded string.
/// Null and empty strings normalize to the type's default.
pub fn normalize<T: DeserializeOwned + Default>(field: &'static str, value: &Value) -> Result<T, Malformed> {
    let malformed = |e: serde_json::Error| Malformed { field, reason: e.to_string() };
    match value {
        Value::Null => Ok(T::default()),
        Value::String(s) if s.trim().is_empty() => Ok(T::default()),
        Value::String(s) => serde_json::from_str(s).map_err(malformed),
        other => serde_json::from_value(other.clone()).map_err(malformed),
    }
}

pub fn normalize_list(field: &'static str, value: &Value) -> Result<Vec<String>, Malformed> {
    normalize(field, value)
}

pub fn normalize_nutrition(value: &Value) -> Result<Option<Nutrition>, Malformed> {
    normalize("nutrition", value)
}

pub fn normalize_timers(value: &Value) -> Result<Vec<TimerMarker>, Malformed> {
    normalize("timers", value)
}

fn or_default<T: Default>(id: Uuid, result: Result<T, Malformed>) -> T {
    result.unwrap_or_else(|e| {
        warn!("⚠️ Recipe {}: {}, treating as empty", id, e);
        T::default()
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub ingredients: Value,
    #[serde(default)]
    pub instructions: Value,
    #[serde(default)]
    pub is_rtl: Option<bool>,
    #[serde(default)]
    pub ingredients_label: Option<String>,
    #[serde(default)]
    pub instructions_label: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub status: Option<RecipeStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Value,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub prep_time: Option<u32>,
    #[serde(default)]
    pub cook_time: Option<u32>,
    #[serde(default)]
    pub calories: Option<u32>,
    #[serde(default)]
    pub timers: Value,
    #[serde(default)]
    pub nutrition: Value,
    #[serde(default)]
    pub seasonality: Option<String>,
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub likes: Option<u32>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl RecipeRow {
    /// Malformed nested fields are logged and read as empty rather than failing the row.
    pub fn into_recipe(self) -> Recipe {
        let id = self.id;
        let is_rtl = self.is_rtl.unwrap_or(false);
        let direction = TextDirection::from_rtl(is_rtl);
        let (ingredients_label, instructions_label) = direction.default_labels();

        Recipe {
            id,
            user_id: self.user_id,
            name: self.name,
            ingredients: or_default(id, normalize_list("ingredients", &self.ingredients)),
            instructions: or_default(id, normalize_list("instructions", &self.instructions)),
            is_rtl,
            ingredients_label: self.ingredients_label.unwrap_or_else(|| ingredients_label.to_string()),
            instructions_label: self.instructions_label.unwrap_or_else(|| instructions_label.to_string()),
            content: self.content,
            is_favorite: self.is_favorite.unwrap_or(false),
            rating: self.rating.unwrap_or(0),
            status: self.status.unwrap_or_default(),
            notes: self.notes,
            created_at: self.created_at,
            meta: RecipeMeta {
                tags: or_default(id, normalize_list("tags", &self.tags)),
                difficulty: self.difficulty,
                prep_time: self.prep_time,
                cook_time: self.cook_time,
                calories: self.calories,
                timers: or_default(id, normalize_timers(&self.timers)),
                nutrition: or_default(id, normalize_nutrition(&self.nutrition)),
                seasonality: self.seasonality,
                cuisine: self.cuisine,
                servings: self.servings,
            },
            likes: self.likes.unwrap_or(0),
            author_name: self.author_name,
            is_public: self.is_public.unwrap_or(false),
            published_at: self.published_at,
        }
    }
}

/// Insert payload. The store assigns `id` and `created_at`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRecipeRow {
    pub user_id: Uuid,
    pub name: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub is_rtl: bool,
    pub ingredients_label: String,
    pub instructions_label: String,
    pub content: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
    pub status: RecipeStatus,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
    pub prep_time: Option<u32>,
    pub cook_time: Option<u32>,
    pub calories: Option<u32>,
    pub timers: Vec<TimerMarker>,
    pub nutrition: Option<Nutrition>,
    pub seasonality: Option<String>,
    pub cuisine: Option<String>,
    pub servings: u32,
}

impl NewRecipeRow {
    /// Applies the persistence defaults: labels by locale, medium difficulty, four servings.
    pub fn from_response(owner: Uuid, response: &RecipeResponse, status: RecipeStatus) -> Self {
        let (ingredients_label, instructions_label) = response.direction().default_labels();
        let meta = &response.meta;

        Self {
            user_id: owner,
            name: response.name.clone(),
            ingredients: response.ingredients.clone(),
            instructions: response.instructions.clone(),
            is_rtl: response.is_rtl,
            ingredients_label: response.ingredients_label.clone().unwrap_or_else(|| ingredients_label.to_string()),
            instructions_label: response.instructions_label.clone().unwrap_or_else(|| instructions_label.to_string()),
            content: response.content.clone(),
            is_favorite: false,
            rating: 0,
            status,
            tags: meta.tags.clone(),
            difficulty: meta.difficulty.unwrap_or_default(),
            prep_time: meta.prep_time,
            cook_time: meta.cook_time,
            calories: meta.calories,
            timers: meta.timers.clone(),
            nutrition: meta.nutrition.clone(),
            seasonality: meta.seasonality.clone(),
            cuisine: meta.cuisine.clone(),
            servings: meta.servings.unwrap_or(DEFAULT_SERVINGS),
        }
    }
}

/// Partial update payload; absent fields are not serialized at all.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecipeRowPatch {
    pub name: Option<String>,
    pub ingredients: Option<Vec<String>>,
    pub instructions: Option<Vec<String>>,
    pub is_rtl: Option<bool>,
    pub ingredients_label: Option<String>,
    pub instructions_label: Option<String>,
    pub content: Option<String>,
    pub is_favorite: Option<bool>,
    pub rating: Option<u8>,
    pub status: Option<RecipeStatus>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub difficulty: Option<Difficulty>,
    pub prep_time: Option<u32>,
    pub cook_time: Option<u32>,
    pub calories: Option<u32>,
    pub timers: Option<Vec<TimerMarker>>,
    pub nutrition: Option<Nutrition>,
    pub seasonality: Option<String>,
    pub cuisine: Option<String>,
    pub servings: Option<u32>,
    pub is_public: Option<bool>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<&RecipePatch> for RecipeRowPatch {
    fn from(patch: &RecipePatch) -> Self {
        let p = patch.clone();
        Self {
            name: p.name,
            ingredients: p.ingredients,
            instructions: p.instructions,
            is_rtl: p.is_rtl,
            ingredients_label: p.ingredients_label,
            instructions_label: p.instructions_label,
            content: p.content,
            is_favorite: p.is_favorite,
            rating: p.rating,
            status: p.status,
            notes: p.notes,
            tags: p.tags,
            difficulty: p.difficulty,
            prep_time: p.prep_time,
            cook_time: p.cook_time,
            calories: p.calories,
            timers: p.timers,
            nutrition: p.nutrition,
            seasonality: p.seasonality,
            cuisine: p.cuisine,
            servings: p.servings,
            is_public: p.is_public,
            published_at: p.published_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileRow {
    pub user_id: Uuid,
    #[serde(default)]
    pub preferences: Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    pub fn new(owner: Uuid, preferences: &Preferences) -> Self {
        Self {
            user_id: owner,
            preferences: serde_json::to_value(preferences).unwrap_or(Value::Null),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn preferences(&self) -> Result<Preferences, Malformed> {
        normalize("preferences", &self.preferences)
    }
}

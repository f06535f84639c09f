use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::{error::AppError, locale::TextDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecipeStatus {
    #[default]
    Draft,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// A countdown attached to one instruction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerMarker {
    pub step: usize,
    pub minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Per-serving nutrition, grams unless noted.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Nutrition {
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    /// milligrams
    pub sodium: Option<f64>,
}

/// Optional descriptive fields shared by generated and persisted recipes.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecipeMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    pub difficulty: Option<Difficulty>,
    pub prep_time: Option<u32>,
    pub cook_time: Option<u32>,
    pub calories: Option<u32>,
    #[serde(default)]
    pub timers: Vec<TimerMarker>,
    pub nutrition: Option<Nutrition>,
    pub seasonality: Option<String>,
    pub cuisine: Option<String>,
    pub servings: Option<u32>,
}

/// What the generator hands back before anything is persisted.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeResponse {
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(rename = "isRTL", default)]
    pub is_rtl: bool,
    pub ingredients_label: Option<String>,
    pub instructions_label: Option<String>,
    pub content: Option<String>,
    #[serde(default = "default_true")]
    pub is_recipe: bool,
    #[serde(flatten)]
    pub meta: RecipeMeta,
}

fn default_true() -> bool {
    true
}

impl RecipeResponse {
    pub fn direction(&self) -> TextDirection {
        TextDirection::from_rtl(self.is_rtl)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(rename = "isRTL", default)]
    pub is_rtl: bool,
    pub ingredients_label: String,
    pub instructions_label: String,
    pub content: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub status: RecipeStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub meta: RecipeMeta,
    #[serde(default)]
    pub likes: u32,
    pub author_name: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub published_at: Option<DateTime<Utc>>,
}

/// Field-level update. `None` means "leave as is".
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecipePatch {
    pub name: Option<String>,
    pub ingredients: Option<Vec<String>>,
    pub instructions: Option<Vec<String>>,
    #[serde(rename = "isRTL")]
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

impl RecipePatch {
    pub fn is_empty(&self) -> bool {
        *self == RecipePatch::default()
    }

    /// Applies only the fields present in the patch.
    pub fn apply_to(&self, recipe: &mut Recipe) {
        macro_rules! set {
            ($($field:ident),*) => { $( if let Some(v) = &self.$field { recipe.$field = v.clone(); } )* };
        }
        macro_rules! set_opt {
            ($($field:ident),*) => { $( if let Some(v) = &self.$field { recipe.$field = Some(v.clone()); } )* };
        }
        macro_rules! set_meta {
            ($($field:ident),*) => { $( if let Some(v) = &self.$field { recipe.meta.$field = Some(v.clone()); } )* };
        }

        set!(name, ingredients, instructions, is_rtl, ingredients_label, instructions_label, is_favorite, rating, status, is_public);
        set_opt!(content, notes, published_at);
        set_meta!(difficulty, prep_time, cook_time, calories, nutrition, seasonality, cuisine, servings);
        if let Some(tags) = &self.tags {
            recipe.meta.tags = tags.clone();
        }
        if let Some(timers) = &self.timers {
            recipe.meta.timers = timers.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Millisecond timestamp, strictly increasing within a session.
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    #[serde(rename = "isRTL")]
    pub is_rtl: Option<bool>,
    pub image: Option<String>,
    pub suggestions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub dietary_restrictions: Vec<String>,
    pub allergies: Vec<String>,
    pub favorite_cuisines: Vec<String>,
    pub disliked_ingredients: Vec<String>,
    pub skill_level: SkillLevel,
    pub default_servings: Option<u32>,
}

impl Preferences {
    pub fn is_empty(&self) -> bool {
        *self == Preferences::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStatistics {
    pub generated: u32,
    pub edited: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub failed: u32,
}

/// An uploaded photo to send alongside a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Bytes,
}

impl ImageData {
    /// Accepts raw base64 or a `data:<mime>;base64,` URL and sniffs the real format.
    pub fn from_base64(encoded: &str) -> Result<Self, AppError> {
        let payload = match encoded.split_once("base64,") {
            Some((_, rest)) => rest,
            None => encoded,
        };
        let raw = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| AppError::InvalidInput(format!("image is not valid base64: {e}")))?;
        Self::from_bytes(Bytes::from(raw))
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self, AppError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| AppError::InvalidInput(format!("unrecognised image: {e}")))?;
        Ok(Self { mime_type: format.to_mime_type().to_string(), bytes })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

use crate::{locale::TextDirection, models::{Preferences, RecipeResponse}};

const RECIPE_SCHEMA: &str = r#"{
  "isRecipe": true,
  "name": "recipe name",
  "ingredients": ["ingredient with quantity", "..."],
  "instructions": ["step", "..."],
  "isRTL": false,
  "ingredientsLabel": "heading for the ingredient list, in the response language",
  "instructionsLabel": "heading for the instruction list, in the response language",
  "tags": ["short tag", "..."],
  "difficulty": "easy | medium | hard",
  "prepTime": 10,
  "cookTime": 20,
  "calories": 450,
  "servings": 4,
  "timers": [{ "step": 0, "minutes": 10, "label": "what the timer is for" }],
  "nutrition": { "calories": 450, "protein": 20, "carbs": 50, "fat": 15, "fiber": 6, "sugar": 8, "sodium": 600 },
  "seasonality": "season or null",
  "cuisine": "cuisine name"
}"#;

const ANSWER_SCHEMA: &str = r#"{
  "isRecipe": false,
  "name": "short title",
  "content": "the full answer as plain text",
  "isRTL": false
}"#;

fn direction_rule(direction: TextDirection) -> &'static str {
    match direction {
        TextDirection::Rtl => "The user writes in a right-to-left language. Answer in the same language and set \"isRTL\": true.",
        TextDirection::Ltr => "Answer in the same language the user writes in. Set \"isRTL\" to true only if that language is written right-to-left.",
    }
}

fn output_rules() -> String {
    format!(
        "Return exactly one JSON object and nothing else: no markdown, no code fences, no commentary.\n\
        If the request asks for a dish, meal or recipe, use this shape:\n{RECIPE_SCHEMA}\n\
        Otherwise (a cooking question or general chat), use this shape:\n{ANSWER_SCHEMA}\n\
        Times are in minutes, nutrition is per serving in grams (sodium in milligrams). \
        Timer \"step\" is the zero-based index into \"instructions\"."
    )
}

fn preference_lines(preferences: &Preferences) -> String {
    let mut lines = Vec::new();
    let mut push = |label: &str, items: &[String]| {
        if !items.is_empty() {
            lines.push(format!("- {label}: {}", items.join(", ")));
        }
    };
    push("Dietary restrictions (must respect)", &preferences.dietary_restrictions);
    push("Allergies (never include)", &preferences.allergies);
    push("Favorite cuisines", &preferences.favorite_cuisines);
    push("Disliked ingredients (avoid)", &preferences.disliked_ingredients);
    lines.push(format!("- Cooking skill: {}", format!("{:?}", preferences.skill_level).to_lowercase()));
    if let Some(servings) = preferences.default_servings {
        lines.push(format!("- Default servings: {servings}"));
    }
    lines.join("\n")
}

pub fn build_generation_prompt(request: &str, direction: TextDirection, preferences: Option<&Preferences>, has_image: bool) -> String {
    let image_note = if has_image {
        "An image is attached. Use what it shows (ingredients, a finished dish) as part of the request.\n"
    } else {
        ""
    };
    let profile = match preferences.filter(|p| !p.is_empty()) {
        Some(p) => format!("User profile:\n{}\n", preference_lines(p)),
        None => String::new(),
    };

    format!(
        "You are a friendly cooking assistant.\n\
        {profile}{image_note}\
        User request: {request}\n\
        {}\n\
        {}",
        direction_rule(direction),
        output_rules()
    )
}

pub fn build_edit_prompt(prior: &RecipeResponse, instruction: &str, direction: TextDirection) -> String {
    let prior_json = serde_json::to_string_pretty(prior).unwrap_or_else(|_| prior.name.clone());
    format!(
        "You are a friendly cooking assistant editing an existing recipe.\n\
        Current recipe:\n{prior_json}\n\
        Requested change: {instruction}\n\
        Return the complete updated recipe, not just the changes. Keep everything the change does not affect.\n\
        {}\n\
        {}",
        direction_rule(direction),
        output_rules()
    )
}

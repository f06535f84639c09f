use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    error::GenerationError,
    extract::parse_recipe_response,
    locale::{resolve_direction, TextDirection},
    models::{ImageData, Preferences, RecipeResponse},
    prompt::{build_edit_prompt, build_generation_prompt},
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub locale: Option<TextDirection>,
    pub image: Option<ImageData>,
    pub preferences: Option<Preferences>,
}

/// Turns requests into validated recipes. Failures are returned, never retried.
#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<RecipeResponse, GenerationError>;

    /// Produces a complete replacement for `prior` with `instruction` applied.
    async fn edit(&self, prior: &RecipeResponse, instruction: &str, locale: Option<TextDirection>) -> Result<RecipeResponse, GenerationError>;
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sends one prompt (plus optional image) and returns the first candidate's first text part.
    async fn perform_api_call(&self, prompt: &str, image: Option<&ImageData>) -> Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);

        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let mut parts = vec![json!({ "text": prompt })];
        if let Some(image) = image {
            parts.push(json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.to_base64() }
            }));
        }

        let request_body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 2048
            }
        });

        let mut loggable = request_body.clone();
        truncate_base64_in_json(&mut loggable);
        info!("📤 Request body: {}", serde_json::to_string(&loggable).unwrap_or_default());

        let response = self.client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Gemini API error response: {}", response_text);
            return Err(GenerationError::transport(format!("HTTP {}: {}", status, response_text)));
        }

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::transport(format!("unreadable response envelope: {e}")))?;

        let text = parsed.first_text()
            .ok_or_else(|| GenerationError::transport("no text content found in response"))?;
        info!("📥 Model output ({} chars): {}", text.len(), preview(&text, 200));
        Ok(text)
    }
}

#[async_trait]
impl RecipeGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<RecipeResponse, GenerationError> {
        let direction = resolve_direction(request.locale, &request.prompt);
        let prompt = build_generation_prompt(&request.prompt, direction, request.preferences.as_ref(), request.image.is_some());

        info!("🎯 Generating recipe for: {}", preview(&request.prompt, 120));
        let raw = self.perform_api_call(&prompt, request.image.as_ref()).await?;

        match parse_recipe_response(&raw, direction) {
            Ok(recipe) => {
                info!("✅ Generated '{}' (recipe={})", recipe.name, recipe.is_recipe);
                Ok(recipe)
            }
            Err(e) => {
                warn!("⚠️ Unusable model output ({}): {}", e.reason, preview(&raw, 300));
                Err(e)
            }
        }
    }

    async fn edit(&self, prior: &RecipeResponse, instruction: &str, locale: Option<TextDirection>) -> Result<RecipeResponse, GenerationError> {
        let direction = locale.unwrap_or_else(|| prior.direction());
        let prompt = build_edit_prompt(prior, instruction, direction);

        info!("✏️ Editing '{}': {}", prior.name, preview(instruction, 120));
        let raw = self.perform_api_call(&prompt, None).await?;

        let edited = parse_recipe_response(&raw, direction)?;
        if !edited.is_recipe {
            warn!("⚠️ Edit of '{}' returned a non-recipe answer", prior.name);
            return Err(GenerationError::new(
                crate::error::GenerationFailure::SchemaMismatch,
                "edit must return a complete recipe",
            ));
        }
        info!("✅ Edited '{}' -> '{}'", prior.name, edited.name);
        Ok(edited)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiResponse {
    fn first_text(&self) -> Option<String> {
        self.candidates
            .first()?
            .content
            .parts
            .first()?
            .text
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationFailure;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    async fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key".into()).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn generate_extracts_recipe_from_prose() {
        let server = MockServer::start().await;
        let text = "Here it is:\n```json\n{\"name\":\"Overnight oats\",\"ingredients\":[\"oats\",\"oat milk\"],\"instructions\":[\"mix\",\"chill\"]}\n```";
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(text)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let recipe = client
            .generate(GenerationRequest { prompt: "a quick vegan breakfast".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(recipe.name, "Overnight oats");
        assert!(!recipe.is_rtl);
    }

    #[tokio::test]
    async fn hebrew_request_defaults_to_rtl() {
        let server = MockServer::start().await;
        let text = r#"{"name":"מרק עגבניות","ingredients":["עגבניות"],"instructions":["לבשל"]}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(text)))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let recipe = client
            .generate(GenerationRequest { prompt: "תן לי מרק עגבניות".into(), ..Default::default() })
            .await
            .unwrap();
        assert!(recipe.is_rtl);
    }

    #[tokio::test]
    async fn http_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.generate(GenerationRequest { prompt: "soup".into(), ..Default::default() }).await.unwrap_err();
        assert_eq!(err.reason, GenerationFailure::TransportError);
    }

    #[tokio::test]
    async fn empty_candidates_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.generate(GenerationRequest { prompt: "soup".into(), ..Default::default() }).await.unwrap_err();
        assert_eq!(err.reason, GenerationFailure::TransportError);
    }

    #[tokio::test]
    async fn edit_rejects_non_recipe_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(r#"{"isRecipe":false,"content":"Sure."}"#)))
            .mount(&server)
            .await;

        let prior = RecipeResponse {
            name: "Chili".into(),
            ingredients: vec!["beans".into()],
            instructions: vec!["simmer".into()],
            is_rtl: false,
            ingredients_label: None,
            instructions_label: None,
            content: None,
            is_recipe: true,
            meta: Default::default(),
        };
        let client = client_for(&server).await;
        let err = client.edit(&prior, "no beans", None).await.unwrap_err();
        assert_eq!(err.reason, GenerationFailure::SchemaMismatch);
    }

    #[test]
    fn base64_is_truncated_for_logs() {
        let mut body = json!({ "parts": [{ "inlineData": { "data": "A".repeat(500) } }] });
        truncate_base64_in_json(&mut body);
        let data = body["parts"][0]["inlineData"]["data"].as_str().unwrap();
        assert!(data.ends_with("[truncated 450 chars]"));
    }
}

//! End-to-end chat flows through the HTTP layer, with the model and the hosted store mocked.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use recipe_assistant::{
    cache::{LocalCache, CHAT_MESSAGES, CURRENT_RECIPE},
    gemini::GeminiClient,
    models::{ChatMessage, RecipeResponse},
    profiles::ProfileRepository,
    repository::RecipeRepository,
    routes::{router, AppState, OWNER_HEADER},
    store::{MemoryStore, RecipeStore, RestStore},
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

const DAY: Duration = Duration::from_secs(86_400);

const BREAKFAST: &str = r#"Here you go!
{"name":"Overnight oats","ingredients":["oats","oat milk","berries"],"instructions":["mix","chill overnight"],"isRTL":false,"isRecipe":true,"tags":["vegan"]}"#;

fn envelope(text: &str) -> Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

struct App {
    router: Router,
    cache: LocalCache,
}

fn app(gemini: &MockServer, store: Arc<dyn RecipeStore>) -> App {
    let cache = LocalCache::in_memory();
    let generator = GeminiClient::new("test-key".into()).with_base_url(gemini.uri());
    let state = AppState {
        sessions: Arc::default(),
        generator: Arc::new(generator),
        recipes: Arc::new(RecipeRepository::new(store.clone(), cache.clone())),
        profiles: Arc::new(ProfileRepository::new(store)),
        cache: cache.clone(),
        cache_max_age: DAY,
        community_limit: 20,
    };
    App { router: router(state), cache }
}

async fn call(app: &App, method: &str, uri: &str, owner: Uuid, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(OWNER_HEADER, owner.to_string())
        .header(header::CONTENT_TYPE, "application/json");
    let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
    let response = app.router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn accepted_recipe_is_created_and_chat_cache_cleared() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(BREAKFAST)))
        .expect(1)
        .mount(&gemini)
        .await;

    let store_server = MockServer::start().await;
    let owner = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/recipes"))
        .and(body_partial_json(json!({ "status": "accepted", "user_id": owner, "servings": 4 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "user_id": owner,
            "name": "Overnight oats",
            "ingredients": "[\"oats\",\"oat milk\",\"berries\"]",
            "instructions": ["mix", "chill overnight"],
            "status": "accepted",
            "created_at": "2026-10-18T08:00:00Z",
            "tags": ["vegan"],
            "servings": 4
        }])))
        .expect(1)
        .mount(&store_server)
        .await;

    let app = app(&gemini, Arc::new(RestStore::new(store_server.uri(), "anon-key")));
    let session_cache = app.cache.scoped(owner);

    let (status, snapshot) = call(&app, "POST", "/api/chat", owner, Some(json!({ "text": "a quick vegan breakfast" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "reviewing");
    assert_eq!(snapshot["currentRecipe"]["name"], "Overnight oats");
    assert!(session_cache.read::<RecipeResponse>(CURRENT_RECIPE, DAY).is_some());

    let (status, saved) = call(&app, "POST", "/api/chat/accept", owner, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["status"], "accepted");
    assert_eq!(saved["ingredients"], json!(["oats", "oat milk", "berries"]));

    assert!(session_cache.read::<Vec<ChatMessage>>(CHAT_MESSAGES, DAY).is_none());
    assert!(session_cache.read::<RecipeResponse>(CURRENT_RECIPE, DAY).is_none());

    let (_, snapshot) = call(&app, "GET", "/api/chat", owner, None).await;
    assert_eq!(snapshot["state"], "idle");
    assert_eq!(snapshot["messages"], json!([]));
}

#[tokio::test]
async fn transport_failure_apologizes_and_notifies_once() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&gemini)
        .await;

    let app = app(&gemini, Arc::new(MemoryStore::new()));
    let owner = Uuid::new_v4();

    let (status, snapshot) = call(&app, "POST", "/api/chat", owner, Some(json!({ "text": "give me a tomato soup" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "idle");
    assert_eq!(snapshot["currentRecipe"], Value::Null);
    assert_eq!(snapshot["messages"].as_array().unwrap().len(), 2);
    assert_eq!(snapshot["messages"][1]["sender"], "assistant");
    assert_eq!(snapshot["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["notifications"][0]["kind"], "generation");

    let (_, snapshot) = call(&app, "GET", "/api/chat", owner, None).await;
    assert_eq!(snapshot["notifications"], json!([]));
}

#[tokio::test]
async fn failed_edit_keeps_recipe_under_review() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(BREAKFAST)))
        .up_to_n_times(1)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope("Sorry, I can't do that right now.")))
        .mount(&gemini)
        .await;

    let app = app(&gemini, Arc::new(MemoryStore::new()));
    let owner = Uuid::new_v4();
    call(&app, "POST", "/api/chat", owner, Some(json!({ "text": "a quick vegan breakfast" }))).await;

    let (status, snapshot) = call(&app, "POST", "/api/chat/edit", owner, Some(json!({ "instruction": "add peanut butter" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "reviewing");
    assert_eq!(snapshot["currentRecipe"]["name"], "Overnight oats");
    assert_eq!(snapshot["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["notifications"][0]["kind"], "edit");
}

#[tokio::test]
async fn saved_recipes_are_managed_through_the_api() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(BREAKFAST)))
        .mount(&gemini)
        .await;

    let store = Arc::new(MemoryStore::with_encoded_columns());
    let app = app(&gemini, store.clone());
    let owner = Uuid::new_v4();

    call(&app, "POST", "/api/chat", owner, Some(json!({ "text": "breakfast" }))).await;
    let (_, saved) = call(&app, "POST", "/api/chat/accept", owner, None).await;
    let id = saved["id"].as_str().unwrap().to_string();

    let (_, list) = call(&app, "GET", "/api/recipes?refresh=true", owner, None).await;
    assert_eq!(list[0]["ingredients"], json!(["oats", "oat milk", "berries"]));
    assert_eq!(list[0]["tags"], json!(["vegan"]));

    let favorite = format!("/api/recipes/{id}/favorite");
    let (_, first) = call(&app, "PUT", &favorite, owner, Some(json!({ "value": true }))).await;
    let writes = store.write_count();
    let (_, second) = call(&app, "PUT", &favorite, owner, Some(json!({ "value": true }))).await;
    assert_eq!(first["isFavorite"], true);
    assert_eq!(second["isFavorite"], true);
    assert_eq!(store.write_count(), writes);

    let (_, rated) = call(&app, "PUT", &format!("/api/recipes/{id}/rating"), owner, Some(json!({ "rating": 4 }))).await;
    assert_eq!(rated["rating"], 4);

    let pdf = Request::builder()
        .uri(format!("/api/recipes/{id}/pdf"))
        .header(OWNER_HEADER, owner.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(pdf).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    let (status, _) = call(&app, "DELETE", &format!("/api/recipes/{id}"), owner, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = call(&app, "GET", "/api/recipes", owner, None).await;
    assert_eq!(list, json!([]));

    let (status, _) = call(&app, "DELETE", &format!("/api/recipes/{id}"), Uuid::new_v4(), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//! Access to the hosted data store (`recipes` and `profiles` collections).

use std::{collections::HashMap, sync::atomic::{AtomicUsize, Ordering}};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    error::RepositoryError,
    wire::{NewRecipeRow, ProfileRow, RecipeRow, RecipeRowPatch},
};

/// Every mutation is filtered by both record id and owner id.
#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn select_recipes(&self, owner: Uuid) -> Result<Vec<RecipeRow>, RepositoryError>;
    async fn insert_recipe(&self, row: &NewRecipeRow) -> Result<RecipeRow, RepositoryError>;
    async fn update_recipe(&self, id: Uuid, owner: Uuid, patch: &RecipeRowPatch) -> Result<RecipeRow, RepositoryError>;
    async fn delete_recipe(&self, id: Uuid, owner: Uuid) -> Result<(), RepositoryError>;
    async fn select_public_recipes(&self, limit: usize) -> Result<Vec<RecipeRow>, RepositoryError>;
    async fn select_profile(&self, owner: Uuid) -> Result<Option<ProfileRow>, RepositoryError>;
    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow, RepositoryError>;
}

/// PostgREST-style client for the hosted backend.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, what: &str, builder: RequestBuilder) -> Result<Response, RepositoryError> {
        let response = self.authorized(builder)
            .send()
            .await
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;

        let status = response.status();
        info!("📥 Store {} -> {}", what, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Store {} rejected: {}", what, body);
            return Err(RepositoryError::Rejected { status: status.as_u16(), body });
        }
        Ok(response)
    }

    async fn rows<T: DeserializeOwned>(&self, what: &str, builder: RequestBuilder) -> Result<Vec<T>, RepositoryError> {
        self.send(what, builder)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RecipeStore for RestStore {
    async fn select_recipes(&self, owner: Uuid) -> Result<Vec<RecipeRow>, RepositoryError> {
        let request = self.client
            .get(self.table("recipes"))
            .query(&[("select", "*".to_string()), ("user_id", eq(owner)), ("order", "created_at.desc".to_string())]);
        self.rows("select recipes", request).await
    }

    async fn insert_recipe(&self, row: &NewRecipeRow) -> Result<RecipeRow, RepositoryError> {
        let request = self.client
            .post(self.table("recipes"))
            .header("Prefer", "return=representation")
            .json(row);
        self.rows::<RecipeRow>("insert recipe", request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::Decode("insert returned no row".into()))
    }

    async fn update_recipe(&self, id: Uuid, owner: Uuid, patch: &RecipeRowPatch) -> Result<RecipeRow, RepositoryError> {
        let request = self.client
            .patch(self.table("recipes"))
            .query(&[("id", eq(id)), ("user_id", eq(owner))])
            .header("Prefer", "return=representation")
            .json(patch);
        self.rows::<RecipeRow>("update recipe", request)
            .await?
            .into_iter()
            .next()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn delete_recipe(&self, id: Uuid, owner: Uuid) -> Result<(), RepositoryError> {
        let request = self.client
            .delete(self.table("recipes"))
            .query(&[("id", eq(id)), ("user_id", eq(owner))])
            .header("Prefer", "return=representation");
        let deleted: Vec<Value> = self.rows("delete recipe", request).await?;
        if deleted.is_empty() {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn select_public_recipes(&self, limit: usize) -> Result<Vec<RecipeRow>, RepositoryError> {
        let request = self.client
            .get(self.table("recipes"))
            .query(&[
                ("select", "*".to_string()),
                ("is_public", "eq.true".to_string()),
                ("order", "published_at.desc".to_string()),
                ("limit", limit.to_string()),
            ]);
        self.rows("select community recipes", request).await
    }

    async fn select_profile(&self, owner: Uuid) -> Result<Option<ProfileRow>, RepositoryError> {
        let request = self.client
            .get(self.table("profiles"))
            .query(&[("select", "*".to_string()), ("user_id", eq(owner))]);
        Ok(self.rows::<ProfileRow>("select profile", request).await?.into_iter().next())
    }

    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow, RepositoryError> {
        let request = self.client
            .post(self.table("profiles"))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(row);
        self.rows::<ProfileRow>("upsert profile", request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::Decode("upsert returned no row".into()))
    }
}

/// Process-local store used when no hosted backend is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    recipes: RwLock<Vec<RecipeRow>>,
    profiles: RwLock<HashMap<Uuid, ProfileRow>>,
    encode_nested: bool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores list and map columns as JSON text, the way a text-typed column would return them.
    pub fn with_encoded_columns() -> Self {
        Self { encode_nested: true, ..Self::default() }
    }

    /// Number of successful mutations so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn column(&self, value: Value) -> Value {
        match value {
            Value::Null => Value::Null,
            other if self.encode_nested => Value::String(other.to_string()),
            other => other,
        }
    }

    fn store_row(&self, row: &NewRecipeRow) -> Result<RecipeRow, RepositoryError> {
        let to_value = |v: Result<Value, serde_json::Error>| v.map_err(|e| RepositoryError::Decode(e.to_string()));
        Ok(RecipeRow {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            name: row.name.clone(),
            ingredients: self.column(to_value(serde_json::to_value(&row.ingredients))?),
            instructions: self.column(to_value(serde_json::to_value(&row.instructions))?),
            is_rtl: Some(row.is_rtl),
            ingredients_label: Some(row.ingredients_label.clone()),
            instructions_label: Some(row.instructions_label.clone()),
            content: row.content.clone(),
            is_favorite: Some(row.is_favorite),
            rating: Some(row.rating),
            status: Some(row.status),
            notes: None,
            created_at: Utc::now(),
            tags: self.column(to_value(serde_json::to_value(&row.tags))?),
            difficulty: Some(row.difficulty),
            prep_time: row.prep_time,
            cook_time: row.cook_time,
            calories: row.calories,
            timers: self.column(to_value(serde_json::to_value(&row.timers))?),
            nutrition: self.column(to_value(serde_json::to_value(&row.nutrition))?),
            seasonality: row.seasonality.clone(),
            cuisine: row.cuisine.clone(),
            servings: Some(row.servings),
            likes: Some(0),
            author_name: None,
            is_public: Some(false),
            published_at: None,
        })
    }

    fn patch_row(&self, row: &mut RecipeRow, patch: &RecipeRowPatch) -> Result<(), RepositoryError> {
        // Round-trip through JSON so only the fields present in the patch are overwritten.
        let mut current = serde_json::to_value(&*row).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let changes = serde_json::to_value(patch).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        if let (Value::Object(target), Value::Object(changes)) = (&mut current, changes) {
            for (key, value) in changes {
                let value = match key.as_str() {
                    "ingredients" | "instructions" | "tags" | "timers" | "nutrition" => self.column(value),
                    _ => value,
                };
                target.insert(key, value);
            }
        }
        *row = serde_json::from_value(current).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RecipeStore for MemoryStore {
    async fn select_recipes(&self, owner: Uuid) -> Result<Vec<RecipeRow>, RepositoryError> {
        let mut rows: Vec<RecipeRow> = self.recipes.read().iter().filter(|r| r.user_id == owner).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_recipe(&self, row: &NewRecipeRow) -> Result<RecipeRow, RepositoryError> {
        let stored = self.store_row(row)?;
        self.recipes.write().push(stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_recipe(&self, id: Uuid, owner: Uuid, patch: &RecipeRowPatch) -> Result<RecipeRow, RepositoryError> {
        let mut guard = self.recipes.write();
        let row = guard
            .iter_mut()
            .find(|r| r.id == id && r.user_id == owner)
            .ok_or(RepositoryError::NotFound(id))?;
        self.patch_row(row, patch)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row.clone())
    }

    async fn delete_recipe(&self, id: Uuid, owner: Uuid) -> Result<(), RepositoryError> {
        let mut guard = self.recipes.write();
        let before = guard.len();
        guard.retain(|r| !(r.id == id && r.user_id == owner));
        if guard.len() == before {
            return Err(RepositoryError::NotFound(id));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn select_public_recipes(&self, limit: usize) -> Result<Vec<RecipeRow>, RepositoryError> {
        let mut rows: Vec<RecipeRow> = self.recipes.read().iter().filter(|r| r.is_public == Some(true)).cloned().collect();
        rows.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn select_profile(&self, owner: Uuid) -> Result<Option<ProfileRow>, RepositoryError> {
        Ok(self.profiles.read().get(&owner).cloned())
    }

    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow, RepositoryError> {
        self.profiles.write().insert(row.user_id, row.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecipeResponse, RecipeStatus, RecipeMeta};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row_json(id: Uuid, owner: Uuid) -> Value {
        json!({
            "id": id,
            "user_id": owner,
            "name": "Pancakes",
            "ingredients": "[\"flour\",\"milk\"]",
            "instructions": ["mix", "fry"],
            "created_at": "2026-03-01T08:00:00Z"
        })
    }

    fn response() -> RecipeResponse {
        RecipeResponse {
            name: "Pancakes".into(),
            ingredients: vec!["flour".into(), "milk".into()],
            instructions: vec!["mix".into(), "fry".into()],
            is_rtl: false,
            ingredients_label: None,
            instructions_label: None,
            content: None,
            is_recipe: true,
            meta: RecipeMeta { tags: vec!["breakfast".into()], ..Default::default() },
        }
    }

    #[tokio::test]
    async fn select_filters_by_owner_and_orders_newest_first() {
        let server = MockServer::start().await;
        let (id, owner) = (Uuid::new_v4(), Uuid::new_v4());

        Mock::given(method("GET"))
            .and(path("/rest/v1/recipes"))
            .and(query_param("user_id", format!("eq.{owner}")))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row_json(id, owner)])))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "anon-key");
        let rows = store.select_recipes(owner).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].clone().into_recipe().ingredients, vec!["flour", "milk"]);
    }

    #[tokio::test]
    async fn update_scopes_by_id_and_owner() {
        let server = MockServer::start().await;
        let (id, owner) = (Uuid::new_v4(), Uuid::new_v4());

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/recipes"))
            .and(query_param("id", format!("eq.{id}")))
            .and(query_param("user_id", format!("eq.{owner}")))
            .and(body_json(json!({ "is_favorite": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row_json(id, owner)])))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "anon-key");
        let patch = RecipeRowPatch { is_favorite: Some(true), ..Default::default() };
        assert!(store.update_recipe(id, owner, &patch).await.is_ok());
    }

    #[tokio::test]
    async fn update_matching_no_rows_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "anon-key");
        let id = Uuid::new_v4();
        let err = store.update_recipe(id, Uuid::new_v4(), &RecipeRowPatch::default()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn rejected_request_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "anon-key");
        let err = store.select_recipes(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn memory_store_refuses_foreign_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let row = store.insert_recipe(&NewRecipeRow::from_response(owner, &response(), RecipeStatus::Draft)).await.unwrap();

        let stranger = Uuid::new_v4();
        let patch = RecipeRowPatch { name: Some("Stolen".into()), ..Default::default() };
        assert!(store.update_recipe(row.id, stranger, &patch).await.is_err());
        assert!(store.delete_recipe(row.id, stranger).await.is_err());
        assert_eq!(store.select_recipes(owner).await.unwrap()[0].name, "Pancakes");
    }

    #[tokio::test]
    async fn memory_store_can_encode_columns_as_text() {
        let store = MemoryStore::with_encoded_columns();
        let owner = Uuid::new_v4();
        let row = store.insert_recipe(&NewRecipeRow::from_response(owner, &response(), RecipeStatus::Draft)).await.unwrap();
        assert!(row.ingredients.is_string());
        assert_eq!(row.into_recipe().meta.tags, vec!["breakfast"]);
    }
}

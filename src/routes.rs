use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    cache::LocalCache,
    error::AppError,
    gemini::RecipeGenerator,
    locale::TextDirection,
    models::{ImageData, Preferences, Recipe, RecipePatch, RecipeStatus},
    pdf::generate_pdf,
    profiles::ProfileRepository,
    repository::RecipeRepository,
    session::{ChatSession, SessionSnapshot, TurnInput},
};

pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Option<Uuid>, Arc<ChatSession>>>>,
    pub generator: Arc<dyn RecipeGenerator>,
    pub recipes: Arc<RecipeRepository>,
    pub profiles: Arc<ProfileRepository>,
    pub cache: LocalCache,
    pub cache_max_age: Duration,
    pub community_limit: usize,
}

impl AppState {
    /// The owner's chat session, resumed from cache on first use.
    pub fn session_for(&self, owner: Option<Uuid>) -> Arc<ChatSession> {
        if let Some(session) = self.sessions.read().get(&owner) {
            return session.clone();
        }
        let scope = owner.map_or_else(|| "anonymous".to_string(), |id| id.to_string());
        self.sessions
            .write()
            .entry(owner)
            .or_insert_with(|| {
                Arc::new(ChatSession::restore(
                    owner,
                    self.generator.clone(),
                    self.recipes.clone(),
                    self.cache.scoped(scope),
                    self.cache_max_age,
                ))
            })
            .clone()
    }

    /// Drops a session from memory once no request holds it and it has nothing left to deliver.
    /// Its transcript, reviewed recipe and statistics stay in the cache for the next request.
    pub fn release(&self, owner: Option<Uuid>, session: Arc<ChatSession>) {
        drop(session);
        let mut sessions = self.sessions.write();
        if sessions.get(&owner).is_some_and(|s| Arc::strong_count(s) == 1 && s.is_quiescent()) {
            sessions.remove(&owner);
            tracing::debug!("📤 Released idle session for {:?}", owner);
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", get(get_chat).post(submit_chat))
        .route("/api/chat/edit", post(edit_chat))
        .route("/api/chat/accept", post(accept_chat))
        .route("/api/chat/reject", post(reject_chat))
        .route("/api/recipes", get(list_recipes))
        .route("/api/recipes/:id", patch(update_recipe).delete(remove_recipe))
        .route("/api/recipes/:id/favorite", put(set_favorite))
        .route("/api/recipes/:id/rating", put(set_rating))
        .route("/api/recipes/:id/notes", put(set_notes))
        .route("/api/recipes/:id/status", put(set_status))
        .route("/api/recipes/:id/publish", post(publish_recipe).delete(unpublish_recipe))
        .route("/api/recipes/:id/pdf", get(export_pdf))
        .route("/api/community", get(community))
        .route("/api/profile", get(get_profile).put(put_profile))
        .with_state(state)
}

/// Signed-in owner taken from the `x-owner-id` header, if any.
pub struct Owner(pub Option<Uuid>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(OWNER_HEADER) {
            None => Ok(Owner(None)),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
                .map(|id| Owner(Some(id)))
                .ok_or_else(|| AppError::InvalidInput(format!("{OWNER_HEADER} must be a UUID"))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub text: String,
    /// Base64 or data URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub locale: Option<TextDirection>,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub instruction: String,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: RecipeStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Snapshot for the client; pending notifications are handed over once.
fn deliver<T>(
    state: &AppState,
    session: Arc<ChatSession>,
    result: Result<T, AppError>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = result.map(|_| session.drain_snapshot());
    state.release(session.owner(), session);
    Ok(Json(snapshot?))
}

pub async fn get_chat(State(state): State<AppState>, Owner(owner): Owner) -> Json<SessionSnapshot> {
    let session = state.session_for(owner);
    let snapshot = session.drain_snapshot();
    state.release(owner, session);
    Json(snapshot)
}

pub async fn submit_chat(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(body): Json<ChatRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let image = body.image.as_deref().map(ImageData::from_base64).transpose()?;
    let preferences = match owner {
        Some(_) => match state.profiles.load(owner).await {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                tracing::warn!("⚠️ Generating without preferences: {}", e);
                None
            }
        },
        None => None,
    };

    let session = state.session_for(owner);
    let result = session
        .submit(TurnInput { text: body.text, image, locale: body.locale, preferences })
        .await;
    deliver(&state, session, result)
}

pub async fn edit_chat(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(body): Json<EditRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session_for(owner);
    let result = session.edit(&body.instruction).await;
    deliver(&state, session, result)
}

pub async fn accept_chat(State(state): State<AppState>, Owner(owner): Owner) -> Result<Json<Recipe>, AppError> {
    let session = state.session_for(owner);
    let result = session.accept().await;
    state.release(owner, session);
    Ok(Json(result?))
}

pub async fn reject_chat(State(state): State<AppState>, Owner(owner): Owner) -> Result<Json<Recipe>, AppError> {
    let session = state.session_for(owner);
    let result = session.reject().await;
    state.release(owner, session);
    Ok(Json(result?))
}

pub async fn list_recipes(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Recipe>>, AppError> {
    let recipes = if query.refresh {
        state.recipes.list(owner).await?
    } else {
        state.recipes.list_cached(owner, state.cache_max_age).await?
    };
    Ok(Json(recipes))
}

fn updated(result: Option<Recipe>) -> Response {
    match result {
        Some(recipe) => Json(recipe).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn update_recipe(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(patch): Json<RecipePatch>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.update(id, owner, &patch).await?))
}

pub async fn remove_recipe(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.recipes.remove(id, owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_favorite(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(body): Json<FavoriteRequest>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.set_favorite(id, owner, body.value).await?))
}

pub async fn set_rating(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(body): Json<RatingRequest>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.set_rating(id, owner, body.rating).await?))
}

pub async fn set_notes(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(body): Json<NotesRequest>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.set_notes(id, owner, &body.notes).await?))
}

pub async fn set_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusRequest>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.set_status(id, owner, body.status).await?))
}

pub async fn publish_recipe(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.publish(id, owner).await?))
}

pub async fn unpublish_recipe(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(updated(state.recipes.unpublish(id, owner).await?))
}

pub async fn export_pdf(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let owner_id = crate::repository::require_owner(owner)?;
    let recipe = match state.recipes.get(owner_id, id) {
        Some(recipe) => recipe,
        None => state
            .recipes
            .list_cached(owner, state.cache_max_age)
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound)?,
    };

    let pdf_bytes = generate_pdf(&recipe).map_err(|e| {
        tracing::error!("❌ PDF export of {} failed: {}", id, e);
        AppError::Internal(format!("could not render recipe: {e}"))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/pdf"));
    if let Ok(disposition) = format!("attachment; filename=\"recipe_{}.pdf\"", id).parse() {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok((StatusCode::OK, headers, pdf_bytes).into_response())
}

pub async fn community(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, AppError> {
    Ok(Json(state.recipes.community(state.community_limit, state.cache_max_age).await?))
}

pub async fn get_profile(State(state): State<AppState>, Owner(owner): Owner) -> Result<Json<Preferences>, AppError> {
    Ok(Json(state.profiles.load(owner).await?))
}

pub async fn put_profile(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(body): Json<Preferences>,
) -> Result<Json<Preferences>, AppError> {
    Ok(Json(state.profiles.save(owner, &body).await?))
}

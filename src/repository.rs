//! Owner-scoped recipe persistence with an in-memory mirror per owner.
//!
//! Every operation declares how it keeps the mirror consistent with the store
//! (see [`RecipeOperation::policy`]): most apply to the mirror only after the
//! store confirms; toggling a favorite applies first and rolls back on failure.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    cache::{LocalCache, COMMUNITY_RECIPES_CACHE, RECIPES_CACHE},
    error::AppError,
    models::{Recipe, RecipePatch, RecipeResponse, RecipeStatus},
    store::RecipeStore,
    wire::{NewRecipeRow, RecipeRowPatch},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyPolicy {
    /// Mirror changes only after the store confirms.
    ConfirmThenApply,
    /// Mirror changes immediately and is rolled back if the store fails.
    Optimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeOperation {
    Create,
    Update,
    Remove,
    SetFavorite,
    SetRating,
    SetNotes,
    SetStatus,
    Publish,
    Unpublish,
}

impl RecipeOperation {
    pub const fn policy(self) -> ConsistencyPolicy {
        match self {
            RecipeOperation::SetFavorite => ConsistencyPolicy::Optimistic,
            _ => ConsistencyPolicy::ConfirmThenApply,
        }
    }

    /// Repeating the call with the same value is a no-op.
    pub const fn is_idempotent(self) -> bool {
        matches!(self, RecipeOperation::SetFavorite | RecipeOperation::SetRating | RecipeOperation::SetStatus)
    }
}

/// Fails before any store call when there is no signed-in owner.
pub fn require_owner(owner: Option<Uuid>) -> Result<Uuid, AppError> {
    owner.ok_or(AppError::AuthRequired)
}

/// Owners mirrored at once before the least recently used is dropped.
pub const DEFAULT_MIRROR_CAPACITY: usize = 1024;

/// What this process knows about one owner's recipes.
#[derive(Default)]
struct OwnerMirror {
    recipes: Vec<Recipe>,
    /// Set once a full listing has been loaded. Only complete mirrors are cached.
    complete: bool,
    last_used: u64,
}

/// Cached community feed along with the limit it was fetched with.
#[derive(Serialize, Deserialize)]
struct CommunityPage {
    limit: usize,
    recipes: Vec<Recipe>,
}

pub struct RecipeRepository {
    store: Arc<dyn RecipeStore>,
    cache: LocalCache,
    mirror: RwLock<HashMap<Uuid, OwnerMirror>>,
    capacity: usize,
    clock: AtomicU64,
}

impl RecipeRepository {
    pub fn new(store: Arc<dyn RecipeStore>, cache: LocalCache) -> Self {
        Self {
            store,
            cache,
            mirror: RwLock::default(),
            capacity: DEFAULT_MIRROR_CAPACITY,
            clock: AtomicU64::new(0),
        }
    }

    pub fn with_mirror_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Mirrored recipes for an owner, newest first.
    pub fn recipes(&self, owner: Uuid) -> Vec<Recipe> {
        self.mirror.read().get(&owner).map(|m| m.recipes.clone()).unwrap_or_default()
    }

    pub fn get(&self, owner: Uuid, id: Uuid) -> Option<Recipe> {
        self.mirror.read().get(&owner)?.recipes.iter().find(|r| r.id == id).cloned()
    }

    fn owner_cache(&self, owner: Uuid) -> LocalCache {
        self.cache.scoped(owner)
    }

    /// Writes a complete mirror to the cache. Anything less invalidates the cached list,
    /// which may predate this process.
    fn persist_mirror(&self, owner: Uuid) {
        let recipes = match self.mirror.read().get(&owner) {
            Some(m) if m.complete => Some(m.recipes.clone()),
            _ => None,
        };
        match recipes {
            Some(recipes) => self.owner_cache(owner).write(RECIPES_CACHE, &recipes),
            None => self.owner_cache(owner).remove(RECIPES_CACHE),
        }
    }

    /// Runs `change` on the owner's mirror, creating it if needed. When full, the least
    /// recently used owner is dropped first.
    fn with_mirror<R>(&self, owner: Uuid, change: impl FnOnce(&mut OwnerMirror) -> R) -> R {
        let mut mirror = self.mirror.write();
        if !mirror.contains_key(&owner) && mirror.len() >= self.capacity {
            if let Some(oldest) = mirror.iter().min_by_key(|(_, m)| m.last_used).map(|(id, _)| *id) {
                mirror.remove(&oldest);
                debug!("Dropped recipe mirror for {}", oldest);
            }
        }
        let entry = mirror.entry(owner).or_default();
        entry.last_used = self.clock.fetch_add(1, Ordering::Relaxed);
        change(entry)
    }

    /// The mirrored record, if `op` is idempotent and the record already holds the value.
    fn unchanged(&self, op: RecipeOperation, owner: Uuid, id: Uuid, same: impl Fn(&Recipe) -> bool) -> Option<Recipe> {
        if !op.is_idempotent() {
            return None;
        }
        self.get(owner, id).filter(|r| same(r))
    }

    fn load_mirror(&self, owner: Uuid, recipes: Vec<Recipe>) {
        self.with_mirror(owner, |m| {
            m.recipes = recipes;
            m.complete = true;
        });
    }

    /// Applies `change` to the mirrored record, returning the updated copy.
    fn mirror_update(&self, owner: Uuid, id: Uuid, change: impl FnOnce(&mut Recipe)) -> Option<Recipe> {
        let mut mirror = self.mirror.write();
        let recipe = mirror.get_mut(&owner)?.recipes.iter_mut().find(|r| r.id == id)?;
        change(recipe);
        Some(recipe.clone())
    }

    fn mirror_replace(&self, owner: Uuid, recipe: Recipe) {
        if let Some(m) = self.mirror.write().get_mut(&owner) {
            if let Some(slot) = m.recipes.iter_mut().find(|r| r.id == recipe.id) {
                *slot = recipe;
            }
        }
    }

    /// Fetches all recipes for the owner. On failure the mirror is left untouched.
    pub async fn list(&self, owner: Option<Uuid>) -> Result<Vec<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        let rows = self.store.select_recipes(owner).await.map_err(|e| {
            warn!("⚠️ Listing recipes for {} failed: {}", owner, e);
            e
        })?;

        let mut recipes: Vec<Recipe> = rows.into_iter().map(|row| row.into_recipe()).collect();
        recipes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        info!("📚 Loaded {} recipes for {}", recipes.len(), owner);

        self.load_mirror(owner, recipes.clone());
        self.persist_mirror(owner);
        Ok(recipes)
    }

    /// Serves the owner's list from the local cache while it is younger than `max_age`.
    pub async fn list_cached(&self, owner: Option<Uuid>, max_age: Duration) -> Result<Vec<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        if let Some(cached) = self.owner_cache(owner).read::<Vec<Recipe>>(RECIPES_CACHE, max_age) {
            self.load_mirror(owner, cached.clone());
            return Ok(cached);
        }
        self.list(Some(owner)).await
    }

    pub async fn create(&self, owner: Option<Uuid>, response: &RecipeResponse, status: RecipeStatus) -> Result<Recipe, AppError> {
        let owner = require_owner(owner)?;
        let row = NewRecipeRow::from_response(owner, response, status);
        let recipe = self.store.insert_recipe(&row).await?.into_recipe();
        info!("💾 {:?} '{}' ({}) as {:?}", RecipeOperation::Create, recipe.name, recipe.id, status);

        self.with_mirror(owner, |m| m.recipes.insert(0, recipe.clone()));
        self.persist_mirror(owner);
        Ok(recipe)
    }

    /// Sends only the fields present in `patch`.
    pub async fn update(&self, id: Uuid, owner: Option<Uuid>, patch: &RecipePatch) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        if let Some(rating) = patch.rating {
            validate_rating(rating)?;
        }
        if patch.is_empty() {
            return Ok(self.get(owner, id));
        }
        self.apply(RecipeOperation::Update, id, owner, patch).await
    }

    pub async fn remove(&self, id: Uuid, owner: Option<Uuid>) -> Result<(), AppError> {
        let owner = require_owner(owner)?;
        self.store.delete_recipe(id, owner).await?;
        if let Some(m) = self.mirror.write().get_mut(&owner) {
            m.recipes.retain(|r| r.id != id);
        }
        self.persist_mirror(owner);
        info!("🗑️ {:?} {}", RecipeOperation::Remove, id);
        Ok(())
    }

    pub async fn set_favorite(&self, id: Uuid, owner: Option<Uuid>, favorite: bool) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        if let Some(same) = self.unchanged(RecipeOperation::SetFavorite, owner, id, |r| r.is_favorite == favorite) {
            return Ok(Some(same));
        }
        let patch = RecipePatch { is_favorite: Some(favorite), ..Default::default() };
        self.apply(RecipeOperation::SetFavorite, id, owner, &patch).await
    }

    pub async fn set_rating(&self, id: Uuid, owner: Option<Uuid>, rating: u8) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        validate_rating(rating)?;
        if let Some(same) = self.unchanged(RecipeOperation::SetRating, owner, id, |r| r.rating == rating) {
            return Ok(Some(same));
        }
        let patch = RecipePatch { rating: Some(rating), ..Default::default() };
        self.apply(RecipeOperation::SetRating, id, owner, &patch).await
    }

    pub async fn set_notes(&self, id: Uuid, owner: Option<Uuid>, notes: &str) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        let patch = RecipePatch { notes: Some(notes.to_string()), ..Default::default() };
        self.apply(RecipeOperation::SetNotes, id, owner, &patch).await
    }

    pub async fn set_status(&self, id: Uuid, owner: Option<Uuid>, status: RecipeStatus) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        if let Some(same) = self.unchanged(RecipeOperation::SetStatus, owner, id, |r| r.status == status) {
            return Ok(Some(same));
        }
        let patch = RecipePatch { status: Some(status), ..Default::default() };
        self.apply(RecipeOperation::SetStatus, id, owner, &patch).await
    }

    /// Shares a recipe to the community feed.
    pub async fn publish(&self, id: Uuid, owner: Option<Uuid>) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        let patch = RecipePatch { is_public: Some(true), published_at: Some(Utc::now()), ..Default::default() };
        let result = self.apply(RecipeOperation::Publish, id, owner, &patch).await?;
        self.cache.remove(COMMUNITY_RECIPES_CACHE);
        Ok(result)
    }

    pub async fn unpublish(&self, id: Uuid, owner: Option<Uuid>) -> Result<Option<Recipe>, AppError> {
        let owner = require_owner(owner)?;
        let patch = RecipePatch { is_public: Some(false), ..Default::default() };
        let result = self.apply(RecipeOperation::Unpublish, id, owner, &patch).await?;
        self.cache.remove(COMMUNITY_RECIPES_CACHE);
        Ok(result)
    }

    /// Public recipes from every owner, newest publication first. Needs no session.
    /// A cached page serves any request for at most as many recipes as it was fetched with.
    pub async fn community(&self, limit: usize, max_age: Duration) -> Result<Vec<Recipe>, AppError> {
        if let Some(page) = self.cache.read::<CommunityPage>(COMMUNITY_RECIPES_CACHE, max_age) {
            if page.limit >= limit {
                let mut recipes = page.recipes;
                recipes.truncate(limit);
                return Ok(recipes);
            }
        }
        let recipes: Vec<Recipe> = self.store
            .select_public_recipes(limit)
            .await?
            .into_iter()
            .map(|row| row.into_recipe())
            .collect();
        self.cache.write(COMMUNITY_RECIPES_CACHE, &CommunityPage { limit, recipes: recipes.clone() });
        Ok(recipes)
    }

    /// Runs a single-record update under the operation's consistency policy.
    async fn apply(&self, op: RecipeOperation, id: Uuid, owner: Uuid, patch: &RecipePatch) -> Result<Option<Recipe>, AppError> {
        let row_patch = RecipeRowPatch::from(patch);

        match op.policy() {
            ConsistencyPolicy::ConfirmThenApply => {
                let row = self.store.update_recipe(id, owner, &row_patch).await.map_err(|e| {
                    warn!("⚠️ {:?} on {} failed: {}", op, id, e);
                    e
                })?;
                let updated = self.mirror_update(owner, id, |r| patch.apply_to(r)).or_else(|| Some(row.into_recipe()));
                self.persist_mirror(owner);
                Ok(updated)
            }
            ConsistencyPolicy::Optimistic => {
                let previous = self.get(owner, id);
                let updated = self.mirror_update(owner, id, |r| patch.apply_to(r));

                match self.store.update_recipe(id, owner, &row_patch).await {
                    Ok(row) => {
                        self.persist_mirror(owner);
                        Ok(updated.or_else(|| Some(row.into_recipe())))
                    }
                    Err(e) => {
                        warn!("⚠️ {:?} on {} failed, rolling back: {}", op, id, e);
                        if let Some(previous) = previous {
                            self.mirror_replace(owner, previous);
                        }
                        Err(e.into())
                    }
                }
            }
        }
    }
}

fn validate_rating(rating: u8) -> Result<(), AppError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("rating must be between 1 and 5, got {rating}")))
    }
}

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::Preferences,
    repository::require_owner,
    store::RecipeStore,
    wire::ProfileRow,
};

/// Reads and writes the owner's cooking preferences in the `profiles` collection.
pub struct ProfileRepository {
    store: Arc<dyn RecipeStore>,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self { store }
    }

    /// Owners without a profile row, or with an unreadable one, get default preferences.
    pub async fn load(&self, owner: Option<Uuid>) -> Result<Preferences, AppError> {
        let owner = require_owner(owner)?;
        let Some(row) = self.store.select_profile(owner).await? else {
            return Ok(Preferences::default());
        };
        Ok(row.preferences().unwrap_or_else(|e| {
            warn!("⚠️ Profile for {}: {}, using defaults", owner, e);
            Preferences::default()
        }))
    }

    pub async fn save(&self, owner: Option<Uuid>, preferences: &Preferences) -> Result<Preferences, AppError> {
        let owner = require_owner(owner)?;
        let saved = self.store.upsert_profile(&ProfileRow::new(owner, preferences)).await?;
        info!("👤 Saved preferences for {}", owner);
        Ok(saved.preferences().unwrap_or_else(|_| preferences.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn missing_profile_reads_as_defaults() {
        let profiles = ProfileRepository::new(Arc::new(MemoryStore::new()));
        assert_eq!(profiles.load(Some(Uuid::new_v4())).await.unwrap(), Preferences::default());
    }

    #[tokio::test]
    async fn saved_preferences_load_back() {
        let profiles = ProfileRepository::new(Arc::new(MemoryStore::new()));
        let owner = Some(Uuid::new_v4());
        let prefs = Preferences { allergies: vec!["sesame".into()], default_servings: Some(2), ..Default::default() };
        profiles.save(owner, &prefs).await.unwrap();
        assert_eq!(profiles.load(owner).await.unwrap(), prefs);
    }

    #[tokio::test]
    async fn string_encoded_preferences_are_normalized() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let row = ProfileRow {
            user_id: owner,
            preferences: json!("{\"allergies\":[\"nuts\"]}"),
            updated_at: None,
        };
        store.upsert_profile(&row).await.unwrap();

        let prefs = ProfileRepository::new(store).load(Some(owner)).await.unwrap();
        assert_eq!(prefs.allergies, vec!["nuts"]);
    }

    #[tokio::test]
    async fn anonymous_callers_are_refused() {
        let profiles = ProfileRepository::new(Arc::new(MemoryStore::new()));
        assert!(matches!(profiles.load(None).await, Err(AppError::AuthRequired)));
        assert!(matches!(profiles.save(None, &Preferences::default()).await, Err(AppError::AuthRequired)));
    }
}

//! Chat and recipe review for one owner.
//!
//! State moves `Idle -> AwaitingGeneration -> Reviewing -> (Editing -> Reviewing)* -> Resolving -> Idle`,
//! where `Resolving` covers the accept or reject that persists the recipe. While it runs no
//! other turn may start, so a reviewed recipe is saved at most once. Messages and the
//! recipe under review are mirrored to the local cache after every change so a restart
//! resumes where the user left off; the mirror is cleared when the recipe is resolved.
//!
//! Network calls run without holding the session lock. Each generation or edit takes a
//! ticket; if another request starts before it completes, the older result is discarded.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    cache::{LocalCache, CHAT_MESSAGES, CURRENT_RECIPE, LAST_SESSION, USER_STATISTICS},
    error::{AppError, GenerationError},
    gemini::{GenerationRequest, RecipeGenerator},
    locale::{resolve_direction, TextDirection},
    models::{ChatMessage, ImageData, Preferences, Recipe, RecipeResponse, RecipeStatus, Sender, UserStatistics},
    repository::RecipeRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    AwaitingGeneration,
    Reviewing,
    Editing,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Generation,
    Edit,
    Persistence,
    Auth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// How a generation or edit request ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Recipe(RecipeResponse),
    Answer(String),
    Failed(GenerationError),
    /// A newer request started first; this result was dropped.
    Superseded,
}

#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub image: Option<ImageData>,
    pub locale: Option<TextDirection>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    pub current_recipe: Option<RecipeResponse>,
    pub notifications: Vec<Notification>,
    pub statistics: UserStatistics,
}

struct SessionInner {
    state: SessionState,
    messages: Vec<ChatMessage>,
    current: Option<RecipeResponse>,
    notifications: Vec<Notification>,
    stats: UserStatistics,
    ticket: u64,
    last_message_id: i64,
}

impl SessionInner {
    fn push(&mut self, sender: Sender, text: String, direction: TextDirection) -> &mut ChatMessage {
        let id = Utc::now().timestamp_millis().max(self.last_message_id + 1);
        self.last_message_id = id;
        self.messages.push(ChatMessage {
            id,
            text,
            sender,
            is_rtl: Some(direction.is_rtl()),
            image: None,
            suggestions: None,
        });
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    fn notify(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.notifications.push(Notification { kind, message: message.into(), at: Utc::now() });
    }

    /// Where to land after a generation that produced nothing to review.
    fn settle(&mut self) {
        self.state = if self.current.is_some() { SessionState::Reviewing } else { SessionState::Idle };
    }
}

pub struct ChatSession {
    owner: Option<Uuid>,
    generator: Arc<dyn RecipeGenerator>,
    recipes: Arc<RecipeRepository>,
    cache: LocalCache,
    inner: Mutex<SessionInner>,
}

impl ChatSession {
    /// Starts a session, resuming any conversation still in `cache` and younger than `max_age`.
    pub fn restore(
        owner: Option<Uuid>,
        generator: Arc<dyn RecipeGenerator>,
        recipes: Arc<RecipeRepository>,
        cache: LocalCache,
        max_age: Duration,
    ) -> Self {
        let messages: Vec<ChatMessage> = cache.read(CHAT_MESSAGES, max_age).unwrap_or_default();
        let current: Option<RecipeResponse> = cache.read(CURRENT_RECIPE, max_age);
        let stats: UserStatistics = cache.read(USER_STATISTICS, Duration::MAX).unwrap_or_default();
        let state = if current.is_some() { SessionState::Reviewing } else { SessionState::Idle };

        if !messages.is_empty() || current.is_some() {
            info!("♻️ Resumed session with {} messages (reviewing={})", messages.len(), current.is_some());
        }

        let last_message_id = messages.iter().map(|m| m.id).max().unwrap_or(0);
        Self {
            owner,
            generator,
            recipes,
            cache,
            inner: Mutex::new(SessionInner {
                state,
                messages,
                current,
                notifications: Vec::new(),
                stats,
                ticket: 0,
                last_message_id,
            }),
        }
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn current_recipe(&self) -> Option<RecipeResponse> {
        self.inner.lock().current.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().notifications.clone()
    }

    /// Hands pending notifications to the caller so each is shown once.
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.inner.lock().notifications)
    }

    pub fn statistics(&self) -> UserStatistics {
        self.inner.lock().stats
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            state: inner.state,
            messages: inner.messages.clone(),
            current_recipe: inner.current.clone(),
            notifications: inner.notifications.clone(),
            statistics: inner.stats,
        }
    }

    /// Snapshot that hands over pending notifications, taken under one lock.
    pub fn drain_snapshot(&self) -> SessionSnapshot {
        let mut inner = self.inner.lock();
        SessionSnapshot {
            state: inner.state,
            messages: inner.messages.clone(),
            current_recipe: inner.current.clone(),
            notifications: std::mem::take(&mut inner.notifications),
            statistics: inner.stats,
        }
    }

    /// Nothing in flight and nothing left to deliver. Everything else is in the cache.
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.state, SessionState::Idle | SessionState::Reviewing) && inner.notifications.is_empty()
    }

    fn mirror(&self, inner: &SessionInner) {
        self.cache.write(CHAT_MESSAGES, &inner.messages);
        match &inner.current {
            Some(recipe) => self.cache.write(CURRENT_RECIPE, recipe),
            None => self.cache.remove(CURRENT_RECIPE),
        }
        self.cache.write(LAST_SESSION, &Utc::now());
        self.cache.write(USER_STATISTICS, &inner.stats);
    }

    fn clear_mirror(&self, inner: &SessionInner) {
        self.cache.remove(CHAT_MESSAGES);
        self.cache.remove(CURRENT_RECIPE);
        self.cache.write(LAST_SESSION, &Utc::now());
        self.cache.write(USER_STATISTICS, &inner.stats);
    }

    /// Appends the user's turn and asks the generator for a reply.
    pub async fn submit(&self, input: TurnInput) -> Result<TurnOutcome, AppError> {
        let (ticket, request) = self.begin_turn(input)?;
        let result = self.generator.generate(request).await;
        Ok(self.finish_turn(ticket, result))
    }

    fn begin_turn(&self, input: TurnInput) -> Result<(u64, GenerationRequest), AppError> {
        let text = input.text.trim().to_string();
        if text.is_empty() && input.image.is_none() {
            return Err(AppError::InvalidInput("message needs text or an image".into()));
        }

        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Editing => return Err(AppError::InvalidInput("wait for the current edit to finish".into())),
            SessionState::Resolving => return Err(AppError::InvalidInput("wait for the recipe to be saved".into())),
            _ => {}
        }

        let direction = resolve_direction(input.locale, &text);
        let message = inner.push(Sender::User, text.clone(), direction);
        message.image = input.image.as_ref().map(ImageData::to_data_url);

        inner.state = SessionState::AwaitingGeneration;
        inner.ticket += 1;
        let ticket = inner.ticket;
        self.mirror(&inner);
        info!("💬 Turn {} submitted ({} chars, image={})", ticket, text.len(), input.image.is_some());

        let request = GenerationRequest {
            prompt: text,
            locale: Some(direction),
            image: input.image,
            preferences: input.preferences,
        };
        Ok((ticket, request))
    }

    fn finish_turn(&self, ticket: u64, result: Result<RecipeResponse, GenerationError>) -> TurnOutcome {
        let mut inner = self.inner.lock();
        if ticket != inner.ticket {
            info!("⏭️ Dropping result of turn {} (turn {} is newer)", ticket, inner.ticket);
            return TurnOutcome::Superseded;
        }

        let outcome = match result {
            Ok(recipe) if recipe.is_recipe => {
                let direction = recipe.direction();
                let intro = match direction {
                    TextDirection::Rtl => format!("הנה מתכון: {}", recipe.name),
                    TextDirection::Ltr => format!("Here's a recipe: {}", recipe.name),
                };
                inner.push(Sender::Assistant, intro, direction).suggestions = Some(direction.quick_replies());
                inner.stats.generated += 1;
                inner.current = Some(recipe.clone());
                inner.state = SessionState::Reviewing;
                info!("📝 Reviewing '{}'", recipe.name);
                TurnOutcome::Recipe(recipe)
            }
            Ok(answer) => {
                let content = answer.content.clone().unwrap_or_default();
                inner.push(Sender::Assistant, content.clone(), answer.direction());
                inner.settle();
                TurnOutcome::Answer(content)
            }
            Err(e) => {
                warn!("⚠️ Turn {} failed: {}", ticket, e);
                let direction = inner
                    .messages
                    .last()
                    .map_or(TextDirection::Ltr, |m| TextDirection::from_rtl(m.is_rtl.unwrap_or(false)));
                inner.push(Sender::Assistant, direction.apology().to_string(), direction);
                inner.notify(NotificationKind::Generation, format!("Couldn't generate a reply ({}). Try again.", e.reason));
                inner.stats.failed += 1;
                inner.settle();
                TurnOutcome::Failed(e)
            }
        };
        self.mirror(&inner);
        outcome
    }

    /// Asks for a change to the recipe under review. A failed edit leaves it untouched.
    pub async fn edit(&self, instruction: &str) -> Result<TurnOutcome, AppError> {
        let (ticket, prior, direction) = self.begin_edit(instruction)?;
        let result = self.generator.edit(&prior, instruction.trim(), Some(direction)).await;
        Ok(self.finish_edit(ticket, result))
    }

    fn begin_edit(&self, instruction: &str) -> Result<(u64, RecipeResponse, TextDirection), AppError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(AppError::InvalidInput("edit instruction is empty".into()));
        }

        let mut inner = self.inner.lock();
        let prior = match (&inner.state, &inner.current) {
            (SessionState::Reviewing, Some(recipe)) => recipe.clone(),
            _ => return Err(AppError::InvalidInput("there is no recipe to edit".into())),
        };

        let direction = prior.direction();
        inner.push(Sender::User, instruction.to_string(), resolve_direction(None, instruction));
        inner.state = SessionState::Editing;
        inner.ticket += 1;
        let ticket = inner.ticket;
        self.mirror(&inner);
        info!("✏️ Edit {} requested for '{}'", ticket, prior.name);
        Ok((ticket, prior, direction))
    }

    fn finish_edit(&self, ticket: u64, result: Result<RecipeResponse, GenerationError>) -> TurnOutcome {
        let mut inner = self.inner.lock();
        if ticket != inner.ticket {
            info!("⏭️ Dropping result of edit {} (request {} is newer)", ticket, inner.ticket);
            return TurnOutcome::Superseded;
        }

        let outcome = match result {
            Ok(recipe) => {
                let direction = recipe.direction();
                let text = match direction {
                    TextDirection::Rtl => format!("עדכנתי את המתכון: {}", recipe.name),
                    TextDirection::Ltr => format!("Updated the recipe: {}", recipe.name),
                };
                inner.push(Sender::Assistant, text, direction).suggestions = Some(direction.quick_replies());
                inner.stats.edited += 1;
                inner.current = Some(recipe.clone());
                TurnOutcome::Recipe(recipe)
            }
            Err(e) => {
                warn!("⚠️ Edit {} failed, keeping previous recipe: {}", ticket, e);
                let direction = inner.current.as_ref().map_or(TextDirection::Ltr, RecipeResponse::direction);
                inner.push(Sender::Assistant, direction.apology().to_string(), direction);
                inner.notify(NotificationKind::Edit, format!("Couldn't apply your change ({}). The recipe is unchanged.", e.reason));
                inner.stats.failed += 1;
                TurnOutcome::Failed(e)
            }
        };
        inner.settle();
        self.mirror(&inner);
        outcome
    }

    /// Saves the recipe under review as accepted and starts over.
    pub async fn accept(&self) -> Result<Recipe, AppError> {
        self.resolve(RecipeStatus::Accepted).await
    }

    /// Saves the recipe under review as rejected and starts over.
    pub async fn reject(&self) -> Result<Recipe, AppError> {
        self.resolve(RecipeStatus::Rejected).await
    }

    async fn resolve(&self, status: RecipeStatus) -> Result<Recipe, AppError> {
        let recipe = {
            let mut inner = self.inner.lock();
            let recipe = match (&inner.state, &inner.current) {
                (SessionState::Reviewing, Some(recipe)) => recipe.clone(),
                _ => return Err(AppError::InvalidInput("there is no recipe to resolve".into())),
            };
            inner.state = SessionState::Resolving;
            recipe
        };

        let saved = match self.recipes.create(self.owner, &recipe, status).await {
            Ok(saved) => saved,
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.state = SessionState::Reviewing;
                match &e {
                    AppError::AuthRequired => inner.notify(NotificationKind::Auth, "Sign in to save recipes."),
                    other => inner.notify(NotificationKind::Persistence, format!("Couldn't save the recipe ({}).", other.category())),
                }
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        match status {
            RecipeStatus::Rejected => inner.stats.rejected += 1,
            _ => inner.stats.accepted += 1,
        }
        inner.messages.clear();
        inner.current = None;
        inner.state = SessionState::Idle;
        self.clear_mirror(&inner);
        info!("🏁 '{}' resolved as {:?}", saved.name, status);
        Ok(saved)
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{Card, CardPatch, CardStatus, Contribution, CurrentUser, NewCard, StudySession};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid card data: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// The persistent card store the sessions write through. Implemented by
/// the SQLite store and by [`MemoryStore`], so the scheduler and session
/// logic work identically against a pulled snapshot or a real database.
///
/// Card writes are optimistic single-document updates (last writer wins);
/// only the study-session upsert must be an atomic increment.
pub trait CardStore: Clone + Send + Sync + 'static {
    fn create_card(
        &self,
        new: NewCard,
        owner: &CurrentUser,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Card, StoreError>> + Send;

    fn get_card(&self, id: &str) -> impl Future<Output = Result<Card, StoreError>> + Send;

    /// Ordering is not guaranteed; callers re-sort as needed.
    fn list_cards(&self) -> impl Future<Output = Result<Vec<Card>, StoreError>> + Send;

    /// Fails with `NotFound` if the id is absent.
    fn update_card(
        &self,
        id: &str,
        patch: CardPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_card(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn add_contribution(
        &self,
        card_id: &str,
        contribution: Contribution,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removing an index that no longer exists is a no-op; another user may
    /// have removed it first.
    fn remove_contribution(
        &self,
        card_id: &str,
        index: usize,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Commutative increment on the (user, day) aggregate: creates the row
    /// with `session_count` 1, or adds the totals and bumps the count.
    fn upsert_study_session(
        &self,
        user_id: &str,
        date: NaiveDate,
        total_reviewed: i64,
        total_correct: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// A user's daily aggregates, newest first.
    fn study_history(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<StudySession>, StoreError>> + Send;
}

/// In-memory store. Backs the tests and doubles as the snapshot transport
/// for offline use.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    cards: Vec<Card>,
    sessions: HashMap<(String, NaiveDate), StudySession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with pre-built cards, for tests.
    pub fn with_cards(cards: Vec<Card>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().cards = cards;
        store
    }
}

impl CardStore for MemoryStore {
    async fn create_card(
        &self,
        mut new: NewCard,
        owner: &CurrentUser,
        now: DateTime<Utc>,
    ) -> Result<Card, StoreError> {
        new.validate().map_err(StoreError::Invalid)?;
        let card = Card {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            owner_name: owner.name.clone(),
            front: new.front,
            back: new.back,
            example: new.example,
            category: new.category,
            status: CardStatus::Learning,
            leitner_box: 1,
            streak: 0,
            correct_count: 0,
            wrong_count: 0,
            last_practiced: None,
            contributions: Vec::new(),
            created_at: now,
        };
        self.inner.lock().unwrap().cards.push(card.clone());
        Ok(card)
    }

    async fn get_card(&self, id: &str) -> Result<Card, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .cards
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("card {id}")))
    }

    async fn list_cards(&self) -> Result<Vec<Card>, StoreError> {
        Ok(self.inner.lock().unwrap().cards.clone())
    }

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let card = inner
            .cards
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("card {id}")))?;
        patch.apply(card);
        Ok(())
    }

    async fn delete_card(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.cards.len();
        inner.cards.retain(|c| c.id != id);
        if inner.cards.len() == before {
            return Err(StoreError::NotFound(format!("card {id}")));
        }
        Ok(())
    }

    async fn add_contribution(
        &self,
        card_id: &str,
        contribution: Contribution,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let card = inner
            .cards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or_else(|| StoreError::NotFound(format!("card {card_id}")))?;
        card.contributions.push(contribution);
        Ok(())
    }

    async fn remove_contribution(&self, card_id: &str, index: usize) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let card = inner
            .cards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or_else(|| StoreError::NotFound(format!("card {card_id}")))?;
        if index < card.contributions.len() {
            card.contributions.remove(index);
        }
        Ok(())
    }

    async fn upsert_study_session(
        &self,
        user_id: &str,
        date: NaiveDate,
        total_reviewed: i64,
        total_correct: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .sessions
            .entry((user_id.to_string(), date))
            .or_insert_with(|| StudySession {
                user_id: user_id.to_string(),
                date,
                total_reviewed: 0,
                total_correct: 0,
                session_count: 0,
                last_session_at: now,
            });
        entry.total_reviewed += total_reviewed;
        entry.total_correct += total_correct;
        entry.session_count += 1;
        entry.last_session_at = now;
        Ok(())
    }

    async fn study_history(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<StudySession> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }
}

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::models::{Card, CardPatch, CardStatus, Category, Contribution, CurrentUser, Difficulty};
use crate::recorder;
use crate::srs::{self, NextReview};
use crate::store::{CardStore, StoreError};

/// Why a session could not start. Reported to the caller as data, never a
/// fault; the UI turns it into an empty-state screen.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    #[error("no cards available")]
    NoCards,
    #[error("nothing due for review")]
    NothingDue(NextReview),
    #[error("need at least {min} cards, only {available} available")]
    NotEnoughCards { min: usize, available: usize },
    #[error("unsupported timer: {0}s")]
    UnsupportedTimer(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Practice,
    Review,
}

/// Result screen for a finished practice/review run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub kind: SessionKind,
    pub correct: u32,
    pub wrong: u32,
    pub total: u32,
    pub percent: u32,
}

impl SessionSummary {
    fn new(kind: SessionKind, correct: u32, wrong: u32) -> Self {
        let total = correct + wrong;
        let percent = if total > 0 {
            (correct as f64 / total as f64 * 100.0).round() as u32
        } else {
            0
        };
        SessionSummary {
            kind,
            correct,
            wrong,
            total,
            percent,
        }
    }
}

/// Front side of the current card, shown before reveal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptView {
    pub position: usize,
    pub total: usize,
    pub front: String,
    pub category: Category,
    pub example: Option<String>,
    #[serde(rename = "box")]
    pub leitner_box: i64,
    pub streak: i64,
    pub correct: u32,
    pub wrong: u32,
    pub revealed: bool,
}

/// Back side plus contributions, shown after reveal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealView {
    pub back: String,
    pub contributions: Vec<Contribution>,
}

/// One reveal-then-rate pass over a candidate card set. Free practice and
/// scheduled review share this loop; they differ only in how the candidate
/// set is chosen and ordered.
pub struct CardSession<S> {
    store: S,
    clock: Arc<dyn Clock>,
    user: CurrentUser,
    kind: SessionKind,
    cards: Vec<Card>,
    index: usize,
    revealed: bool,
    correct: u32,
    wrong: u32,
    summary: Option<SessionSummary>,
}

impl<S> std::fmt::Debug for CardSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardSession")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("revealed", &self.revealed)
            .field("correct", &self.correct)
            .field("wrong", &self.wrong)
            .finish_non_exhaustive()
    }
}

impl<S: CardStore> CardSession<S> {
    /// Free practice over a caller-filtered set: prefers the cards still
    /// marked learning, falls back to the whole filtered set, and shuffles
    /// uniformly with no weighting by box.
    pub fn start_practice(
        store: S,
        clock: Arc<dyn Clock>,
        user: CurrentUser,
        candidates: Vec<Card>,
        rng: &mut StdRng,
    ) -> Result<Self, StartError> {
        let mut cards: Vec<Card> = candidates
            .iter()
            .filter(|c| c.status == CardStatus::Learning)
            .cloned()
            .collect();
        if cards.is_empty() {
            cards = candidates;
        }
        if cards.is_empty() {
            return Err(StartError::NoCards);
        }
        cards.shuffle(rng);
        Ok(Self::new(store, clock, user, SessionKind::Practice, cards))
    }

    /// Scheduled review: only due cards, lower boxes first (harder cards
    /// first), stable within a box. With nothing due, reports the nearest
    /// future due date instead of starting.
    pub fn start_review(
        store: S,
        clock: Arc<dyn Clock>,
        user: CurrentUser,
        all_cards: Vec<Card>,
    ) -> Result<Self, StartError> {
        let now = clock.now();
        let mut due = srs::due_cards(&all_cards, now);
        if due.is_empty() {
            return Err(StartError::NothingDue(srs::next_due_summary(
                &all_cards, now,
            )));
        }
        due.sort_by_key(srs::box_of);
        Ok(Self::new(store, clock, user, SessionKind::Review, due))
    }

    fn new(
        store: S,
        clock: Arc<dyn Clock>,
        user: CurrentUser,
        kind: SessionKind,
        cards: Vec<Card>,
    ) -> Self {
        CardSession {
            store,
            clock,
            user,
            kind,
            cards,
            index: 0,
            revealed: false,
            correct: 0,
            wrong: 0,
            summary: None,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.summary
    }

    pub fn prompt(&self) -> Option<PromptView> {
        let card = self.cards.get(self.index)?;
        if self.is_finished() {
            return None;
        }
        Some(PromptView {
            position: self.index + 1,
            total: self.cards.len(),
            front: card.front.clone(),
            category: card.category,
            example: card.example.clone(),
            leitner_box: srs::box_of(card),
            streak: card.streak,
            correct: self.correct,
            wrong: self.wrong,
            revealed: self.revealed,
        })
    }

    /// Flips the current card. Idempotent; there is no timer on this side.
    pub fn reveal(&mut self) -> Option<RevealView> {
        if self.is_finished() {
            return None;
        }
        let card = self.cards.get(self.index)?;
        self.revealed = true;
        Some(RevealView {
            back: card.back.clone(),
            contributions: card.contributions.clone(),
        })
    }

    /// Applies one self-assessment to the revealed card: Leitner transition,
    /// best-effort persistence, local tally, advance. A write failure never
    /// interrupts the session; a concurrently deleted card is skipped
    /// without crediting or penalizing.
    pub async fn rate(&mut self, difficulty: Difficulty) {
        if self.is_finished() || !self.revealed {
            return;
        }
        let Some(card) = self.cards.get(self.index).cloned() else {
            return;
        };

        let now = self.clock.now();
        let rating = srs::rate(&card, difficulty);
        let mut updated = card.clone();
        srs::apply_rating(&mut updated, rating, now);

        let patch = CardPatch {
            leitner_box: Some(updated.leitner_box),
            streak: Some(updated.streak),
            correct_count: Some(updated.correct_count),
            wrong_count: Some(updated.wrong_count),
            last_practiced: Some(now),
            status: Some(updated.status),
            ..Default::default()
        };

        match self.store.update_card(&card.id, patch).await {
            Ok(()) => {
                self.cards[self.index] = updated;
                self.tally(rating.is_correct);
            }
            Err(StoreError::NotFound(_)) => {
                log::info!("card {} vanished mid-session, skipping", card.id);
            }
            Err(e) => {
                // Best effort: local progress stays consistent even if the
                // remote write was lost.
                log::warn!("failed to persist rating for card {}: {e}", card.id);
                self.tally(rating.is_correct);
            }
        }

        self.advance().await;
    }

    fn tally(&mut self, is_correct: bool) {
        if is_correct {
            self.correct += 1;
        } else {
            self.wrong += 1;
        }
    }

    async fn advance(&mut self) {
        self.index += 1;
        self.revealed = false;
        if self.index >= self.cards.len() {
            let summary = SessionSummary::new(self.kind, self.correct, self.wrong);
            self.summary = Some(summary);
            recorder::record(
                &self.store,
                &self.user,
                self.clock.now(),
                summary.total as i64,
                summary.correct as i64,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::test_card;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use chrono::Utc;
    use rand::SeedableRng;

    fn user() -> CurrentUser {
        CurrentUser {
            id: "u1".to_string(),
            name: "Mina".to_string(),
        }
    }

    fn clock() -> Arc<FixedClock> {
        FixedClock::at(Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn practice_prefers_learning_cards() {
        let mut mastered = test_card("m", "done", "done");
        mastered.status = CardStatus::Mastered;
        mastered.leitner_box = 5;
        let learning = test_card("l", "apple", "a fruit");
        let cards = vec![mastered, learning];
        let store = MemoryStore::with_cards(cards.clone());

        let session =
            CardSession::start_practice(store, clock(), user(), cards, &mut rng()).unwrap();
        let prompt = session.prompt().unwrap();
        assert_eq!(prompt.total, 1);
        assert_eq!(prompt.front, "apple");
    }

    #[tokio::test]
    async fn practice_falls_back_to_full_set_when_all_mastered() {
        let mut mastered = test_card("m", "done", "done");
        mastered.status = CardStatus::Mastered;
        mastered.leitner_box = 5;
        let cards = vec![mastered];
        let store = MemoryStore::with_cards(cards.clone());

        let session =
            CardSession::start_practice(store, clock(), user(), cards, &mut rng()).unwrap();
        assert_eq!(session.prompt().unwrap().total, 1);
    }

    #[tokio::test]
    async fn practice_with_no_cards_cannot_start() {
        let store = MemoryStore::new();
        let err = CardSession::start_practice(store, clock(), user(), Vec::new(), &mut rng())
            .unwrap_err();
        assert!(matches!(err, StartError::NoCards));
    }

    #[tokio::test]
    async fn review_orders_due_cards_by_box() {
        let mut a = test_card("a", "three", "3");
        a.leitner_box = 3;
        let mut b = test_card("b", "one", "1");
        b.leitner_box = 1;
        let mut c = test_card("c", "two", "2");
        c.leitner_box = 2;
        // All fresh-due (never practiced).
        let cards = vec![a, b, c];
        let store = MemoryStore::with_cards(cards.clone());

        let mut session = CardSession::start_review(store, clock(), user(), cards).unwrap();
        let mut seen = Vec::new();
        while !session.is_finished() {
            seen.push(session.prompt().unwrap().leitner_box);
            session.reveal();
            session.rate(Difficulty::Good).await;
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn review_with_nothing_due_reports_next_date() {
        let mut card = test_card("a", "apple", "a fruit");
        card.leitner_box = 3;
        card.last_practiced = Some(Utc.with_ymd_and_hms(2026, 8, 19, 9, 0, 0).unwrap());
        let cards = vec![card];
        let store = MemoryStore::with_cards(cards.clone());

        let err = CardSession::start_review(store, clock(), user(), cards).unwrap_err();
        match err {
            StartError::NothingDue(NextReview::Upcoming { in_days, cards, .. }) => {
                assert_eq!(in_days, 2);
                assert_eq!(cards, 1);
            }
            other => panic!("unexpected start error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rating_before_reveal_is_ignored() {
        let cards = vec![test_card("a", "apple", "a fruit")];
        let store = MemoryStore::with_cards(cards.clone());
        let mut session =
            CardSession::start_practice(store, clock(), user(), cards, &mut rng()).unwrap();

        session.rate(Difficulty::Good).await;
        assert!(!session.is_finished());
        assert_eq!(session.prompt().unwrap().position, 1);
    }

    #[tokio::test]
    async fn rating_persists_and_finishes_with_summary() {
        let cards = vec![
            test_card("a", "apple", "a fruit"),
            test_card("b", "pear", "another fruit"),
        ];
        let store = MemoryStore::with_cards(cards.clone());
        let mut session = CardSession::start_practice(
            store.clone(),
            clock(),
            user(),
            cards,
            &mut rng(),
        )
        .unwrap();

        session.reveal();
        session.rate(Difficulty::Good).await;
        session.reveal();
        session.rate(Difficulty::Again).await;

        let summary = session.summary().unwrap();
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.wrong, 1);
        assert_eq!(summary.percent, 50);

        // Both card writes landed.
        let stored = store.list_cards().await.unwrap();
        let rated: Vec<_> = stored.iter().filter(|c| c.last_practiced.is_some()).collect();
        assert_eq!(rated.len(), 2);

        // And the day aggregate was recorded once.
        let history = store.study_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_reviewed, 2);
        assert_eq!(history[0].total_correct, 1);
        assert_eq!(history[0].session_count, 1);
    }

    #[tokio::test]
    async fn deleted_card_is_skipped_without_crediting() {
        let cards = vec![
            test_card("a", "apple", "a fruit"),
            test_card("b", "pear", "another fruit"),
        ];
        // Store only knows about card b; card a was deleted concurrently.
        let store = MemoryStore::with_cards(vec![cards[1].clone()]);
        let mut session = CardSession::start_review(store.clone(), clock(), user(), cards)
            .unwrap();

        session.reveal();
        session.rate(Difficulty::Good).await;
        session.reveal();
        session.rate(Difficulty::Good).await;

        let summary = session.summary().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.correct, 1);
    }
}

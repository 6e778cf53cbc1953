use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Fixed label set for cards. Used for filtering and icons only, no effect
/// on scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Vocabulary,
    Phrase,
    Sentence,
    Grammar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Learning,
    Mastered,
}

impl CardStatus {
    /// Box 5 means mastered; anything below is still learning.
    pub fn for_box(leitner_box: i64) -> Self {
        if leitner_box >= 5 {
            CardStatus::Mastered
        } else {
            CardStatus::Learning
        }
    }
}

/// Self-assessment offered after a card is revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Again,
    Hard,
    Good,
    Easy,
}

impl Difficulty {
    pub fn is_correct(self) -> bool {
        matches!(self, Difficulty::Good | Difficulty::Easy)
    }
}

/// A collaborative annotation on someone's card. Append/remove only,
/// never affects scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub contributor_id: String,
    pub contributor_name: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub example: String,
    pub created_at: DateTime<Utc>,
}

/// A unit of memorization. Owned by its creator for edit/delete, readable
/// and ratable by every member of the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub owner_id: String,
    pub owner_name: String,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub example: Option<String>,
    pub category: Category,
    pub status: CardStatus,
    /// Leitner box, 1..=5.
    #[serde(rename = "box")]
    pub leitner_box: i64,
    /// Consecutive good/easy ratings since the last miss.
    pub streak: i64,
    pub correct_count: i64,
    pub wrong_count: i64,
    /// Null until the first rating event.
    pub last_practiced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    pub created_at: DateTime<Utc>,
}

/// Fields a user supplies when creating a card. The store assigns the id
/// and the scheduling defaults (box 1, learning, zero counters).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub example: Option<String>,
    pub category: Category,
}

impl NewCard {
    /// Front and back are required non-empty text.
    pub fn validate(&mut self) -> Result<(), &'static str> {
        self.front = self.front.trim().to_string();
        self.back = self.back.trim().to_string();
        self.example = self
            .example
            .take()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        if self.front.is_empty() || self.back.is_empty() {
            return Err("both sides of the card are required");
        }
        Ok(())
    }
}

/// Partial update applied to a single card. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub front: Option<String>,
    pub back: Option<String>,
    pub example: Option<Option<String>>,
    pub category: Option<Category>,
    pub status: Option<CardStatus>,
    pub leitner_box: Option<i64>,
    pub streak: Option<i64>,
    pub correct_count: Option<i64>,
    pub wrong_count: Option<i64>,
    pub last_practiced: Option<DateTime<Utc>>,
}

impl CardPatch {
    pub fn apply(&self, card: &mut Card) {
        if let Some(front) = &self.front {
            card.front = front.clone();
        }
        if let Some(back) = &self.back {
            card.back = back.clone();
        }
        if let Some(example) = &self.example {
            card.example = example.clone();
        }
        if let Some(category) = self.category {
            card.category = category;
        }
        if let Some(status) = self.status {
            card.status = status;
        }
        if let Some(leitner_box) = self.leitner_box {
            card.leitner_box = leitner_box;
        }
        if let Some(streak) = self.streak {
            card.streak = streak;
        }
        if let Some(correct_count) = self.correct_count {
            card.correct_count = correct_count;
        }
        if let Some(wrong_count) = self.wrong_count {
            card.wrong_count = wrong_count;
        }
        if let Some(last_practiced) = self.last_practiced {
            card.last_practiced = Some(last_practiced);
        }
    }
}

/// Caller-supplied predicate selecting a session's candidate set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardFilter {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub status: Option<CardStatus>,
    #[serde(default)]
    pub search: Option<String>,
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        if let Some(category) = self.category {
            if card.category != category {
                return false;
            }
        }
        if let Some(status) = self.status {
            if card.status != status {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !needle.is_empty()
                && !card.front.to_lowercase().contains(&needle)
                && !card.back.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }

    pub fn select(&self, cards: &[Card]) -> Vec<Card> {
        cards.iter().filter(|c| self.matches(c)).cloned().collect()
    }
}

/// One aggregate row per (user, calendar day). Counters only ever grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub user_id: String,
    pub date: NaiveDate,
    pub total_reviewed: i64,
    pub total_correct: i64,
    pub session_count: i64,
    pub last_session_at: DateTime<Utc>,
}

/// Authenticated identity for the duration of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
pub fn test_card(id: &str, front: &str, back: &str) -> Card {
    use chrono::TimeZone;
    Card {
        id: id.to_string(),
        owner_id: "u1".to_string(),
        owner_name: "Mina".to_string(),
        front: front.to_string(),
        back: back.to_string(),
        example: None,
        category: Category::Vocabulary,
        status: CardStatus::Learning,
        leitner_box: 1,
        streak: 0,
        correct_count: 0,
        wrong_count: 0,
        last_practiced: None,
        contributions: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_box() {
        assert_eq!(CardStatus::for_box(1), CardStatus::Learning);
        assert_eq!(CardStatus::for_box(4), CardStatus::Learning);
        assert_eq!(CardStatus::for_box(5), CardStatus::Mastered);
    }

    #[test]
    fn new_card_requires_both_sides() {
        let mut new = NewCard {
            front: "  ".to_string(),
            back: "meaning".to_string(),
            example: None,
            category: Category::Vocabulary,
        };
        assert!(new.validate().is_err());

        let mut new = NewCard {
            front: " apple ".to_string(),
            back: " a fruit ".to_string(),
            example: Some("   ".to_string()),
            category: Category::Vocabulary,
        };
        assert!(new.validate().is_ok());
        assert_eq!(new.front, "apple");
        assert_eq!(new.back, "a fruit");
        assert_eq!(new.example, None);
    }

    #[test]
    fn filter_matches_search_on_both_sides() {
        let card = test_card("c1", "apple", "a red fruit");
        let filter = CardFilter {
            search: Some("FRUIT".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&card));

        let filter = CardFilter {
            search: Some("banana".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&card));

        let filter = CardFilter {
            status: Some(CardStatus::Mastered),
            ..Default::default()
        };
        assert!(!filter.matches(&card));
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let mut card = test_card("c1", "apple", "a red fruit");
        let patch = CardPatch {
            leitner_box: Some(3),
            streak: Some(2),
            status: Some(CardStatus::Learning),
            ..Default::default()
        };
        patch.apply(&mut card);
        assert_eq!(card.leitner_box, 3);
        assert_eq!(card.streak, 2);
        assert_eq!(card.front, "apple");
        assert_eq!(card.correct_count, 0);
        assert!(card.last_practiced.is_none());
    }
}

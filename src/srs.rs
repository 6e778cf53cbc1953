use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{Card, CardStatus, Difficulty};

/// Review interval in days for each Leitner box.
///
/// Box 1: daily, Box 2: 1 day, Box 3: 3 days, Box 4: 7 days,
/// Box 5: 14 days (mastered).
pub const INTERVALS: [i64; 5] = [0, 1, 3, 7, 14];

/// Current box, clamped to the valid 1..=5 range.
pub fn box_of(card: &Card) -> i64 {
    card.leitner_box.clamp(1, 5)
}

pub fn interval_days(leitner_box: i64) -> i64 {
    INTERVALS[(leitner_box.clamp(1, 5) - 1) as usize]
}

/// The calendar day the card comes due: last practice (or creation) plus
/// the box interval, truncated to midnight. Comparisons are date-granular,
/// never time-granular.
pub fn next_review_date(card: &Card) -> NaiveDate {
    let base = card.last_practiced.unwrap_or(card.created_at);
    base.date_naive() + Duration::days(interval_days(box_of(card)))
}

pub fn is_due(card: &Card, now: DateTime<Utc>) -> bool {
    next_review_date(card) <= now.date_naive()
}

/// All non-mastered cards whose review date has arrived.
pub fn due_cards(cards: &[Card], now: DateTime<Utc>) -> Vec<Card> {
    cards
        .iter()
        .filter(|c| c.status != CardStatus::Mastered && is_due(c, now))
        .cloned()
        .collect()
}

/// Outcome of a single rating event. The caller applies the side-effect
/// contract (counters, last-practiced, status) via [`apply_rating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating {
    pub new_box: i64,
    pub new_streak: i64,
    pub is_correct: bool,
}

/// Leitner transition for one self-assessment:
/// again resets to box 1, hard stays put, good moves up one box,
/// easy jumps two. Upward moves cap at box 5; streak survives only
/// correct answers.
pub fn rate(card: &Card, difficulty: Difficulty) -> Rating {
    let current = box_of(card);
    match difficulty {
        Difficulty::Again => Rating {
            new_box: 1,
            new_streak: 0,
            is_correct: false,
        },
        Difficulty::Hard => Rating {
            new_box: current.max(1),
            new_streak: 0,
            is_correct: false,
        },
        Difficulty::Good => Rating {
            new_box: (current + 1).min(5),
            new_streak: card.streak + 1,
            is_correct: true,
        },
        Difficulty::Easy => Rating {
            new_box: (current + 2).min(5),
            new_streak: card.streak + 1,
            is_correct: true,
        },
    }
}

/// Applies a rating to the card: box, streak, cumulative counters,
/// last-practiced timestamp, and the status derived from the new box.
pub fn apply_rating(card: &mut Card, rating: Rating, now: DateTime<Utc>) {
    card.leitner_box = rating.new_box;
    card.streak = rating.new_streak;
    if rating.is_correct {
        card.correct_count += 1;
    } else {
        card.wrong_count += 1;
    }
    card.last_practiced = Some(now);
    card.status = CardStatus::for_box(rating.new_box);
}

/// Deck-level counts for the stats header and the due badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckStats {
    pub total: usize,
    pub mastered: usize,
    pub due: usize,
    /// Cards per box, index 0 = box 1.
    pub boxes: [usize; 5],
}

pub fn deck_stats(cards: &[Card], now: DateTime<Utc>) -> DeckStats {
    let mut stats = DeckStats {
        total: cards.len(),
        mastered: 0,
        due: 0,
        boxes: [0; 5],
    };
    for card in cards {
        stats.boxes[(box_of(card) - 1) as usize] += 1;
        if card.status == CardStatus::Mastered {
            stats.mastered += 1;
        } else if is_due(card, now) {
            stats.due += 1;
        }
    }
    stats
}

pub fn due_count(cards: &[Card], now: DateTime<Utc>) -> usize {
    cards
        .iter()
        .filter(|c| c.status != CardStatus::Mastered && is_due(c, now))
        .count()
}

/// What the review screen reports when nothing is due right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NextReview {
    /// Every card in the deck has reached box 5.
    AllMastered,
    /// Nearest future due date across the still-learning cards.
    Upcoming {
        date: NaiveDate,
        in_days: i64,
        cards: usize,
    },
}

/// Minimum next-review date among non-due, non-mastered cards, with its
/// day distance from today.
pub fn next_due_summary(cards: &[Card], now: DateTime<Utc>) -> NextReview {
    let today = now.date_naive();
    let pending: Vec<&Card> = cards
        .iter()
        .filter(|c| c.status != CardStatus::Mastered)
        .collect();
    if pending.is_empty() {
        return NextReview::AllMastered;
    }
    let future: Vec<&&Card> = pending.iter().filter(|c| !is_due(c, now)).collect();
    match future.iter().map(|c| next_review_date(c)).min() {
        Some(date) => NextReview::Upcoming {
            date,
            in_days: (date - today).num_days(),
            cards: future.len(),
        },
        // Everything pending is already due.
        None => NextReview::Upcoming {
            date: today,
            in_days: 0,
            cards: pending.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_card;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn fresh_card_is_due_immediately() {
        let card = test_card("c1", "apple", "a fruit");
        assert!(is_due(&card, card.created_at));
    }

    #[test]
    fn again_always_resets_to_box_one() {
        for start in 1..=5 {
            let mut card = test_card("c1", "apple", "a fruit");
            card.leitner_box = start;
            card.streak = 7;
            let rating = rate(&card, Difficulty::Again);
            assert_eq!(rating.new_box, 1);
            assert_eq!(rating.new_streak, 0);
            assert!(!rating.is_correct);
        }
    }

    #[test]
    fn hard_keeps_box_but_counts_wrong() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 3;
        card.streak = 4;
        let rating = rate(&card, Difficulty::Hard);
        assert_eq!(rating.new_box, 3);
        assert_eq!(rating.new_streak, 0);
        assert!(!rating.is_correct);
    }

    #[test]
    fn good_caps_at_box_five() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 5;
        card.streak = 2;
        let rating = rate(&card, Difficulty::Good);
        assert_eq!(rating.new_box, 5);
        assert_eq!(rating.new_streak, 3);
        assert!(rating.is_correct);
    }

    #[test]
    fn easy_from_box_four_masters_the_card() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 4;
        let rating = rate(&card, Difficulty::Easy);
        assert_eq!(rating.new_box, 5);

        let now = at(2026, 8, 10);
        apply_rating(&mut card, rating, now);
        assert_eq!(card.status, CardStatus::Mastered);
        assert_eq!(card.correct_count, 1);
        assert_eq!(card.last_practiced, Some(now));
    }

    #[test]
    fn box_stays_in_range_over_any_sequence() {
        let mut card = test_card("c1", "apple", "a fruit");
        let sequence = [
            Difficulty::Easy,
            Difficulty::Easy,
            Difficulty::Easy,
            Difficulty::Again,
            Difficulty::Hard,
            Difficulty::Good,
            Difficulty::Easy,
            Difficulty::Good,
        ];
        for (i, d) in sequence.iter().enumerate() {
            let rating = rate(&card, *d);
            apply_rating(&mut card, rating, at(2026, 8, 1 + i as u32));
            assert!((1..=5).contains(&card.leitner_box));
            assert!(card.streak >= 0);
        }
    }

    #[test]
    fn box_three_card_is_due_on_day_three() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 3;
        card.last_practiced = Some(at(2026, 8, 10));

        assert_eq!(
            next_review_date(&card),
            chrono::NaiveDate::from_ymd_opt(2026, 8, 13).unwrap()
        );
        assert!(!is_due(&card, at(2026, 8, 12)));
        assert!(is_due(&card, at(2026, 8, 13)));
    }

    #[test]
    fn due_is_monotonic_in_time() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 2;
        card.last_practiced = Some(at(2026, 8, 10));
        let first_due = at(2026, 8, 11);
        assert!(is_due(&card, first_due));
        for days in 1..30 {
            assert!(is_due(&card, first_due + Duration::days(days)));
        }
    }

    #[test]
    fn due_comparison_is_date_granular() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.leitner_box = 2;
        // Practiced late in the evening; still due at midnight next day.
        card.last_practiced = Some(Utc.with_ymd_and_hms(2026, 8, 10, 23, 55, 0).unwrap());
        assert!(is_due(&card, Utc.with_ymd_and_hms(2026, 8, 11, 0, 5, 0).unwrap()));
    }

    #[test]
    fn mastered_cards_never_appear_due() {
        let mut card = test_card("c1", "apple", "a fruit");
        card.status = CardStatus::Mastered;
        card.leitner_box = 5;
        let now = at(2026, 9, 30);
        assert!(due_cards(&[card.clone()], now).is_empty());
        assert_eq!(due_count(&[card], now), 0);
    }

    #[test]
    fn deck_stats_count_boxes_and_due() {
        let now = at(2026, 8, 20);
        let mut a = test_card("a", "x", "y");
        a.leitner_box = 1; // due (fresh)
        let mut b = test_card("b", "x", "y");
        b.leitner_box = 3;
        b.last_practiced = Some(at(2026, 8, 19)); // due on the 22nd
        let mut c = test_card("c", "x", "y");
        c.leitner_box = 5;
        c.status = CardStatus::Mastered;

        let stats = deck_stats(&[a, b, c], now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.mastered, 1);
        assert_eq!(stats.due, 1);
        assert_eq!(stats.boxes, [1, 0, 1, 0, 1]);
    }

    #[test]
    fn next_due_summary_reports_nearest_future_date() {
        let now = at(2026, 8, 20);
        let mut a = test_card("a", "x", "y");
        a.leitner_box = 4;
        a.last_practiced = Some(at(2026, 8, 18)); // due on the 25th
        let mut b = test_card("b", "x", "y");
        b.leitner_box = 3;
        b.last_practiced = Some(at(2026, 8, 19)); // due on the 22nd

        match next_due_summary(&[a, b], now) {
            NextReview::Upcoming { date, in_days, cards } => {
                assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2026, 8, 22).unwrap());
                assert_eq!(in_days, 2);
                assert_eq!(cards, 2);
            }
            other => panic!("unexpected summary: {other:?}"),
        }
    }

    #[test]
    fn next_due_summary_all_mastered() {
        let now = at(2026, 8, 20);
        let mut card = test_card("a", "x", "y");
        card.status = CardStatus::Mastered;
        card.leitner_box = 5;
        assert_eq!(next_due_summary(&[card], now), NextReview::AllMastered);
    }
}

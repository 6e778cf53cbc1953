use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::models::{Card, CardPatch, CardStatus, Category, CurrentUser};
use crate::recorder;
use crate::session::StartError;
use crate::store::{CardStore, StoreError};

pub const MIN_CARDS: usize = 4;
pub const MAX_QUESTIONS: usize = 30;
pub const TIMER_CHOICES: [u32; 4] = [0, 10, 15, 20];

/// Stand-in choice text when the pool has fewer than 3 usable distractors.
const PLACEHOLDER: &str = "—";

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizConfig {
    pub question_count: usize,
    /// 0 means untimed.
    pub timer_secs: u32,
    pub include_mastered: bool,
}

impl Default for QuizConfig {
    fn default() -> Self {
        QuizConfig {
            question_count: 10,
            timer_secs: 15,
            include_mastered: false,
        }
    }
}

/// Which way the card is asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Question shows the back; pick the matching front.
    MeaningToWord,
    /// Question shows the front; pick the matching back.
    WordToMeaning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerOutcome {
    Correct,
    Wrong,
    Timeout,
}

/// What the caller shows after a question resolves.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizFeedback {
    pub outcome: AnswerOutcome,
    pub correct_index: usize,
    pub selected: Option<usize>,
    pub streak: u32,
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeBand {
    Perfect,
    Excellent,
    Good,
    KeepTrying,
    StudyMore,
}

impl GradeBand {
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            100.. => GradeBand::Perfect,
            80..=99 => GradeBand::Excellent,
            60..=79 => GradeBand::Good,
            40..=59 => GradeBand::KeepTrying,
            _ => GradeBand::StudyMore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub correct: u32,
    pub wrong: u32,
    pub total: u32,
    pub percent: u32,
    pub grade: GradeBand,
    pub best_streak: u32,
}

/// Setup-screen numbers for a candidate set.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSetup {
    pub available: usize,
    pub mastered_excluded: usize,
    pub min_questions: usize,
    pub max_questions: usize,
    pub can_start: bool,
}

pub fn setup(candidates: &[Card], include_mastered: bool) -> QuizSetup {
    let mastered = candidates
        .iter()
        .filter(|c| c.status == CardStatus::Mastered)
        .count();
    let available = if include_mastered {
        candidates.len()
    } else {
        candidates.len() - mastered
    };
    QuizSetup {
        available,
        mastered_excluded: if include_mastered { 0 } else { mastered },
        min_questions: MIN_CARDS,
        max_questions: available.min(MAX_QUESTIONS),
        can_start: available >= MIN_CARDS,
    }
}

struct Question {
    card: Card,
    direction: Direction,
    prompt: String,
    choices: Vec<String>,
    correct_index: usize,
    deadline: Option<DateTime<Utc>>,
}

/// Timed multiple-choice run. Lower stakes than review on purpose: a quiz
/// answer touches only the shared correct/wrong counters and the
/// last-practiced timestamp, never box, streak, or status.
pub struct QuizSession<S> {
    store: S,
    clock: Arc<dyn Clock>,
    user: CurrentUser,
    rng: StdRng,
    /// Entire card pool; distractors are drawn from here, not from the
    /// candidate set, so mastered or filtered-out cards can appear as
    /// wrong options.
    pool: Vec<Card>,
    queue: Vec<Card>,
    index: usize,
    question: Option<Question>,
    timer_secs: u32,
    correct: u32,
    wrong: u32,
    streak: u32,
    best_streak: u32,
    result: Option<QuizResult>,
}

/// View of the current question, with the countdown remaining.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub position: usize,
    pub total: usize,
    pub category: Category,
    pub direction: Direction,
    pub prompt: String,
    pub example: Option<String>,
    pub choices: Vec<String>,
    pub time_left_secs: Option<f64>,
    pub streak: u32,
    pub correct: u32,
    pub wrong: u32,
}

impl<S: CardStore> QuizSession<S> {
    /// `candidates` is the caller-filtered set questions are drawn from;
    /// `pool` is the entire deck, used for distractors. Needs at least 4
    /// eligible candidates or the quiz cannot start.
    pub fn start(
        store: S,
        clock: Arc<dyn Clock>,
        user: CurrentUser,
        mut candidates: Vec<Card>,
        pool: Vec<Card>,
        config: QuizConfig,
        mut rng: StdRng,
    ) -> Result<Self, StartError> {
        if !TIMER_CHOICES.contains(&config.timer_secs) {
            return Err(StartError::UnsupportedTimer(config.timer_secs));
        }
        if !config.include_mastered {
            candidates.retain(|c| c.status != CardStatus::Mastered);
        }
        if candidates.len() < MIN_CARDS {
            return Err(StartError::NotEnoughCards {
                min: MIN_CARDS,
                available: candidates.len(),
            });
        }

        let count = config
            .question_count
            .clamp(MIN_CARDS, MAX_QUESTIONS)
            .min(candidates.len());
        candidates.shuffle(&mut rng);
        candidates.truncate(count);

        let mut session = QuizSession {
            store,
            clock,
            user,
            rng,
            pool,
            queue: candidates,
            index: 0,
            question: None,
            timer_secs: config.timer_secs,
            correct: 0,
            wrong: 0,
            streak: 0,
            best_streak: 0,
            result: None,
        };
        session.next_question();
        Ok(session)
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<QuizResult> {
        self.result
    }

    pub fn current(&self, now: DateTime<Utc>) -> Option<QuestionView> {
        let q = self.question.as_ref()?;
        Some(QuestionView {
            position: self.index + 1,
            total: self.queue.len(),
            category: q.card.category,
            direction: q.direction,
            prompt: q.prompt.clone(),
            // The example is only a fair hint when the word is shown.
            example: match q.direction {
                Direction::WordToMeaning => q.card.example.clone(),
                Direction::MeaningToWord => None,
            },
            choices: q.choices.clone(),
            time_left_secs: q.deadline.map(|d| {
                ((d - now).num_milliseconds().max(0) as f64) / 1000.0
            }),
            streak: self.streak,
            correct: self.correct,
            wrong: self.wrong,
        })
    }

    /// Scores the first selection for the current question. A selection
    /// after the countdown already ran out resolves as a timeout instead.
    pub async fn answer(&mut self, choice: usize) -> Option<QuizFeedback> {
        let q = self.question.as_ref()?;
        if choice >= q.choices.len() {
            return None;
        }
        let now = self.clock.now();
        if q.deadline.is_some_and(|d| now >= d) {
            return Some(self.resolve(None, now).await);
        }
        Some(self.resolve(Some(choice), now).await)
    }

    /// Cooperative tick: resolves the current question as a timeout once
    /// the countdown has elapsed. Returns `None` while time remains.
    pub async fn check_timeout(&mut self) -> Option<QuizFeedback> {
        let q = self.question.as_ref()?;
        let now = self.clock.now();
        if q.deadline.is_some_and(|d| now >= d) {
            return Some(self.resolve(None, now).await);
        }
        None
    }

    /// Terminal event for a question: `selected` is `None` on timeout.
    async fn resolve(&mut self, selected: Option<usize>, now: DateTime<Utc>) -> QuizFeedback {
        // Guarded by the callers; the question is always present here.
        let q = self.question.take();
        let Some(q) = q else {
            return QuizFeedback {
                outcome: AnswerOutcome::Timeout,
                correct_index: 0,
                selected: None,
                streak: self.streak,
                finished: self.is_finished(),
            };
        };

        let is_correct = selected == Some(q.correct_index);
        let outcome = match selected {
            None => AnswerOutcome::Timeout,
            Some(_) if is_correct => AnswerOutcome::Correct,
            Some(_) => AnswerOutcome::Wrong,
        };

        // Counters and last-practiced only; the quiz never moves a card
        // between boxes.
        let patch = CardPatch {
            correct_count: is_correct.then(|| q.card.correct_count + 1),
            wrong_count: (!is_correct).then(|| q.card.wrong_count + 1),
            last_practiced: Some(now),
            ..Default::default()
        };
        match self.store.update_card(&q.card.id, patch).await {
            Ok(()) => {
                if is_correct {
                    self.correct += 1;
                    self.streak += 1;
                    self.best_streak = self.best_streak.max(self.streak);
                } else {
                    self.wrong += 1;
                    self.streak = 0;
                }
            }
            Err(StoreError::NotFound(_)) => {
                log::info!("quiz card {} vanished mid-session, skipping", q.card.id);
            }
            Err(e) => {
                log::warn!("failed to persist quiz answer for card {}: {e}", q.card.id);
                if is_correct {
                    self.correct += 1;
                    self.streak += 1;
                    self.best_streak = self.best_streak.max(self.streak);
                } else {
                    self.wrong += 1;
                    self.streak = 0;
                }
            }
        }

        self.index += 1;
        if self.index >= self.queue.len() {
            self.finish().await;
        } else {
            self.next_question();
        }

        QuizFeedback {
            outcome,
            correct_index: q.correct_index,
            selected,
            streak: self.streak,
            finished: self.is_finished(),
        }
    }

    fn next_question(&mut self) {
        let Some(card) = self.queue.get(self.index).cloned() else {
            return;
        };

        let direction = if self.rng.gen_bool(0.5) {
            Direction::MeaningToWord
        } else {
            Direction::WordToMeaning
        };
        let (prompt, answer) = match direction {
            Direction::MeaningToWord => (card.back.clone(), card.front.clone()),
            Direction::WordToMeaning => (card.front.clone(), card.back.clone()),
        };

        // Distinct wrong options from the whole pool, matching the answer's
        // field, padded to exactly three.
        let mut seen: Vec<&str> = Vec::new();
        for other in &self.pool {
            if other.id == card.id {
                continue;
            }
            let text = match direction {
                Direction::MeaningToWord => other.front.as_str(),
                Direction::WordToMeaning => other.back.as_str(),
            };
            if text != answer && !seen.contains(&text) {
                seen.push(text);
            }
        }
        let mut distractors: Vec<String> = seen
            .choose_multiple(&mut self.rng, 3)
            .map(|s| s.to_string())
            .collect();
        while distractors.len() < 3 {
            distractors.push(PLACEHOLDER.to_string());
        }

        let mut tagged: Vec<(String, bool)> = Vec::with_capacity(4);
        tagged.push((answer, true));
        tagged.extend(distractors.into_iter().map(|d| (d, false)));
        tagged.shuffle(&mut self.rng);
        let correct_index = tagged.iter().position(|(_, ok)| *ok).unwrap_or(0);
        let choices = tagged.into_iter().map(|(text, _)| text).collect();

        let deadline = if self.timer_secs > 0 {
            Some(self.clock.now() + Duration::seconds(self.timer_secs as i64))
        } else {
            None
        };

        self.question = Some(Question {
            card,
            direction,
            prompt,
            choices,
            correct_index,
            deadline,
        });
    }

    async fn finish(&mut self) {
        let total = self.correct + self.wrong;
        let percent = if total > 0 {
            (self.correct as f64 / total as f64 * 100.0).round() as u32
        } else {
            0
        };
        self.result = Some(QuizResult {
            correct: self.correct,
            wrong: self.wrong,
            total,
            percent,
            grade: GradeBand::from_percent(percent),
            best_streak: self.best_streak,
        });
        recorder::record(
            &self.store,
            &self.user,
            self.clock.now(),
            total as i64,
            self.correct as i64,
        )
        .await;
    }
}

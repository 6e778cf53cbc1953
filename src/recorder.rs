use chrono::{DateTime, Utc};

use crate::models::CurrentUser;
use crate::store::CardStore;

/// Folds one finished session into the user's (user, day) aggregate.
/// Recording is best-effort: a failed write must never fail the study
/// session that produced it, so errors are logged and swallowed.
pub async fn record<S: CardStore>(
    store: &S,
    user: &CurrentUser,
    now: DateTime<Utc>,
    total_answered: i64,
    total_correct: i64,
) {
    let date = now.date_naive();
    if let Err(e) = store
        .upsert_study_session(&user.id, date, total_answered, total_correct, now)
        .await
    {
        log::warn!(
            "failed to record study session for {} on {date}: {e}",
            user.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn sequential_records_accumulate_additively() {
        let store = MemoryStore::new();
        let user = CurrentUser {
            id: "u1".to_string(),
            name: "Mina".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();

        record(&store, &user, now, 5, 3).await;
        record(&store, &user, now, 2, 1).await;

        let history = store.study_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_reviewed, 7);
        assert_eq!(history[0].total_correct, 4);
        assert_eq!(history[0].session_count, 2);
    }

    #[tokio::test]
    async fn separate_days_get_separate_rows() {
        let store = MemoryStore::new();
        let user = CurrentUser {
            id: "u1".to_string(),
            name: "Mina".to_string(),
        };
        let day1 = Utc.with_ymd_and_hms(2026, 8, 20, 23, 50, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 8, 21, 0, 10, 0).unwrap();

        record(&store, &user, day1, 4, 2).await;
        record(&store, &user, day2, 6, 6).await;

        let history = store.study_history("u1").await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].total_reviewed, 6);
        assert_eq!(history[1].total_reviewed, 4);
    }
}

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Row, Sqlite};

use crate::models::{
    Card, CardPatch, CardStatus, Category, Contribution, CurrentUser, NewCard, StudySession,
};
use crate::store::{CardStore, StoreError};

fn category_str(category: Category) -> &'static str {
    match category {
        Category::Vocabulary => "Vocabulary",
        Category::Phrase => "Phrase",
        Category::Sentence => "Sentence",
        Category::Grammar => "Grammar",
    }
}

fn parse_category(s: &str) -> Category {
    match s {
        "Phrase" => Category::Phrase,
        "Sentence" => Category::Sentence,
        "Grammar" => Category::Grammar,
        _ => Category::Vocabulary,
    }
}

fn status_str(status: CardStatus) -> &'static str {
    match status {
        CardStatus::Learning => "learning",
        CardStatus::Mastered => "mastered",
    }
}

fn parse_status(s: &str) -> CardStatus {
    if s == "mastered" {
        CardStatus::Mastered
    } else {
        CardStatus::Learning
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for Card {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let category: String = row.try_get("category")?;
        let status: String = row.try_get("status")?;
        let contributions: String = row.try_get("contributions").unwrap_or_default();

        Ok(Card {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            owner_name: row.try_get("owner_name")?,
            front: row.try_get("front")?,
            back: row.try_get("back")?,
            example: row.try_get("example").ok().flatten(),
            category: parse_category(&category),
            status: parse_status(&status),
            leitner_box: row.try_get("box").unwrap_or(1),
            streak: row.try_get("streak").unwrap_or(0),
            correct_count: row.try_get("correct_count").unwrap_or(0),
            wrong_count: row.try_get("wrong_count").unwrap_or(0),
            last_practiced: row.try_get("last_practiced").ok().flatten(),
            contributions: serde_json::from_str(&contributions).unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StudySession {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let date: String = row.try_get("date")?;
        Ok(StudySession {
            user_id: row.try_get("user_id")?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            total_reviewed: row.try_get("total_reviewed").unwrap_or(0),
            total_correct: row.try_get("total_correct").unwrap_or(0),
            session_count: row.try_get("session_count").unwrap_or(0),
            last_session_at: row.try_get("last_session_at")?,
        })
    }
}

/// SQLite-backed card store shared by the whole group.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                owner_name TEXT NOT NULL,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                example TEXT,
                category TEXT NOT NULL DEFAULT 'Vocabulary',
                status TEXT NOT NULL DEFAULT 'learning',
                box INTEGER NOT NULL DEFAULT 1,
                streak INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                wrong_count INTEGER NOT NULL DEFAULT 0,
                last_practiced DATETIME,
                contributions TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS study_sessions (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                total_reviewed INTEGER NOT NULL DEFAULT 0,
                total_correct INTEGER NOT NULL DEFAULT 0,
                session_count INTEGER NOT NULL DEFAULT 0,
                last_session_at DATETIME NOT NULL,
                PRIMARY KEY (user_id, date)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write_card(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        card: &Card,
    ) -> Result<(), sqlx::Error> {
        let contributions =
            serde_json::to_string(&card.contributions).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"
            UPDATE cards SET
                front = ?, back = ?, example = ?, category = ?, status = ?,
                box = ?, streak = ?, correct_count = ?, wrong_count = ?,
                last_practiced = ?, contributions = ?
            WHERE id = ?
            "#,
        )
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.example)
        .bind(category_str(card.category))
        .bind(status_str(card.status))
        .bind(card.leitner_box)
        .bind(card.streak)
        .bind(card.correct_count)
        .bind(card.wrong_count)
        .bind(card.last_practiced)
        .bind(contributions)
        .bind(&card.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_card(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Card, StoreError> {
        sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::NotFound(format!("card {id}")))
    }
}

impl CardStore for SqliteStore {
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

        sqlx::query(
            r#"
            INSERT INTO cards
                (id, owner_id, owner_name, front, back, example, category,
                 status, box, streak, correct_count, wrong_count,
                 last_practiced, contributions, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0, 0, 0, NULL, '[]', ?)
            "#,
        )
        .bind(&card.id)
        .bind(&card.owner_id)
        .bind(&card.owner_name)
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.example)
        .bind(category_str(card.category))
        .bind(status_str(card.status))
        .bind(card.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(card)
    }

    async fn get_card(&self, id: &str) -> Result<Card, StoreError> {
        sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::NotFound(format!("card {id}")))
    }

    async fn list_cards(&self) -> Result<Vec<Card>, StoreError> {
        sqlx::query_as::<_, Card>("SELECT * FROM cards")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn update_card(&self, id: &str, patch: CardPatch) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut card = self.fetch_card(&mut tx, id).await?;
        patch.apply(&mut card);
        self.write_card(&mut tx, &card)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))
    }

    async fn delete_card(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM cards WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("card {id}")));
        }
        Ok(())
    }

    async fn add_contribution(
        &self,
        card_id: &str,
        contribution: Contribution,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut card = self.fetch_card(&mut tx, card_id).await?;
        card.contributions.push(contribution);
        self.write_card(&mut tx, &card)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))
    }

    async fn remove_contribution(&self, card_id: &str, index: usize) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut card = self.fetch_card(&mut tx, card_id).await?;
        if index < card.contributions.len() {
            card.contributions.remove(index);
            self.write_card(&mut tx, &card)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))
    }

    async fn upsert_study_session(
        &self,
        user_id: &str,
        date: NaiveDate,
        total_reviewed: i64,
        total_correct: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Single atomic increment so parallel sessions (multiple tabs)
        // never lose an update.
        sqlx::query(
            r#"
            INSERT INTO study_sessions
                (user_id, date, total_reviewed, total_correct, session_count, last_session_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(user_id, date) DO UPDATE SET
                total_reviewed = total_reviewed + excluded.total_reviewed,
                total_correct = total_correct + excluded.total_correct,
                session_count = session_count + 1,
                last_session_at = excluded.last_session_at
            "#,
        )
        .bind(user_id)
        .bind(date.format("%Y-%m-%d").to_string())
        .bind(total_reviewed)
        .bind(total_correct)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn study_history(&self, user_id: &str) -> Result<Vec<StudySession>, StoreError> {
        sqlx::query_as::<_, StudySession>(
            "SELECT * FROM study_sessions WHERE user_id = ? ORDER BY date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }
}

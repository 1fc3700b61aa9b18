//! Message store: authors and the flat message records the thread builder reads.
use super::Database;
use crate::types::{now_ts, MessageRecord, NewMessage};
use anyhow::{Context, Result};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

impl Database {
    /// Inserts an author or refreshes its display name, keyed by email.
    pub async fn upsert_author(&self, display_name: &str, email: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO authors (display_name, email, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(email) DO UPDATE SET
                display_name = excluded.display_name
            RETURNING author_id;
            "#,
        )
        .bind(display_name)
        .bind(email.trim().to_lowercase())
        .bind(now_ts())
        .fetch_one(self.pool())
        .await
        .context("upserting author")?;
        Ok(row.get::<i64, _>(0))
    }

    pub async fn insert_message(&self, message: &NewMessage) -> Result<i64> {
        let ids = self.insert_messages(std::slice::from_ref(message)).await?;
        ids.into_iter().next().context("insert returned no id")
    }

    /// Inserts a batch of messages in one transaction and returns their ids in
    /// input order.
    pub async fn insert_messages(&self, messages: &[NewMessage]) -> Result<Vec<i64>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let now = now_ts();
        let mut tx = self.pool().begin().await.context("beginning transaction")?;
        let mut ids = Vec::with_capacity(messages.len());

        for message in messages {
            let res = sqlx::query(
                r#"
                INSERT INTO messages (
                    message_key, in_reply_to, references_chain, author_id, subject, sent_at,
                    is_patch, commit_hash, series_number, series_total, body_text, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);
                "#,
            )
            .bind(&message.message_key)
            .bind(&message.in_reply_to)
            .bind(serde_json::to_string(&message.references_chain).unwrap_or_else(|_| "[]".into()))
            .bind(message.author_id)
            .bind(&message.subject)
            .bind(message.sent_at)
            .bind(if message.is_patch { 1 } else { 0 })
            .bind(&message.commit_hash)
            .bind(message.series_number)
            .bind(message.series_total)
            .bind(&message.body_text)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting message {}", message.message_key))?;
            ids.push(res.last_insert_rowid());
        }

        tx.commit().await.context("committing message batch")?;
        Ok(ids)
    }

    /// All messages ordered by `sent_at`, ties broken by `id`.
    pub async fn load_all_messages(&self) -> Result<Vec<MessageRecord>> {
        let mut rows = sqlx::query(
            r#"
            SELECT id, message_key, in_reply_to, references_chain, author_id, subject, sent_at,
                   is_patch, commit_hash, series_number, series_total
            FROM messages
            ORDER BY sent_at ASC, id ASC;
            "#,
        )
        .fetch(self.pool());

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await.context("loading messages")? {
            out.push(message_from_row(&row));
        }
        Ok(out)
    }

    pub async fn message_body(&self, message_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body_text FROM messages WHERE id = ?1")
            .bind(message_id)
            .fetch_optional(self.pool())
            .await
            .context("loading message body")?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>(0)))
    }

    pub async fn count_messages(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool())
            .await
            .context("counting messages")?;
        Ok(row.get::<i64, _>(0))
    }
}

fn message_from_row(row: &SqliteRow) -> MessageRecord {
    let message_key: String = row.get(1);
    let refs_raw: String = row.get(3);
    let references_chain: Vec<String> = match serde_json::from_str(&refs_raw) {
        Ok(refs) => refs,
        Err(e) => {
            warn!(message = %message_key, error = %e, "Unreadable references chain; treating as empty");
            Vec::new()
        }
    };

    MessageRecord {
        id: row.get(0),
        message_key,
        in_reply_to: row.get(2),
        references_chain,
        author_id: row.get(4),
        subject: row.get(5),
        sent_at: row.get(6),
        is_patch: row.get::<i64, _>(7) == 1,
        commit_hash: row.get(8),
        series_number: row.get(9),
        series_total: row.get(10),
    }
}

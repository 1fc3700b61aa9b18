#![allow(dead_code)]

use skein::storage::Database;
use skein::types::{MessageRecord, NewMessage};
use tempfile::TempDir;

pub const T0: i64 = 1_736_150_400; // 2025-01-06T08:00:00Z

/// A fresh database in its own temp directory. Keep the fixture alive for the
/// whole test so the directory is not removed underneath the pool.
pub struct Fixture {
    pub dir: TempDir,
    pub db: Database,
}

pub async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("skein.db")).await.unwrap();
    Fixture { dir, db }
}

pub fn msg(key: &str, author_id: i64, subject: &str, sent_at: i64) -> NewMessage {
    NewMessage {
        message_key: key.to_string(),
        author_id,
        subject: subject.to_string(),
        sent_at,
        ..Default::default()
    }
}

pub fn reply(key: &str, parent: &str, author_id: i64, subject: &str, sent_at: i64) -> NewMessage {
    NewMessage {
        in_reply_to: Some(parent.to_string()),
        ..msg(key, author_id, subject, sent_at)
    }
}

/// Inserts authors `a0..a{n}` and returns their ids.
pub async fn authors(db: &Database, n: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let id = db
            .upsert_author(&format!("Author {i}"), &format!("a{i}@example.org"))
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

/// Message records for the pure builder, with ids assigned in slice order.
pub fn records(messages: &[NewMessage]) -> Vec<MessageRecord> {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| MessageRecord {
            id: i as i64 + 1,
            message_key: m.message_key.clone(),
            in_reply_to: m.in_reply_to.clone(),
            references_chain: m.references_chain.clone(),
            author_id: m.author_id,
            subject: m.subject.clone(),
            sent_at: m.sent_at,
            is_patch: m.is_patch,
            commit_hash: m.commit_hash.clone(),
            series_number: m.series_number,
            series_total: m.series_total,
        })
        .collect()
}

//! JSON-lines loader that fills the message store.
use crate::storage::Database;
use crate::types::NewMessage;
use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One line of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub message_key: String,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub subject: String,
    /// RFC 3339 timestamp.
    pub sent_at: String,
    #[serde(default)]
    pub is_patch: bool,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub series_number: Option<i32>,
    #[serde(default)]
    pub series_total: Option<i32>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub messages: usize,
    pub authors: usize,
}

pub fn parse_records(raw: &str) -> Result<Vec<ImportRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid record", lineno + 1))?;
        if record.message_key.trim().is_empty() {
            bail!("line {}: empty message_key", lineno + 1);
        }
        records.push(record);
    }
    Ok(records)
}

pub async fn import_file(db: &Database, path: &Path) -> Result<ImportSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let records = parse_records(&raw)?;
    import_records(db, &records).await
}

/// Upserts every author by email, then inserts all messages in one transaction.
pub async fn import_records(db: &Database, records: &[ImportRecord]) -> Result<ImportSummary> {
    let mut authors: HashMap<String, i64> = HashMap::new();
    let mut batch = Vec::with_capacity(records.len());

    for record in records {
        let email = record.author_email.trim().to_lowercase();
        let author_id = match authors.get(&email) {
            Some(id) => *id,
            None => {
                let id = db.upsert_author(record.author_name.trim(), &email).await?;
                authors.insert(email, id);
                id
            }
        };

        let sent_at = DateTime::parse_from_rfc3339(record.sent_at.trim())
            .with_context(|| format!("{}: bad sent_at '{}'", record.message_key, record.sent_at))?
            .timestamp();

        batch.push(NewMessage {
            message_key: record.message_key.trim().to_string(),
            in_reply_to: record.in_reply_to.clone(),
            references_chain: record.references.clone(),
            author_id,
            subject: record.subject.clone(),
            sent_at,
            is_patch: record.is_patch,
            commit_hash: record.commit_hash.clone(),
            series_number: record.series_number,
            series_total: record.series_total,
            body_text: record.body.clone(),
        });
    }

    debug!(authors = authors.len(), "Authors resolved");
    let ids = db.insert_messages(&batch).await?;
    info!(messages = ids.len(), authors = authors.len(), "Import complete");

    Ok(ImportSummary {
        messages: ids.len(),
        authors: authors.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_and_full_records() {
        let raw = r#"
# comment
{"message_key":"a@x","author_name":"A","author_email":"a@x","subject":"hi","sent_at":"2025-01-06T10:00:00Z"}
{"message_key":"b@x","in_reply_to":"a@x","references":["a@x"],"author_name":"B","author_email":"b@x","subject":"Re: hi","sent_at":"2025-01-06T11:00:00+01:00","is_patch":false,"body":"ok"}
"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].references.is_empty());
        assert_eq!(records[1].in_reply_to.as_deref(), Some("a@x"));
    }

    #[test]
    fn reports_line_of_bad_record() {
        let err = parse_records("{\"message_key\":\"a\"}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }
}

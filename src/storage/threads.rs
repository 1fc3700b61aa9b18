//! Thread store: the derived threads, reply edges and participant aggregates.
//!
//! The builder owns every write here and only ever replaces the whole set in a
//! single transaction. Everything else is a read.
use super::Database;
use crate::threading::subject::fold_case;
use crate::types::{
    BuildRun, BuildStats, ParticipantRecord, ReplyRecord, SortBy, ThreadParticipant, ThreadRecord,
    ThreadSet, ThreadSummary,
};
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;

const SUMMARY_SELECT: &str = r#"
    SELECT t.thread_id, t.root_message_id, m.subject, t.subject_base,
           COALESCE(a.display_name, ''), t.reply_count, t.participant_count,
           t.created_at, t.last_activity_at, t.updated_at
    FROM threads AS t
    JOIN messages AS m ON m.id = t.root_message_id
    LEFT JOIN authors AS a ON a.author_id = m.author_id
"#;

/// One message of a thread joined with its content, as needed to render a tree.
#[derive(Clone, Debug)]
pub struct ThreadMember {
    pub message_id: i64,
    pub message_key: String,
    pub parent_message_id: Option<i64>,
    pub depth_level: i64,
    pub position_in_thread: i64,
    pub subject: String,
    pub sent_at: i64,
    pub is_patch: bool,
    pub commit_hash: Option<String>,
    pub series_number: Option<i32>,
    pub series_total: Option<i32>,
    pub body_text: Option<String>,
    pub author_name: String,
    pub author_email: String,
}

/// One thread read consistently: summary, members by position, participants.
#[derive(Clone, Debug)]
pub struct ThreadSnapshot {
    pub summary: ThreadSummary,
    pub members: Vec<ThreadMember>,
    pub participants: Vec<ThreadParticipant>,
}

/// Bookkeeping for the build-run row written alongside a replacement.
#[derive(Clone, Debug)]
pub struct BuildRunInput {
    pub started_at: i64,
    pub finished_at: i64,
    pub stats: BuildStats,
}

impl Database {
    /// Swaps the derived thread state for `set` and appends a build-run row.
    /// Returns the new generation. Any failure rolls the whole swap back.
    pub async fn replace_thread_state(&self, set: &ThreadSet, run: &BuildRunInput) -> Result<i64> {
        let batch = self.insert_batch_size.max(1);
        let mut tx = self.pool().begin().await.context("beginning replace tx")?;

        sqlx::query("DELETE FROM thread_participants;")
            .execute(&mut *tx)
            .await
            .context("clearing participants")?;
        sqlx::query("DELETE FROM thread_replies;")
            .execute(&mut *tx)
            .await
            .context("clearing replies")?;
        sqlx::query("DELETE FROM threads;")
            .execute(&mut *tx)
            .await
            .context("clearing threads")?;

        for chunk in set.threads.chunks(batch) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO threads (thread_id, root_message_id, subject_base, subject_fold, \
                 root_subject_fold, reply_count, participant_count, created_at, \
                 last_activity_at, updated_at, fingerprint) ",
            );
            qb.push_values(chunk, |mut b, thread| {
                b.push_bind(thread.thread_id)
                    .push_bind(thread.root_message_id)
                    .push_bind(thread.subject_base.as_str())
                    .push_bind(thread.subject_fold.as_str())
                    .push_bind(thread.root_subject_fold.as_str())
                    .push_bind(thread.reply_count)
                    .push_bind(thread.participant_count)
                    .push_bind(thread.created_at)
                    .push_bind(thread.last_activity_at)
                    .push_bind(thread.updated_at)
                    .push_bind(thread.fingerprint.as_str());
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .context("inserting threads")?;
        }

        for chunk in set.replies.chunks(batch) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO thread_replies (message_id, thread_id, parent_message_id, depth_level, \
                 position_in_thread, thread_path) ",
            );
            qb.push_values(chunk, |mut b, reply| {
                b.push_bind(reply.message_id)
                    .push_bind(reply.thread_id)
                    .push_bind(reply.parent_message_id)
                    .push_bind(reply.depth_level)
                    .push_bind(reply.position_in_thread)
                    .push_bind(
                        serde_json::to_string(&reply.thread_path).unwrap_or_else(|_| "[]".into()),
                    );
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .context("inserting replies")?;
        }

        for chunk in set.participants.chunks(batch) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO thread_participants (thread_id, author_id, reply_count, first_replied, \
                 last_replied) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.thread_id)
                    .push_bind(p.author_id)
                    .push_bind(p.reply_count)
                    .push_bind(p.first_replied)
                    .push_bind(p.last_replied);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .context("inserting participants")?;
        }

        let stats = &run.stats;
        let res = sqlx::query(
            r#"
            INSERT INTO build_runs (
                started_at, finished_at, total_threads, total_replies, orphaned_messages,
                cycles_broken, max_depth, processing_time_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);
            "#,
        )
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(stats.total_threads as i64)
        .bind(stats.total_replies as i64)
        .bind(stats.orphaned_messages as i64)
        .bind(stats.cycles_broken as i64)
        .bind(stats.max_depth as i64)
        .bind(stats.processing_time_ms as i64)
        .execute(&mut *tx)
        .await
        .context("recording build run")?;
        let generation = res.last_insert_rowid();

        tx.commit().await.context("committing thread replacement")?;
        Ok(generation)
    }

    /// Rewrites the timing columns of a committed build run.
    pub async fn finish_build_run(
        &self,
        generation: i64,
        finished_at: i64,
        processing_time_ms: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE build_runs SET finished_at = ?1, processing_time_ms = ?2 WHERE generation = ?3",
        )
        .bind(finished_at)
        .bind(processing_time_ms as i64)
        .bind(generation)
        .execute(self.pool())
        .await
        .context("updating build run timing")?;
        Ok(())
    }

    pub async fn latest_build_run(&self) -> Result<Option<BuildRun>> {
        let row = sqlx::query(
            r#"
            SELECT generation, started_at, finished_at, total_threads, total_replies,
                   orphaned_messages, cycles_broken, max_depth, processing_time_ms
            FROM build_runs
            ORDER BY generation DESC
            LIMIT 1;
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .context("loading latest build run")?;

        Ok(row.map(|row| {
            let generation: i64 = row.get(0);
            BuildRun {
                generation,
                started_at: row.get(1),
                finished_at: row.get(2),
                stats: BuildStats {
                    total_threads: row.get::<i64, _>(3) as u32,
                    total_replies: row.get::<i64, _>(4) as u32,
                    orphaned_messages: row.get::<i64, _>(5) as u32,
                    cycles_broken: row.get::<i64, _>(6) as u32,
                    max_depth: row.get::<i64, _>(7) as i32,
                    processing_time_ms: row.get::<i64, _>(8) as u64,
                    generation,
                },
            }
        }))
    }

    /// `thread_id -> (fingerprint, updated_at)` for the current derived state.
    pub async fn thread_fingerprints(&self) -> Result<HashMap<i64, (String, i64)>> {
        let rows = sqlx::query("SELECT thread_id, fingerprint, updated_at FROM threads")
            .fetch_all(self.pool())
            .await
            .context("loading thread fingerprints")?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            out.insert(row.get::<i64, _>(0), (row.get(1), row.get(2)));
        }
        Ok(out)
    }

    pub async fn get_thread_summary(&self, thread_id: i64) -> Result<Option<ThreadSummary>> {
        fetch_summary(self.pool(), thread_id).await
    }

    pub async fn list_threads(
        &self,
        sort_by: SortBy,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ThreadSummary>> {
        let query = format!(
            "{SUMMARY_SELECT} ORDER BY {} LIMIT ?1 OFFSET ?2",
            sort_by.order_clause()
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .context("listing threads")?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    /// Case-insensitive substring search over the stripped and raw root
    /// subjects. Prefix matches rank first, then word-start matches. Both
    /// sides are folded with [`fold_case`], never with SQLite's ASCII `lower()`.
    pub async fn search_threads(&self, keyword: &str, limit: i64) -> Result<Vec<ThreadSummary>> {
        let needle = escape_like(&fold_case(keyword));
        let query = format!(
            r#"{SUMMARY_SELECT}
            WHERE t.subject_fold LIKE ?1 ESCAPE '\' OR t.root_subject_fold LIKE ?1 ESCAPE '\'
            ORDER BY
                CASE
                    WHEN t.subject_fold LIKE ?2 ESCAPE '\' THEN 0
                    WHEN t.subject_fold LIKE ?3 ESCAPE '\'
                      OR t.subject_fold LIKE ?4 ESCAPE '\' THEN 1
                    ELSE 2
                END,
                t.last_activity_at DESC,
                t.thread_id ASC
            LIMIT ?5"#
        );

        let rows = sqlx::query(&query)
            .bind(format!("%{needle}%"))
            .bind(format!("{needle}%"))
            .bind(format!("% {needle}%"))
            .bind(format!("%[{needle}%"))
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .context("searching threads")?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    /// Root and replies of a thread, ordered by position (root first).
    pub async fn thread_members(&self, thread_id: i64) -> Result<Vec<ThreadMember>> {
        fetch_members(self.pool(), thread_id).await
    }

    /// Reply rows of a thread ordered by `position_in_thread`.
    pub async fn thread_replies(&self, thread_id: i64) -> Result<Vec<ReplyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT thread_id, message_id, parent_message_id, depth_level, position_in_thread, thread_path
            FROM thread_replies
            WHERE thread_id = ?1
            ORDER BY position_in_thread ASC;
            "#,
        )
        .bind(thread_id)
        .fetch_all(self.pool())
        .await
        .context("loading thread replies")?;
        Ok(rows.iter().map(reply_from_row).collect())
    }

    pub async fn participants(&self, thread_id: i64) -> Result<Vec<ThreadParticipant>> {
        fetch_participants(self.pool(), thread_id).await
    }

    /// Summary, members and participants of one thread read inside a single
    /// transaction, so a concurrent replacement is seen entirely or not at all.
    pub async fn thread_snapshot(&self, thread_id: i64) -> Result<Option<ThreadSnapshot>> {
        let mut tx = self.pool().begin().await.context("beginning read tx")?;
        let Some(summary) = fetch_summary(&mut *tx, thread_id).await? else {
            return Ok(None);
        };
        let members = fetch_members(&mut *tx, thread_id).await?;
        let participants = fetch_participants(&mut *tx, thread_id).await?;
        tx.commit().await.context("closing read tx")?;
        Ok(Some(ThreadSnapshot {
            summary,
            members,
            participants,
        }))
    }

    /// Thread containing `message_id`, as root or as reply.
    pub async fn thread_id_for_message(&self, message_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT thread_id FROM threads WHERE root_message_id = ?1
            UNION ALL
            SELECT thread_id FROM thread_replies WHERE message_id = ?1
            LIMIT 1;
            "#,
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .context("looking up thread for message")?;
        Ok(row.map(|row| row.get::<i64, _>(0)))
    }

    /// The whole derived state in a deterministic order.
    pub async fn load_thread_set(&self) -> Result<ThreadSet> {
        let thread_rows = sqlx::query(
            r#"
            SELECT thread_id, root_message_id, subject_base, subject_fold, root_subject_fold,
                   reply_count, participant_count, created_at, last_activity_at, updated_at,
                   fingerprint
            FROM threads
            ORDER BY thread_id ASC;
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("loading threads")?;

        let threads = thread_rows
            .iter()
            .map(|row| ThreadRecord {
                thread_id: row.get(0),
                root_message_id: row.get(1),
                subject_base: row.get(2),
                subject_fold: row.get(3),
                root_subject_fold: row.get(4),
                reply_count: row.get(5),
                participant_count: row.get(6),
                created_at: row.get(7),
                last_activity_at: row.get(8),
                updated_at: row.get(9),
                fingerprint: row.get(10),
            })
            .collect();

        let reply_rows = sqlx::query(
            r#"
            SELECT thread_id, message_id, parent_message_id, depth_level, position_in_thread, thread_path
            FROM thread_replies
            ORDER BY thread_id ASC, position_in_thread ASC;
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("loading replies")?;
        let replies = reply_rows.iter().map(reply_from_row).collect();

        let participant_rows = sqlx::query(
            r#"
            SELECT thread_id, author_id, reply_count, first_replied, last_replied
            FROM thread_participants
            ORDER BY thread_id ASC, author_id ASC;
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("loading participants")?;
        let participants = participant_rows
            .iter()
            .map(|row| ParticipantRecord {
                thread_id: row.get(0),
                author_id: row.get(1),
                reply_count: row.get(2),
                first_replied: row.get(3),
                last_replied: row.get(4),
            })
            .collect();

        Ok(ThreadSet {
            threads,
            replies,
            participants,
        })
    }
}

async fn fetch_summary<'e, E>(exec: E, thread_id: i64) -> Result<Option<ThreadSummary>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("{SUMMARY_SELECT} WHERE t.thread_id = ?1");
    let row = sqlx::query(&query)
        .bind(thread_id)
        .fetch_optional(exec)
        .await
        .context("loading thread summary")?;
    Ok(row.as_ref().map(summary_from_row))
}

async fn fetch_members<'e, E>(exec: E, thread_id: i64) -> Result<Vec<ThreadMember>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT m.id, m.message_key, NULL AS parent_message_id, 0 AS depth_level,
               0 AS position_in_thread, m.subject, m.sent_at, m.is_patch, m.commit_hash,
               m.series_number, m.series_total, m.body_text,
               COALESCE(a.display_name, ''), COALESCE(a.email, '')
        FROM threads AS t
        JOIN messages AS m ON m.id = t.root_message_id
        LEFT JOIN authors AS a ON a.author_id = m.author_id
        WHERE t.thread_id = ?1
        UNION ALL
        SELECT m.id, m.message_key, r.parent_message_id, r.depth_level,
               r.position_in_thread, m.subject, m.sent_at, m.is_patch, m.commit_hash,
               m.series_number, m.series_total, m.body_text,
               COALESCE(a.display_name, ''), COALESCE(a.email, '')
        FROM thread_replies AS r
        JOIN messages AS m ON m.id = r.message_id
        LEFT JOIN authors AS a ON a.author_id = m.author_id
        WHERE r.thread_id = ?1
        ORDER BY position_in_thread ASC;
        "#,
    )
    .bind(thread_id)
    .fetch_all(exec)
    .await
    .context("loading thread members")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(ThreadMember {
            message_id: row.get(0),
            message_key: row.get(1),
            parent_message_id: row.get(2),
            depth_level: row.get(3),
            position_in_thread: row.get(4),
            subject: row.get(5),
            sent_at: row.get(6),
            is_patch: row.get::<i64, _>(7) == 1,
            commit_hash: row.get(8),
            series_number: row.get(9),
            series_total: row.get(10),
            body_text: row.get(11),
            author_name: row.get(12),
            author_email: row.get(13),
        });
    }
    Ok(out)
}

async fn fetch_participants<'e, E>(exec: E, thread_id: i64) -> Result<Vec<ThreadParticipant>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT p.author_id, COALESCE(a.display_name, ''), COALESCE(a.email, ''),
               p.reply_count, p.first_replied, p.last_replied
        FROM thread_participants AS p
        LEFT JOIN authors AS a ON a.author_id = p.author_id
        WHERE p.thread_id = ?1
        ORDER BY p.first_replied ASC, p.author_id ASC;
        "#,
    )
    .bind(thread_id)
    .fetch_all(exec)
    .await
    .context("loading participants")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(ThreadParticipant {
            author_id: row.get(0),
            display_name: row.get(1),
            email: row.get(2),
            reply_count: row.get(3),
            first_replied: row.get(4),
            last_replied: row.get(5),
        });
    }
    Ok(out)
}

fn summary_from_row(row: &SqliteRow) -> ThreadSummary {
    ThreadSummary {
        thread_id: row.get(0),
        root_message_id: row.get(1),
        root_subject: row.get(2),
        subject_base: row.get(3),
        root_author: row.get(4),
        reply_count: row.get(5),
        participant_count: row.get(6),
        created_at: row.get(7),
        last_activity_at: row.get(8),
        updated_at: row.get(9),
    }
}

fn reply_from_row(row: &SqliteRow) -> ReplyRecord {
    let path_raw: String = row.get(5);
    ReplyRecord {
        thread_id: row.get(0),
        message_id: row.get(1),
        parent_message_id: row.get(2),
        depth_level: row.get(3),
        position_in_thread: row.get(4),
        thread_path: serde_json::from_str(&path_raw).unwrap_or_default(),
    }
}

/// Escapes LIKE wildcards so user keywords match literally (`ESCAPE '\'`).
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

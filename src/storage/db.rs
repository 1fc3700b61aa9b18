use crate::config::AppDefaults;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT_SECS: u64 = 30;

/// Handle to the SQLite file holding both the message store and the derived
/// thread store. Cheap to clone; every clone shares one pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
    pub(crate) insert_batch_size: usize,
}

impl Database {
    pub async fn new_default(defaults: &AppDefaults) -> Result<Self> {
        let db_path = defaults.db_path()?;
        let mut db = Self::open(&db_path).await?;
        db.insert_batch_size = defaults.insert_batch_size;
        Ok(db)
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        // WAL keeps readers on the last committed snapshot while a build
        // replaces the derived tables.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let db = Database {
            pool,
            path: db_path.to_path_buf(),
            insert_batch_size: AppDefaults::default().insert_batch_size,
        };
        db.migrate().await?;
        Ok(db)
    }

    pub fn with_insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                author_id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_key TEXT NOT NULL,
                in_reply_to TEXT,
                references_chain TEXT NOT NULL DEFAULT '[]',
                author_id INTEGER NOT NULL,
                subject TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                is_patch INTEGER NOT NULL DEFAULT 0,
                commit_hash TEXT,
                series_number INTEGER,
                series_total INTEGER,
                body_text TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (author_id) REFERENCES authors(author_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_key ON messages(message_key);
            CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages(sent_at, id);

            CREATE TABLE IF NOT EXISTS threads (
                thread_id INTEGER PRIMARY KEY,
                root_message_id INTEGER NOT NULL UNIQUE,
                subject_base TEXT NOT NULL,
                subject_fold TEXT NOT NULL DEFAULT '',
                root_subject_fold TEXT NOT NULL DEFAULT '',
                reply_count INTEGER NOT NULL,
                participant_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                FOREIGN KEY (root_message_id) REFERENCES messages(id)
            );
            CREATE INDEX IF NOT EXISTS idx_threads_last_activity ON threads(last_activity_at DESC, thread_id);
            CREATE INDEX IF NOT EXISTS idx_threads_created ON threads(created_at, thread_id);
            CREATE INDEX IF NOT EXISTS idx_threads_reply_count ON threads(reply_count DESC, thread_id);
            CREATE INDEX IF NOT EXISTS idx_threads_participants ON threads(participant_count DESC, thread_id);

            CREATE TABLE IF NOT EXISTS thread_replies (
                message_id INTEGER PRIMARY KEY,
                thread_id INTEGER NOT NULL,
                parent_message_id INTEGER,
                depth_level INTEGER NOT NULL,
                position_in_thread INTEGER NOT NULL,
                thread_path TEXT NOT NULL,
                UNIQUE(thread_id, position_in_thread),
                FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE,
                FOREIGN KEY (message_id) REFERENCES messages(id)
            );

            CREATE TABLE IF NOT EXISTS thread_participants (
                thread_id INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                reply_count INTEGER NOT NULL,
                first_replied INTEGER NOT NULL,
                last_replied INTEGER NOT NULL,
                PRIMARY KEY (thread_id, author_id),
                FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS build_runs (
                generation INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                total_threads INTEGER NOT NULL,
                total_replies INTEGER NOT NULL,
                orphaned_messages INTEGER NOT NULL,
                cycles_broken INTEGER NOT NULL,
                max_depth INTEGER NOT NULL,
                processing_time_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;

        // Stores created before search folding lack these columns; the next
        // build fills them. Errors mean the column already exists.
        for column in ["subject_fold", "root_subject_fold"] {
            let _ = sqlx::query(&format!(
                "ALTER TABLE threads ADD COLUMN {column} TEXT NOT NULL DEFAULT '';"
            ))
            .execute(&self.pool)
            .await;
        }

        Ok(())
    }
}

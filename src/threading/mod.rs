//! Batch thread builder.
//!
//! A build loads every message, resolves reply links in memory, lays the
//! result out as threads and swaps it into the thread store in one
//! transaction. At most one build runs per builder at a time.
mod forest;
mod resolve;
pub mod subject;

use crate::errors::{ThreadError, ThreadResult};
use crate::storage::{BuildRunInput, Database};
use crate::types::{now_ts, BuildStats, MessageRecord, ThreadSet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use resolve::{index_by_key, link, Linkage};

#[derive(Clone)]
pub struct ThreadBuilder {
    db: Database,
    subject_fallback: bool,
    running: Arc<Mutex<()>>,
}

/// A build that has been started. Dropping the handle does not stop the run.
pub struct BuildHandle {
    task: JoinHandle<ThreadResult<BuildStats>>,
}

impl BuildHandle {
    pub async fn wait(self) -> ThreadResult<BuildStats> {
        self.task
            .await
            .map_err(|e| ThreadError::Internal(format!("build task failed: {e}")))?
    }
}

impl ThreadBuilder {
    pub fn new(db: Database, subject_fallback: bool) -> Self {
        Self {
            db,
            subject_fallback,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Starts a build on its own task. Fails immediately if another build from
    /// this builder (or a clone of it) is still running.
    pub fn start(&self) -> ThreadResult<BuildHandle> {
        let guard = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| ThreadError::ConcurrentBuildInProgress)?;
        let db = self.db.clone();
        let subject_fallback = self.subject_fallback;

        let task = tokio::spawn(async move {
            let _guard = guard;
            run_build(db, subject_fallback).await
        });
        Ok(BuildHandle { task })
    }

    pub async fn build(&self) -> ThreadResult<BuildStats> {
        self.start()?.wait().await
    }
}

async fn run_build(db: Database, subject_fallback: bool) -> ThreadResult<BuildStats> {
    let start = Instant::now();
    let started_at = now_ts();

    let messages = db.load_all_messages().await.map_err(ThreadError::store)?;
    let previous = db.thread_fingerprints().await.map_err(ThreadError::store)?;
    info!(messages = messages.len(), "Building threads");

    let (mut set, mut stats) =
        tokio::task::spawn_blocking(move || build_thread_set(&messages, subject_fallback))
            .await
            .map_err(|e| ThreadError::Internal(format!("thread layout task failed: {e}")))??;

    let unchanged = stamp_updated_at(&mut set, &previous, started_at);
    debug!(unchanged, changed = set.threads.len() - unchanged, "Compared with previous build");

    stats.processing_time_ms = start.elapsed().as_millis() as u64;
    let run = BuildRunInput {
        started_at,
        finished_at: now_ts(),
        stats: stats.clone(),
    };
    let generation = db
        .replace_thread_state(&set, &run)
        .await
        .map_err(ThreadError::store)?;

    stats.generation = generation;
    stats.processing_time_ms = start.elapsed().as_millis() as u64;
    if let Err(e) = db
        .finish_build_run(generation, now_ts(), stats.processing_time_ms)
        .await
    {
        warn!(generation, error = %e, "Recording build timing failed");
    }

    info!(
        generation,
        threads = stats.total_threads,
        replies = stats.total_replies,
        orphaned = stats.orphaned_messages,
        cycles = stats.cycles_broken,
        max_depth = stats.max_depth,
        elapsed_ms = stats.processing_time_ms,
        "Thread build complete"
    );
    Ok(stats)
}

/// The CPU-bound part of a build: links, cycle cuts, layout and aggregates.
/// `messages` must be ordered by `sent_at` (ties by id).
pub fn build_thread_set(
    messages: &[MessageRecord],
    subject_fallback: bool,
) -> ThreadResult<(ThreadSet, BuildStats)> {
    let linkage = resolve::link(messages, subject_fallback)?;
    for anomaly in &linkage.anomalies {
        debug!(%anomaly, "Recovered reference anomaly");
    }

    let layout = forest::lay_out(messages, &linkage);
    let stats = BuildStats {
        total_threads: layout.set.threads.len() as u32,
        total_replies: layout.set.replies.len() as u32,
        orphaned_messages: linkage.orphan_count(),
        cycles_broken: linkage.cycles_broken,
        max_depth: layout.max_depth,
        processing_time_ms: 0,
        generation: 0,
    };
    Ok((layout.set, stats))
}

/// Keeps the previous `updated_at` for threads whose fingerprint is unchanged
/// and stamps the rest with `now`. Returns how many were unchanged.
fn stamp_updated_at(
    set: &mut ThreadSet,
    previous: &HashMap<i64, (String, i64)>,
    now: i64,
) -> usize {
    let mut unchanged = 0;
    for thread in &mut set.threads {
        match previous.get(&thread.thread_id) {
            Some((fingerprint, updated_at)) if *fingerprint == thread.fingerprint => {
                thread.updated_at = *updated_at;
                unchanged += 1;
            }
            _ => thread.updated_at = now,
        }
    }
    unchanged
}

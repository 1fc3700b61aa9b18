use crate::config::AppDefaults;
use crate::errors::ThreadResult;
use crate::query::{QueryLimits, ThreadQueryService};
use crate::storage::Database;
use crate::threading::ThreadBuilder;
use crate::types::{BuildRun, BuildStats, SortBy, ThreadSummary, ThreadTree};

/// Builder and query service over one database.
#[derive(Clone)]
pub struct ThreadService {
    builder: ThreadBuilder,
    query: ThreadQueryService,
}

impl ThreadService {
    pub fn new(db: Database, defaults: &AppDefaults) -> Self {
        Self {
            builder: ThreadBuilder::new(db.clone(), defaults.subject_fallback),
            query: ThreadQueryService::new(db, QueryLimits::from(defaults)),
        }
    }

    pub fn builder(&self) -> &ThreadBuilder {
        &self.builder
    }

    pub async fn build_threads(&self) -> ThreadResult<BuildStats> {
        self.builder.build().await
    }

    pub async fn get_threads(
        &self,
        limit: i64,
        offset: i64,
        sort_by: SortBy,
    ) -> ThreadResult<Vec<ThreadSummary>> {
        self.query.get_threads(limit, offset, sort_by).await
    }

    pub async fn get_thread_tree(&self, thread_id: i64) -> ThreadResult<ThreadTree> {
        self.query.get_thread_tree(thread_id).await
    }

    pub async fn search_threads(&self, keyword: &str, limit: i64) -> ThreadResult<Vec<ThreadSummary>> {
        self.query.search_threads(keyword, limit).await
    }

    pub async fn get_message_body(&self, message_id: i64) -> ThreadResult<Option<String>> {
        self.query.get_message_body(message_id).await
    }

    pub async fn get_thread_for_message(&self, message_id: i64) -> ThreadResult<Option<ThreadTree>> {
        self.query.get_thread_for_message(message_id).await
    }

    pub async fn latest_build(&self) -> ThreadResult<Option<BuildRun>> {
        self.query.latest_build().await
    }
}

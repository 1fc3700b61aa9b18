use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as supplied by the message store. Bodies are kept out of this
/// record and fetched separately.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub message_key: String,
    pub in_reply_to: Option<String>,
    pub references_chain: Vec<String>,
    pub author_id: i64,
    pub subject: String,
    pub sent_at: i64,
    pub is_patch: bool,
    pub commit_hash: Option<String>,
    pub series_number: Option<i32>,
    pub series_total: Option<i32>,
}

/// Input for inserting a message into the store.
#[derive(Clone, Debug, Default)]
pub struct NewMessage {
    pub message_key: String,
    pub in_reply_to: Option<String>,
    pub references_chain: Vec<String>,
    pub author_id: i64,
    pub subject: String,
    pub sent_at: i64,
    pub is_patch: bool,
    pub commit_hash: Option<String>,
    pub series_number: Option<i32>,
    pub series_total: Option<i32>,
    pub body_text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: i64,
    pub root_message_id: i64,
    pub subject_base: String,
    /// Case-folded `subject_base` and raw root subject, matched by search.
    pub subject_fold: String,
    pub root_subject_fold: String,
    pub reply_count: i64,
    pub participant_count: i64,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub updated_at: i64,
    pub fingerprint: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyRecord {
    pub thread_id: i64,
    pub message_id: i64,
    pub parent_message_id: Option<i64>,
    pub depth_level: i64,
    pub position_in_thread: i64,
    pub thread_path: Vec<i64>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub thread_id: i64,
    pub author_id: i64,
    pub reply_count: i64,
    pub first_replied: i64,
    pub last_replied: i64,
}

/// The complete derived state produced by one build run.
#[derive(Clone, Debug, Default)]
pub struct ThreadSet {
    pub threads: Vec<ThreadRecord>,
    pub replies: Vec<ReplyRecord>,
    pub participants: Vec<ParticipantRecord>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct BuildStats {
    pub total_threads: u32,
    pub total_replies: u32,
    pub orphaned_messages: u32,
    pub cycles_broken: u32,
    pub max_depth: i32,
    pub processing_time_ms: u64,
    pub generation: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildRun {
    pub generation: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub stats: BuildStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Recent,
    Newest,
    Oldest,
    MostReplies,
    MostParticipants,
}

impl SortBy {
    pub fn order_clause(self) -> &'static str {
        match self {
            SortBy::Recent => "t.last_activity_at DESC, t.thread_id ASC",
            SortBy::Newest => "t.created_at DESC, t.thread_id ASC",
            SortBy::Oldest => "t.created_at ASC, t.thread_id ASC",
            SortBy::MostReplies => "t.reply_count DESC, t.thread_id ASC",
            SortBy::MostParticipants => "t.participant_count DESC, t.thread_id ASC",
        }
    }
}

impl std::str::FromStr for SortBy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "recent" => Ok(SortBy::Recent),
            "newest" => Ok(SortBy::Newest),
            "oldest" => Ok(SortBy::Oldest),
            "most_replies" => Ok(SortBy::MostReplies),
            "most_participants" => Ok(SortBy::MostParticipants),
            other => Err(format!(
                "unknown sort '{other}' (expected recent, newest, oldest, most_replies, most_participants)"
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: i64,
    pub root_message_id: i64,
    pub root_subject: String,
    pub subject_base: String,
    pub root_author: String,
    pub reply_count: i64,
    pub participant_count: i64,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ThreadNode {
    pub message_id: i64,
    pub message_key: String,
    pub parent_message_id: Option<i64>,
    pub subject: String,
    pub author_name: String,
    pub author_email: String,
    pub sent_at: i64,
    pub depth: i64,
    pub position: i64,
    pub body_preview: String,
    pub is_patch: bool,
    pub is_reply: bool,
    pub series_info: Option<String>,
    pub has_diff: bool,
    pub commit_hash: Option<String>,
    /// Direct replies to this node.
    pub reply_count: i64,
    pub descendant_count: i64,
    /// Indices into `ThreadTree::nodes`, in display order.
    pub children: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ThreadParticipant {
    pub author_id: i64,
    pub display_name: String,
    pub email: String,
    pub reply_count: i64,
    pub first_replied: i64,
    pub last_replied: i64,
}

/// A thread as a flat arena. `nodes` is in position order, so `nodes[0]` is the
/// root and every parent precedes its children.
#[derive(Clone, Debug, Serialize)]
pub struct ThreadTree {
    pub thread_id: i64,
    pub summary: ThreadSummary,
    pub participants: Vec<ThreadParticipant>,
    pub nodes: Vec<ThreadNode>,
}

impl ThreadTree {
    pub fn root(&self) -> Option<&ThreadNode> {
        self.nodes.first()
    }

    pub fn children<'a>(&'a self, node: &'a ThreadNode) -> impl Iterator<Item = &'a ThreadNode> + 'a {
        node.children.iter().filter_map(move |&idx| self.nodes.get(idx))
    }

    pub fn node(&self, message_id: i64) -> Option<&ThreadNode> {
        self.nodes.iter().find(|n| n.message_id == message_id)
    }
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

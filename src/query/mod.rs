//! Read-only views over the thread store: listings, search and trees.
pub mod preview;

use crate::config::AppDefaults;
use crate::errors::{ThreadError, ThreadResult};
use crate::storage::{Database, ThreadMember, ThreadSnapshot};
use crate::threading::subject::{is_reply_subject, subject_base};
use crate::types::{BuildRun, SortBy, ThreadNode, ThreadSummary, ThreadTree};
use std::collections::HashMap;
use tracing::debug;

use self::preview::{body_preview, has_diff_content};

/// Page-size bounds applied to every listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryLimits {
    pub page_size: i64,
    pub max_page_size: i64,
    pub search_limit: i64,
    pub preview_lines: usize,
}

impl From<&AppDefaults> for QueryLimits {
    fn from(defaults: &AppDefaults) -> Self {
        Self {
            page_size: defaults.page_size,
            max_page_size: defaults.max_page_size,
            search_limit: defaults.search_limit,
            preview_lines: defaults.preview_lines,
        }
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self::from(&AppDefaults::default())
    }
}

impl QueryLimits {
    /// Non-positive limits fall back to the page size, oversized ones are
    /// capped, negative offsets start at zero.
    pub fn clamp(&self, limit: i64, offset: i64) -> (i64, i64) {
        let limit = if limit <= 0 { self.page_size } else { limit };
        (limit.min(self.max_page_size).max(1), offset.max(0))
    }

    fn clamp_search(&self, limit: i64) -> i64 {
        let limit = if limit <= 0 { self.search_limit } else { limit };
        limit.min(self.max_page_size).max(1)
    }
}

#[derive(Clone)]
pub struct ThreadQueryService {
    db: Database,
    limits: QueryLimits,
}

impl ThreadQueryService {
    pub fn new(db: Database, limits: QueryLimits) -> Self {
        Self { db, limits }
    }

    pub async fn get_threads(
        &self,
        limit: i64,
        offset: i64,
        sort_by: SortBy,
    ) -> ThreadResult<Vec<ThreadSummary>> {
        let (limit, offset) = self.limits.clamp(limit, offset);
        self.db
            .list_threads(sort_by, limit, offset)
            .await
            .map_err(ThreadError::store)
    }

    pub async fn get_thread_tree(&self, thread_id: i64) -> ThreadResult<ThreadTree> {
        let snapshot = self
            .db
            .thread_snapshot(thread_id)
            .await
            .map_err(ThreadError::store)?
            .ok_or(ThreadError::NotFound(thread_id))?;
        assemble_tree(snapshot, self.limits.preview_lines)
    }

    /// Threads whose subject contains `keyword`, best match first. A blank
    /// keyword lists recent threads instead.
    pub async fn search_threads(
        &self,
        keyword: &str,
        limit: i64,
    ) -> ThreadResult<Vec<ThreadSummary>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return self.get_threads(limit, 0, SortBy::Recent).await;
        }
        let limit = self.limits.clamp_search(limit);
        debug!(keyword, limit, "Searching threads");
        self.db
            .search_threads(keyword, limit)
            .await
            .map_err(ThreadError::store)
    }

    pub async fn get_message_body(&self, message_id: i64) -> ThreadResult<Option<String>> {
        self.db
            .message_body(message_id)
            .await
            .map_err(ThreadError::store)
    }

    /// Tree of the thread that currently contains `message_id`, if any.
    pub async fn get_thread_for_message(
        &self,
        message_id: i64,
    ) -> ThreadResult<Option<ThreadTree>> {
        let Some(thread_id) = self
            .db
            .thread_id_for_message(message_id)
            .await
            .map_err(ThreadError::store)?
        else {
            return Ok(None);
        };
        match self.get_thread_tree(thread_id).await {
            Ok(tree) => Ok(Some(tree)),
            // Replaced by a build between the two reads.
            Err(ThreadError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn latest_build(&self) -> ThreadResult<Option<BuildRun>> {
        self.db
            .latest_build_run()
            .await
            .map_err(ThreadError::store)
    }
}

/// Lays the position-ordered members of a thread out as an arena. Positions
/// are pre-order, so every parent precedes its children and one reverse sweep
/// settles the descendant counts.
fn assemble_tree(snapshot: ThreadSnapshot, preview_lines: usize) -> ThreadResult<ThreadTree> {
    let ThreadSnapshot {
        summary,
        members,
        participants,
    } = snapshot;
    let thread_id = summary.thread_id;

    match members.first() {
        Some(root) if root.position_in_thread == 0 && root.message_id == summary.root_message_id => {}
        _ => {
            return Err(ThreadError::Internal(format!(
                "thread {thread_id} has no root row"
            )))
        }
    }

    let slot: HashMap<i64, usize> = members
        .iter()
        .enumerate()
        .map(|(idx, m)| (m.message_id, idx))
        .collect();
    let parent_slot: Vec<Option<usize>> = members
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            if idx == 0 {
                return None;
            }
            // Anchored replies carry no parent id and hang off the root.
            let up = m
                .parent_message_id
                .and_then(|p| slot.get(&p).copied())
                .unwrap_or(0);
            Some(if up < idx { up } else { 0 })
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    let mut descendants = vec![0i64; members.len()];
    for idx in (1..members.len()).rev() {
        if let Some(up) = parent_slot[idx] {
            children[up].push(idx);
            descendants[up] += descendants[idx] + 1;
        }
    }

    let nodes = members
        .into_iter()
        .zip(children)
        .zip(descendants)
        .map(|((member, mut kids), descendant_count)| {
            kids.reverse();
            to_node(member, kids, descendant_count, preview_lines)
        })
        .collect();

    Ok(ThreadTree {
        thread_id,
        summary,
        participants,
        nodes,
    })
}

fn to_node(
    member: ThreadMember,
    children: Vec<usize>,
    descendant_count: i64,
    preview_lines: usize,
) -> ThreadNode {
    let is_reply = is_reply_subject(&member.subject);
    let body = member.body_text.as_deref().unwrap_or("");
    let series_info = match (member.series_number, member.series_total) {
        (Some(n), Some(total)) => Some(format!("{n}/{total}")),
        _ => None,
    };

    ThreadNode {
        message_id: member.message_id,
        message_key: member.message_key,
        parent_message_id: member.parent_message_id,
        subject: subject_base(&member.subject),
        author_name: member.author_name,
        author_email: member.author_email,
        sent_at: member.sent_at,
        depth: member.depth_level,
        position: member.position_in_thread,
        body_preview: body_preview(body, preview_lines),
        is_patch: member.is_patch,
        is_reply,
        series_info,
        has_diff: !is_reply && has_diff_content(body),
        commit_hash: member.commit_hash,
        reply_count: children.len() as i64,
        descendant_count,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: i64, parent: Option<i64>, depth: i64, position: i64, subject: &str) -> ThreadMember {
        ThreadMember {
            message_id: id,
            message_key: format!("m{id}@x"),
            parent_message_id: parent,
            depth_level: depth,
            position_in_thread: position,
            subject: subject.to_string(),
            sent_at: 1_000 + position,
            is_patch: false,
            commit_hash: None,
            series_number: None,
            series_total: None,
            body_text: Some(format!("body {id}")),
            author_name: "A".into(),
            author_email: "a@x".into(),
        }
    }

    fn summary(root: i64, replies: i64) -> ThreadSummary {
        ThreadSummary {
            thread_id: root,
            root_message_id: root,
            root_subject: "topic".into(),
            subject_base: "topic".into(),
            root_author: "A".into(),
            reply_count: replies,
            participant_count: 1,
            created_at: 1_000,
            last_activity_at: 1_010,
            updated_at: 1_010,
        }
    }

    #[test]
    fn clamp_bounds_limits_and_offsets() {
        let limits = QueryLimits {
            page_size: 50,
            max_page_size: 500,
            search_limit: 20,
            preview_lines: 20,
        };
        assert_eq!(limits.clamp(0, -3), (50, 0));
        assert_eq!(limits.clamp(-1, 10), (50, 10));
        assert_eq!(limits.clamp(10_000, 0), (500, 0));
        assert_eq!(limits.clamp(7, 2), (7, 2));
        assert_eq!(limits.clamp_search(0), 20);
    }

    #[test]
    fn nests_members_in_position_order() {
        // 1 -> {2 -> {3}, 4}, 5 anchored under the root
        let members = vec![
            member(1, None, 0, 0, "topic"),
            member(2, Some(1), 1, 1, "Re: topic"),
            member(3, Some(2), 2, 2, "Re: topic"),
            member(4, Some(1), 1, 3, "Re: topic"),
            member(5, None, 1, 4, "topic again"),
        ];
        let tree = assemble_tree(
            ThreadSnapshot {
                summary: summary(1, 4),
                members,
                participants: Vec::new(),
            },
            20,
        )
        .unwrap();

        let root = tree.root().unwrap();
        assert_eq!(root.message_id, 1);
        assert_eq!(root.reply_count, 3);
        assert_eq!(root.descendant_count, 4);
        let ids: Vec<i64> = tree.children(root).map(|c| c.message_id).collect();
        assert_eq!(ids, vec![2, 4, 5]);
        let first = tree.node(2).unwrap();
        assert_eq!(first.children, vec![2]);
        assert_eq!(tree.nodes[first.children[0]].message_id, 3);
        assert_eq!(first.descendant_count, 1);
        assert!(first.is_reply);
        assert_eq!(first.subject, "topic");
    }

    #[test]
    fn deep_reply_chain_stays_flat() {
        const DEPTH: i64 = 200_000;
        let members: Vec<ThreadMember> = (0..=DEPTH)
            .map(|i| {
                let parent = if i == 0 { None } else { Some(i) };
                member(i + 1, parent, i, i, if i == 0 { "topic" } else { "Re: topic" })
            })
            .collect();
        let tree = assemble_tree(
            ThreadSnapshot {
                summary: summary(1, DEPTH),
                members,
                participants: Vec::new(),
            },
            1,
        )
        .unwrap();

        assert_eq!(tree.nodes.len() as i64, DEPTH + 1);
        assert_eq!(tree.root().unwrap().descendant_count, DEPTH);
        let last = tree.nodes.last().unwrap();
        assert_eq!(last.depth, DEPTH);
        assert!(last.children.is_empty());

        let json = serde_json::to_string(&tree).unwrap();
        assert!(json.len() > DEPTH as usize);
        drop(tree);
    }

    #[test]
    fn missing_root_row_is_internal() {
        let err = assemble_tree(
            ThreadSnapshot {
                summary: summary(1, 0),
                members: Vec::new(),
                participants: Vec::new(),
            },
            20,
        )
        .unwrap_err();
        assert!(matches!(err, ThreadError::Internal(_)));
    }

    #[test]
    fn series_info_and_diff_flags() {
        let mut patch = member(1, None, 0, 0, "[PATCH 2/3] net: fix");
        patch.series_number = Some(2);
        patch.series_total = Some(3);
        patch.body_text =
            Some("Fix.\n---\ndiff --git a/x b/x\nindex 1..2 100644\n--- a/x\n+++ b/x\n".into());
        let node = to_node(patch, Vec::new(), 0, 20);
        assert_eq!(node.series_info.as_deref(), Some("2/3"));
        assert!(node.has_diff);

        let mut reply = member(2, Some(1), 1, 1, "Re: [PATCH 2/3] net: fix");
        reply.body_text = Some("diff --git a/x b/x\nindex 1..2 100644\n--- a/x\n".into());
        assert!(!to_node(reply, Vec::new(), 0, 20).has_diff);
    }
}

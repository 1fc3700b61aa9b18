use super::resolve::Linkage;
use super::subject::{fold_case, subject_base};
use crate::types::{MessageRecord, ParticipantRecord, ReplyRecord, ThreadRecord, ThreadSet};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// Output of laying the linked messages out as threads.
#[derive(Debug, Default)]
pub struct Layout {
    pub set: ThreadSet,
    pub max_depth: i32,
}

/// Turns resolved links into threads, replies and participants.
///
/// Each tree is walked with an explicit stack in pre-order; siblings are
/// visited by `(sent_at, message_key)`. `updated_at` is left at zero for the
/// caller to fill in.
pub fn lay_out(messages: &[MessageRecord], linkage: &Linkage) -> Layout {
    let n = messages.len();
    let roots_of = final_roots(linkage, n);

    // Tree parent: the reference parent, or the final root for anchored messages.
    let mut tree_parent: Vec<Option<usize>> = vec![None; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for idx in 0..n {
        let up = match (linkage.parent[idx], linkage.anchored[idx]) {
            (Some(parent), _) => Some(parent),
            (None, Some(_)) => Some(roots_of[idx]),
            (None, None) => None,
        };
        tree_parent[idx] = up;
        if let Some(up) = up {
            children[up].push(idx);
        }
    }
    for list in &mut children {
        list.sort_by(|&a, &b| sibling_key(&messages[a]).cmp(&sibling_key(&messages[b])));
    }

    let mut roots: Vec<usize> = (0..n).filter(|&idx| tree_parent[idx].is_none()).collect();
    roots.sort_by(|&a, &b| sibling_key(&messages[a]).cmp(&sibling_key(&messages[b])));

    let mut layout = Layout::default();
    let mut depth = vec![0i64; n];
    let mut paths: Vec<Vec<i64>> = vec![Vec::new(); n];

    for root in roots {
        let thread_id = messages[root].id;
        let mut members: Vec<usize> = Vec::new();
        let mut stack = vec![root];
        depth[root] = 0;
        paths[root] = vec![messages[root].id];

        while let Some(node) = stack.pop() {
            let position = members.len() as i64;
            members.push(node);

            if node != root {
                layout.max_depth = layout.max_depth.max(depth[node] as i32);
                layout.set.replies.push(ReplyRecord {
                    thread_id,
                    message_id: messages[node].id,
                    parent_message_id: linkage.parent[node].map(|p| messages[p].id),
                    depth_level: depth[node],
                    position_in_thread: position,
                    thread_path: paths[node].clone(),
                });
            }

            for &child in children[node].iter().rev() {
                depth[child] = depth[node] + 1;
                let mut path = paths[node].clone();
                path.push(messages[child].id);
                paths[child] = path;
                stack.push(child);
            }
        }

        let (thread, participants) = aggregate(messages, root, &members, linkage, &depth);
        layout.set.threads.push(thread);
        layout.set.participants.extend(participants);
    }

    layout
}

fn sibling_key(message: &MessageRecord) -> (i64, &str) {
    (message.sent_at, message.message_key.as_str())
}

/// Final root of every message, memoized over the effective-parent forest.
fn final_roots(linkage: &Linkage, n: usize) -> Vec<usize> {
    let mut root_of: Vec<Option<usize>> = vec![None; n];
    for start in 0..n {
        if root_of[start].is_some() {
            continue;
        }
        let mut chain = Vec::new();
        let mut node = start;
        let root = loop {
            if let Some(known) = root_of[node] {
                break known;
            }
            chain.push(node);
            match linkage.effective_parent(node) {
                Some(up) => node = up,
                None => break node,
            }
        };
        for member in chain {
            root_of[member] = Some(root);
        }
    }
    root_of
        .into_iter()
        .enumerate()
        .map(|(idx, root)| root.unwrap_or(idx))
        .collect()
}

/// `Some(id)` as a marker byte plus the id, distinct from the all-zero `None`.
fn tagged(id: i64) -> [u8; 9] {
    let mut out = [1u8; 9];
    out[1..].copy_from_slice(&id.to_le_bytes());
    out
}

fn aggregate(
    messages: &[MessageRecord],
    root: usize,
    members: &[usize],
    linkage: &Linkage,
    depth: &[i64],
) -> (ThreadRecord, Vec<ParticipantRecord>) {
    let root_msg = &messages[root];
    let thread_id = root_msg.id;
    let subject = subject_base(&root_msg.subject);

    let mut last_activity = root_msg.sent_at;
    let mut authors: HashSet<i64> = HashSet::new();
    // author_id -> (messages, first, last)
    let mut per_author: BTreeMap<i64, (i64, i64, i64)> = BTreeMap::new();
    // Fixed algorithm and byte layout, so fingerprints survive toolchain upgrades.
    let mut hasher = Sha256::new();
    hasher.update(thread_id.to_le_bytes());
    hasher.update((subject.len() as u64).to_le_bytes());
    hasher.update(subject.as_bytes());

    for (position, &idx) in members.iter().enumerate() {
        let message = &messages[idx];
        last_activity = last_activity.max(message.sent_at);
        authors.insert(message.author_id);
        per_author
            .entry(message.author_id)
            .and_modify(|(count, first, last)| {
                *count += 1;
                *first = (*first).min(message.sent_at);
                *last = (*last).max(message.sent_at);
            })
            .or_insert((1, message.sent_at, message.sent_at));

        let parent = linkage.parent[idx].map(|p| messages[p].id);
        hasher.update(message.id.to_le_bytes());
        hasher.update(parent.map_or([0u8; 9], tagged));
        hasher.update(depth[idx].to_le_bytes());
        hasher.update((position as u64).to_le_bytes());
        hasher.update(message.author_id.to_le_bytes());
        hasher.update(message.sent_at.to_le_bytes());
    }

    let thread = ThreadRecord {
        thread_id,
        root_message_id: root_msg.id,
        subject_fold: fold_case(&subject),
        root_subject_fold: fold_case(&root_msg.subject),
        subject_base: subject,
        reply_count: (members.len() - 1) as i64,
        participant_count: authors.len() as i64,
        created_at: root_msg.sent_at,
        last_activity_at: last_activity,
        updated_at: 0,
        fingerprint: hex::encode(hasher.finalize()),
    };

    let participants = per_author
        .into_iter()
        .map(|(author_id, (count, first, last))| ParticipantRecord {
            thread_id,
            author_id,
            reply_count: count,
            first_replied: first,
            last_replied: last,
        })
        .collect();

    (thread, participants)
}

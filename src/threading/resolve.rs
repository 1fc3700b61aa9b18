//! Parent resolution over the flat message list.
//!
//! Everything here works on indices into the load-ordered message slice, so
//! the graph is an arena and never owns itself.
use super::subject::{matching_key, series_key};
use crate::errors::{ThreadError, ThreadResult};
use crate::types::MessageRecord;
use std::collections::HashMap;

/// Reply links for every message, after cycle cuts and fallback anchoring.
#[derive(Debug, Default)]
pub struct Linkage {
    /// Parent resolved from `in_reply_to`/`references_chain`.
    pub parent: Vec<Option<usize>>,
    /// Set on parentless messages that fallback anchoring joined to another
    /// tree. The message hangs directly under that tree's final root.
    pub anchored: Vec<Option<usize>>,
    /// The stated parent could not be honored.
    pub orphaned: Vec<bool>,
    pub cycles_broken: u32,
    pub anomalies: Vec<ThreadError>,
}

impl Linkage {
    pub fn orphan_count(&self) -> u32 {
        self.orphaned.iter().filter(|o| **o).count() as u32
    }

    /// Parent used for tree connectivity: the reference parent, else the anchor.
    pub fn effective_parent(&self, idx: usize) -> Option<usize> {
        self.parent[idx].or(self.anchored[idx])
    }

    /// Walks effective parents up to the tree root.
    pub fn find_root(&self, mut idx: usize) -> usize {
        while let Some(up) = self.effective_parent(idx) {
            idx = up;
        }
        idx
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Why a message's stated parent was not used.
enum Unhonored {
    SelfReference,
    Missing,
}

pub fn index_by_key(messages: &[MessageRecord]) -> ThreadResult<HashMap<&str, usize>> {
    let mut index = HashMap::with_capacity(messages.len());
    for (idx, message) in messages.iter().enumerate() {
        if index.insert(message.message_key.as_str(), idx).is_some() {
            return Err(ThreadError::DuplicateMessageKey(message.message_key.clone()));
        }
    }
    Ok(index)
}

/// Resolves parents, breaks cycles and (optionally) anchors unresolved
/// messages by subject or patch series. `messages` must be in load order.
pub fn link(messages: &[MessageRecord], subject_fallback: bool) -> ThreadResult<Linkage> {
    let index = index_by_key(messages)?;
    let n = messages.len();
    let mut linkage = Linkage {
        parent: vec![None; n],
        anchored: vec![None; n],
        orphaned: vec![false; n],
        cycles_broken: 0,
        anomalies: Vec::new(),
    };
    let mut missing_parent = vec![false; n];

    for (idx, message) in messages.iter().enumerate() {
        let own = message.message_key.as_str();
        let lookup = |key: &str| -> Option<usize> {
            if key == own {
                None
            } else {
                index.get(key).copied()
            }
        };

        let in_reply_to = non_empty(message.in_reply_to.as_deref());
        let parent = in_reply_to.and_then(lookup).or_else(|| {
            message
                .references_chain
                .iter()
                .rev()
                .filter_map(|key| non_empty(Some(key.as_str())))
                .find_map(lookup)
        });
        linkage.parent[idx] = parent;

        let stated = in_reply_to.or_else(|| {
            message
                .references_chain
                .iter()
                .rev()
                .find_map(|key| non_empty(Some(key.as_str())))
        });
        let Some(stated) = stated else {
            continue;
        };

        let problem = if stated == own {
            Some(Unhonored::SelfReference)
        } else if !index.contains_key(stated) {
            Some(Unhonored::Missing)
        } else {
            None
        };

        if let Some(problem) = problem {
            linkage.orphaned[idx] = true;
            let reason = match problem {
                Unhonored::SelfReference => "references itself".to_string(),
                Unhonored::Missing => {
                    missing_parent[idx] = true;
                    format!("parent {stated} is not in the message store")
                }
            };
            linkage.anomalies.push(ThreadError::MalformedReference {
                message_key: message.message_key.clone(),
                reason,
            });
        }
    }

    break_cycles(messages, &mut linkage);

    if subject_fallback {
        anchor_unresolved(messages, &missing_parent, &mut linkage);
    }

    Ok(linkage)
}

/// Cuts exactly one edge per cycle: the earliest member by
/// `(sent_at, message_key)` loses its parent and becomes the root.
fn break_cycles(messages: &[MessageRecord], linkage: &mut Linkage) {
    let n = messages.len();
    let mut state = vec![Visit::New; n];

    for start in 0..n {
        if state[start] != Visit::New {
            continue;
        }

        let mut path = Vec::new();
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            match state[node] {
                Visit::Done => break,
                Visit::Active => {
                    if let Some(from) = path.iter().position(|&p| p == node) {
                        let cut = path[from..]
                            .iter()
                            .copied()
                            .min_by_key(|&idx: &usize| {
                                (messages[idx].sent_at, messages[idx].message_key.as_str())
                            })
                            .unwrap_or(node);
                        let cycle_len = path.len() - from;
                        linkage.parent[cut] = None;
                        linkage.orphaned[cut] = true;
                        linkage.cycles_broken += 1;
                        linkage.anomalies.push(ThreadError::MalformedReference {
                            message_key: messages[cut].message_key.clone(),
                            reason: format!("reply cycle of length {cycle_len}"),
                        });
                    }
                    break;
                }
                Visit::New => {
                    state[node] = Visit::Active;
                    path.push(node);
                    cursor = linkage.parent[node];
                }
            }
        }

        for node in path {
            state[node] = Visit::Done;
        }
    }
}

/// Joins messages whose stated parent is missing and that resolved no
/// ancestor to the tree of an earlier message with the same subject, or to
/// the head of their patch series.
fn anchor_unresolved(messages: &[MessageRecord], missing_parent: &[bool], linkage: &mut Linkage) {
    let mut first_by_subject: HashMap<String, usize> = HashMap::new();
    let mut series_head: HashMap<String, usize> = HashMap::new();

    for (idx, message) in messages.iter().enumerate() {
        let key = matching_key(&message.subject);
        if !key.is_empty() {
            first_by_subject.entry(key).or_insert(idx);
        }

        if let Some(total) = message.series_total {
            if let Some(series) = series_key(&message.subject, total) {
                series_head
                    .entry(series)
                    .and_modify(|head| {
                        let current = messages[*head].series_number;
                        let replace = match (current, message.series_number) {
                            (Some(existing), Some(candidate)) => candidate < existing,
                            (None, Some(_)) => true,
                            _ => false,
                        };
                        if replace {
                            *head = idx;
                        }
                    })
                    .or_insert(idx);
            }
        }
    }

    for (idx, message) in messages.iter().enumerate() {
        if !missing_parent[idx] || linkage.parent[idx].is_some() {
            continue;
        }

        let by_subject = first_by_subject
            .get(&matching_key(&message.subject))
            .copied()
            .filter(|&first| first < idx);
        let by_series = message
            .series_total
            .and_then(|total| series_key(&message.subject, total))
            .and_then(|series| series_head.get(&series).copied())
            .filter(|&head| head != idx);

        for candidate in [by_subject, by_series].into_iter().flatten() {
            let root = linkage.find_root(candidate);
            if root != idx {
                linkage.anchored[idx] = Some(root);
                break;
            }
        }
    }
}

fn non_empty(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.trim().is_empty())
}

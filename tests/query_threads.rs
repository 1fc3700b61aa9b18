mod common;

use common::{authors, fixture, msg, reply, Fixture, T0};
use skein::config::AppDefaults;
use skein::query::{QueryLimits, ThreadQueryService};
use skein::types::{NewMessage, SortBy, ThreadNode, ThreadSummary};
use skein::{ThreadError, ThreadService};

const ALL_SORTS: [SortBy; 5] = [
    SortBy::Recent,
    SortBy::Newest,
    SortBy::Oldest,
    SortBy::MostReplies,
    SortBy::MostParticipants,
];

/// Fresh store with one author (id 1), `messages` inserted and one build run.
async fn built(messages: &[NewMessage]) -> (Fixture, ThreadService, Vec<i64>) {
    let fx = fixture().await;
    authors(&fx.db, 1).await;
    let ids = fx.db.insert_messages(messages).await.unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    service.build_threads().await.unwrap();
    (fx, service, ids)
}

fn ids_of(threads: &[ThreadSummary]) -> Vec<i64> {
    threads.iter().map(|t| t.thread_id).collect()
}

/// Seven threads with varied activity, reply counts and participants.
async fn seven_threads() -> (Fixture, ThreadService) {
    let fx = fixture().await;
    let a = authors(&fx.db, 4).await;
    let mut messages = Vec::new();
    for t in 0..7i64 {
        let key = format!("t{t}@x");
        let subject = format!("topic {t}");
        messages.push(msg(&key, a[(t % 4) as usize], &subject, T0 + t * 1_000));
        for r in 0..(t % 3) {
            messages.push(reply(
                &format!("t{t}r{r}@x"),
                &key,
                a[((t + r + 1) % 4) as usize],
                &format!("Re: {subject}"),
                T0 + t * 1_000 + (7 - t) * 50 + r,
            ));
        }
    }
    messages.sort_by_key(|m| m.sent_at);
    fx.db.insert_messages(&messages).await.unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    service.build_threads().await.unwrap();
    (fx, service)
}

#[tokio::test]
async fn tree_nests_replies_and_reports_counts() {
    let fx = fixture().await;
    let a = authors(&fx.db, 2).await;
    let ids = fx
        .db
        .insert_messages(&[
            NewMessage {
                is_patch: true,
                series_number: Some(1),
                series_total: Some(2),
                body_text: Some("Fix it.\n---\ndiff --git a/f b/f\nindex 1..2 100644\n--- a/f\n+++ b/f\n".into()),
                ..msg("root@x", a[0], "[PATCH 1/2] foo", T0)
            },
            NewMessage {
                body_text: Some("On Mon, Jan 6, 2025 Author 0 wrote:\n> Fix it.\nLooks good.\n".into()),
                ..reply("a@x", "root@x", a[1], "Re: [PATCH 1/2] foo", T0 + 60)
            },
            reply("b@x", "gone@x", a[0], "Re: [PATCH 1/2] foo", T0 + 120),
            reply("c@x", "a@x", a[0], "Re: [PATCH 1/2] foo", T0 + 180),
        ])
        .await
        .unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    service.build_threads().await.unwrap();

    let tree = service.get_thread_tree(ids[0]).await.unwrap();
    assert_eq!(tree.thread_id, ids[0]);
    assert_eq!(tree.summary.reply_count, 3);
    assert_eq!(tree.summary.root_author, "Author 0");
    assert_eq!(tree.participants.len(), 2);

    let root = tree.root().unwrap();
    assert_eq!(root.depth, 0);
    assert_eq!(root.series_info.as_deref(), Some("1/2"));
    assert!(root.has_diff);
    assert!(!root.is_reply);
    assert_eq!(root.body_preview, "Fix it.");
    assert_eq!(root.reply_count, 2);
    assert_eq!(root.descendant_count, 3);

    let children: Vec<&ThreadNode> = tree.children(root).collect();
    let ids_under_root: Vec<i64> = children.iter().map(|c| c.message_id).collect();
    assert_eq!(ids_under_root, vec![ids[1], ids[2]]);
    let a_node = children[0];
    assert!(a_node.is_reply);
    assert_eq!(a_node.subject, "[PATCH 1/2] foo");
    assert_eq!(a_node.body_preview, "Looks good.");
    let c_node = tree.children(a_node).next().unwrap();
    assert_eq!(c_node.message_id, ids[3]);
    assert_eq!(c_node.depth, 2);
    let b_node = children[1];
    assert_eq!(b_node.parent_message_id, None);
    assert_eq!(b_node.depth, 1);
    let positions: Vec<i64> = tree.nodes.iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);

    let members = fx.db.thread_members(ids[0]).await.unwrap();
    let positions: Vec<i64> = members.iter().map(|m| m.position_in_thread).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    assert_eq!(fx.db.thread_replies(ids[0]).await.unwrap().len(), 3);
    assert_eq!(fx.db.participants(ids[0]).await.unwrap(), tree.participants);
    assert_eq!(
        fx.db.get_thread_summary(ids[0]).await.unwrap(),
        Some(tree.summary.clone())
    );
}

#[tokio::test]
async fn unknown_thread_is_not_found() {
    let (_fx, service, _) = built(&[]).await;
    let err = service.get_thread_tree(9_999).await.unwrap_err();
    assert!(matches!(err, ThreadError::NotFound(9_999)));
}

#[tokio::test]
async fn search_matches_subjects_case_insensitively() {
    let fx = fixture().await;
    let a = authors(&fx.db, 1).await;
    fx.db
        .insert_messages(&[msg("bpf@x", a[0], "Re: [PATCH] bpf: fix verifier", T0)])
        .await
        .unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    service.build_threads().await.unwrap();

    let found = service.search_threads("bpf", 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subject_base, "[PATCH] bpf: fix verifier");
    assert_eq!(service.search_threads("BPF: FIX", 10).await.unwrap().len(), 1);
    assert!(service.search_threads("nonexistent-term", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn search_ranks_prefix_then_word_start_then_substring() {
    let (_fx, service, ids) = built(&[
        msg("sub@x", 1, "mybpfy helper", T0 + 30),
        msg("word@x", 1, "net: bpf helpers", T0 + 20),
        msg("prefix@x", 1, "bpf: verifier", T0 + 10),
    ])
    .await;
    let found = service.search_threads("bpf", 10).await.unwrap();
    assert_eq!(ids_of(&found), vec![ids[2], ids[1], ids[0]]);
}

#[tokio::test]
async fn search_escapes_like_wildcards() {
    let fx = fixture().await;
    let a = authors(&fx.db, 1).await;
    let ids = fx
        .db
        .insert_messages(&[
            msg("pct@x", a[0], "100% done", T0),
            msg("plain@x", a[0], "1000 done", T0 + 1),
            msg("under@x", a[0], "a_b", T0 + 2),
            msg("other@x", a[0], "axb", T0 + 3),
        ])
        .await
        .unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    service.build_threads().await.unwrap();

    assert_eq!(ids_of(&service.search_threads("100%", 10).await.unwrap()), vec![ids[0]]);
    assert_eq!(ids_of(&service.search_threads("a_b", 10).await.unwrap()), vec![ids[2]]);
}

#[tokio::test]
async fn blank_search_lists_recent_threads() {
    let (_fx, service) = seven_threads().await;
    let blank = service.search_threads("   ", 0).await.unwrap();
    let recent = service.get_threads(0, 0, SortBy::Recent).await.unwrap();
    assert_eq!(ids_of(&blank), ids_of(&recent));
    assert_eq!(blank.len(), 7);
}

#[tokio::test]
async fn pages_concatenate_to_the_full_listing() {
    let (_fx, service) = seven_threads().await;

    for sort in ALL_SORTS {
        let full = ids_of(&service.get_threads(500, 0, sort).await.unwrap());
        assert_eq!(full.len(), 7);

        for k in 1..=8i64 {
            let mut paged = Vec::new();
            let mut offset = 0;
            loop {
                let page = service.get_threads(k, offset, sort).await.unwrap();
                if page.is_empty() {
                    break;
                }
                assert!(page.len() as i64 <= k);
                paged.extend(ids_of(&page));
                offset += k;
            }
            assert_eq!(paged, full, "sort {sort:?} k {k}");
        }
    }
}

#[tokio::test]
async fn sorts_order_by_their_keys() {
    let (_fx, service) = seven_threads().await;

    let recent = service.get_threads(0, 0, SortBy::Recent).await.unwrap();
    assert!(recent.windows(2).all(|w| w[0].last_activity_at >= w[1].last_activity_at));
    let oldest = service.get_threads(0, 0, SortBy::Oldest).await.unwrap();
    assert!(oldest.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    let newest = service.get_threads(0, 0, SortBy::Newest).await.unwrap();
    assert!(newest.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    let replies = service.get_threads(0, 0, SortBy::MostReplies).await.unwrap();
    assert!(replies.windows(2).all(|w| {
        w[0].reply_count > w[1].reply_count
            || (w[0].reply_count == w[1].reply_count && w[0].thread_id < w[1].thread_id)
    }));
    let people = service.get_threads(0, 0, SortBy::MostParticipants).await.unwrap();
    assert!(people.windows(2).all(|w| w[0].participant_count >= w[1].participant_count));
}

#[tokio::test]
async fn limits_and_offsets_are_clamped() {
    let (fx, _service) = seven_threads().await;
    let query = ThreadQueryService::new(
        fx.db.clone(),
        QueryLimits {
            page_size: 2,
            max_page_size: 3,
            search_limit: 2,
            preview_lines: 5,
        },
    );

    assert_eq!(query.get_threads(0, 0, SortBy::Recent).await.unwrap().len(), 2);
    assert_eq!(query.get_threads(-4, 0, SortBy::Recent).await.unwrap().len(), 2);
    assert_eq!(query.get_threads(100, 0, SortBy::Recent).await.unwrap().len(), 3);
    assert_eq!(
        ids_of(&query.get_threads(3, -10, SortBy::Recent).await.unwrap()),
        ids_of(&query.get_threads(3, 0, SortBy::Recent).await.unwrap())
    );
    assert!(query.get_threads(3, 100, SortBy::Recent).await.unwrap().is_empty());
    assert_eq!(query.search_threads("topic", 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn message_body_and_owning_thread() {
    let fx = fixture().await;
    let a = authors(&fx.db, 2).await;
    let ids = fx
        .db
        .insert_messages(&[
            NewMessage {
                body_text: Some("full body\nwith lines".into()),
                ..msg("root@x", a[0], "topic", T0)
            },
            reply("r@x", "root@x", a[1], "Re: topic", T0 + 5),
        ])
        .await
        .unwrap();
    let service = ThreadService::new(fx.db.clone(), &AppDefaults::default());
    assert!(service.latest_build().await.unwrap().is_none());
    let stats = service.build_threads().await.unwrap();

    assert_eq!(
        service.get_message_body(ids[0]).await.unwrap().as_deref(),
        Some("full body\nwith lines")
    );
    assert_eq!(service.get_message_body(ids[1]).await.unwrap(), None);
    assert_eq!(service.get_message_body(12_345).await.unwrap(), None);

    let tree = service.get_thread_for_message(ids[1]).await.unwrap().unwrap();
    assert_eq!(tree.thread_id, ids[0]);
    let tree = service.get_thread_for_message(ids[0]).await.unwrap().unwrap();
    assert_eq!(tree.root().unwrap().children.len(), 1);

    let unthreaded = fx
        .db
        .insert_message(&msg("later@x", a[0], "not built yet", T0 + 50))
        .await
        .unwrap();
    assert!(service.get_thread_for_message(unthreaded).await.unwrap().is_none());

    let latest = service.latest_build().await.unwrap().unwrap();
    assert_eq!(latest.generation, stats.generation);
    assert_eq!(latest.stats.total_threads, 1);
    assert_eq!(latest.stats.total_replies, 1);
}

#[tokio::test]
async fn readers_see_whole_builds_only() {
    let (fx, service) = seven_threads().await;
    let before = service.get_threads(500, 0, SortBy::Oldest).await.unwrap();
    fx.db
        .insert_messages(&[
            msg("fresh@x", 1, "brand new topic", T0 + 20_000),
            reply("fresh-r@x", "fresh@x", 2, "Re: brand new topic", T0 + 20_010),
            reply("late@x", "t0@x", 3, "Re: topic 0", T0 + 20_020),
        ])
        .await
        .unwrap();

    let handle = service.builder().start().unwrap();
    let mut during = Vec::new();
    for _ in 0..5 {
        during.push(service.get_threads(500, 0, SortBy::Oldest).await.unwrap());
    }
    handle.wait().await.unwrap();
    let after = service.get_threads(500, 0, SortBy::Oldest).await.unwrap();

    assert_ne!(after, before);
    assert_eq!(after.len(), before.len() + 1);
    for seen in during {
        assert!(seen == before || seen == after, "read a partially replaced thread set");
    }
}

#[tokio::test]
async fn search_folds_non_ascii_case() {
    let (_fx, service, ids) = built(&[
        msg("de@x", 1, "Über die Treiber", T0),
        msg("en@x", 1, "driver notes", T0 + 1),
    ])
    .await;
    for keyword in ["Über", "über", "ÜBER", "TREIBER"] {
        let found = service.search_threads(keyword, 10).await.unwrap();
        assert_eq!(ids_of(&found), vec![ids[0]], "keyword {keyword}");
    }
}

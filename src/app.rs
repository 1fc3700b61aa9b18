use crate::cli::{Cli, Command};
use crate::config::AppDefaults;
use crate::import;
use crate::service::ThreadService;
use crate::storage::Database;
use crate::types::{format_ts, ThreadNode, ThreadSummary, ThreadTree};
use anyhow::Result;
use serde::Serialize;
use tracing::info;

const RULE_WIDTH: usize = 80;

pub async fn run(cli: Cli) -> Result<()> {
    let defaults = AppDefaults::load()?;
    let db = Database::new_default(&defaults).await?;
    info!(path = %db.path().display(), "Using SQLite store");

    let service = ThreadService::new(db.clone(), &defaults);
    let result = dispatch(&cli, &db, &service).await;
    db.close().await;
    result
}

async fn dispatch(cli: &Cli, db: &Database, service: &ThreadService) -> Result<()> {
    match &cli.command {
        Command::Import { file } => {
            let summary = import::import_file(db, file).await?;
            if cli.json {
                return print_json(&summary);
            }
            println!(
                "Imported {} messages from {} authors",
                summary.messages, summary.authors
            );
        }
        Command::Build => {
            let stats = service.build_threads().await?;
            if cli.json {
                return print_json(&stats);
            }
            banner("Thread build");
            println!("Generation:   {}", stats.generation);
            println!("Threads:      {}", stats.total_threads);
            println!("Replies:      {}", stats.total_replies);
            println!("Orphaned:     {}", stats.orphaned_messages);
            println!("Cycles cut:   {}", stats.cycles_broken);
            println!("Max depth:    {}", stats.max_depth);
            println!("Elapsed:      {} ms", stats.processing_time_ms);
            println!("{}", "=".repeat(RULE_WIDTH));
        }
        Command::Threads {
            limit,
            offset,
            sort,
        } => {
            let threads = service.get_threads(*limit, *offset, *sort).await?;
            if cli.json {
                return print_json(&threads);
            }
            print_summaries("Threads", &threads, *offset);
        }
        Command::Tree { thread_id } => {
            let tree = service.get_thread_tree(*thread_id).await?;
            if cli.json {
                return print_json(&tree);
            }
            print_tree(&tree);
        }
        Command::Search { keyword, limit } => {
            let threads = service.search_threads(keyword, *limit).await?;
            if cli.json {
                return print_json(&threads);
            }
            print_summaries(&format!("Search: {keyword}"), &threads, 0);
        }
        Command::Body { message_id } => {
            let body = service.get_message_body(*message_id).await?;
            if cli.json {
                return print_json(&body);
            }
            match body {
                Some(text) => println!("{text}"),
                None => println!("No body for message {message_id}"),
            }
        }
        Command::ThreadOf { message_id } => {
            let tree = service.get_thread_for_message(*message_id).await?;
            if cli.json {
                return print_json(&tree);
            }
            match tree {
                Some(tree) => print_tree(&tree),
                None => println!("Message {message_id} is not part of any thread"),
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(RULE_WIDTH));
    println!("{title}");
    println!("{}\n", "=".repeat(RULE_WIDTH));
}

fn print_summaries(title: &str, threads: &[ThreadSummary], offset: i64) {
    banner(title);
    if threads.is_empty() {
        println!("No threads found\n");
    }
    for (i, thread) in threads.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            offset.max(0) + i as i64 + 1,
            format_ts(thread.last_activity_at),
            thread.root_subject
        );
        println!(
            "   #{} by {} · {} replies · {} participants",
            thread.thread_id, thread.root_author, thread.reply_count, thread.participant_count
        );
        println!();
    }
    println!("{}", "=".repeat(RULE_WIDTH));
}

fn print_tree(tree: &ThreadTree) {
    banner(&format!("#{} {}", tree.thread_id, tree.summary.root_subject));
    println!(
        "{} replies · {} participants · last activity {}\n",
        tree.summary.reply_count,
        tree.summary.participant_count,
        format_ts(tree.summary.last_activity_at)
    );

    let mut stack: Vec<&ThreadNode> = tree.root().into_iter().collect();
    while let Some(node) = stack.pop() {
        let indent = "  ".repeat(node.depth.max(0) as usize);
        let mut tags = Vec::new();
        if let Some(series) = &node.series_info {
            tags.push(series.clone());
        }
        if node.has_diff {
            tags.push("diff".to_string());
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };

        println!(
            "{indent}{} {} <{}> {}{tags}",
            format_ts(node.sent_at),
            node.author_name,
            node.author_email,
            node.subject
        );
        if let Some(first) = node.body_preview.lines().find(|l| !l.trim().is_empty()) {
            let first: String = first.chars().take(RULE_WIDTH).collect();
            println!("{indent}  {first}");
        }

        stack.extend(node.children.iter().rev().filter_map(|&idx| tree.nodes.get(idx)));
    }

    println!("\n{}", "=".repeat(RULE_WIDTH));
}

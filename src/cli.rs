use crate::types::SortBy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line options for Skein.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Print results as pretty JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load messages from a JSON-lines file into the message store.
    Import { file: PathBuf },

    /// Rebuild every thread from the message store.
    Build,

    /// List threads.
    Threads {
        /// Page size; 0 uses the configured default.
        #[arg(long, default_value_t = 0)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// recent, newest, oldest, most_replies or most_participants.
        #[arg(long, default_value = "recent")]
        sort: SortBy,
    },

    /// Show one thread as a tree.
    Tree { thread_id: i64 },

    /// Find threads by subject.
    Search {
        keyword: String,
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Print the full body of a message.
    Body { message_id: i64 },

    /// Show the thread containing a message.
    ThreadOf { message_id: i64 },
}

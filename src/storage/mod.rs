mod db;
mod messages;
mod threads;

pub use db::Database;
pub use threads::{BuildRunInput, ThreadMember, ThreadSnapshot};

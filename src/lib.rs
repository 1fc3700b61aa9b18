pub mod app;
pub mod cli;
pub mod config;
pub mod errors;
pub mod import;
pub mod query;
pub mod service;
pub mod storage;
pub mod threading;
pub mod types;

pub use errors::{ThreadError, ThreadResult};
pub use service::ThreadService;

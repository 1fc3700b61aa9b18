use thiserror::Error;

pub type ThreadResult<T> = Result<T, ThreadError>;

#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Thread {0} not found")]
    NotFound(i64),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Malformed reference on {message_key}: {reason}")]
    MalformedReference { message_key: String, reason: String },
    #[error("A thread build is already in progress")]
    ConcurrentBuildInProgress,
    #[error("Duplicate message key in message store: {0}")]
    DuplicateMessageKey(String),
    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ThreadError {
    /// Wraps a storage-layer failure. The full context chain is kept in the message.
    pub fn store(err: anyhow::Error) -> Self {
        ThreadError::StoreUnavailable(format!("{err:#}"))
    }
}

use thiserror::Error;

/// Errors returned by checkpoint stores.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Messages could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored checkpoint could not be interpreted.
    #[error("corrupted checkpoint in thread {thread_id}: {reason}")]
    Corrupted {
        /// The thread the checkpoint belongs to.
        thread_id: String,
        /// What was wrong with it.
        reason: String,
    },
}

//! Per-thread persistence of conversation state.
//!
//! Every step of a conversation is recorded as a [`Checkpoint`] holding the
//! full message list at that point. The latest checkpoint of a thread is
//! enough to resume it; older ones are kept so a thread's evolution can be
//! inspected.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod checkpoint;
mod error;
mod memory;
mod sqlite;

use async_trait::async_trait;

pub use checkpoint::{Checkpoint, CheckpointSource};
pub use error::Error;
pub use memory::MemoryCheckpointer;
pub use sqlite::SqliteCheckpointer;

/// A store of checkpoints grouped by thread.
#[async_trait]
pub trait Checkpointer: Send + Sync + 'static {
    /// Stores a checkpoint.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), Error>;

    /// Returns the checkpoint with the highest step of the thread.
    async fn latest(&self, thread_id: &str)
    -> Result<Option<Checkpoint>, Error>;

    /// Returns all checkpoints of the thread, oldest first.
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, Error>;

    /// Returns the ids of all known threads, ordered by the time of their
    /// first checkpoint.
    async fn list_threads(&self) -> Result<Vec<String>, Error>;

    /// Removes every checkpoint of the thread.
    ///
    /// Returns `false` if the thread had no checkpoints.
    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error>;
}

//! Queries over stored conversation threads.

use std::sync::Arc;

use parley_checkpoint::Checkpointer;

use crate::conversation::Conversation;
use crate::error::Error;

/// A stored thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    /// The thread id.
    pub id: String,
    /// Title derived from the first user message.
    pub title: String,
}

/// Read access to the threads in a checkpoint store.
#[derive(Clone)]
pub struct Threads {
    checkpointer: Arc<dyn Checkpointer>,
}

impl Threads {
    /// Creates a view over `checkpointer`.
    #[inline]
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self { checkpointer }
    }

    /// Lists all threads, oldest first.
    pub async fn list(&self) -> Result<Vec<ThreadSummary>, Error> {
        let ids = self.checkpointer.list_threads().await?;
        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            let title = match self.checkpointer.latest(&id).await {
                Ok(Some(checkpoint)) => {
                    Conversation::from_checkpoint(checkpoint).title()
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!("failed to read thread {id}: {err}");
                    "(unreadable)".to_owned()
                }
            };
            threads.push(ThreadSummary { id, title });
        }
        Ok(threads)
    }

    /// Loads the conversation of a thread.
    ///
    /// A thread that cannot be read is returned as an empty conversation.
    pub async fn load(&self, thread_id: &str) -> Conversation {
        load_conversation(self.checkpointer.as_ref(), thread_id)
            .await
            .unwrap_or_else(|err| {
                warn!("failed to load thread {thread_id}: {err}");
                Conversation::default()
            })
    }

    /// Deletes a thread, returning `false` if it did not exist.
    pub async fn delete(&self, thread_id: &str) -> Result<bool, Error> {
        let deleted = self.checkpointer.delete_thread(thread_id).await?;
        if deleted {
            info!("deleted thread {thread_id}");
        }
        Ok(deleted)
    }
}

pub(crate) async fn load_conversation(
    checkpointer: &dyn Checkpointer,
    thread_id: &str,
) -> Result<Conversation, Error> {
    match checkpointer.latest(thread_id).await? {
        Some(checkpoint) => {
            debug!(
                "resuming thread {thread_id} at step {}",
                checkpoint.step
            );
            Ok(Conversation::from_checkpoint(checkpoint))
        }
        None => Ok(Conversation::default()),
    }
}

#[cfg(test)]
mod tests {
    use parley_checkpoint::{Checkpoint, CheckpointSource, MemoryCheckpointer};
    use parley_model::ModelMessage;

    use super::*;

    #[tokio::test]
    async fn test_list_and_delete() {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        for (id, text) in [("t1", "Weather in Pune"), ("t2", "Book a call")] {
            let checkpoint = Checkpoint::first(
                id,
                CheckpointSource::Input,
                vec![ModelMessage::User(text.to_owned())],
            );
            checkpointer.put(&checkpoint).await.unwrap();
        }

        let threads = Threads::new(checkpointer);
        assert_eq!(
            threads.list().await.unwrap(),
            vec![
                ThreadSummary {
                    id: "t1".to_owned(),
                    title: "Weather in Pune".to_owned(),
                },
                ThreadSummary {
                    id: "t2".to_owned(),
                    title: "Book a call".to_owned(),
                },
            ]
        );

        assert_eq!(threads.load("t2").await.items().len(), 1);
        assert!(threads.load("missing").await.is_empty());

        assert!(threads.delete("t1").await.unwrap());
        assert!(!threads.delete("t1").await.unwrap());
        assert_eq!(threads.list().await.unwrap().len(), 1);
    }
}

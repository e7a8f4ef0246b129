use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Checkpoint, Checkpointer, Error};

#[derive(Default)]
struct Inner {
    threads: HashMap<String, Vec<Checkpoint>>,
    // Thread ids in the order their first checkpoint arrived.
    order: Vec<String>,
}

/// A checkpoint store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryCheckpointer {
    inner: RwLock<Inner>,
}

impl MemoryCheckpointer {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        let Inner { threads, order } = &mut *inner;
        let checkpoints = threads
            .entry(checkpoint.thread_id.clone())
            .or_insert_with(|| {
                order.push(checkpoint.thread_id.clone());
                vec![]
            });
        checkpoints.push(checkpoint.clone());
        checkpoints.sort_by_key(|c| c.step);
        Ok(())
    }

    async fn latest(
        &self,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .threads
            .get(thread_id)
            .and_then(|checkpoints| checkpoints.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn list_threads(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        let removed = inner.threads.remove(thread_id).is_some();
        inner.order.retain(|id| id != thread_id);
        Ok(removed)
    }
}

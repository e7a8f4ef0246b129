use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};

use crate::{Checkpoint, CheckpointSource, Checkpointer, Error};

/// A checkpoint store backed by a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Opens the database at `path`, creating it if it does not exist.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        debug!("opened checkpoint database at {}", path.as_ref().display());
        Self::with_pool(pool).await
    }

    /// Opens a private in-memory database.
    pub async fn in_memory() -> Result<Self, Error> {
        let opts = "sqlite::memory:".parse::<SqliteConnectOptions>()?;
        // Each connection would see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                parent_checkpoint_id TEXT,
                step INTEGER NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                messages TEXT NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_id)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_step ON checkpoints(thread_id, step)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint, Error> {
    let thread_id: String = row.try_get("thread_id")?;
    let corrupted = |reason: String| Error::Corrupted {
        thread_id: thread_id.clone(),
        reason,
    };

    let source = row
        .try_get::<String, _>("source")?
        .parse::<CheckpointSource>()
        .map_err(corrupted)?;
    let created_at = DateTime::parse_from_rfc3339(&row.try_get::<String, _>("created_at")?)
        .map_err(|err| corrupted(format!("bad timestamp: {err}")))?
        .with_timezone(&Utc);
    let messages = serde_json::from_str(&row.try_get::<String, _>("messages")?)
        .map_err(|err| corrupted(format!("bad messages: {err}")))?;

    Ok(Checkpoint {
        checkpoint_id: row.try_get("checkpoint_id")?,
        parent_id: row.try_get("parent_checkpoint_id")?,
        step: row.try_get("step")?,
        source,
        created_at,
        messages,
        thread_id,
    })
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let messages = serde_json::to_string(&checkpoint.messages)?;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, parent_checkpoint_id, step, source, created_at, messages)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.parent_id)
        .bind(checkpoint.step)
        .bind(checkpoint.source.as_str())
        .bind(
            checkpoint
                .created_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .bind(messages)
        .execute(&self.pool)
        .await?;
        trace!(
            "stored checkpoint {} (step {}) of thread {}",
            checkpoint.checkpoint_id, checkpoint.step, checkpoint.thread_id
        );
        Ok(())
    }

    async fn latest(
        &self,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, Error> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY step DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, Error> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY step ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn list_threads(&self) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            "SELECT thread_id FROM checkpoints
             GROUP BY thread_id
             ORDER BY MIN(created_at) ASC, MIN(rowid) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("thread_id").map_err(Error::from))
            .collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use parley_model::ModelMessage;

    use super::*;

    #[tokio::test]
    async fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");

        let checkpoint = Checkpoint::first(
            "t1",
            CheckpointSource::Input,
            vec![ModelMessage::User("What's 2 + 2?".to_owned())],
        );
        {
            let store = SqliteCheckpointer::connect(&path).await.unwrap();
            store.put(&checkpoint).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteCheckpointer::connect(&path).await.unwrap();
        let latest = store.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.messages, checkpoint.messages);
        assert_eq!(latest.checkpoint_id, checkpoint.checkpoint_id);
        assert_eq!(store.list_threads().await.unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_corrupted_messages() {
        let store = SqliteCheckpointer::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO checkpoints VALUES ('t', 'c', NULL, 0, 'input', '2025-01-01T00:00:00Z', 'not json')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.latest("t").await.unwrap_err();
        assert!(matches!(err, Error::Corrupted { ref thread_id, .. } if thread_id == "t"));
    }
}

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_model::ModelMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What produced a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// A user message was appended.
    Input,
    /// A step of the model/tool loop finished.
    Loop,
}

impl CheckpointSource {
    /// Returns the stored name of the source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Loop => "loop",
        }
    }
}

impl Display for CheckpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "loop" => Ok(Self::Loop),
            _ => Err(format!("unknown checkpoint source: {s}")),
        }
    }
}

/// A snapshot of a thread's messages after one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The thread this checkpoint belongs to.
    pub thread_id: String,
    /// Unique id of this checkpoint.
    pub checkpoint_id: String,
    /// The checkpoint this one was derived from.
    pub parent_id: Option<String>,
    /// Position in the thread, starting at 0.
    pub step: i64,
    /// What produced the checkpoint.
    pub source: CheckpointSource,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The full message list of the thread at this step.
    pub messages: Vec<ModelMessage>,
}

impl Checkpoint {
    /// Creates the first checkpoint of a thread.
    pub fn first(
        thread_id: impl Into<String>,
        source: CheckpointSource,
        messages: Vec<ModelMessage>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: Uuid::new_v4().to_string(),
            parent_id: None,
            step: 0,
            source,
            created_at: Utc::now(),
            messages,
        }
    }

    /// Creates the checkpoint that follows this one.
    pub fn child(
        &self,
        source: CheckpointSource,
        messages: Vec<ModelMessage>,
    ) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            checkpoint_id: Uuid::new_v4().to_string(),
            parent_id: Some(self.checkpoint_id.clone()),
            step: self.step + 1,
            source,
            created_at: Utc::now(),
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        let first = Checkpoint::first("t", CheckpointSource::Input, vec![]);
        let child = first.child(CheckpointSource::Loop, vec![]);
        assert_eq!(first.step, 0);
        assert_eq!(child.step, 1);
        assert_eq!(child.thread_id, "t");
        assert_eq!(child.parent_id, Some(first.checkpoint_id.clone()));
        assert_ne!(child.checkpoint_id, first.checkpoint_id);
        assert_eq!("loop".parse(), Ok(CheckpointSource::Loop));
        assert!("output".parse::<CheckpointSource>().is_err());
    }
}

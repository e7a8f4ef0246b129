mod builder;
mod state;
mod turn;

use tokio::sync::{mpsc, oneshot, watch};

use crate::conversation::Conversation;
use crate::error::Error;
pub use builder::AgentBuilder;
pub use state::AgentStage;
use state::Command;

/// An agent instance bound to one conversation thread.
///
/// The agent runs as a background task which owns the conversation and
/// drives the model/tool loop. Commands dispatched to the agent are
/// accepted no matter what stage it is in. For example, a user input
/// received while a tool is running is queued and handled after the
/// current turn finishes.
///
/// Dropping every handle lets the agent finish its queued inputs before
/// it stops. [`Agent::shutdown`] stops it right away.
#[derive(Clone)]
pub struct Agent {
    cmd_tx: mpsc::UnboundedSender<Command>,
    thread_id: String,
    stage_rx: watch::Receiver<AgentStage>,
    // Never written; the task drops the sender when it exits.
    done_rx: watch::Receiver<()>,
}

impl Agent {
    /// Returns the id of the thread this agent works on.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns what the agent is doing right now.
    #[inline]
    pub fn stage(&self) -> AgentStage {
        *self.stage_rx.borrow()
    }

    /// Enqueues a user input for processing.
    pub fn enqueue_user_input<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<(), Error> {
        self.send(Command::UserInput {
            input: input.into(),
            reply: None,
        })
    }

    /// Enqueues a user input and waits for the final answer of its turn.
    pub async fn send_and_wait<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<String, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::UserInput {
            input: input.into(),
            reply: Some(reply_tx),
        })?;
        reply_rx.await.map_err(|_| Error::AgentClosed)?
    }

    /// Returns a snapshot of the conversation.
    ///
    /// If a turn is running, the snapshot is taken once the agent becomes
    /// idle.
    pub async fn conversation(&self) -> Result<Conversation, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| Error::AgentClosed)?
    }

    /// Stops the agent, abandoning the running turn and queued inputs.
    ///
    /// Steps that have already been saved stay saved.
    pub fn shutdown(&self) {
        self.cmd_tx.send(Command::Shutdown).ok();
    }

    /// Waits until the agent task has exited.
    ///
    /// After [`Agent::shutdown`], this resolves once the running step has
    /// been abandoned. A checkpoint write that was already under way is
    /// completed first, so nothing is written to the thread afterwards.
    pub async fn stopped(&self) {
        let mut done_rx = self.done_rx.clone();
        while done_rx.changed().await.is_ok() {}
    }

    fn send(&self, cmd: Command) -> Result<(), Error> {
        self.cmd_tx.send(cmd).map_err(|_| Error::AgentClosed)
    }
}

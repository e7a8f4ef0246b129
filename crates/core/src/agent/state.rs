use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use backoff::ExponentialBackoff;
use parley_checkpoint::Checkpointer;
use parley_model::ToolCallRequest;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use super::turn::run_turn;
use crate::conversation::{Conversation, TranscriptSource};
use crate::error::Error;
use crate::model_client::ModelClient;
use crate::threads::load_conversation;
use crate::tool::Executor;

/// What an agent is currently doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgentStage {
    /// Waiting for user input.
    #[default]
    Idle,
    /// Waiting for the model to respond.
    ModelThinking,
    /// Running the tools requested by the model.
    RunningTools,
}

type Reply = oneshot::Sender<Result<String, Error>>;
type SnapshotReply = oneshot::Sender<Result<Conversation, Error>>;

pub(crate) enum Command {
    UserInput {
        input: String,
        reply: Option<Reply>,
    },
    Snapshot(SnapshotReply),
    Shutdown,
}

#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub on_idle: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_transcript: Option<Arc<dyn Fn(&str, TranscriptSource) + Send + Sync>>,
    pub on_tool_call: Option<Arc<dyn Fn(&ToolCallRequest) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
}

/// Everything a turn needs, shared between the agent task and the
/// running turn.
pub(crate) struct AgentContext {
    pub thread_id: String,
    pub model_client: ModelClient,
    pub executor: Executor,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub system_prompt: Option<String>,
    pub max_steps: usize,
    pub backoff: ExponentialBackoff,
    pub stage_tx: watch::Sender<AgentStage>,
    pub cancel_tx: watch::Sender<bool>,
    pub callbacks: Callbacks,
}

impl AgentContext {
    #[inline]
    pub fn set_stage(&self, stage: AgentStage) {
        self.stage_tx.send_replace(stage);
    }

    /// Resolves once the agent has been asked to shut down.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            let cancelled = *cancel_rx.borrow_and_update();
            if cancelled {
                return;
            }
            if cancel_rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

struct PendingInput {
    input: String,
    reply: Option<Reply>,
}

// `None` until the thread has been read from the store.
type TurnOutcome = (Option<Conversation>, Option<Reply>, Result<String, Error>);
type TurnFuture = Pin<Box<dyn Future<Output = TurnOutcome> + Send>>;

pub(crate) async fn run_agent(
    ctx: Arc<AgentContext>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    debug!("started");
    let mut conversation = match load_conversation(
        ctx.checkpointer.as_ref(),
        &ctx.thread_id,
    )
    .await
    {
        Ok(conversation) => Some(conversation),
        Err(err) => {
            warn!("failed to load thread, will retry: {err}");
            None
        }
    };
    let mut pending_inputs = VecDeque::new();
    let mut pending_snapshots: Vec<SnapshotReply> = vec![];
    // The conversation is moved into the turn while it runs.
    let mut running: Option<TurnFuture> = None;
    let mut closed = false;
    let mut shutting_down = false;

    loop {
        if running.is_none() {
            for reply in pending_snapshots.drain(..) {
                let snapshot = if let Some(loaded) = &conversation {
                    Ok(loaded.clone())
                } else {
                    let store = ctx.checkpointer.as_ref();
                    match load_conversation(store, &ctx.thread_id).await {
                        Ok(loaded) => {
                            conversation = Some(loaded.clone());
                            Ok(loaded)
                        }
                        Err(err) => Err(err),
                    }
                };
                reply.send(snapshot).ok();
            }
            match pending_inputs.pop_front() {
                Some(next) => {
                    running =
                        Some(start_turn(&ctx, conversation.take(), next));
                }
                None if closed => break,
                None => {}
            }
        }

        select! {
            biased;

            cmd = cmd_rx.recv(), if !closed => {
                match cmd {
                    Some(Command::UserInput { input, reply }) => {
                        pending_inputs.push_back(PendingInput { input, reply });
                    }
                    Some(Command::Snapshot(reply)) => {
                        pending_snapshots.push(reply);
                    }
                    Some(Command::Shutdown) => {
                        debug!("shutdown requested");
                        ctx.cancel_tx.send_replace(true);
                        pending_inputs.clear();
                        closed = true;
                        shutting_down = true;
                    }
                    None => closed = true,
                }
            }
            (returned, reply, result) = poll_turn(&mut running), if running.is_some() => {
                running = None;
                conversation = returned;
                ctx.set_stage(AgentStage::Idle);
                finish_turn(&ctx, reply, result);

                if pending_inputs.is_empty() && !shutting_down {
                    // Nothing to process, so we can invoke the idle callback.
                    if let Some(on_idle) = &ctx.callbacks.on_idle {
                        on_idle();
                    }
                }
            }
        }
    }
    ctx.set_stage(AgentStage::Idle);
    debug!("will terminate");
}

fn start_turn(
    ctx: &Arc<AgentContext>,
    conversation: Option<Conversation>,
    pending: PendingInput,
) -> TurnFuture {
    let ctx = Arc::clone(ctx);
    Box::pin(
        async move {
            let mut conversation = match conversation {
                Some(conversation) => conversation,
                // Appending to a thread that could not be read would fork
                // its checkpoint chain, so the turn fails instead.
                None => match load_conversation(
                    ctx.checkpointer.as_ref(),
                    &ctx.thread_id,
                )
                .await
                {
                    Ok(conversation) => conversation,
                    Err(err) => return (None, pending.reply, Err(err)),
                },
            };
            let result = run_turn(&ctx, &mut conversation, pending.input).await;
            (Some(conversation), pending.reply, result)
        }
        .instrument(debug_span!("turn")),
    )
}

async fn poll_turn(running: &mut Option<TurnFuture>) -> TurnOutcome {
    match running {
        Some(turn) => turn.await,
        None => std::future::pending().await,
    }
}

fn finish_turn(
    ctx: &AgentContext,
    reply: Option<Reply>,
    result: Result<String, Error>,
) {
    if let Err(Error::AgentClosed) = &result {
        debug!("turn abandoned");
    } else if let Err(err) = &result {
        error!("turn failed: {err}");
        if let Some(on_error) = &ctx.callbacks.on_error {
            on_error(err);
        }
    }
    if let Some(reply) = reply {
        reply.send(result).ok();
    }
}

use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parley_checkpoint::{Checkpointer, MemoryCheckpointer};
use parley_model::{ModelProvider, ToolCallRequest};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

use super::Agent;
use super::state::{AgentContext, AgentStage, Callbacks, run_agent};
use crate::conversation::TranscriptSource;
use crate::error::Error;
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Executor, Tool, ToolObject};

const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
///
/// The builder can be cloned and reused as a template, agents built from
/// clones share the model provider, the tools and the checkpointer.
#[derive(Clone)]
pub struct AgentBuilder {
    model_client: ModelClient,
    checkpointer: Arc<dyn Checkpointer>,
    thread_id: Option<String>,
    system_prompt: Option<String>,
    tools: Vec<Arc<dyn ToolObject>>,
    max_steps: usize,
    tool_timeout: Option<Duration>,
    backoff: ExponentialBackoff,
    callbacks: Callbacks,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    ///
    /// Conversations are kept in memory unless a checkpointer is set with
    /// [`AgentBuilder::with_checkpointer`].
    #[inline]
    pub fn with_model_provider<P: ModelProvider>(provider: P) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            checkpointer: Arc::new(MemoryCheckpointer::new()),
            thread_id: None,
            system_prompt: None,
            tools: vec![],
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: None,
            backoff: ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(500))
                .with_max_interval(Duration::from_secs(8))
                .with_max_elapsed_time(Some(Duration::from_secs(60)))
                .build(),
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the store where conversations are persisted.
    #[inline]
    pub fn with_checkpointer(
        mut self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    /// Binds the agent to an existing thread. A new thread id is
    /// generated if this is not set.
    #[inline]
    pub fn with_thread_id<S: Into<String>>(mut self, thread_id: S) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Sets the system prompt sent ahead of every request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Arc::new(AnyTool(tool)));
        self
    }

    /// Sets how many model calls a single turn may make.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the time limit of a single tool call.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Sets the retry policy for transient model failures.
    #[inline]
    pub fn with_retry_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_idle = Some(Arc::new(on_idle));
        self
    }

    /// Attaches a callback that receives user inputs and streamed model
    /// text.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Attaches a callback invoked before each tool call runs.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_tool_call = Some(Arc::new(on_tool_call));
        self
    }

    /// Attaches a callback invoked when a turn fails.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_error = Some(Arc::new(on_error));
        self
    }

    /// Builds the agent and starts its task.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Agent {
        let thread_id = self
            .thread_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = watch::channel(AgentStage::Idle);
        let (cancel_tx, _) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(());

        let ctx = Arc::new(AgentContext {
            thread_id: thread_id.clone(),
            model_client: self.model_client,
            executor: Executor::with_tools(self.tools, self.tool_timeout),
            checkpointer: self.checkpointer,
            system_prompt: self.system_prompt,
            max_steps: self.max_steps,
            backoff: self.backoff,
            stage_tx,
            cancel_tx,
            callbacks: self.callbacks,
        });
        tokio::spawn(
            async move {
                run_agent(ctx, cmd_rx).await;
                drop(done_tx);
            }
            .instrument(trace_span!("agent", thread_id = %thread_id)),
        );

        Agent {
            cmd_tx,
            thread_id,
            stage_rx,
            done_rx,
        }
    }
}

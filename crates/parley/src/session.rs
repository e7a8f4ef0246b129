use std::sync::Arc;
use std::time::Duration;

use parley_checkpoint::{Checkpointer, MemoryCheckpointer};
use parley_core::{
    Agent, AgentBuilder, AgentStage, Conversation, Error, ThreadSummary,
    Threads, TranscriptSource,
};
use parley_model::{ModelProvider, ToolCallRequest};

use crate::config::ToolsConfig;
use crate::tools::register_tools;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    checkpointer: Arc<dyn Checkpointer>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    ///
    /// No tools are registered until [`SessionBuilder::with_tools`] is
    /// called.
    pub fn with_model_provider<M: ModelProvider>(provider: M) -> Self {
        let checkpointer: Arc<dyn Checkpointer> =
            Arc::new(MemoryCheckpointer::new());
        let agent_builder = AgentBuilder::with_model_provider(provider)
            .with_checkpointer(checkpointer.clone());
        Self {
            agent_builder,
            checkpointer,
        }
    }

    /// Sets the store where threads are persisted.
    #[inline]
    pub fn with_checkpointer(
        mut self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        self.agent_builder =
            self.agent_builder.with_checkpointer(checkpointer.clone());
        self.checkpointer = checkpointer;
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Sets how many model calls a single message may cause.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_steps(max_steps);
        self
    }

    /// Sets the time limit of a single tool call.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.agent_builder = self.agent_builder.with_tool_timeout(timeout);
        self
    }

    /// Registers the built-in tools enabled by `config`.
    pub fn with_tools(mut self, config: &ToolsConfig) -> Self {
        self.agent_builder = register_tools(self.agent_builder, config);
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_idle(on_idle);
        self
    }

    /// Attaches a callback to be invoked when a transcript is generated.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked before a tool runs.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_tool_call(on_tool_call);
        self
    }

    /// Attaches a callback to be invoked when a message fails.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_error(on_error);
        self
    }

    /// Builds a new session on a fresh thread.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Session {
        let agent = self.agent_builder.clone().build();
        self.into_session(agent)
    }

    /// Builds a new session that resumes `thread_id`.
    ///
    /// Must be called within a tokio runtime.
    pub fn build_with_thread<S: Into<String>>(self, thread_id: S) -> Session {
        let agent =
            self.agent_builder.clone().with_thread_id(thread_id).build();
        self.into_session(agent)
    }

    fn into_session(self, agent: Agent) -> Session {
        Session {
            template: self.agent_builder,
            agent,
            threads: Threads::new(self.checkpointer),
        }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session talks to one thread at a time. Switching threads replaces
/// the underlying [`Agent`]; a reply that is still being generated for the
/// previous thread is abandoned.
pub struct Session {
    template: AgentBuilder,
    agent: Agent,
    threads: Threads,
}

impl Session {
    /// Returns the id of the active thread.
    #[inline]
    pub fn thread_id(&self) -> &str {
        self.agent.thread_id()
    }

    /// Returns what the agent is doing right now.
    #[inline]
    pub fn stage(&self) -> AgentStage {
        self.agent.stage()
    }

    /// Sends a message to the active thread.
    ///
    /// The reply is delivered through the session callbacks.
    #[inline]
    pub fn send_message(&self, message: &str) -> Result<(), Error> {
        self.agent.enqueue_user_input(message)
    }

    /// Sends a message and waits for the final answer.
    #[inline]
    pub async fn send_and_wait(&self, message: &str) -> Result<String, Error> {
        self.agent.send_and_wait(message).await
    }

    /// Starts a new thread and makes it active.
    pub async fn new_thread(&mut self) -> &str {
        let agent = self.template.clone().build();
        self.replace_agent(agent).await;
        info!("started thread {}", self.thread_id());
        self.thread_id()
    }

    /// Makes `thread_id` the active thread and returns its conversation.
    pub async fn switch_thread(
        &mut self,
        thread_id: &str,
    ) -> Result<Conversation, Error> {
        let agent = self.template.clone().with_thread_id(thread_id).build();
        self.replace_agent(agent).await;
        info!("switched to thread {thread_id}");
        self.agent.conversation().await
    }

    /// Lists stored threads, oldest first.
    #[inline]
    pub async fn threads(&self) -> Result<Vec<ThreadSummary>, Error> {
        self.threads.list().await
    }

    /// Loads a stored thread without switching to it.
    #[inline]
    pub async fn load_thread(&self, thread_id: &str) -> Conversation {
        self.threads.load(thread_id).await
    }

    /// Deletes a thread, returning `false` if it did not exist.
    ///
    /// Deleting the active thread starts a new one first, abandoning a
    /// reply that is still being generated.
    pub async fn delete_thread(
        &mut self,
        thread_id: &str,
    ) -> Result<bool, Error> {
        if thread_id == self.thread_id() {
            self.new_thread().await;
        }
        self.threads.delete(thread_id).await
    }

    /// Returns the conversation of the active thread.
    #[inline]
    pub async fn history(&self) -> Result<Conversation, Error> {
        self.agent.conversation().await
    }

    async fn replace_agent(&mut self, agent: Agent) {
        let previous = std::mem::replace(&mut self.agent, agent);
        previous.shutdown();
        previous.stopped().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.agent.shutdown();
    }
}

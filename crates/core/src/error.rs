use parley_model::ModelProviderError;
use thiserror::Error;

/// Errors that end an agent turn.
#[derive(Debug, Error)]
pub enum Error {
    /// The model provider failed, after retries if the failure was
    /// transient.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),

    /// The conversation could not be read from or written to the store.
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] parley_checkpoint::Error),

    /// The model kept calling tools without giving an answer.
    #[error("no final answer after {0} model calls")]
    StepLimitExceeded(usize),

    /// The agent task is no longer running.
    #[error("the agent has been shut down")]
    AgentClosed,
}

impl Error {
    /// Returns the provider error if the model request failed.
    pub fn as_model_error(&self) -> Option<&dyn ModelProviderError> {
        match self {
            Error::Model(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

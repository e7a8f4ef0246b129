use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    ///
    /// The agent decides whether to retry a request based on this value,
    /// see [`ErrorKind::is_transient`].
    fn kind(&self) -> ErrorKind;
}

/// A hosted chat-completion backend.
///
/// Providers are shared by every thread the agent serves, so they must
/// not keep any per-conversation state. Everything a request needs is in
/// the [`ModelRequest`] itself.
pub trait ModelProvider: Send + Sync + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    ///
    /// The returned future must not borrow `self` or `req`, so callers
    /// can retry or move it to another task freely.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

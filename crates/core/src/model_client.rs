use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use backoff::ExponentialBackoff;
use parley_model::{
    AssistantMessage, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Box<dyn Fn(String) + Send + 'static>, ExponentialBackoff)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);
        let handler_fn: HandlerFn =
            Arc::new(move |req, on_transcript, backoff| {
                let provider = Arc::clone(&provider);
                Box::pin(
                    async move {
                        trace!("got a request: {:?}", req);
                        let resp_or_err =
                            connect(provider.as_ref(), &req, backoff).await;
                        handle_response::<P>(resp_or_err, on_transcript).await
                    }
                    .instrument(trace_span!("model client req")),
                )
            });
        Self { handler_fn }
    }

    /// Sends a request and returns the response.
    ///
    /// Transient failures while establishing the request are retried
    /// following `backoff`. Errors in the middle of a stream are not.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        backoff: ExponentialBackoff,
        on_transcript: impl Fn(String) + Send + 'static,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        (self.handler_fn)(req, Box::new(on_transcript), backoff).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub transcript: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

impl ModelClientResponse {
    pub fn into_message(self) -> AssistantMessage {
        AssistantMessage {
            content: self.transcript,
            tool_calls: self.tool_calls,
        }
    }
}

async fn connect<P: ModelProvider>(
    provider: &P,
    req: &ModelRequest,
    backoff: ExponentialBackoff,
) -> Result<P::Response, P::Error> {
    backoff::future::retry(backoff, || {
        let fut = provider.send_request(req);
        async move {
            fut.await.map_err(|err| {
                if err.kind().is_transient() {
                    warn!("request failed, will retry: {err}");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
}

async fn handle_response<P: ModelProvider>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: Box<dyn Fn(String) + Send + 'static>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut transcript = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
                on_transcript(msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        tool_calls,
        finish_reason,
    })
}

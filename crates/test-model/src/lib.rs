//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use parley_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        let Some(sleep) = &mut this.sleep else {
            this.sleep = Some(Box::pin(sleep(this.delay)));
            return Pin::new(this).poll_next_event(cx);
        };
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let events = &this.preset.events;
        let idx = this.event_idx;
        this.event_idx += 1;
        let event = match events.get(idx) {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg.clone())
            }
            Some(PresetEvent::ToolCall(req)) => {
                ModelResponseEvent::ToolCall(req.clone())
            }
            None if idx == events.len() => {
                ModelResponseEvent::Completed(if this.preset.has_tool_call() {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                })
            }
            // In case this method is called after completion.
            None => return Poll::Ready(Ok(None)),
        };
        Poll::Ready(Ok(Some(event)))
    }
}

/// A local fake model for testing purpose.
///
/// The script is a list of assistant responses. The response for a
/// request is selected by counting the assistant messages already in the
/// request history, so a conversation that is reloaded from storage picks
/// up where it left off. If the script has no response for a request, an
/// error is returned.
///
/// Every received request is recorded and can be inspected with
/// [`TestModelProvider::requests`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Vec<PresetResponse>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    /// Sets the delay between two streamed events.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn should_fail(&self, step_idx: usize, failures: Option<u64>) -> bool {
        let Some(failures) = failures else {
            return false;
        };
        let Ok(mut attempts) = self.attempts.lock() else {
            return true;
        };
        let attempt = attempts.entry(step_idx).or_default();
        *attempt += 1;
        failures == 0 || *attempt <= failures
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }

        let step_idx = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();
        let result = match self.script.get(step_idx) {
            None => Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            }),
            Some(preset) if self.should_fail(step_idx, preset.failures) => {
                Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::RateLimitExceeded,
                })
            }
            Some(preset) => Ok(TestModelResponse {
                preset: preset.clone(),
                event_idx: 0,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            }),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use parley_model::{
        AssistantMessage, ModelMessage, ModelRequest, ModelTool,
        ToolCallRequest, ToolCallResult,
    };
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<ToolCallRequest>, ModelFinishReason) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => {
                    return (msg, tool_call, reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
            }
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Sure, ".to_owned()),
            PresetEvent::MessageDelta("let me look it up.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "web_search".to_owned(),
                arguments: json!({ "query": "rust 2024 edition" }),
            }),
        ]));
        provider.add_response(PresetResponse::text("It shipped with 1.85."));

        let mut req = ModelRequest {
            messages: vec![ModelMessage::User("When?".to_owned())],
            tools: vec![ModelTool {
                name: "web_search".to_owned(),
                description: "Searches the web".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, reason) = collect_response(resp).await;
        assert_eq!(msg, "Sure, let me look it up.");
        assert_eq!(reason, ModelFinishReason::ToolCalls);
        let tool_call = tool_call.unwrap();
        assert_eq!(tool_call.arguments, json!({ "query": "rust 2024 edition" }));

        req.messages.push(ModelMessage::Assistant(AssistantMessage {
            content: msg,
            tool_calls: vec![tool_call.clone()],
        }));
        req.messages.push(ModelMessage::Tool(ToolCallResult {
            id: tool_call.id,
            name: tool_call.name,
            content: "[]".to_owned(),
        }));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, reason) = collect_response(resp).await;
        assert_eq!(msg, "It shipped with 1.85.");
        assert!(tool_call.is_none());
        assert_eq!(reason, ModelFinishReason::Stop);

        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("ok").with_failures(2));
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        };

        for _ in 0..2 {
            let err = provider.send_request(&req).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        assert!(provider.send_request(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_script_exhausted() {
        let provider = TestModelProvider::default();
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        };
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}

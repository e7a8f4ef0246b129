use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use parley_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCallDelta};

/// A tool call being assembled from streamed fragments.
#[derive(Default)]
struct PartialToolCall {
    index: Option<u32>,
    id: String,
    name: String,
    arguments: String,
    arguments_value: Option<Value>,
}

impl PartialToolCall {
    fn patch(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id {
            self.id.push_str(&id);
        }
        let Some(function) = delta.function else {
            return;
        };
        if let Some(name) = function.name {
            self.name.push_str(&name);
        }
        match function.arguments {
            Some(Value::String(piece)) => self.arguments.push_str(&piece),
            Some(Value::Null) | None => {}
            Some(value) => self.arguments_value = Some(value),
        }
    }

    fn into_request(self) -> ToolCallRequest {
        let arguments = match self.arguments_value {
            Some(value) => value,
            None if self.arguments.trim().is_empty() => {
                Value::Object(Default::default())
            }
            None => serde_json::from_str(&self.arguments).unwrap_or_else(|err| {
                warn!("unparseable tool arguments for {}: {err}", self.name);
                Value::Null
            }),
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<String>,
    // Events ready to be handed out, in emission order.
    queued: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    /// Flushes the assembled tool calls and the completion event.
    ///
    /// Tool calls are only emitted here, once the stream has ended, since
    /// their fragments can be interleaved with anything else.
    fn finish(&mut self) {
        let has_tool_calls = !self.tool_calls.is_empty();
        for call in self.tool_calls.drain(..) {
            self.queued
                .push_back(ModelResponseEvent::ToolCall(call.into_request()));
        }
        let reason = match self.finish_reason.as_deref() {
            Some("tool_calls") | Some("function_call") => {
                ModelFinishReason::ToolCalls
            }
            // Some servers report `stop` even when they called tools.
            _ if has_tool_calls => ModelFinishReason::ToolCalls,
            _ => ModelFinishReason::Stop,
        };
        self.queued.push_back(ModelResponseEvent::Completed(reason));
        self.finished = true;
    }

    fn apply_chunk(&mut self, mut chunk: ChatCompletionChunk) -> Result<(), Error> {
        if self.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        // Usage-only chunks carry no choice.
        let Some(choice) = chunk.choices.pop() else {
            return Ok(());
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.queued
                    .push_back(ModelResponseEvent::MessageDelta(content));
            }
        }
        for delta in choice.delta.tool_calls.into_iter().flatten() {
            let existing = match delta.index {
                Some(index) => self
                    .tool_calls
                    .iter_mut()
                    .find(|call| call.index == Some(index)),
                // Without an index, a fragment carrying an id starts a new
                // call and the rest continue the last one.
                None if delta.id.is_some() => None,
                None => self.tool_calls.last_mut(),
            };
            match existing {
                Some(call) => call.patch(delta),
                None => {
                    let mut call = PartialToolCall {
                        index: delta.index,
                        ..Default::default()
                    };
                    call.patch(delta);
                    self.tool_calls.push(call);
                }
            }
        }

        // A finish reason may share the chunk with the last delta, so it
        // is handled after the content.
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
            self.finish();
        }
        Ok(())
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            finish_reason: None,
            queued: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.queued.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.finish();
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event.trim() == "[DONE]" {
            partial_state.finish();
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        partial_state.apply_chunk(chunk)?;
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    async fn collect(fixture: &'static [u8]) -> Result<Vec<ModelResponseEvent>, Error> {
        let chunks =
            Chunks::from_vec_deque(vec![Bytes::from_static(fixture)].into());
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let events =
            collect(include_bytes!("../fixtures/test_response.txt")).await.unwrap();

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Let me check both.");

        let tool_calls: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::ToolCall(req) => Some(req),
                _ => None,
            })
            .collect();
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(tool_calls[0].id, "call_a");
        assert_eq!(tool_calls[0].name, "get_stock_price");
        assert_eq!(tool_calls[0].arguments, json!({ "symbol": "AAPL" }));
        assert_eq!(tool_calls[1].name, "calculator");
        assert_eq!(
            tool_calls[1].arguments,
            json!({ "first_num": 2, "second_num": 3, "operation": "mul" })
        );

        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::ToolCalls))
        );
    }

    #[tokio::test]
    async fn test_finish_reason_with_content() {
        let events = collect(
            b"data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"x\",\"choices\":[{\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n\
              data: [DONE]\n\n",
        )
        .await
        .unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Hi".to_owned()),
                ModelResponseEvent::MessageDelta("!".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_object_arguments_without_index() {
        let events = collect(
            b"data: {\"id\":\"y\",\"choices\":[{\"delta\":{\"tool_calls\":[{\"id\":\"0\",\"function\":{\"name\":\"search_youtube\",\"arguments\":{\"query\":\"rust\"}}}]},\"finish_reason\":\"stop\"}]}\n\n",
        )
        .await
        .unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "0".to_owned(),
                    name: "search_youtube".to_owned(),
                    arguments: json!({ "query": "rust" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_id_mismatch() {
        let result = collect(
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"1\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"b\",\"choices\":[{\"delta\":{\"content\":\"2\"},\"finish_reason\":null}]}\n\n",
        )
        .await;
        assert!(result.is_err());
    }
}

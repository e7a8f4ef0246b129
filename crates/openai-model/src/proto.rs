use parley_model::{AssistantMessage, ModelMessage, ModelRequest, ModelTool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A fragment of a streamed tool call.
///
/// Most servers stream `arguments` as string pieces, but a few send the
/// whole arguments object at once, so it is kept as a raw value here.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ToolCallDelta {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message { message: String },
    Text(String),
}

impl ErrorBody {
    pub fn message(&self) -> &str {
        match &self.error {
            ErrorDetail::Message { message } => message,
            ErrorDetail::Text(text) => text,
        }
    }
}

/// Extracts a readable message from an error response body.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(body) => body.message().to_owned(),
        Err(_) => body.trim().to_owned(),
    }
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionToolCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: FunctionToolCall,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        max_tokens: config.max_tokens,
        stream: true,
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant(msg) => create_assistant_message(msg),
        ModelMessage::Tool(result) => Message::Tool {
            tool_call_id: result.id.clone(),
            content: result.content.clone(),
        },
    }
}

fn create_assistant_message(msg: &AssistantMessage) -> Message {
    let tool_calls = msg
        .tool_calls
        .iter()
        .map(|call| ToolCall {
            id: call.id.clone(),
            r#type: "function",
            function: FunctionToolCall {
                name: call.name.clone(),
                // The wire format carries arguments as an encoded object.
                arguments: match &call.arguments {
                    Value::Null => "{}".to_owned(),
                    arguments => arguments.to_string(),
                },
            },
        })
        .collect::<Vec<_>>();
    Message::Assistant {
        content: if msg.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(msg.content.clone())
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use parley_model::{ToolCallRequest, ToolCallResult};
    use serde_json::json;

    use super::*;
    use crate::OpenAIConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::System("You are a helpful assistant.".to_owned()),
                ModelMessage::User("What is 2 + 3?".to_owned()),
            ],
            tools: vec![ModelTool {
                name: "calculator".to_owned(),
                description: "Performs arithmetic.".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let body = serde_json::to_value(create_request(&request, &config))
            .unwrap();
        assert_eq!(
            body,
            json!({
                "model": "custom",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "What is 2 + 3?" }
                ],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "calculator",
                        "description": "Performs arithmetic.",
                        "parameters": { "type": "object" }
                    }
                }],
                "stream": true
            })
        );
    }

    #[test]
    fn test_tool_history_messages() {
        let call = ToolCallRequest {
            id: "call_7".to_owned(),
            name: "calculator".to_owned(),
            arguments: json!({ "first_num": 2, "second_num": 3, "operation": "add" }),
        };
        let assistant = create_message(&ModelMessage::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: vec![call],
        }));
        let value = serde_json::to_value(&assistant).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], Value::Null);
        assert_eq!(value["tool_calls"][0]["id"], "call_7");
        assert_eq!(value["tool_calls"][0]["type"], "function");
        let arguments: Value = serde_json::from_str(
            value["tool_calls"][0]["function"]["arguments"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(arguments["operation"], "add");

        let tool = create_message(&ModelMessage::Tool(ToolCallResult {
            id: "call_7".to_owned(),
            name: "calculator".to_owned(),
            content: "{\"result\":5.0}".to_owned(),
        }));
        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            json!({ "role": "tool", "tool_call_id": "call_7", "content": "{\"result\":5.0}" })
        );
    }

    #[test]
    fn test_tool_call_without_arguments() {
        let assistant = create_message(&ModelMessage::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_8".to_owned(),
                name: "list_events".to_owned(),
                arguments: Value::Null,
            }],
        }));
        let value = serde_json::to_value(&assistant).unwrap();
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{}");
    }

    #[test]
    fn test_error_body() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error":{"message":"bad token"}}"#).unwrap();
        assert_eq!(body.message(), "bad token");
        let body: ErrorBody =
            serde_json::from_str(r#"{"error":"Model is overloaded"}"#).unwrap();
        assert_eq!(body.message(), "Model is overloaded");
        assert_eq!(error_message("  upstream timeout\n"), "upstream timeout");
    }
}

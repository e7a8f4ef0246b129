use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::ToolCallRequest;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "data", rename_all = "snake_case")]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// A complete assistant turn, possibly requesting tool calls.
    Assistant(AssistantMessage),
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Creates an assistant message with text only.
    #[inline]
    pub fn assistant_text<S: Into<String>>(content: S) -> Self {
        ModelMessage::Assistant(AssistantMessage {
            content: content.into(),
            tool_calls: vec![],
        })
    }

    /// Returns the tool calls requested by this message.
    ///
    /// Only assistant messages can request tool calls, an empty slice is
    /// returned for the others.
    #[inline]
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            ModelMessage::Assistant(msg) => &msg.tool_calls,
            _ => &[],
        }
    }
}

/// A message generated by the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// The text content, may be empty when the model only calls tools.
    pub content: String,
    /// Tool calls requested in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// Name of the tool that produced this result.
    pub name: String,
    /// The result of the tool call.
    pub content: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let msg = ModelMessage::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_owned(),
                name: "calculator".to_owned(),
                arguments: json!({ "first_num": 1, "second_num": 2 }),
            }],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["data"]["tool_calls"][0]["name"], "calculator");

        let text = ModelMessage::assistant_text("done");
        let value = serde_json::to_value(&text).unwrap();
        assert!(value["data"].get("tool_calls").is_none());
        let back: ModelMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_tool_calls_accessor() {
        assert!(ModelMessage::User("hi".to_owned()).tool_calls().is_empty());
        assert!(ModelMessage::assistant_text("hi").tool_calls().is_empty());
    }
}

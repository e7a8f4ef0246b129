//! Conversation-related types.

use parley_checkpoint::{Checkpoint, CheckpointSource};
use parley_model::ModelMessage;

const TITLE_MAX_CHARS: usize = 40;

/// Who produced a piece of transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TranscriptSource {
    /// Text typed by the user.
    User,
    /// Text generated by the model.
    Assistant,
}

/// Represents a conversation.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    pub(crate) items: Vec<Item>,
    // The last stored checkpoint, with its messages dropped.
    head: Option<Checkpoint>,
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) msg: ModelMessage,
    pub(crate) transcript: String,
}

impl Item {
    fn new(msg: ModelMessage) -> Self {
        let transcript = match &msg {
            ModelMessage::System(text) | ModelMessage::User(text) => {
                text.clone()
            }
            ModelMessage::Assistant(msg) => msg.content.clone(),
            ModelMessage::Tool(result) => result.content.clone(),
        };
        Self { msg, transcript }
    }

    /// Returns the underlying message.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.msg
    }

    /// Returns the transcript of this item.
    ///
    /// The transcript is a string representation of the message item,
    /// which can be exported later. But transcript alone is not enough
    /// to reconstruct the message item.
    #[inline]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

impl Conversation {
    /// Restores a conversation from a stored checkpoint.
    pub fn from_checkpoint(mut checkpoint: Checkpoint) -> Self {
        let items = checkpoint.messages.drain(..).map(Item::new).collect();
        Self {
            items,
            head: Some(checkpoint),
        }
    }

    /// Returns all items in order.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns `true` if nothing has been said yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the messages to send to the model.
    pub fn messages(&self) -> Vec<ModelMessage> {
        self.items.iter().map(|item| item.msg.clone()).collect()
    }

    /// Returns the id of the last stored checkpoint.
    #[inline]
    pub fn head_checkpoint_id(&self) -> Option<&str> {
        self.head.as_ref().map(|head| head.checkpoint_id.as_str())
    }

    /// Returns a short title derived from the first user message.
    pub fn title(&self) -> String {
        let first_input = self.items.iter().find_map(|item| match &item.msg {
            ModelMessage::User(text) => Some(text.trim()),
            _ => None,
        });
        let Some(text) = first_input else {
            return "New chat".to_owned();
        };
        if text.chars().count() > TITLE_MAX_CHARS {
            let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
            title.push_str("...");
            title
        } else {
            text.to_owned()
        }
    }

    /// Returns user inputs and assistant replies that carry text.
    pub fn display_messages(&self) -> Vec<(TranscriptSource, &str)> {
        self.items
            .iter()
            .filter_map(|item| {
                let source = match &item.msg {
                    ModelMessage::User(_) => TranscriptSource::User,
                    ModelMessage::Assistant(_) => TranscriptSource::Assistant,
                    _ => return None,
                };
                let text = item.transcript.trim();
                (!text.is_empty()).then_some((source, text))
            })
            .collect()
    }

    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.items.push(Item::new(msg));
    }

    /// Creates the next checkpoint holding the current messages.
    pub(crate) fn next_checkpoint(
        &self,
        thread_id: &str,
        source: CheckpointSource,
    ) -> Checkpoint {
        let messages = self.messages();
        match &self.head {
            Some(head) => head.child(source, messages),
            None => Checkpoint::first(thread_id, source, messages),
        }
    }

    pub(crate) fn set_head(&mut self, mut checkpoint: Checkpoint) {
        checkpoint.messages.clear();
        self.head = Some(checkpoint);
    }
}

#[cfg(test)]
mod tests {
    use parley_model::{AssistantMessage, ToolCallRequest, ToolCallResult};
    use serde_json::json;

    use super::*;

    fn conversation(messages: Vec<ModelMessage>) -> Conversation {
        Conversation::from_checkpoint(Checkpoint::first(
            "t",
            CheckpointSource::Loop,
            messages,
        ))
    }

    #[test]
    fn test_title() {
        assert_eq!(Conversation::default().title(), "New chat");
        assert_eq!(
            conversation(vec![ModelMessage::User("  Stock price of TSLA? ".to_owned())])
                .title(),
            "Stock price of TSLA?"
        );
        let long = "Please schedule a meeting with the whole team next Monday";
        assert_eq!(
            conversation(vec![ModelMessage::User(long.to_owned())]).title(),
            "Please schedule a meeting with the whole..."
        );
    }

    #[test]
    fn test_display_messages() {
        let call = ToolCallRequest {
            id: "c1".to_owned(),
            name: "calculator".to_owned(),
            arguments: json!({}),
        };
        let conversation = conversation(vec![
            ModelMessage::User("2 * 3?".to_owned()),
            ModelMessage::Assistant(AssistantMessage {
                content: String::new(),
                tool_calls: vec![call],
            }),
            ModelMessage::Tool(ToolCallResult {
                id: "c1".to_owned(),
                name: "calculator".to_owned(),
                content: "{\"result\":6.0}".to_owned(),
            }),
            ModelMessage::Assistant(AssistantMessage {
                content: "It's 6.".to_owned(),
                tool_calls: vec![],
            }),
        ]);
        assert_eq!(
            conversation.display_messages(),
            vec![
                (TranscriptSource::User, "2 * 3?"),
                (TranscriptSource::Assistant, "It's 6."),
            ]
        );
        assert!(conversation.head_checkpoint_id().is_some());
    }
}

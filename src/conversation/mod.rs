mod encoder;

pub use encoder::{encode, encode_image_base64, ChatMessage, ConversationError, Role, SYSTEM_PROMPT};

const TIMESTAMP_FORMAT: &str = "%I:%M %p";

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub text: String,
    pub is_user: bool,
    pub timestamp: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::stamped(text, true)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::stamped(text, false)
    }

    /// A model turn without a timestamp, used for canned messages.
    pub fn unstamped_model(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            timestamp: String::new(),
        }
    }

    fn stamped(text: impl Into<String>, is_user: bool) -> Self {
        Self {
            text: text.into(),
            is_user,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Append-only ordered list of turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Drops every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    /// Owned copy handed to a worker thread.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }
}

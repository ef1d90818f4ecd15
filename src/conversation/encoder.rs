use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Turn;

pub const SYSTEM_PROMPT: &str = "\
You are Insight AI, a specialized visual assistant. Your goal is to provide clear, accurate, and well-structured information.

**Core Instructions:**
1.  **Image Analysis:** When an image is provided, analyze it carefully and answer questions based *only* on the visual information present.
2.  **General Conversation:** If no image is provided, act as a helpful, general-purpose assistant.
3.  **Honesty:** If an answer cannot be determined from the image, say that the information is not available in the provided visual. Do not speculate or invent details.

**Formatting Rules:**
- Format all responses using GitHub Flavored Markdown.
- Use headings, lists, and bold text to structure answers for readability.
- Put code in fenced code blocks with a language identifier (e.g., ```python).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in the wire format of the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64 images, without line wrapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("an image can only be attached to a trailing user turn")]
    ImageWithoutUserTurn,
}

pub fn encode_image_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Builds the message list for the model: system instruction first, then one
/// message per turn in order, with the image attached to the final user turn.
pub fn encode(
    system_prompt: &str,
    turns: &[Turn],
    image_base64: Option<String>,
) -> Result<Vec<ChatMessage>, ConversationError> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ChatMessage::new(Role::System, system_prompt));
    messages.extend(turns.iter().map(|turn| {
        let role = if turn.is_user {
            Role::User
        } else {
            Role::Assistant
        };
        ChatMessage::new(role, turn.text.clone())
    }));

    if let Some(image) = image_base64 {
        match messages.last_mut() {
            Some(last) if last.role == Role::User => last.images.push(image),
            _ => return Err(ConversationError::ImageWithoutUserTurn),
        }
    }

    Ok(messages)
}

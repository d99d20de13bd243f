use serde::{Deserialize, Serialize};

/// The author role of a chat message.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// A human participant.
    User,
    /// The bot itself.
    Assistant,
}

/// A rendered message, as the completion service expects it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// The text of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with the given role and content.
    #[inline]
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A request to be sent to the completion provider.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// The input messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Maximum number of tokens the reply may use.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Number of samples to generate.
    pub n: u32,
    /// Sequences where the model should stop generating.
    pub stop: Vec<String>,
    /// Identity of the user on whose behalf the request is made.
    pub user: String,
}

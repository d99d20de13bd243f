//! Conversation-related types.

use relay_model::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

// Every message costs a few tokens of role framing on top of its text.
const FRAMING_TOKENS: i64 = 4;

/// A single utterance in a thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Display name of the author.
    pub user: String,
    /// The text, if the utterance carries any.
    #[serde(default)]
    pub text: Option<String>,
}

impl Message {
    /// Creates a message with text.
    #[inline]
    pub fn new<U: Into<String>, T: Into<String>>(user: U, text: T) -> Self {
        Self {
            user: user.into(),
            text: Some(text.into()),
        }
    }

    /// Creates a message that only marks whose turn it is.
    #[inline]
    pub fn without_text<U: Into<String>>(user: U) -> Self {
        Self {
            user: user.into(),
            text: None,
        }
    }

    /// Renders the message for the completion service.
    ///
    /// Returns `None` when the message has no text; callers must not
    /// forward such messages.
    pub fn render(&self, bot_name: &str) -> Option<ChatMessage> {
        let text = self.text.as_ref()?;
        let role = if self.user == bot_name {
            Role::Assistant
        } else {
            Role::User
        };
        Some(ChatMessage::new(role, text.clone()))
    }

    fn estimate_tokens(&self) -> i64 {
        FRAMING_TOKENS + self.text.as_deref().map_or(0, estimate_tokens)
    }
}

/// An ordered transcript headed by the system instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    system: String,
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates a conversation.
    #[inline]
    pub fn new<S: Into<String>>(system: S, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
        }
    }

    /// Inserts a message at the front of the transcript.
    #[inline]
    pub fn prepend(&mut self, message: Message) -> &mut Self {
        self.messages.insert(0, message);
        self
    }

    /// Returns the messages of the transcript, oldest first.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Renders the system instruction followed by every message that has
    /// text, in order.
    pub fn render(&self, bot_name: &str) -> Vec<ChatMessage> {
        let mut rendered = Vec::with_capacity(self.messages.len() + 1);
        rendered.push(ChatMessage::new(Role::System, self.system.clone()));
        rendered
            .extend(self.messages.iter().filter_map(|m| m.render(bot_name)));
        rendered
    }

    /// Estimates how many tokens the rendered conversation takes.
    ///
    /// Text-less messages still count their framing, so a trailing turn
    /// marker reserves room for the reply's role.
    pub fn estimate_tokens(&self) -> i64 {
        FRAMING_TOKENS
            + estimate_tokens(&self.system)
            + self.messages.iter().map(Message::estimate_tokens).sum::<i64>()
    }
}

/// The prompt sent to the completion service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    convo: Conversation,
}

impl Prompt {
    /// Creates a prompt from the system instruction and the transcript.
    #[inline]
    pub fn new<S: Into<String>>(
        instructions: S,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            convo: Conversation::new(instructions, messages),
        }
    }

    /// Returns the wrapped conversation.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.convo
    }

    /// Renders the prompt.
    #[inline]
    pub fn render(&self, bot_name: &str) -> Vec<ChatMessage> {
        self.convo.render(bot_name)
    }

    /// Estimates how many tokens the rendered prompt takes.
    #[inline]
    pub fn estimate_tokens(&self) -> i64 {
        self.convo.estimate_tokens()
    }
}

/// Approximates the token count of a text at four characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    (chars + 3) / 4
}

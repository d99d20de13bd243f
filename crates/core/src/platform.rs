//! The narrow interface the relay needs from the messaging platform.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;

use crate::message::Message;

/// An error raised by the messaging platform.
pub struct PlatformError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl PlatformError {
    /// Wraps an error returned by the platform SDK.
    pub fn new<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Creates an error from a plain message.
    #[inline]
    pub fn msg<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl Debug for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for PlatformError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

/// Severity of a [`Notice`], rendered as its color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    /// Something started fine (green).
    Success,
    /// Shown but worth attention (yellow).
    Warning,
    /// Something was refused or removed (red).
    Error,
}

/// A colored, optionally titled notice posted to a thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Optional title.
    pub title: Option<String>,
    /// Body text.
    pub description: String,
}

impl Notice {
    /// Creates an untitled notice.
    #[inline]
    pub fn new<S: Into<String>>(level: NoticeLevel, description: S) -> Self {
        Self {
            level,
            title: None,
            description: description.into(),
        }
    }

    /// Creates a warning notice.
    #[inline]
    pub fn warning<S: Into<String>>(description: S) -> Self {
        Self::new(NoticeLevel::Warning, description)
    }

    /// Creates an error notice.
    #[inline]
    pub fn error<S: Into<String>>(description: S) -> Self {
        Self::new(NoticeLevel::Error, description)
    }

    /// Sets the title.
    #[inline]
    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A message the platform accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SentMessage {
    /// Platform id of the message.
    pub id: String,
    /// A link to the message, when the platform has one.
    pub url: Option<String>,
}

/// A message as it exists in a platform thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadMessage {
    /// Platform id of the message.
    pub id: String,
    /// Platform id of the author.
    pub author_id: String,
    /// Display name of the author.
    pub author_name: String,
    /// The text content.
    pub text: String,
    /// A link to the message.
    pub url: Option<String>,
}

/// The platform state of a thread, as seen when a message arrives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadInfo {
    /// Whether the bot created the thread.
    pub owned_by_bot: bool,
    /// Thread name.
    pub name: String,
    /// Whether the thread is archived.
    pub archived: bool,
    /// Whether the thread is locked.
    pub locked: bool,
    /// Number of messages in the thread.
    pub message_count: usize,
}

impl ThreadInfo {
    /// Returns `true` if the bot should still converse in this thread.
    pub fn is_active(&self, active_prefix: &str) -> bool {
        self.owned_by_bot
            && !self.archived
            && !self.locked
            && self.name.starts_with(active_prefix)
    }
}

/// A platform thread the relay converses in.
///
/// The platform owns the thread state; implementations just forward
/// calls to it.
#[async_trait]
pub trait Thread: Send + Sync {
    /// Sends a plain text message.
    async fn send_text(&self, text: &str) -> Result<SentMessage, PlatformError>;

    /// Sends a colored notice.
    async fn send_notice(
        &self,
        notice: Notice,
    ) -> Result<SentMessage, PlatformError>;

    /// Deletes a message from the thread.
    async fn delete_message(&self, message_id: &str)
    -> Result<(), PlatformError>;

    /// Closes the thread so that no further messages are processed.
    async fn close(&self) -> Result<(), PlatformError>;

    /// Returns the most recent message of the thread.
    async fn latest_message(
        &self,
    ) -> Result<Option<ThreadMessage>, PlatformError>;

    /// Returns up to `limit` most recent messages, oldest first, already
    /// converted to [`Message`]s.
    async fn history(
        &self,
        limit: usize,
    ) -> Result<Vec<Message>, PlatformError>;
}

/// The channel moderation events are reported to.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Posts one line to the audit channel.
    async fn post(&self, text: &str) -> Result<(), PlatformError>;
}

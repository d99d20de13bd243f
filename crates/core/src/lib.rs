//! Core logic of the relay: conversation model, moderation gateway,
//! completion orchestration and response dispatching.
//!
//! The messaging platform is reached only through the [`Thread`] and
//! [`AuditLog`] traits, and the external services only through the
//! provider traits of `relay_model`.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod completion;
pub mod config;
mod dispatch;
pub mod message;
pub mod moderation;
mod model_client;
pub mod platform;
mod relay;
pub mod split;
#[cfg(test)]
mod testing;
mod turn;

pub use completion::{CompletionOutcome, CompletionResult};
pub use config::{BotConfig, BotConfigBuilder, OutagePolicy};
pub use message::{Conversation, Message, Prompt};
pub use moderation::{ModerationError, ModerationThresholds, Verdict};
pub use platform::{
    AuditLog, Notice, NoticeLevel, PlatformError, SentMessage, Thread,
    ThreadInfo, ThreadMessage,
};
pub use relay::{Relay, RelayBuilder};
pub use turn::{TurnContext, TurnOutcome, is_last_message_stale};

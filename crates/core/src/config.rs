//! Bot configuration.

use std::fmt::Debug;
use std::time::Duration;

use crate::message::Message;
use crate::moderation::ModerationThresholds;

/// The conversation separator; the completion service stops generating
/// when it emits this sequence.
pub const SEPARATOR_TOKEN: &str = "<|endoftext|>";

/// What to do when the moderation classifier itself cannot be reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutagePolicy {
    /// Treat unclassified content as unsafe and stop processing it.
    #[default]
    FailClosed,
    /// Let unclassified content through, logging a warning.
    FailOpen,
}

/// Builder for [`BotConfig`].
#[derive(Clone, Debug)]
pub struct BotConfigBuilder {
    bot_name: String,
    instructions: Option<String>,
    example_conversations: Vec<Vec<Message>>,
    token_budget: Option<i64>,
    max_reply_tokens: Option<i64>,
    temperature: Option<f32>,
    max_chars_per_message: Option<usize>,
    receive_delay: Option<Duration>,
    max_thread_messages: Option<usize>,
    active_thread_prefix: Option<String>,
    inactive_thread_prefix: Option<String>,
    thresholds: Option<ModerationThresholds>,
    outage_policy: OutagePolicy,
}

impl BotConfigBuilder {
    /// Creates a builder for a bot with the given display name.
    ///
    /// Messages authored under this name are rendered as the assistant's
    /// own turns.
    #[inline]
    pub fn with_bot_name<S: Into<String>>(bot_name: S) -> Self {
        Self {
            bot_name: bot_name.into(),
            instructions: None,
            example_conversations: vec![],
            token_budget: None,
            max_reply_tokens: None,
            temperature: None,
            max_chars_per_message: None,
            receive_delay: None,
            max_thread_messages: None,
            active_thread_prefix: None,
            inactive_thread_prefix: None,
            thresholds: None,
            outage_policy: OutagePolicy::default(),
        }
    }

    /// Sets the system instruction sent ahead of every conversation.
    #[inline]
    pub fn with_instructions<S: Into<String>>(
        mut self,
        instructions: S,
    ) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Adds a few-shot example conversation.
    #[inline]
    pub fn with_example_conversation(mut self, messages: Vec<Message>) -> Self {
        self.example_conversations.push(messages);
        self
    }

    /// Sets the total token budget shared by the prompt and the reply.
    #[inline]
    pub fn with_token_budget(mut self, budget: i64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Sets the ceiling of tokens a single reply may use.
    #[inline]
    pub fn with_max_reply_tokens(mut self, max_tokens: i64) -> Self {
        self.max_reply_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the maximum length of one outgoing message, in characters.
    #[inline]
    pub fn with_max_chars_per_message(mut self, max_chars: usize) -> Self {
        self.max_chars_per_message = Some(max_chars);
        self
    }

    /// Sets how long to wait for follow-up messages before replying.
    #[inline]
    pub fn with_receive_delay(mut self, delay: Duration) -> Self {
        self.receive_delay = Some(delay);
        self
    }

    /// Sets the number of thread messages after which a thread is closed.
    #[inline]
    pub fn with_max_thread_messages(mut self, max_messages: usize) -> Self {
        self.max_thread_messages = Some(max_messages);
        self
    }

    /// Sets the name prefixes of active and closed threads.
    #[inline]
    pub fn with_thread_prefixes<A: Into<String>, I: Into<String>>(
        mut self,
        active: A,
        inactive: I,
    ) -> Self {
        self.active_thread_prefix = Some(active.into());
        self.inactive_thread_prefix = Some(inactive.into());
        self
    }

    /// Sets the moderation thresholds.
    #[inline]
    pub fn with_thresholds(mut self, thresholds: ModerationThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Sets the policy used when the moderation classifier is down.
    #[inline]
    pub fn with_outage_policy(mut self, policy: OutagePolicy) -> Self {
        self.outage_policy = policy;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> BotConfig {
        BotConfig {
            bot_name: self.bot_name,
            instructions: self
                .instructions
                .unwrap_or_else(|| "You are a user on discord".to_owned()),
            example_conversations: self.example_conversations,
            token_budget: self.token_budget.unwrap_or(4000),
            max_reply_tokens: self.max_reply_tokens.unwrap_or(1800),
            temperature: self.temperature.unwrap_or(0.9),
            max_chars_per_message: self
                .max_chars_per_message
                .unwrap_or(1500)
                .clamp(1, 2000),
            receive_delay: self.receive_delay.unwrap_or(Duration::from_secs(3)),
            max_thread_messages: self.max_thread_messages.unwrap_or(200),
            active_thread_prefix: self
                .active_thread_prefix
                .unwrap_or_else(|| "💬✅".to_owned()),
            inactive_thread_prefix: self
                .inactive_thread_prefix
                .unwrap_or_else(|| "💬❌".to_owned()),
            thresholds: self.thresholds.unwrap_or_default(),
            outage_policy: self.outage_policy,
        }
    }
}

/// Configuration of the relay, fixed at startup.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub(crate) bot_name: String,
    pub(crate) instructions: String,
    pub(crate) example_conversations: Vec<Vec<Message>>,
    pub(crate) token_budget: i64,
    pub(crate) max_reply_tokens: i64,
    pub(crate) temperature: f32,
    pub(crate) max_chars_per_message: usize,
    pub(crate) receive_delay: Duration,
    pub(crate) max_thread_messages: usize,
    pub(crate) active_thread_prefix: String,
    pub(crate) inactive_thread_prefix: String,
    pub(crate) thresholds: ModerationThresholds,
    pub(crate) outage_policy: OutagePolicy,
}

impl BotConfig {
    /// Returns the bot's display name.
    #[inline]
    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Returns the maximum length of one outgoing message.
    #[inline]
    pub fn max_chars_per_message(&self) -> usize {
        self.max_chars_per_message
    }

    /// Returns how long a turn waits for follow-up messages.
    #[inline]
    pub fn receive_delay(&self) -> Duration {
        self.receive_delay
    }

    /// Returns the number of thread messages after which a thread is
    /// closed.
    #[inline]
    pub fn max_thread_messages(&self) -> usize {
        self.max_thread_messages
    }

    /// Returns the name prefix of threads the bot still replies in.
    #[inline]
    pub fn active_thread_prefix(&self) -> &str {
        &self.active_thread_prefix
    }

    /// Returns the name prefix given to closed threads.
    #[inline]
    pub fn inactive_thread_prefix(&self) -> &str {
        &self.inactive_thread_prefix
    }

    /// Returns the policy used when the moderation classifier is down.
    #[inline]
    pub fn outage_policy(&self) -> OutagePolicy {
        self.outage_policy
    }
}

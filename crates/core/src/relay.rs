use std::sync::Arc;

use relay_model::{CompletionProvider, ModerationProvider};

use crate::completion::CompletionOutcome;
use crate::config::{BotConfig, BotConfigBuilder};
use crate::dispatch;
use crate::model_client::{CompletionClient, ModerationClient};
use crate::moderation::{ModerationError, ModerationGateway, Verdict};
use crate::platform::{AuditLog, PlatformError, Thread};

/// Builder for [`Relay`].
pub struct RelayBuilder {
    completion: CompletionClient,
    moderation: ModerationClient,
    config: Option<BotConfig>,
}

impl RelayBuilder {
    /// Creates a builder with the completion and moderation providers.
    #[inline]
    pub fn with_providers<C, M>(completion: C, moderation: M) -> Self
    where
        C: CompletionProvider + 'static,
        M: ModerationProvider + 'static,
    {
        Self {
            completion: CompletionClient::new(completion),
            moderation: ModerationClient::new(moderation),
            config: None,
        }
    }

    /// Sets the configuration.
    #[inline]
    pub fn with_config(mut self, config: BotConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the relay.
    ///
    /// Without an explicit configuration, a bot named `GPT` with default
    /// settings is used.
    pub fn build(self) -> Relay {
        let config = self
            .config
            .unwrap_or_else(|| BotConfigBuilder::with_bot_name("GPT").build());
        let moderation =
            ModerationGateway::new(self.moderation, config.thresholds.clone());
        Relay {
            config: Arc::new(config),
            completion: self.completion,
            moderation,
        }
    }
}

/// The relay between platform threads and the completion service.
///
/// A relay holds no per-thread state and is cheap to clone; each clone
/// can serve any number of concurrent turns.
#[derive(Clone)]
pub struct Relay {
    pub(crate) config: Arc<BotConfig>,
    pub(crate) completion: CompletionClient,
    pub(crate) moderation: ModerationGateway,
}

impl Relay {
    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Classifies a text and summarizes the result with the configured
    /// thresholds.
    #[inline]
    pub async fn moderate_message(
        &self,
        text: &str,
        user: &str,
    ) -> Result<Verdict, ModerationError> {
        self.moderation.moderate_message(text, user).await
    }

    /// Delivers a completion outcome to a thread.
    #[inline]
    pub async fn process_response(
        &self,
        user: &str,
        thread: &dyn Thread,
        audit: Option<&dyn AuditLog>,
        outcome: CompletionOutcome,
    ) -> Result<(), PlatformError> {
        dispatch::process_response(&self.config, user, thread, audit, outcome)
            .await
    }
}

#[cfg(test)]
mod tests {
    use relay_test_model::{TestCompletionProvider, TestModerationProvider};

    use super::*;

    #[test]
    fn test_default_config() {
        let relay = RelayBuilder::with_providers(
            TestCompletionProvider::default(),
            TestModerationProvider::default(),
        )
        .build();
        assert_eq!(relay.config().bot_name(), "GPT");
    }

    #[tokio::test]
    async fn test_moderate_message() {
        let moderation = TestModerationProvider::default();
        moderation.add_rule("hit", [("violence", 0.3)]);
        let relay = RelayBuilder::with_providers(
            TestCompletionProvider::default(),
            moderation.clone(),
        )
        .build();

        let verdict = relay.moderate_message("hit it", "alice").await.unwrap();
        assert_eq!(verdict.flagged, "(violence) ");
        let verdict = relay.moderate_message("hello", "alice").await.unwrap();
        assert_eq!(verdict, Verdict::default());
        assert_eq!(moderation.inputs(), ["hit it", "hello"]);
    }
}

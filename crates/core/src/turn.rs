//! The full pipeline of a message posted in a relay thread.

use crate::completion::CompletionResult;
use crate::config::OutagePolicy;
use crate::moderation::{send_blocked_notice, send_flagged_notice};
use crate::platform::{
    AuditLog, Notice, PlatformError, Thread, ThreadInfo, ThreadMessage,
};
use crate::relay::Relay;

const CAPPED_THREAD: &str =
    "**Error** - Cannot process further commands in this thread.";
const DELETED: &str = "'s message has been deleted by moderation.";
const NOT_DELETED: &str = "'s message has been blocked by moderation but \
    could not be deleted. Missing Manage Messages permission in this Channel.";
const FLAGGED: &str = "'s message has been flagged by moderation.";

/// Returns `true` if another message, not written by the bot, arrived in
/// the thread after the one with `message_id`.
pub fn is_last_message_stale(
    message_id: &str,
    last: Option<&ThreadMessage>,
    bot_id: &str,
) -> bool {
    last.is_some_and(|last| last.id != message_id && last.author_id != bot_id)
}

/// The platform handles a turn runs against.
#[derive(Clone, Copy)]
pub struct TurnContext<'a> {
    /// Platform id of the bot user.
    pub bot_id: &'a str,
    /// The thread the message was posted in.
    pub thread: &'a dyn Thread,
    /// The audit channel of the guild, if it has one.
    pub audit: Option<&'a dyn AuditLog>,
}

/// How a thread message was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TurnOutcome {
    /// The thread is not one the bot converses in.
    Ignored,
    /// The thread hit the message cap and was closed.
    Closed,
    /// The message was blocked by moderation.
    Blocked,
    /// The message could not be moderated and was dropped.
    Unmoderated,
    /// A newer message arrived; this one is left to its own turn.
    Stale,
    /// A completion was generated and delivered.
    Replied(CompletionResult),
}

impl Relay {
    /// Runs one turn for a message posted in a thread.
    ///
    /// The caller has already filtered out the bot's own messages and
    /// messages outside of allowed guilds.
    pub async fn handle_thread_message(
        &self,
        ctx: TurnContext<'_>,
        info: &ThreadInfo,
        message: &ThreadMessage,
    ) -> Result<TurnOutcome, PlatformError> {
        let config = &self.config;
        let TurnContext {
            bot_id,
            thread,
            audit,
        } = ctx;

        if !info.is_active(&config.active_thread_prefix) {
            return Ok(TurnOutcome::Ignored);
        }

        if info.message_count > config.max_thread_messages {
            info!("thread {} is over the message cap", info.name);
            thread.send_notice(Notice::warning(CAPPED_THREAD)).await?;
            thread.close().await?;
            return Ok(TurnOutcome::Closed);
        }

        let author = message.author_name.as_str();
        match self.moderate_message(&message.text, author).await {
            Ok(verdict) if verdict.is_blocked() => {
                let text = Some(message.text.as_str());
                send_blocked_notice(audit, author, &verdict.blocked, text)
                    .await?;
                let notice = match thread.delete_message(&message.id).await {
                    Ok(()) => format!("❌ **{author}{DELETED}**"),
                    Err(err) => {
                        warn!("cannot delete message {}: {err}", message.id);
                        format!("❌ **{author}{NOT_DELETED}**")
                    }
                };
                thread.send_notice(Notice::error(notice)).await?;
                return Ok(TurnOutcome::Blocked);
            }
            Ok(verdict) if verdict.is_flagged() => {
                let notice = format!("⚠️ **{author}{FLAGGED}**");
                thread.send_notice(Notice::warning(notice)).await?;
                send_flagged_notice(
                    audit,
                    author,
                    &verdict.flagged,
                    Some(message.text.as_str()),
                    message.url.as_deref(),
                )
                .await?;
            }
            Ok(_) => {}
            Err(err) => match config.outage_policy {
                OutagePolicy::FailClosed => {
                    let id = &message.id;
                    error!("dropping unmoderated message {id}: {err}");
                    let notice = Notice::warning(format!("**Error** - {err}"));
                    thread.send_notice(notice).await?;
                    return Ok(TurnOutcome::Unmoderated);
                }
                OutagePolicy::FailOpen => {
                    let id = &message.id;
                    warn!("processing unmoderated message {id}: {err}");
                }
            },
        }

        // Wait for the author to finish a burst of messages.
        if !config.receive_delay.is_zero() {
            tokio::time::sleep(config.receive_delay).await;
        }
        if self.is_stale(ctx, message).await? {
            debug!("message {} superseded before completion", message.id);
            return Ok(TurnOutcome::Stale);
        }

        info!(
            "thread message to process - {author}: {} - {}",
            message.text.chars().take(50).collect::<String>(),
            info.name
        );

        let history = thread.history(config.max_thread_messages).await?;
        let outcome = self.generate_completion_response(history, author).await;

        if self.is_stale(ctx, message).await? {
            debug!("message {} superseded, reply dropped", message.id);
            return Ok(TurnOutcome::Stale);
        }

        let kind = outcome.kind();
        self.process_response(author, thread, audit, outcome).await?;
        Ok(TurnOutcome::Replied(kind))
    }

    async fn is_stale(
        &self,
        ctx: TurnContext<'_>,
        message: &ThreadMessage,
    ) -> Result<bool, PlatformError> {
        let last = ctx.thread.latest_message().await?;
        Ok(is_last_message_stale(&message.id, last.as_ref(), ctx.bot_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_test_model::{
        PresetResponse, TestCompletionProvider, TestModerationProvider,
    };

    use super::*;
    use crate::config::BotConfigBuilder;
    use crate::message::Message;
    use crate::platform::NoticeLevel;
    use crate::relay::RelayBuilder;
    use crate::testing::{Action, RecordingAudit, RecordingThread};

    const BOT_ID: &str = "999";

    struct Fixture {
        completion: TestCompletionProvider,
        moderation: TestModerationProvider,
        relay: Relay,
        thread: RecordingThread,
        audit: RecordingAudit,
    }

    impl Fixture {
        fn new(config: BotConfigBuilder) -> Self {
            let completion = TestCompletionProvider::default();
            let moderation = TestModerationProvider::default();
            let relay = RelayBuilder::with_providers(
                completion.clone(),
                moderation.clone(),
            )
            .with_config(config.build())
            .build();
            let thread = RecordingThread::with_history(vec![
                Message::new("alice", "hello"),
                Message::new("GPT", "hi alice"),
                Message::new("alice", "tell me a joke"),
            ]);
            thread.set_latest(Some(message("3", "1", "tell me a joke")));
            Self {
                completion,
                moderation,
                relay,
                thread,
                audit: RecordingAudit::default(),
            }
        }

        async fn handle(&self, message: &ThreadMessage) -> TurnOutcome {
            self.handle_in(&thread_info(), message).await
        }

        async fn handle_in(
            &self,
            info: &ThreadInfo,
            message: &ThreadMessage,
        ) -> TurnOutcome {
            let ctx = TurnContext {
                bot_id: BOT_ID,
                thread: &self.thread,
                audit: Some(&self.audit as &dyn AuditLog),
            };
            self.relay
                .handle_thread_message(ctx, info, message)
                .await
                .unwrap()
        }
    }

    fn config() -> BotConfigBuilder {
        BotConfigBuilder::with_bot_name("GPT")
    }

    fn thread_info() -> ThreadInfo {
        ThreadInfo {
            owned_by_bot: true,
            name: "💬✅ alice - hello".to_owned(),
            archived: false,
            locked: false,
            message_count: 3,
        }
    }

    fn message(id: &str, author_id: &str, text: &str) -> ThreadMessage {
        ThreadMessage {
            id: id.to_owned(),
            author_id: author_id.to_owned(),
            author_name: "alice".to_owned(),
            text: text.to_owned(),
            url: Some(format!("https://chat.test/m/{id}")),
        }
    }

    #[test]
    fn test_staleness() {
        let ours = message("3", "1", "a");
        assert!(!is_last_message_stale("3", None, BOT_ID));
        assert!(!is_last_message_stale("3", Some(&ours), BOT_ID));
        let newer = message("4", "1", "b");
        assert!(is_last_message_stale("3", Some(&newer), BOT_ID));
        assert!(!is_last_message_stale(
            "3",
            Some(&message("4", BOT_ID, "b")),
            BOT_ID
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_to_thread_message() {
        let fx = Fixture::new(config());
        fx.completion
            .add_response(PresetResponse::with_text("Why did the crab cross?"));

        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert_eq!(outcome, TurnOutcome::Replied(CompletionResult::Ok));
        assert_eq!(fx.thread.texts(), vec!["Why did the crab cross?"]);

        let requests = fx.completion.requests();
        assert_eq!(requests.len(), 1);
        // system + three history messages
        assert_eq!(requests[0].messages.len(), 4);
        assert_eq!(requests[0].user, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_receive_delay() {
        let delay = Duration::from_secs(3);
        let fx = Fixture::new(config().with_receive_delay(delay));
        fx.completion.add_response(PresetResponse::with_text("ok"));

        let start = tokio::time::Instant::now();
        fx.handle(&message("3", "1", "tell me a joke")).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_message_is_abandoned() {
        let fx = Fixture::new(config());
        fx.thread.set_latest(Some(message("4", "1", "and another")));

        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert_eq!(outcome, TurnOutcome::Stale);
        assert_eq!(fx.completion.request_count(), 0);
        assert!(fx.thread.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_superseded_during_completion_is_dropped() {
        let fx = Fixture::new(config());
        // alice posts again while a slow completion streams in
        fx.thread.then_latest(Some(message("4", "1", "wait, one more")));
        fx.completion.set_delay(Duration::from_secs(2));
        fx.completion.add_response(PresetResponse::with_text("a joke"));

        let start = tokio::time::Instant::now();
        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(outcome, TurnOutcome::Stale);
        assert_eq!(fx.completion.request_count(), 1);
        assert!(fx.thread.texts().is_empty());
        assert!(fx.thread.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_message_does_not_make_stale() {
        let fx = Fixture::new(config());
        fx.thread.set_latest(Some(message("4", BOT_ID, "notice")));
        fx.completion.add_response(PresetResponse::with_text("ok"));

        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert_eq!(outcome, TurnOutcome::Replied(CompletionResult::Ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_thread_is_ignored() {
        let fx = Fixture::new(config());
        let info = ThreadInfo {
            name: "💬❌ alice - hello".to_owned(),
            ..thread_info()
        };
        let outcome = fx.handle_in(&info, &message("3", "1", "hi")).await;
        assert_eq!(outcome, TurnOutcome::Ignored);
        assert!(fx.moderation.inputs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_thread_is_closed() {
        let fx = Fixture::new(config().with_max_thread_messages(2));
        let outcome = fx.handle(&message("3", "1", "hi")).await;
        assert_eq!(outcome, TurnOutcome::Closed);
        assert_eq!(fx.thread.close_count(), 1);
        assert_eq!(fx.completion.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_message_is_deleted() {
        let fx = Fixture::new(config());
        fx.moderation.add_rule("vile", [("hate", 0.9)]);

        let outcome = fx.handle(&message("3", "1", "something vile")).await;
        assert_eq!(outcome, TurnOutcome::Blocked);
        let actions = fx.thread.actions();
        assert_eq!(actions[0], Action::Delete("3".to_owned()));
        assert_eq!(
            actions[1],
            Action::Notice(Notice::error(
                "❌ **alice's message has been deleted by moderation.**"
            ))
        );
        assert_eq!(
            fx.audit.posts(),
            vec!["❌ alice - (hate)  - something vile"]
        );
        assert_eq!(fx.completion.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_message_without_permission() {
        let fx = Fixture::new(config());
        fx.moderation.add_rule("vile", [("hate", 0.9)]);
        fx.thread.deny_delete();

        let outcome = fx.handle(&message("3", "1", "something vile")).await;
        assert_eq!(outcome, TurnOutcome::Blocked);
        let notices = fx.thread.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].description.contains("could not be deleted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flagged_message_is_answered() {
        let fx = Fixture::new(config());
        fx.moderation.add_rule("fight", [("violence", 0.3)]);
        fx.thread.set_latest(Some(message("3", "1", "a fight")));
        fx.completion.add_response(PresetResponse::with_text("let's not"));

        let outcome = fx.handle(&message("3", "1", "a fight")).await;
        assert_eq!(outcome, TurnOutcome::Replied(CompletionResult::Ok));
        let notices = fx.thread.notices();
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(
            fx.audit.posts(),
            vec!["⚠️ alice - (violence)  - a fight - https://chat.test/m/3"]
        );
        assert_eq!(fx.thread.texts(), vec!["let's not"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_outage() {
        let fx = Fixture::new(config());
        fx.moderation.fail_with("classifier down");
        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert_eq!(outcome, TurnOutcome::Unmoderated);
        assert_eq!(fx.completion.request_count(), 0);

        let config = config().with_outage_policy(OutagePolicy::FailOpen);
        let fx = Fixture::new(config);
        fx.moderation.fail_with("classifier down");
        fx.completion.add_response(PresetResponse::with_text("ok"));
        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        // The reply itself cannot be moderated either, but fails open too.
        assert_eq!(outcome, TurnOutcome::Replied(CompletionResult::Ok));
        assert_eq!(fx.thread.texts(), vec!["ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_long_closes_thread_once() {
        let fx = Fixture::new(config().with_token_budget(10));

        let outcome = fx.handle(&message("3", "1", "tell me a joke")).await;
        assert_eq!(outcome, TurnOutcome::Replied(CompletionResult::TooLong));
        assert_eq!(fx.thread.close_count(), 1);
        assert_eq!(fx.completion.request_count(), 0);
    }
}

use crate::completion::CompletionOutcome;
use crate::config::BotConfig;
use crate::moderation::{send_blocked_notice, send_flagged_notice};
use crate::platform::{AuditLog, Notice, PlatformError, SentMessage, Thread};
use crate::split::split_into_shorter_messages;

const EMPTY_REPLY: &str = "**Invalid response** - empty response";
const FLAGGED_REPLY: &str =
    "⚠️ **This conversation has been flagged by moderation.**";
const BLOCKED_REPLY: &str =
    "❌ **The response has been blocked by moderation.**";

/// Delivers a completion outcome to the thread, and to the audit channel
/// when moderation is involved.
pub(crate) async fn process_response(
    config: &BotConfig,
    user: &str,
    thread: &dyn Thread,
    audit: Option<&dyn AuditLog>,
    outcome: CompletionOutcome,
) -> Result<(), PlatformError> {
    match outcome {
        CompletionOutcome::Ok { reply } => {
            if reply.is_empty() {
                thread.send_notice(Notice::warning(EMPTY_REPLY)).await?;
            } else {
                send_reply(config, thread, &reply).await?;
            }
        }
        CompletionOutcome::ModerationFlagged { reply, status } => {
            let sent = send_reply(config, thread, &reply).await?;
            let url = sent.as_ref().and_then(|m| m.url.as_deref());
            let text = Some(reply.as_str());
            send_flagged_notice(audit, user, &status, text, url).await?;
            thread.send_notice(Notice::warning(FLAGGED_REPLY)).await?;
        }
        CompletionOutcome::ModerationBlocked { reply, status } => {
            let text = Some(reply.as_str());
            send_blocked_notice(audit, user, &status, text).await?;
            thread.send_notice(Notice::error(BLOCKED_REPLY)).await?;
        }
        CompletionOutcome::InvalidRequest { status } => {
            thread
                .send_notice(Notice::warning(format!(
                    "**Invalid request** - {status}"
                )))
                .await?;
        }
        CompletionOutcome::OtherError { status } => {
            thread
                .send_notice(Notice::warning(format!("**Error** - {status}")))
                .await?;
        }
        CompletionOutcome::TooLong { status, .. } => {
            thread
                .send_notice(Notice::warning(format!("**Error** - {status}")))
                .await?;
            thread.close().await?;
        }
    }
    Ok(())
}

// Returns the last chunk sent, if any.
async fn send_reply(
    config: &BotConfig,
    thread: &dyn Thread,
    reply: &str,
) -> Result<Option<SentMessage>, PlatformError> {
    let mut last = None;
    let max_chars = config.max_chars_per_message;
    for chunk in split_into_shorter_messages(reply, max_chars) {
        last = Some(thread.send_text(&chunk).await?);
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfigBuilder;
    use crate::platform::NoticeLevel;
    use crate::testing::{Action, RecordingAudit, RecordingThread};

    fn config() -> BotConfig {
        BotConfigBuilder::with_bot_name("GPT")
            .with_max_chars_per_message(20)
            .build()
    }

    async fn dispatch(
        outcome: CompletionOutcome,
    ) -> (RecordingThread, RecordingAudit) {
        let thread = RecordingThread::default();
        let recorder = RecordingAudit::default();
        let audit: &dyn AuditLog = &recorder;
        process_response(&config(), "alice", &thread, Some(audit), outcome)
            .await
            .unwrap();
        (thread, recorder)
    }

    #[tokio::test]
    async fn test_ok_reply_is_chunked() {
        let reply = "Sure thing. Here is a longer answer for you.";
        let (thread, audit) = dispatch(CompletionOutcome::Ok {
            reply: reply.to_owned(),
        })
        .await;

        let texts = thread.texts();
        assert!(texts.len() >= 2);
        assert!(texts.iter().all(|t| t.chars().count() <= 20));
        assert_eq!(texts.concat(), reply);
        assert!(thread.notices().is_empty());
        assert!(audit.posts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reply() {
        let (thread, _) = dispatch(CompletionOutcome::Ok {
            reply: String::new(),
        })
        .await;
        let empty = Action::Notice(Notice::warning(EMPTY_REPLY));
        assert_eq!(thread.actions(), vec![empty]);
    }

    #[tokio::test]
    async fn test_flagged_reply_is_sent_and_audited() {
        let (thread, audit) = dispatch(CompletionOutcome::ModerationFlagged {
            reply: "a fight".to_owned(),
            status: "from_response:(violence) ".to_owned(),
        })
        .await;

        assert_eq!(
            thread.actions(),
            vec![
                Action::Text("a fight".to_owned()),
                Action::Notice(Notice::warning(FLAGGED_REPLY)),
            ]
        );
        assert_eq!(
            audit.posts(),
            vec![
                "⚠️ alice - from_response:(violence)  - a fight - https://chat.test/m/1"
                    .to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn test_blocked_reply_is_never_sent() {
        let (thread, audit) = dispatch(CompletionOutcome::ModerationBlocked {
            reply: "something vile".to_owned(),
            status: "from_response:(hate) ".to_owned(),
        })
        .await;

        assert!(thread.texts().is_empty());
        let notices = thread.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(
            audit.posts(),
            vec!["❌ alice - from_response:(hate)  - something vile".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_error_notices() {
        let (thread, _) = dispatch(CompletionOutcome::InvalidRequest {
            status: "bad temperature".to_owned(),
        })
        .await;
        assert_eq!(
            thread.notices(),
            vec![Notice::warning("**Invalid request** - bad temperature")]
        );
        assert_eq!(thread.close_count(), 0);

        let (thread, _) = dispatch(CompletionOutcome::OtherError {
            status: "timeout".to_owned(),
        })
        .await;
        let notice = Notice::warning("**Error** - timeout");
        assert_eq!(thread.notices(), vec![notice]);
        assert_eq!(thread.close_count(), 0);
    }

    #[tokio::test]
    async fn test_too_long_closes_once() {
        let (thread, _) = dispatch(CompletionOutcome::TooLong {
            reply: None,
            status: "Cannot process further commands in this thread.".to_owned(),
        })
        .await;
        assert_eq!(
            thread.actions(),
            vec![
                Action::Notice(Notice::warning(
                    "**Error** - Cannot process further commands in this thread."
                )),
                Action::Close,
            ]
        );
        assert_eq!(thread.close_count(), 1);
    }

    #[tokio::test]
    async fn test_without_audit_channel() {
        let thread = RecordingThread::default();
        process_response(
            &config(),
            "alice",
            &thread,
            None,
            CompletionOutcome::ModerationBlocked {
                reply: "vile".to_owned(),
                status: "from_response:(hate) ".to_owned(),
            },
        )
        .await
        .unwrap();
        assert_eq!(thread.notices().len(), 1);
    }
}

use relay_model::{ChatMessage, CompletionRequest, ErrorKind, FinishReason};

use crate::config::{OutagePolicy, SEPARATOR_TOKEN};
use crate::message::{Message, Prompt};
use crate::relay::Relay;

// Transcripts this short are never trimmed.
const MIN_MESSAGES_TO_TRIM: usize = 5;
// Only the tail of the transcript is moderated after a reply.
const MODERATED_TAIL_CHARS: usize = 500;

const TOO_LONG_STATUS: &str = "Cannot process further commands in this thread.";

/// The kind of a completion outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionResult {
    /// A reply was generated.
    Ok,
    /// The transcript no longer fits the token budget.
    TooLong,
    /// The completion service rejected the request.
    InvalidRequest,
    /// Anything else went wrong.
    OtherError,
    /// A reply was generated but trips the soft moderation limit.
    ModerationFlagged,
    /// A reply was generated but trips the hard moderation limit.
    ModerationBlocked,
}

/// The outcome of one completion attempt, consumed once by the
/// dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompletionOutcome {
    /// A reply, possibly empty.
    Ok {
        /// The generated text, trimmed.
        reply: String,
    },
    /// The thread must be closed.
    TooLong {
        /// The service's message, when the service itself refused.
        reply: Option<String>,
        /// User-facing explanation.
        status: String,
    },
    /// The request was malformed.
    InvalidRequest {
        /// Diagnostic text.
        status: String,
    },
    /// An unexpected failure.
    OtherError {
        /// Diagnostic text.
        status: String,
    },
    /// The reply is shown, and audited.
    ModerationFlagged {
        /// The generated text.
        reply: String,
        /// `from_response:` followed by the flagged categories.
        status: String,
    },
    /// The reply is suppressed, and audited.
    ModerationBlocked {
        /// The generated text.
        reply: String,
        /// `from_response:` followed by the blocked categories.
        status: String,
    },
}

impl CompletionOutcome {
    /// Returns the kind of this outcome.
    pub fn kind(&self) -> CompletionResult {
        match self {
            Self::Ok { .. } => CompletionResult::Ok,
            Self::TooLong { .. } => CompletionResult::TooLong,
            Self::InvalidRequest { .. } => CompletionResult::InvalidRequest,
            Self::OtherError { .. } => CompletionResult::OtherError,
            Self::ModerationFlagged { .. } => {
                CompletionResult::ModerationFlagged
            }
            Self::ModerationBlocked { .. } => {
                CompletionResult::ModerationBlocked
            }
        }
    }

    /// Returns the generated or service-provided text, if any.
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Ok { reply }
            | Self::ModerationFlagged { reply, .. }
            | Self::ModerationBlocked { reply, .. } => Some(reply),
            Self::TooLong { reply, .. } => reply.as_deref(),
            Self::InvalidRequest { .. } | Self::OtherError { .. } => None,
        }
    }

    /// Returns the status or diagnostic text, if any.
    pub fn status_text(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::TooLong { status, .. }
            | Self::InvalidRequest { status }
            | Self::OtherError { status }
            | Self::ModerationFlagged { status, .. }
            | Self::ModerationBlocked { status, .. } => Some(status),
        }
    }
}

impl Relay {
    /// Generates the bot's next turn for a transcript, oldest message
    /// first, on behalf of `user`.
    ///
    /// Every failure of the external services is folded into the
    /// returned outcome.
    pub async fn generate_completion_response(
        &self,
        messages: Vec<Message>,
        user: &str,
    ) -> CompletionOutcome {
        let mut messages = messages;
        let mut prompt = self.build_prompt(&messages);
        let mut max_tokens = self.reply_budget(&prompt);

        if max_tokens < 0 && messages.len() > MIN_MESSAGES_TO_TRIM {
            let index = messages.len() / 2;
            messages.drain(..index);
            debug!("dropped {index} old messages to fit the budget");
            prompt = self.build_prompt(&messages);
            max_tokens = self.reply_budget(&prompt);
        }

        if max_tokens < 0 {
            return CompletionOutcome::TooLong {
                reply: None,
                status: TOO_LONG_STATUS.to_owned(),
            };
        }

        let rendered = prompt.render(&self.config.bot_name);
        let request = CompletionRequest {
            messages: rendered.clone(),
            max_tokens: max_tokens as u32,
            temperature: self.config.temperature,
            n: 1,
            stop: vec![SEPARATOR_TOKEN.to_owned()],
            user: user.to_owned(),
        };

        let reply = match self.completion.send_request(request).await {
            Ok(reply) => {
                if reply.finish_reason == Some(FinishReason::Length) {
                    debug!("reply was cut at {max_tokens} tokens");
                }
                reply.text.trim().to_owned()
            }
            Err(err) => {
                let status = err.to_string();
                return match err.kind() {
                    ErrorKind::ContextLengthExceeded => {
                        CompletionOutcome::TooLong {
                            reply: Some(status.clone()),
                            status,
                        }
                    }
                    ErrorKind::InvalidRequest => {
                        error!("invalid completion request: {status}");
                        CompletionOutcome::InvalidRequest { status }
                    }
                    _ => {
                        error!("completion failed: {status}");
                        CompletionOutcome::OtherError { status }
                    }
                };
            }
        };

        // An empty reply is passed on as is, the dispatcher reports it.
        if reply.is_empty() {
            return CompletionOutcome::Ok { reply };
        }

        let tail = moderated_tail(&rendered, &reply);
        let verdict = self.moderation.moderate_message(&tail, user).await;
        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(err) => match self.config.outage_policy {
                OutagePolicy::FailClosed => {
                    error!("cannot moderate the reply: {err}");
                    return CompletionOutcome::OtherError {
                        status: err.to_string(),
                    };
                }
                OutagePolicy::FailOpen => {
                    warn!("passing an unmoderated reply: {err}");
                    return CompletionOutcome::Ok { reply };
                }
            },
        };

        if verdict.is_blocked() {
            return CompletionOutcome::ModerationBlocked {
                reply,
                status: format!("from_response:{}", verdict.blocked),
            };
        }
        if verdict.is_flagged() {
            return CompletionOutcome::ModerationFlagged {
                reply,
                status: format!("from_response:{}", verdict.flagged),
            };
        }
        CompletionOutcome::Ok { reply }
    }

    fn build_prompt(&self, messages: &[Message]) -> Prompt {
        let config = &self.config;
        let mut transcript: Vec<Message> = config
            .example_conversations
            .iter()
            .flatten()
            .cloned()
            .collect();
        transcript.extend_from_slice(messages);
        transcript.push(Message::without_text(config.bot_name.clone()));
        Prompt::new(config.instructions.clone(), transcript)
    }

    fn reply_budget(&self, prompt: &Prompt) -> i64 {
        let budget = self.config.token_budget - prompt.estimate_tokens();
        budget.min(self.config.max_reply_tokens)
    }
}

fn moderated_tail(rendered: &[ChatMessage], reply: &str) -> String {
    let mut text = rendered
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text.push_str(reply);

    let skip = text.chars().count().saturating_sub(MODERATED_TAIL_CHARS);
    text.chars().skip(skip).collect()
}

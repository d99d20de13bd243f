//! Recording fakes of the platform traits.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::Message;
use crate::platform::{
    AuditLog, Notice, PlatformError, SentMessage, Thread, ThreadMessage,
};

/// Something the relay did to a thread.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Text(String),
    Notice(Notice),
    Delete(String),
    Close,
}

#[derive(Default)]
struct ThreadState {
    actions: Vec<Action>,
    history: Vec<Message>,
    // Answers to successive `latest_message` calls; the last one repeats.
    latest: Vec<Option<ThreadMessage>>,
    deny_delete: bool,
}

#[derive(Default)]
pub struct RecordingThread {
    state: Mutex<ThreadState>,
}

impl RecordingThread {
    pub fn with_history(history: Vec<Message>) -> Self {
        let thread = Self::default();
        thread.lock().history = history;
        thread
    }

    pub fn set_latest(&self, latest: Option<ThreadMessage>) {
        self.lock().latest = vec![latest];
    }

    /// Makes `latest` the answer once the current one has been read.
    pub fn then_latest(&self, latest: Option<ThreadMessage>) {
        self.lock().latest.push(latest);
    }

    pub fn deny_delete(&self) {
        self.lock().deny_delete = true;
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.actions()
            .iter()
            .filter(|action| **action == Action::Close)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn record(&self, action: Action) -> SentMessage {
        let mut state = self.lock();
        state.actions.push(action);
        let id = state.actions.len();
        SentMessage {
            id: id.to_string(),
            url: Some(format!("https://chat.test/m/{id}")),
        }
    }
}

#[async_trait]
impl Thread for RecordingThread {
    async fn send_text(
        &self,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        Ok(self.record(Action::Text(text.to_owned())))
    }

    async fn send_notice(
        &self,
        notice: Notice,
    ) -> Result<SentMessage, PlatformError> {
        Ok(self.record(Action::Notice(notice)))
    }

    async fn delete_message(
        &self,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        if self.lock().deny_delete {
            return Err(PlatformError::msg("Missing Permissions"));
        }
        self.record(Action::Delete(message_id.to_owned()));
        Ok(())
    }

    async fn close(&self) -> Result<(), PlatformError> {
        self.record(Action::Close);
        Ok(())
    }

    async fn latest_message(
        &self,
    ) -> Result<Option<ThreadMessage>, PlatformError> {
        let mut state = self.lock();
        if state.latest.len() > 1 {
            return Ok(state.latest.remove(0));
        }
        Ok(state.latest.first().cloned().flatten())
    }

    async fn history(
        &self,
        limit: usize,
    ) -> Result<Vec<Message>, PlatformError> {
        let history = &self.lock().history;
        let skip = history.len().saturating_sub(limit);
        Ok(history[skip..].to_vec())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    posts: Mutex<Vec<String>>,
}

impl RecordingAudit {
    pub fn posts(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn post(&self, text: &str) -> Result<(), PlatformError> {
        self.posts
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(text.to_owned());
        Ok(())
    }
}

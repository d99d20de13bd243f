//! Local fake providers for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use relay_model::{
    CompletionEvent, CompletionProvider, CompletionRequest,
    CompletionResponse, ErrorKind, FinishReason, ModerationProvider,
    ModerationRequest, ModerationScores, ProviderError,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl ProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestCompletionResponse {
    deltas: VecDeque<String>,
    finished: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl CompletionResponse for TestCompletionResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<CompletionEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if this.finished {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            if let Some(delta) = this.deltas.pop_front() {
                return Poll::Ready(Ok(Some(CompletionEvent::TextDelta(
                    delta,
                ))));
            }
            this.finished = true;
            return Poll::Ready(Ok(Some(CompletionEvent::Completed(
                FinishReason::Stop,
            ))));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct CompletionState {
    script: VecDeque<PresetResponse>,
    requests: Vec<CompletionRequest>,
    delay: Option<Duration>,
}

/// A fake completion service for testing purpose.
///
/// Before sending requests, you need to script how the service should
/// respond. Each request consumes the next preset response in order. If
/// the script is exhausted, an error will be returned. Every request is
/// recorded and can be inspected later, clones share the same script
/// and records.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestCompletionProvider {
    state: Arc<Mutex<CompletionState>>,
}

impl TestCompletionProvider {
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().script.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        self.lock().delay = Some(duration);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    #[inline]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl CompletionProvider for TestCompletionProvider {
    type Error = crate::Error;
    type Response = TestCompletionResponse;

    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut state = self.lock();
        state.requests.push(req.clone());
        let delay = state.delay.unwrap_or(Duration::from_millis(1));
        let result = match state.script.pop_front() {
            Some(PresetResponse::Reply(deltas)) => Ok(TestCompletionResponse {
                deltas: deltas.into(),
                finished: false,
                delay,
                sleep: None,
            }),
            Some(PresetResponse::Failure(kind, message)) => {
                Err(Error { message, kind })
            }
            None => Err(Error {
                message: "no enough steps".to_owned(),
                kind: ErrorKind::Other,
            }),
        };
        ready(result)
    }
}

#[derive(Default)]
struct ModerationState {
    rules: Vec<(String, ModerationScores)>,
    failure: Option<String>,
    inputs: Vec<String>,
}

/// A fake moderation classifier for testing purpose.
///
/// Inputs containing a registered trigger get the scores of the first
/// matching rule, everything else is scored clean.
#[derive(Clone, Default)]
pub struct TestModerationProvider {
    state: Arc<Mutex<ModerationState>>,
}

impl TestModerationProvider {
    /// Scores inputs containing `trigger` with the given categories.
    pub fn add_rule<S: Into<String>>(
        &self,
        trigger: S,
        scores: impl IntoIterator<Item = (&'static str, f64)>,
    ) {
        let scores = ModerationScores::from_pairs(scores);
        self.lock().rules.push((trigger.into(), scores));
    }

    /// Makes every subsequent call fail, as if the classifier were down.
    #[inline]
    pub fn fail_with<S: Into<String>>(&self, message: S) {
        self.lock().failure = Some(message.into());
    }

    /// Returns all inputs classified so far.
    pub fn inputs(&self) -> Vec<String> {
        self.lock().inputs.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ModerationState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ModerationProvider for TestModerationProvider {
    type Error = crate::Error;

    fn moderate(
        &self,
        req: &ModerationRequest,
    ) -> impl Future<Output = Result<ModerationScores, Self::Error>> + Send + 'static
    {
        let mut state = self.lock();
        state.inputs.push(req.input.clone());
        let result = match &state.failure {
            Some(message) => Err(Error {
                message: message.clone(),
                kind: ErrorKind::Other,
            }),
            None => Ok(state
                .rules
                .iter()
                .find(|(trigger, _)| req.input.contains(trigger.as_str()))
                .map(|(_, scores)| scores.clone())
                .unwrap_or_default()),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use relay_model::{ChatMessage, Role};

    use super::*;

    async fn collect_response(resp: TestCompletionResponse) -> String {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                CompletionEvent::Completed(_) => break,
                CompletionEvent::TextDelta(delta) => msg.push_str(&delta),
            }
        }
        msg
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::new(Role::User, text)],
            max_tokens: 100,
            temperature: 0.9,
            n: 1,
            stop: vec![],
            user: "tester".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let provider = TestCompletionProvider::default();
        provider
            .add_response(PresetResponse::with_deltas(["Hello, ", "world!"]));
        provider.add_response(PresetResponse::with_failure(
            ErrorKind::ContextLengthExceeded,
            "too long",
        ));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        assert_eq!(collect_response(resp).await, "Hello, world!");

        let err = provider.send_request(&request("More")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ContextLengthExceeded);

        let err = provider.send_request(&request("Again")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);

        let requests = provider.clone().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].messages[0].content, "More");
    }

    #[tokio::test]
    async fn test_moderation_rules() {
        let provider = TestModerationProvider::default();
        provider.add_rule("badword", [("hate", 0.9)]);

        let scores = provider
            .moderate(&ModerationRequest {
                input: "a badword here".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(scores.categories[0].category, "hate");

        let scores = provider
            .moderate(&ModerationRequest {
                input: "fine".to_owned(),
            })
            .await
            .unwrap();
        assert!(scores.categories.is_empty());

        provider.fail_with("classifier down");
        let err = provider
            .moderate(&ModerationRequest {
                input: "fine".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "classifier down");
        assert_eq!(provider.inputs().len(), 3);
    }
}

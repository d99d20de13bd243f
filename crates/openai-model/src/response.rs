use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use relay_model::{
    CompletionEvent, CompletionResponse, ErrorKind, FinishReason,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::ChatCompletionChunk;

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Cleared after the response returns the complete event.
    pending_finish_reason: Option<FinishReason>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<CompletionEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_finish_reason: None,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl CompletionResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<CompletionEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<CompletionEvent>, PartialState), Error> {
    let sse = &mut partial_state.sse;
    let mut text_delta = None;

    loop {
        let sse_event = match sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        // The trailing usage chunk has no choices.
        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            text_delta = Some(content);
        }
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.pending_finish_reason =
                Some(if finish_reason == "length" {
                    FinishReason::Length
                } else {
                    FinishReason::Stop
                });
        }

        if text_delta.is_some() || partial_state.pending_finish_reason.is_some()
        {
            break;
        }
    }

    // Always emit the text delta first, the finish reason may arrive in the
    // same chunk.
    if let Some(text_delta) = text_delta {
        let event = CompletionEvent::TextDelta(text_delta);
        return Ok((Some(event), partial_state));
    }

    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(CompletionEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    Ok((None, partial_state))
}

use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use relay_model::{
    CompletionEvent, CompletionProvider, CompletionRequest,
    CompletionResponse, FinishReason, ModerationProvider, ModerationRequest,
    ModerationScores, ProviderError,
};
use tracing::Instrument;

type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type SendRequestResult = Result<CompletionReply, Box<dyn ProviderError>>;
type ModerateResult = Result<ModerationScores, Box<dyn ProviderError>>;
type CompletionFn = Arc<
    dyn Fn(CompletionRequest) -> BoxedFuture<SendRequestResult> + Send + Sync,
>;
type ModerationFn =
    Arc<dyn Fn(ModerationRequest) -> BoxedFuture<ModerateResult> + Send + Sync>;

/// A wrapper around a completion provider that drains the streamed
/// response and provides a type-erased interface for the other modules.
#[derive(Clone)]
pub struct CompletionClient {
    handler_fn: CompletionFn,
}

impl CompletionClient {
    #[inline]
    pub fn new<P: CompletionProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since the relay doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: CompletionFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("completion req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and waits for the complete reply.
    #[inline]
    pub async fn send_request(
        &self,
        req: CompletionRequest,
    ) -> SendRequestResult {
        (self.handler_fn)(req).await
    }
}

/// A completely received reply from the completion client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionReply {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

async fn handle_response<P: CompletionProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("request rejected: {err}");
            return Err(Box::new(err));
        }
    };

    let mut text = String::new();
    let mut finish_reason = None;

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                error!("response stream broke: {err}");
                return Err(Box::new(err));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            CompletionEvent::TextDelta(delta) => text.push_str(&delta),
            CompletionEvent::Completed(reason) => finish_reason = Some(reason),
        }
    }

    Ok(CompletionReply {
        text,
        finish_reason,
    })
}

/// A type-erased wrapper around a moderation provider.
#[derive(Clone)]
pub struct ModerationClient {
    handler_fn: ModerationFn,
}

impl ModerationClient {
    #[inline]
    pub fn new<P: ModerationProvider + 'static>(provider: P) -> Self {
        let handler_fn: ModerationFn = Arc::new(move |req| {
            let fut = provider.moderate(&req);
            Box::pin(
                async move {
                    fut.await
                        .map_err(|err| Box::new(err) as Box<dyn ProviderError>)
                }
                .instrument(trace_span!("moderation req")),
            )
        });
        Self { handler_fn }
    }

    #[inline]
    pub async fn moderate(&self, input: String) -> ModerateResult {
        (self.handler_fn)(ModerationRequest { input }).await
    }
}

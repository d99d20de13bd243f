//! A completion and moderation provider for OpenAI-compatible APIs.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use mime::Mime;
use relay_model::{
    CompletionProvider, CompletionRequest, ErrorKind, ModerationProvider,
    ModerationRequest, ModerationScores, ProviderError,
};
use reqwest::{Client, Response, StatusCode, header};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use io::{Chunks, Sse};
use proto::{ErrorResponse, ModerationResponse};
use response::OpenAIResponse;

/// Error type for [`OpenAIProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// OpenAI-compatible provider, serving both chat completions and
/// moderations.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.config.endpoint(path))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::CONTENT_TYPE, "application/json")
    }
}

impl CompletionProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, &self.config);
        let resp_fut = self
            .post("/chat/completions")
            .header(header::ACCEPT, "text/event-stream")
            .json(&openai_req)
            .send();

        async move {
            let resp = check_status(resp_fut.await).await?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(OpenAIResponse::from_sse(sse))
        }
    }
}

impl ModerationProvider for OpenAIProvider {
    type Error = Error;

    fn moderate(
        &self,
        req: &ModerationRequest,
    ) -> impl Future<Output = Result<ModerationScores, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_moderation_request(req, &self.config);
        let resp_fut = self.post("/moderations").json(&openai_req).send();

        async move {
            let resp = check_status(resp_fut.await).await?;
            let body = resp
                .text()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            let mut parsed: ModerationResponse = serde_json::from_str(&body)
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            let Some(result) = parsed.results.pop() else {
                return Err(Error::new(
                    "moderation response has no results",
                    ErrorKind::Other,
                ));
            };
            Ok(ModerationScores::from_pairs(result.category_scores))
        }
    }
}

async fn check_status(
    resp: Result<Response, reqwest::Error>,
) -> Result<Response, Error> {
    let resp =
        resp.map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let err = classify_error(status, &body);
    debug!("request failed with {status}: {:?}", err.kind);
    Err(err)
}

fn classify_error(status: StatusCode, body: &str) -> Error {
    let Ok(ErrorResponse { error }) =
        serde_json::from_str::<ErrorResponse>(body)
    else {
        let kind = match status {
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
            StatusCode::BAD_REQUEST => ErrorKind::InvalidRequest,
            _ => ErrorKind::Other,
        };
        return Error::new(format!("HTTP {status}: {body}"), kind);
    };

    let kind = if error.code.as_deref() == Some("context_length_exceeded")
        || error.message.contains("maximum context length")
    {
        ErrorKind::ContextLengthExceeded
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorKind::RateLimitExceeded
    } else if error.r#type.as_deref() == Some("invalid_request_error")
        || status == StatusCode::BAD_REQUEST
    {
        ErrorKind::InvalidRequest
    } else {
        ErrorKind::Other
    };
    Error::new(error.message, kind)
}

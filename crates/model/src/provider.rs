use std::error::Error;

use crate::error::ErrorKind;
use crate::moderation::{ModerationRequest, ModerationScores};
use crate::request::CompletionRequest;
use crate::response::CompletionResponse;

/// The error type for a provider.
pub trait ProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that represents a completion provider, which is an entry for
/// sampling text from a model.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state, but callers should not rely on it,
/// and the provider should be prepared for being dropped anytime.
pub trait CompletionProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ProviderError;

    /// The response type for this provider.
    type Response: CompletionResponse<Error = Self::Error>;

    /// Sends a completion request to the model.
    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

/// A type that classifies text against a content policy.
///
/// The provider only reports raw scores. Deciding what is flagged or
/// blocked is up to the caller.
pub trait ModerationProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ProviderError;

    /// Classifies the input text.
    fn moderate(
        &self,
        req: &ModerationRequest,
    ) -> impl Future<Output = Result<ModerationScores, Self::Error>> + Send + 'static;
}

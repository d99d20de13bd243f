/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The prompt does not fit into the model's context window.
    ContextLengthExceeded,
    /// The provider rejected the request as malformed.
    InvalidRequest,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// Any other errors.
    Other,
}

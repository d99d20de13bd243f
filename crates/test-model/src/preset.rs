use relay_model::ErrorKind;

/// How the fake completion service answers one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PresetResponse {
    /// Streams the given text deltas, then completes.
    Reply(Vec<String>),
    /// Fails the request with an error of the given kind.
    Failure(ErrorKind, String),
}

impl PresetResponse {
    /// Creates a reply streamed as the given deltas.
    #[inline]
    pub fn with_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Reply(deltas.into_iter().map(Into::into).collect())
    }

    /// Creates a reply streamed word by word.
    pub fn with_text(text: &str) -> Self {
        let mut deltas: Vec<String> =
            text.split_inclusive(' ').map(ToOwned::to_owned).collect();
        if deltas.is_empty() {
            deltas.push(String::new());
        }
        Self::Reply(deltas)
    }

    /// Creates a failure of the given kind.
    #[inline]
    pub fn with_failure<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self::Failure(kind, message.into())
    }
}

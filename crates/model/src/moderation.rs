/// A request to classify a piece of text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModerationRequest {
    /// The text to classify.
    pub input: String,
}

/// The score of one moderation category.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryScore {
    /// Name of the category, e.g. `hate/threatening`.
    pub category: String,
    /// Confidence in `[0, 1]`.
    pub score: f64,
}

/// Per-category scores of a classified text.
///
/// The order of the categories is the order reported by the provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModerationScores {
    /// Category scores.
    pub categories: Vec<CategoryScore>,
}

impl ModerationScores {
    /// Creates scores from `(category, score)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let categories = pairs
            .into_iter()
            .map(|(category, score)| CategoryScore {
                category: category.into(),
                score,
            })
            .collect();
        Self { categories }
    }
}

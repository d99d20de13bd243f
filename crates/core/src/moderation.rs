//! Moderation gateway: turns classifier scores into flagged and blocked
//! summaries, and reports them to the audit channel.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display};

use relay_model::{ErrorKind, ModerationScores, ProviderError};

use crate::model_client::ModerationClient;
use crate::platform::{AuditLog, PlatformError};

/// Categories without a configured threshold never trip.
const DEFAULT_THRESHOLD: f64 = 1.0;

// (category, blocked above, flagged above)
const DEFAULT_THRESHOLDS: &[(&str, f64, f64)] = &[
    ("harassment", 0.5, 0.5),
    ("harassment/threatening", 0.1, 0.1),
    ("hate", 0.5, 0.4),
    ("hate/threatening", 0.1, 0.05),
    ("self-harm", 0.2, 0.1),
    ("self-harm/instructions", 0.5, 0.5),
    ("self-harm/intent", 0.7, 0.7),
    ("sexual", 0.5, 0.3),
    ("sexual/minors", 0.2, 0.1),
    ("violence", 0.7, 0.1),
    ("violence/graphic", 0.8, 0.1),
];

/// Per-category score limits. A score strictly above a limit trips it.
#[derive(Clone, Debug, PartialEq)]
pub struct ModerationThresholds {
    blocked: HashMap<String, f64>,
    flagged: HashMap<String, f64>,
}

impl ModerationThresholds {
    /// Creates thresholds with no categories; nothing is ever flagged.
    #[inline]
    pub fn empty() -> Self {
        Self {
            blocked: HashMap::new(),
            flagged: HashMap::new(),
        }
    }

    /// Sets the limits of one category.
    #[inline]
    pub fn with_category<S: Into<String>>(
        mut self,
        category: S,
        blocked: f64,
        flagged: f64,
    ) -> Self {
        let category = category.into();
        self.blocked.insert(category.clone(), blocked);
        self.flagged.insert(category, flagged);
        self
    }

    /// Summarizes classifier scores into a verdict.
    ///
    /// Categories are visited in the order the classifier reported them,
    /// and the scan stops at the first blocked category.
    pub fn evaluate(&self, scores: &ModerationScores, user: &str) -> Verdict {
        let mut verdict = Verdict::default();
        for item in &scores.categories {
            let category = item.category.as_str();
            let limit = |table: &HashMap<String, f64>| {
                table.get(category).copied().unwrap_or(DEFAULT_THRESHOLD)
            };
            if item.score > limit(&self.blocked) {
                info!("blocked {user} {category} {}", item.score);
                verdict.blocked.push_str(&format!("({category}) "));
                break;
            }
            if item.score > limit(&self.flagged) {
                info!("flagged {user} {category} {}", item.score);
                verdict.flagged.push_str(&format!("({category}) "));
            }
        }
        verdict
    }
}

impl Default for ModerationThresholds {
    fn default() -> Self {
        DEFAULT_THRESHOLDS.iter().fold(
            Self::empty(),
            |thresholds, &(category, blocked, flagged)| {
                thresholds.with_category(category, blocked, flagged)
            },
        )
    }
}

/// The outcome of moderating one text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Verdict {
    /// Categories over the soft limit, as `"(category) "` items.
    pub flagged: String,
    /// Categories over the hard limit, as `"(category) "` items.
    pub blocked: String,
}

impl Verdict {
    /// Returns `true` if the content must be suppressed.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    /// Returns `true` if the content may proceed but must be audited.
    #[inline]
    pub fn is_flagged(&self) -> bool {
        !self.flagged.is_empty()
    }
}

/// The moderation classifier could not be consulted.
#[derive(Debug)]
pub struct ModerationError {
    message: String,
    kind: ErrorKind,
}

impl ModerationError {
    /// Returns the kind of the underlying provider error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<Box<dyn ProviderError>> for ModerationError {
    fn from(err: Box<dyn ProviderError>) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
        }
    }
}

impl Display for ModerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "moderation unavailable: {}", self.message)
    }
}

impl StdError for ModerationError {}

/// Wraps the classifier together with the threshold policy.
#[derive(Clone)]
pub(crate) struct ModerationGateway {
    client: ModerationClient,
    thresholds: ModerationThresholds,
}

impl ModerationGateway {
    #[inline]
    pub fn new(
        client: ModerationClient,
        thresholds: ModerationThresholds,
    ) -> Self {
        Self { client, thresholds }
    }

    pub async fn moderate_message(
        &self,
        text: &str,
        user: &str,
    ) -> Result<Verdict, ModerationError> {
        let scores = self.client.moderate(text.to_owned()).await?;
        Ok(self.thresholds.evaluate(&scores, user))
    }
}

/// Reports blocked content to the audit channel, if there is one and the
/// summary is not empty.
pub async fn send_blocked_notice(
    audit: Option<&dyn AuditLog>,
    user: &str,
    blocked: &str,
    text: Option<&str>,
) -> Result<(), PlatformError> {
    let Some(audit) = audit else {
        return Ok(());
    };
    if blocked.is_empty() {
        return Ok(());
    }
    let text = text.map_or_else(|| "None".to_owned(), |t| truncate(t, 500));
    audit.post(&format!("❌ {user} - {blocked} - {text}")).await
}

/// Reports flagged content to the audit channel, if there is one and the
/// summary is not empty.
pub async fn send_flagged_notice(
    audit: Option<&dyn AuditLog>,
    user: &str,
    flagged: &str,
    text: Option<&str>,
    url: Option<&str>,
) -> Result<(), PlatformError> {
    let Some(audit) = audit else {
        return Ok(());
    };
    if flagged.is_empty() {
        return Ok(());
    }
    let text = text.map_or_else(|| "None".to_owned(), |t| truncate(t, 100));
    let url = url.unwrap_or("no url");
    audit
        .post(&format!("⚠️ {user} - {flagged} - {text} - {url}"))
        .await
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use relay_test_model::TestModerationProvider;

    use super::*;
    use crate::testing::RecordingAudit;

    fn scores(pairs: &[(&'static str, f64)]) -> ModerationScores {
        ModerationScores::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_clean_text() {
        let verdict = ModerationThresholds::default()
            .evaluate(&scores(&[("hate", 0.01), ("violence", 0.05)]), "alice");
        assert_eq!(verdict, Verdict::default());
        assert!(!verdict.is_flagged());
        assert!(!verdict.is_blocked());
    }

    #[test]
    fn test_flagged_categories_accumulate() {
        let verdict = ModerationThresholds::default().evaluate(
            &scores(&[("hate", 0.45), ("sexual", 0.2), ("violence", 0.3)]),
            "alice",
        );
        assert_eq!(verdict.flagged, "(hate) (violence) ");
        assert!(verdict.blocked.is_empty());
    }

    #[test]
    fn test_scan_stops_at_first_blocked() {
        let verdict = ModerationThresholds::default().evaluate(
            &scores(&[
                ("harassment", 0.6),
                ("hate", 0.45),
                ("violence", 0.9),
            ]),
            "alice",
        );
        assert_eq!(verdict.blocked, "(harassment) ");
        assert!(verdict.flagged.is_empty());
    }

    #[test]
    fn test_flags_before_block_are_kept() {
        let verdict = ModerationThresholds::default().evaluate(
            &scores(&[("hate", 0.45), ("violence", 0.75)]),
            "alice",
        );
        assert_eq!(verdict.flagged, "(hate) ");
        assert_eq!(verdict.blocked, "(violence) ");
    }

    #[test]
    fn test_unknown_category_never_trips() {
        let verdict = ModerationThresholds::default()
            .evaluate(&scores(&[("illicit", 0.99)]), "alice");
        assert_eq!(verdict, Verdict::default());
    }

    #[tokio::test]
    async fn test_gateway_propagates_classifier_failure() {
        let provider = TestModerationProvider::default();
        provider.fail_with("503 from classifier");
        let gateway = ModerationGateway::new(
            ModerationClient::new(provider),
            ModerationThresholds::default(),
        );
        let err = gateway.moderate_message("hello", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("503 from classifier"));
    }

    #[tokio::test]
    async fn test_audit_notices() {
        let recorder = RecordingAudit::default();
        let audit: &dyn AuditLog = &recorder;
        let long_text = "x".repeat(600);

        let text = Some(long_text.as_str());
        send_blocked_notice(Some(audit), "alice", "(hate) ", text)
            .await
            .unwrap();
        let text = Some("hit");
        send_flagged_notice(Some(audit), "bob", "(violence) ", text, None)
            .await
            .unwrap();
        // Nothing to report.
        send_flagged_notice(Some(audit), "bob", "", Some("hit"), None)
            .await
            .unwrap();
        send_blocked_notice(None, "alice", "(hate) ", Some("x"))
            .await
            .unwrap();

        let posts = recorder.posts();
        assert_eq!(posts.len(), 2);
        let tail = "x".repeat(500);
        assert_eq!(posts[0], format!("❌ alice - (hate)  - {tail}"));
        assert_eq!(posts[1], "⚠️ bob - (violence)  - hit - no url");
    }
}

//! Network error classification.

use regex::RegexSet;

use crate::error::QueueError;

const NETWORK_PATTERNS: &[&str] = &[
    r"(?i)\bnetwork\b",
    r"(?i)\boffline\b",
    r"(?i)\btimed?\s*-?out\b",
    r"(?i)\bconnection\s+(refused|reset|closed|aborted|lost)\b",
    r"(?i)\b(econnrefused|econnreset|enotfound|etimedout|ehostunreach|enetunreach)\b",
    r"(?i)\bfailed to fetch\b",
    r"(?i)\bdns\b",
    r"(?i)\b(host|network) (is )?unreachable\b",
    r"(?i)\bsocket hang up\b",
    r"(?i)\bservice unavailable\b|\b50[234]\b",
];

/// Decides whether a failure message describes a connectivity problem.
#[derive(Debug, Clone)]
pub struct NetworkClassifier {
    patterns: RegexSet,
}

impl NetworkClassifier {
    /// Classifier with the built-in patterns.
    pub fn new() -> Result<Self, QueueError> {
        Self::with_patterns(NETWORK_PATTERNS.iter().copied())
    }

    pub fn with_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, QueueError> {
        let patterns = RegexSet::new(patterns).map_err(|e| QueueError::Pattern(e.to_string()))?;
        Ok(Self { patterns })
    }

    pub fn is_network_error(&self, message: &str) -> bool {
        self.patterns.is_match(message)
    }
}

//! Error classification: matching extracted text against a profile's error
//! pattern list and deciding whether the platform is throttling or failing.

use tracing::{debug, instrument};

/// Substrings that mark a matched pattern as throttling rather than a generic
/// platform failure. The distinction is a heuristic over pattern wording, not
/// a formal rule; it is kept as one replaceable list and tested directly.
const THROTTLE_TERMS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "rate limited",
    "too many",
    "try again",
    "retry",
    "limit reached",
    "limit exceeded",
    "quota",
    "capacity",
    "slow down",
    "cooldown",
    "later",
];

/// Outcome of classifying one extracted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ok,
    /// The platform is throttling; the controller backs off and retries.
    RateLimited { pattern: String },
    /// Generic platform-side failure; counted toward the abort threshold.
    PlatformError { pattern: String },
}

/// Matches responses against one platform's error patterns. Pure and
/// idempotent: the same text always classifies the same way.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Case-insensitive substring match, first pattern wins.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn classify(&self, text: &str) -> Classification {
        let haystack = text.to_lowercase();
        for pattern in &self.patterns {
            if haystack.contains(&pattern.to_lowercase()) {
                let classification = if indicates_throttling(pattern) {
                    Classification::RateLimited {
                        pattern: pattern.clone(),
                    }
                } else {
                    Classification::PlatformError {
                        pattern: pattern.clone(),
                    }
                };
                debug!(%pattern, ?classification, "error pattern matched");
                return classification;
            }
        }
        Classification::Ok
    }
}

fn indicates_throttling(pattern: &str) -> bool {
    let lowered = pattern.to_lowercase();
    THROTTLE_TERMS.iter().any(|term| lowered.contains(term))
}

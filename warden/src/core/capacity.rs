//! Classification of external-tool failures that signal temporary capacity exhaustion.

use anyhow::{Context, Result};
use regex::RegexSet;

/// Phrases the tool prints when the selected model is out of capacity or quota.
pub const DEFAULT_CAPACITY_SIGNATURES: &[&str] = &[
    "resource exhausted",
    "resource_exhausted",
    "capacity exhausted",
    "exhausted your capacity",
    "no capacity available",
    "rate limit",
    "ratelimit",
    "rate-limited",
    "quota exceeded",
    "exceeded your current quota",
    "too many requests",
];

/// Case-insensitive substring matcher over a fixed set of phrases.
#[derive(Debug, Clone)]
pub struct CapacityClassifier {
    set: RegexSet,
}

impl CapacityClassifier {
    pub fn new<S: AsRef<str>>(signatures: &[S]) -> Result<Self> {
        let patterns: Vec<String> = signatures
            .iter()
            .map(|signature| signature.as_ref().trim())
            .filter(|signature| !signature.is_empty())
            .map(|signature| format!("(?i){}", regex::escape(signature)))
            .collect();
        let set = RegexSet::new(&patterns).context("compile capacity signatures")?;
        Ok(Self { set })
    }

    /// Classifier over [`DEFAULT_CAPACITY_SIGNATURES`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_CAPACITY_SIGNATURES)
    }

    pub fn is_capacity_error(&self, text: &str) -> bool {
        self.set.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_phrases_case_insensitively() {
        let classifier = CapacityClassifier::with_defaults().expect("defaults compile");
        assert!(classifier.is_capacity_error(
            "Error: 429 RESOURCE_EXHAUSTED: You have exhausted your capacity on this model"
        ));
        assert!(classifier.is_capacity_error("Rate Limit reached for requests"));
        assert!(classifier.is_capacity_error("Quota exceeded for metric"));
    }

    #[test]
    fn every_default_signature_is_recognized() {
        let classifier = CapacityClassifier::with_defaults().expect("defaults compile");
        for signature in DEFAULT_CAPACITY_SIGNATURES {
            assert!(
                classifier.is_capacity_error(&signature.to_uppercase()),
                "{signature}"
            );
        }
    }

    #[test]
    fn ignores_unrelated_failures() {
        let classifier = CapacityClassifier::with_defaults().expect("defaults compile");
        assert!(!classifier.is_capacity_error("Error: invalid API key"));
        assert!(!classifier.is_capacity_error(""));
    }

    #[test]
    fn custom_signatures_are_literal() {
        let classifier = CapacityClassifier::new(&["model (overloaded)", "  "]).expect("compile");
        assert!(classifier.is_capacity_error("the MODEL (OVERLOADED) right now"));
        assert!(!classifier.is_capacity_error("model overloaded"));
    }

    #[test]
    fn empty_signature_list_never_matches() {
        let classifier = CapacityClassifier::new::<&str>(&[]).expect("compile");
        assert!(!classifier.is_capacity_error("resource exhausted"));
    }
}

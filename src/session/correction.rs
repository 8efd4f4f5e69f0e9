//! Phrase matching over transcripts.
//!
//! Patterns come from configuration; they are language-specific data, not
//! logic. Matching is case-insensitive and Unicode-aware.

use regex::{RegexSet, RegexSetBuilder};

#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    set: RegexSet,
}

impl PhraseMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let set = RegexSetBuilder::new(patterns.iter().map(AsRef::as_ref))
            .case_insensitive(true)
            .build()?;
        Ok(Self { set })
    }

    pub fn is_match(&self, text: &str) -> bool {
        !text.trim().is_empty() && self.set.is_match(text)
    }

    /// Index of the first pattern that matches, for logging.
    pub fn first_match(&self, text: &str) -> Option<usize> {
        self.set.matches(text).iter().next()
    }
}

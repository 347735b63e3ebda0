//! Thin boundary over the `regex` crate. Nothing in this crate's core
//! subsystems needs pattern matching internally; this module exists so that
//! callers who do want it (request routing, log filters) go through one
//! narrow, swappable seam instead of pulling `regex` in piecemeal.

use regex::Regex;
use std::fmt;

#[derive(Debug)]
pub struct PatternError(regex::Error);

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pattern: {}", self.0)
    }
}

impl std::error::Error for PatternError {}

/// A compiled pattern. Construction is the only place `regex::Error` can
/// surface; matching itself never fails.
pub struct Matcher {
    re: Regex,
}

impl Matcher {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Regex::new(pattern).map(|re| Matcher { re }).map_err(PatternError)
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }

    pub fn find<'h>(&self, haystack: &'h str) -> Option<&'h str> {
        self.re.find(haystack).map(|m| m.as_str())
    }

    pub fn captures<'h>(&self, haystack: &'h str) -> Option<Vec<Option<&'h str>>> {
        self.re
            .captures(haystack)
            .map(|caps| caps.iter().map(|m| m.map(|m| m.as_str())).collect())
    }
}

use std::fmt;

/// Locates the spans a replacement rule rewrites.
///
/// Only literal matching ships today; a structural matcher can slot in here
/// without touching [`crate::patch::TextReplacer`] call sites.
pub trait Matcher: fmt::Debug {
    /// Non-overlapping `(start, end)` byte spans, left to right.
    fn find_all(&self, haystack: &str) -> Vec<(usize, usize)>;

    /// Human-readable form for logs and reports.
    fn describe(&self) -> String;
}

/// Exact substring match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal(pub String);

impl Literal {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Matcher for Literal {
    fn find_all(&self, haystack: &str) -> Vec<(usize, usize)> {
        // Empty needle would match between every char
        if self.0.is_empty() {
            return Vec::new();
        }
        haystack
            .match_indices(self.0.as_str())
            .map(|(start, m)| (start, start + m.len()))
            .collect()
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }
}

use crate::patch::matcher::{Literal, Matcher};
use crate::patch::Transform;
use tracing::trace;

/// One `search → replacement` pair.
#[derive(Debug)]
pub struct ReplacementRule {
    pub matcher: Box<dyn Matcher>,
    /// May span several lines.
    pub replacement: String,
}

impl ReplacementRule {
    pub fn new(matcher: impl Matcher + 'static, replacement: impl Into<String>) -> Self {
        Self {
            matcher: Box::new(matcher),
            replacement: replacement.into(),
        }
    }

    pub fn literal(search: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::new(Literal::new(search), replacement)
    }

    /// Replace every match in `line`. Returns `None` when nothing matched.
    pub fn apply(&self, line: &str) -> Option<String> {
        let spans = self.matcher.find_all(line);
        if spans.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(line.len() + self.replacement.len() * spans.len());
        let mut last = 0;
        for (start, end) in spans {
            out.push_str(&line[last..start]);
            out.push_str(&self.replacement);
            last = end;
        }
        out.push_str(&line[last..]);
        Some(out)
    }
}

/// Applies every rule, in declared order, to every line.
///
/// Rules are independent: a later rule sees the output of an earlier one on
/// the same line. A rule that never matches is silently ignored.
#[derive(Debug, Default)]
pub struct TextReplacer {
    rules: Vec<ReplacementRule>,
    hits: usize,
}

impl TextReplacer {
    pub fn new(rules: Vec<ReplacementRule>) -> Self {
        Self { rules, hits: 0 }
    }

    /// Build from literal `(search, replacement)` pairs.
    pub fn literal<S, R>(pairs: impl IntoIterator<Item = (S, R)>) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(search, replacement)| ReplacementRule::literal(search, replacement))
                .collect(),
        )
    }

    pub fn push(&mut self, rule: ReplacementRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ReplacementRule] {
        &self.rules
    }

    /// Number of lines rewritten by any rule so far.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

impl Transform for TextReplacer {
    fn apply_line(&mut self, line: &str, out: &mut String) {
        let mut current: Option<String> = None;
        for rule in &self.rules {
            let source = current.as_deref().unwrap_or(line);
            if let Some(replaced) = rule.apply(source) {
                trace!(pattern = %rule.matcher.describe(), "replacement matched");
                current = Some(replaced);
            }
        }
        match current {
            Some(replaced) => {
                self.hits += 1;
                out.push_str(&replaced);
            }
            None => out.push_str(line),
        }
    }
}

use crate::patch::Transform;

/// Lines to append after an anchor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionRule {
    /// Compared against each line after trimming both sides.
    pub anchor: String,
    /// Written verbatim, one per line.
    pub lines: Vec<String>,
}

impl InsertionRule {
    pub fn new<L: Into<String>>(anchor: impl Into<String>, lines: impl IntoIterator<Item = L>) -> Self {
        Self {
            anchor: anchor.into(),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

/// Inserts a block after the first line matching the anchor. Later
/// occurrences of the anchor are left alone; a missing anchor leaves the file
/// untouched.
#[derive(Debug, Clone)]
pub struct LineInserter {
    rule: InsertionRule,
    inserted: bool,
}

impl LineInserter {
    pub fn new(rule: InsertionRule) -> Self {
        Self {
            rule,
            inserted: false,
        }
    }

    pub fn rule(&self) -> &InsertionRule {
        &self.rule
    }

    /// Whether the anchor was found during the last run.
    pub fn inserted(&self) -> bool {
        self.inserted
    }
}

impl Transform for LineInserter {
    fn apply_line(&mut self, line: &str, out: &mut String) {
        out.push_str(line);
        if self.inserted || line.trim() != self.rule.anchor.trim() {
            return;
        }

        // Anchor on a final unterminated line still needs its own line break
        if !line.ends_with('\n') {
            out.push('\n');
        }
        for extra in &self.rule.lines {
            out.push_str(extra);
            out.push('\n');
        }
        self.inserted = true;
    }

    fn run(&mut self, input: &str) -> String {
        self.inserted = false;
        let mut out = String::with_capacity(input.len());
        for line in input.split_inclusive('\n') {
            self.apply_line(line, &mut out);
        }
        out
    }
}

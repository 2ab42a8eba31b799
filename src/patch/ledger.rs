use std::fmt;
use std::path::{Path, PathBuf};

/// What happened when a file was offered to the patch store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked for applied/already-applied"]
pub enum PatchOutcome {
    /// Backup taken and the file rewritten. `changed` is false when no rule
    /// matched and the rewrite reproduced the original bytes.
    Applied { changed: bool },
    /// A backup (or an earlier ledger entry) marks the file as done.
    AlreadyApplied,
}

impl PatchOutcome {
    /// Whether this attempt mutated the tree.
    pub fn modified_tree(self) -> bool {
        matches!(self, PatchOutcome::Applied { .. })
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied { changed: true } => write!(f, "applied"),
            PatchOutcome::Applied { changed: false } => write!(f, "applied (no pattern matched)"),
            PatchOutcome::AlreadyApplied => write!(f, "already applied"),
        }
    }
}

/// One file the pipeline tried to patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub path: PathBuf,
    pub backup: PathBuf,
    pub applied: bool,
    pub outcome: PatchOutcome,
}

/// Completion record for a pipeline run.
///
/// Every attempt is recorded in order, so a rerun can be compared against the
/// first run without inspecting the filesystem.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<PatchTarget>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: &Path, backup: &Path, outcome: PatchOutcome) {
        self.entries.push(PatchTarget {
            path: path.to_path_buf(),
            backup: backup.to_path_buf(),
            applied: true,
            outcome,
        });
    }

    pub fn is_patched(&self, path: &Path) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.applied && entry.path == path)
    }

    pub fn entries(&self) -> &[PatchTarget] {
        &self.entries
    }

    /// Files rewritten (backup taken) in this run.
    pub fn modified(&self) -> impl Iterator<Item = &PatchTarget> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.modified_tree())
    }

    pub fn modified_count(&self) -> usize {
        self.modified().count()
    }

    pub fn already_applied_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == PatchOutcome::AlreadyApplied)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

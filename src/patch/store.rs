use crate::patch::errors::PatchError;
use crate::patch::ledger::{Ledger, PatchOutcome};
use crate::patch::Transform;
use crate::store::FileStore;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

/// Applies transforms at most once per file.
///
/// The first application reads and transforms `<path>`, renames it to
/// `<path><suffix>` and writes the transformed text back to `<path>`. A read
/// or write failure leaves `<path>` holding its original contents and no
/// backup behind, so the next run tries again. Any later attempt sees the backup and
/// returns [`PatchOutcome::AlreadyApplied`] without reading the file, so a
/// transform is never applied to its own output.
#[derive(Debug)]
pub struct PatchStore<S: FileStore> {
    store: S,
    suffix: String,
    ledger: Ledger,
}

impl<S: FileStore> PatchStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_suffix(store, DEFAULT_BACKUP_SUFFIX)
    }

    pub fn with_suffix(store: S, suffix: impl Into<String>) -> Self {
        Self {
            store,
            suffix: suffix.into(),
            ledger: Ledger::new(),
        }
    }

    /// `<path>` + suffix.
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    pub fn is_patched(&self, path: &Path) -> bool {
        self.ledger.is_patched(path) || self.store.exists(&self.backup_path(path))
    }

    /// Rewrite `path` through `transform` unless it was patched before.
    pub fn apply<T: Transform + ?Sized>(
        &mut self,
        path: &Path,
        transform: &mut T,
    ) -> Result<PatchOutcome, PatchError> {
        let backup = self.backup_path(path);

        if self.is_patched(path) {
            debug!(path = %path.display(), "backup present, skipping");
            self.ledger
                .record(path, &backup, PatchOutcome::AlreadyApplied);
            return Ok(PatchOutcome::AlreadyApplied);
        }

        if !self.store.exists(path) {
            return Err(PatchError::FileMissing {
                path: path.to_path_buf(),
            });
        }

        // Nothing moves until the new text exists; a failed read leaves the
        // tree as it was
        let original = self
            .store
            .read_to_string(path)
            .map_err(|e| PatchError::io(path, e))?;
        let patched = transform.run(&original);
        let changed = patched != original;

        self.store
            .rename(path, &backup)
            .map_err(|e| PatchError::io(path, e))?;
        if let Err(e) = self.store.write(path, &patched) {
            // A backup must never outlive its original
            if let Err(restore) = self.store.rename(&backup, path) {
                warn!(path = %path.display(), error = %restore, "failed to restore original");
            }
            return Err(PatchError::io(path, e));
        }

        if !changed {
            debug!(path = %path.display(), "no pattern matched");
        } else {
            debug!(path = %path.display(), "patched");
        }

        let outcome = PatchOutcome::Applied { changed };
        self.ledger.record(path, &backup, outcome);
        Ok(outcome)
    }

    /// Write a generated file unless one already exists at `path`.
    ///
    /// The file itself is the completion marker, so it is recorded with
    /// `path` as its own backup.
    pub fn ensure_file(&mut self, path: &Path, contents: &str) -> Result<PatchOutcome, PatchError> {
        if self.store.exists(path) {
            debug!(path = %path.display(), "generated file present, skipping");
            self.ledger.record(path, path, PatchOutcome::AlreadyApplied);
            return Ok(PatchOutcome::AlreadyApplied);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !self.store.exists(parent) {
                self.store
                    .create_dir_all(parent)
                    .map_err(|e| PatchError::io(parent, e))?;
            }
        }
        self.store
            .write(path, contents)
            .map_err(|e| PatchError::io(path, e))?;

        let outcome = PatchOutcome::Applied { changed: true };
        self.ledger.record(path, path, outcome);
        Ok(outcome)
    }

    /// Restore the executable bit on a rewritten script.
    pub fn mark_executable(&mut self, path: &Path) -> Result<(), PatchError> {
        if !self.store.exists(path) {
            return Err(PatchError::FileMissing {
                path: path.to_path_buf(),
            });
        }
        self.store
            .set_executable(path)
            .map_err(|e| PatchError::io(path, e))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Hand the ledger for this run to the caller and start a fresh one.
    pub fn take_ledger(&mut self) -> Ledger {
        std::mem::take(&mut self.ledger)
    }

    pub fn into_inner(self) -> (S, Ledger) {
        (self.store, self.ledger)
    }
}

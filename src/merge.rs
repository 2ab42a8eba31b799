//! Backfill files from a donor tree without disturbing the fork.

use crate::store::FileStore;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("donor tree does not exist: {0}")]
    DonorMissing(PathBuf),

    #[error("I/O failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Destination paths of files copied from the donor.
    pub copied: Vec<PathBuf>,
    /// Donor files whose destination already existed.
    pub skipped: usize,
    pub dirs_created: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.copied.is_empty() && self.dirs_created == 0
    }
}

/// Copies every donor file that has no counterpart in the target.
#[derive(Debug, Clone)]
pub struct TreeMerger {
    donor: PathBuf,
    target: PathBuf,
}

impl TreeMerger {
    pub fn new(donor: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            donor: donor.into(),
            target: target.into(),
        }
    }

    pub fn donor(&self) -> &Path {
        &self.donor
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn merge<S: FileStore>(&self, store: &mut S) -> Result<MergeReport, MergeError> {
        if !store.is_dir(&self.donor) {
            return Err(MergeError::DonorMissing(self.donor.clone()));
        }

        let mut report = MergeReport::default();

        if !store.exists(&self.target) {
            store
                .create_dir_all(&self.target)
                .map_err(|source| MergeError::IoFailure {
                    path: self.target.clone(),
                    source,
                })?;
            report.dirs_created += 1;
        }

        let entries = store
            .walk(&self.donor)
            .map_err(|source| MergeError::IoFailure {
                path: self.donor.clone(),
                source,
            })?;

        for entry in entries {
            let from = self.donor.join(&entry.relative);
            let to = self.target.join(&entry.relative);

            if entry.is_dir {
                if !store.exists(&to) {
                    store
                        .create_dir_all(&to)
                        .map_err(|source| MergeError::IoFailure {
                            path: to.clone(),
                            source,
                        })?;
                    report.dirs_created += 1;
                }
                continue;
            }

            if store.exists(&to) {
                report.skipped += 1;
                continue;
            }

            debug!(file = %entry.relative.display(), "backfilling from donor");
            store
                .copy_file(&from, &to)
                .map_err(|source| MergeError::IoFailure {
                    path: to.clone(),
                    source,
                })?;
            report.copied.push(to);
        }

        info!(
            copied = report.copied.len(),
            skipped = report.skipped,
            dirs = report.dirs_created,
            "donor merge finished"
        );
        Ok(report)
    }
}

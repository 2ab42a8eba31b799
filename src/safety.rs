use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Keeps patch targets inside the fork and out of the donor tree.
///
/// Checks are lexical: paths are normalized without touching the filesystem,
/// so a guard can validate targets that do not exist yet (generated headers)
/// and works the same over an in-memory store.
#[derive(Debug, Clone)]
pub struct TreeGuard {
    /// Normalized fork root
    fork_root: PathBuf,
    /// Normalized donor root; read-only
    donor_root: Option<PathBuf>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Path is outside the source tree: {path} (tree: {root})")]
    OutsideTree { path: PathBuf, root: PathBuf },

    #[error("Path is inside the read-only donor tree: {path} (donor: {donor})")]
    DonorTree { path: PathBuf, donor: PathBuf },
}

impl TreeGuard {
    pub fn new(fork_root: impl AsRef<Path>, donor_root: Option<&Path>) -> Self {
        Self {
            fork_root: normalize(fork_root.as_ref()),
            donor_root: donor_root.map(normalize),
        }
    }

    /// Check that `path` may be patched.
    ///
    /// Relative paths are resolved against the fork root. Returns the
    /// normalized path on success.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.fork_root.join(path)
        };
        let normalized = normalize(&joined);

        if !contains(&self.fork_root, &normalized) {
            return Err(SafetyError::OutsideTree {
                path: normalized,
                root: self.fork_root.clone(),
            });
        }

        if let Some(donor) = &self.donor_root {
            if contains(donor, &normalized) {
                return Err(SafetyError::DonorTree {
                    path: normalized,
                    donor: donor.clone(),
                });
            }
        }

        Ok(normalized)
    }

    pub fn fork_root(&self) -> &Path {
        &self.fork_root
    }

    pub fn donor_root(&self) -> Option<&Path> {
        self.donor_root.as_deref()
    }
}

fn contains(root: &Path, path: &Path) -> bool {
    if root == Path::new(".") {
        return path.is_relative()
            && !matches!(path.components().next(), Some(Component::ParentDir));
    }
    path.starts_with(root)
}

/// Resolve `.` and `..` components lexically.
///
/// A `..` that would climb above the start of a relative path is kept, so
/// `../x` never collapses into something that looks contained.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

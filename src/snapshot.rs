//! Content fingerprints of a tree, for checking that a rerun changed nothing.

use crate::store::FileStore;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// xxh3 of every file below a root, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeFingerprint {
    files: BTreeMap<PathBuf, u64>,
}

impl TreeFingerprint {
    pub fn capture<S: FileStore + ?Sized>(store: &S, root: &Path) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        for entry in store.walk(root)? {
            if entry.is_dir {
                continue;
            }
            let contents = store.read(&root.join(&entry.relative))?;
            files.insert(entry.relative, xxh3_64(&contents));
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative: &Path) -> Option<u64> {
        self.files.get(relative).copied()
    }

    /// One hash over all paths and contents.
    pub fn combined(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.files.len() * 24);
        for (path, hash) in &self.files {
            buf.extend_from_slice(path.to_string_lossy().as_bytes());
            buf.push(0);
            buf.extend_from_slice(&hash.to_le_bytes());
        }
        xxh3_64(&buf)
    }

    /// Paths added, removed or modified between `self` and `later`.
    pub fn changed_since<'a>(&'a self, later: &'a TreeFingerprint) -> Vec<&'a Path> {
        let mut changed: Vec<&Path> = later
            .files
            .iter()
            .filter(|(path, hash)| self.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.as_path())
            .collect();
        changed.extend(
            self.files
                .keys()
                .filter(|path| !later.files.contains_key(*path))
                .map(PathBuf::as_path),
        );
        changed.sort();
        changed
    }
}

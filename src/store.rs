//! Filesystem seam for the patch engine.
//!
//! Everything that mutates the fork goes through [`FileStore`]. [`FsStore`] is
//! the real implementation (atomic writes, metadata-preserving copies);
//! [`MemoryStore`] keeps a whole tree in memory so pipelines can be exercised
//! without touching disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A single entry produced by [`FileStore::walk`], relative to the walked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub relative: PathBuf,
    pub is_dir: bool,
}

pub trait FileStore {
    /// Whether anything (file or directory) exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Raw contents; binary files included.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.read_to_string(path).map(String::into_bytes)
    }

    /// Replace the contents of `path`, creating it if needed.
    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()>;

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy a file, preserving permissions and modification time.
    fn copy_file(&mut self, from: &Path, to: &Path) -> io::Result<()>;

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()>;

    fn set_executable(&mut self, path: &Path) -> io::Result<()>;

    /// Every entry below `root` (excluding `root` itself), parents before
    /// children, siblings in name order.
    fn walk(&self, root: &Path) -> io::Result<Vec<WalkEntry>>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

impl FileStore for FsStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        atomic_write(path, contents.as_bytes())?;

        // Touch so make's incremental rebuild picks the file up
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(path, now)
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        // fs::copy carries permission bits; timestamps need filetime
        fs::copy(from, to)?;
        let meta = fs::metadata(from)?;
        let atime = filetime::FileTime::from_last_access_time(&meta);
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        filetime::set_file_times(to, atime, mtime)
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn set_executable(&mut self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(path, perms)
    }

    #[cfg(not(unix))]
    fn set_executable(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn walk(&self, root: &Path) -> io::Result<Vec<WalkEntry>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
                .to_path_buf();
            entries.push(WalkEntry {
                relative,
                is_dir: entry.file_type().is_dir(),
            });
        }
        Ok(entries)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write lands or the previous contents stay in place.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    // Same directory keeps the rename on one filesystem
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemFile {
    contents: String,
    executable: bool,
}

/// An in-memory tree. Directories are implicit parents of files unless
/// created explicitly.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    files: BTreeMap<PathBuf, MemFile>,
    dirs: BTreeMap<PathBuf, ()>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without counting it as a write.
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let path = path.into();
        self.add_parents(&path);
        self.files.insert(
            path,
            MemFile {
                contents: contents.into(),
                executable: false,
            },
        );
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files
            .get(path.as_ref())
            .map(|file| file.contents.as_str())
    }

    pub fn is_executable(&self, path: impl AsRef<Path>) -> bool {
        self.files
            .get(path.as_ref())
            .is_some_and(|file| file.executable)
    }

    /// Number of mutating operations (write, rename, copy) performed so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files
            .iter()
            .map(|(path, file)| (path.as_path(), file.contents.as_str()))
    }

    /// Copy the text files below `root` out of `source`, keeping their paths.
    ///
    /// Files that are not valid UTF-8 are skipped. Returns the number copied.
    pub fn mirror<S: FileStore + ?Sized>(&mut self, source: &S, root: &Path) -> io::Result<usize> {
        let mut copied = 0;
        for entry in source.walk(root)? {
            let path = root.join(&entry.relative);
            if entry.is_dir {
                self.dirs.insert(path, ());
                continue;
            }
            match source.read_to_string(&path) {
                Ok(contents) => {
                    self.insert(path, contents);
                    copied += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(copied)
    }

    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf(), ());
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found in memory store", path.display()),
        )
    }
}

impl FileStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains_key(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.get(path)
            .map(str::to_owned)
            .ok_or_else(|| Self::not_found(path))
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        self.add_parents(path);
        let executable = self.is_executable(path);
        self.files.insert(
            path.to_path_buf(),
            MemFile {
                contents: contents.to_string(),
                executable,
            },
        );
        self.writes += 1;
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        let file = self.files.remove(from).ok_or_else(|| Self::not_found(from))?;
        self.add_parents(to);
        self.files.insert(to.to_path_buf(), file);
        self.writes += 1;
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        let file = self
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| Self::not_found(from))?;
        self.add_parents(to);
        self.files.insert(to.to_path_buf(), file);
        self.writes += 1;
        Ok(())
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        self.add_parents(path);
        self.dirs.insert(path.to_path_buf(), ());
        Ok(())
    }

    fn set_executable(&mut self, path: &Path) -> io::Result<()> {
        let file = self
            .files
            .get_mut(path)
            .ok_or_else(|| Self::not_found(path))?;
        file.executable = true;
        Ok(())
    }

    fn walk(&self, root: &Path) -> io::Result<Vec<WalkEntry>> {
        if !self.dirs.contains_key(root) {
            return Err(Self::not_found(root));
        }

        // BTreeMap ordering already places parents before children
        let dirs = self.dirs.keys().map(|path| (path, true));
        let files = self.files.keys().map(|path| (path, false));
        let mut entries: Vec<WalkEntry> = dirs
            .chain(files)
            .filter_map(|(path, is_dir)| {
                let relative = path.strip_prefix(root).ok()?;
                if relative.as_os_str().is_empty() {
                    return None;
                }
                Some(WalkEntry {
                    relative: relative.to_path_buf(),
                    is_dir,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(entries)
    }
}

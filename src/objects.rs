//! Give QEMU's per-target object files distinct base names.
//!
//! Every `<target>-softmmu` directory compiles the same sources, so the
//! archive ends up with many members called `translate.o`. Emscripten's
//! linker keys archive members by base name, so each object is renamed to
//! `<stem>-<target>.o`.

use crate::store::FileStore;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Directories below `<target>-softmmu` searched for objects.
pub const MAX_OBJECT_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Renames `rename_objects` would perform, without touching the tree.
pub fn plan_renames<S: FileStore + ?Sized>(
    store: &S,
    qemu: &Path,
) -> io::Result<Vec<ObjectRename>> {
    let mut renames = Vec::new();
    for entry in store.walk(qemu)? {
        if entry.is_dir || entry.relative.extension() != Some(OsStr::new("o")) {
            continue;
        }

        let components: Vec<&str> = entry
            .relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        // <target>-softmmu/[dir/...]file.o
        if components.len() < 2 || components.len() > MAX_OBJECT_DEPTH + 1 {
            continue;
        }
        let Some(target) = components[0].strip_suffix("-softmmu") else {
            continue;
        };
        if target.is_empty()
            || !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            continue;
        }

        let Some(stem) = entry.relative.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let suffix = format!("-{target}");
        if stem.ends_with(&suffix) {
            debug!(object = %entry.relative.display(), "already renamed");
            continue;
        }

        let from = qemu.join(&entry.relative);
        let to = from.with_file_name(format!("{stem}{suffix}.o"));
        renames.push(ObjectRename { from, to });
    }
    Ok(renames)
}

pub fn rename_objects<S: FileStore + ?Sized>(
    store: &mut S,
    qemu: &Path,
) -> io::Result<Vec<ObjectRename>> {
    let renames = plan_renames(store, qemu)?;
    for rename in &renames {
        store.rename(&rename.from, &rename.to)?;
    }
    info!(count = renames.len(), "renamed QEMU objects");
    Ok(renames)
}

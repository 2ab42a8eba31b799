//! Turning configuration into per-file patch plans.
//!
//! Static patches come from the loaded recipe; the rest depend on the build
//! configuration and are generated here. Every transform aimed at the same
//! file ends up in one [`Chain`], since a file is only ever patched once.

use crate::adapter::AdapterGenerator;
use crate::config::{FeatureToggles, Operation, PatchDefinition};
use crate::patch::{Chain, InsertionRule, LineInserter, ReplacementRule, TextReplacer, Transform};
use std::path::{Path, PathBuf};

/// Program the Makefile hook invokes to rename QEMU objects.
pub const DEFAULT_HOOK_PROGRAM: &str = "unicorn-patcher";

/// Transforms for one file, applied together.
#[derive(Debug)]
pub struct PlannedPatch {
    /// Relative to the tree root.
    pub path: PathBuf,
    pub ids: Vec<String>,
    pub chain: Chain,
    pub executable: bool,
}

/// An ordered set of file patches; first mention of a file fixes its place.
#[derive(Debug, Default)]
pub struct PatchPlan {
    entries: Vec<PlannedPatch>,
}

impl PatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        path: impl AsRef<Path>,
        id: impl Into<String>,
        transform: impl Transform + 'static,
    ) {
        let path = path.as_ref();
        let entry = self.entry(path);
        entry.ids.push(id.into());
        entry.chain.push(Box::new(transform));
    }

    pub fn add_definition(&mut self, definition: &PatchDefinition) {
        let transform: Box<dyn Transform> = match &definition.operation {
            Operation::Replace { rules } => Box::new(TextReplacer::new(
                rules
                    .iter()
                    .map(|rule| ReplacementRule::literal(&rule.search, &rule.replace))
                    .collect(),
            )),
            Operation::Insert { anchor, lines } => Box::new(LineInserter::new(
                InsertionRule::new(anchor, lines.iter().cloned()),
            )),
        };
        let entry = self.entry(Path::new(&definition.file));
        entry.ids.push(definition.id.clone());
        entry.chain.push(transform);
        entry.executable |= definition.executable;
    }

    fn entry(&mut self, path: &Path) -> &mut PlannedPatch {
        let idx = match self.entries.iter().position(|e| e.path == path) {
            Some(idx) => idx,
            None => {
                self.entries.push(PlannedPatch {
                    path: path.to_path_buf(),
                    ids: Vec::new(),
                    chain: Chain::new(),
                    executable: false,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    pub fn entries(&self) -> &[PlannedPatch] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlannedPatch> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `config.mk` defaults rewritten from the feature toggles.
pub fn config_mk_rules(toggles: &FeatureToggles) -> TextReplacer {
    let yes_no = |on: bool| if on { "yes" } else { "no" };
    let mut rules = vec![
        ReplacementRule::literal(
            "UNICORN_DEBUG ?= yes",
            format!("UNICORN_DEBUG ?= {}", yes_no(toggles.debug)),
        ),
        ReplacementRule::literal(
            "UNICORN_SHARED ?= yes",
            format!("UNICORN_SHARED ?= {}", yes_no(toggles.shared)),
        ),
    ];
    if !toggles.archs.is_empty() {
        rules.push(ReplacementRule::literal(
            "UNICORN_ARCHS ?= x86 m68k arm aarch64 mips sparc",
            format!("UNICORN_ARCHS ?= {}", toggles.archs.join(" ")),
        ));
    }
    TextReplacer::new(rules)
}

/// Runs the object renamer right after the QEMU sub-build.
pub fn rename_hook_rule(program: &str, qemu_dir: &Path) -> TextReplacer {
    let target = "$(MAKE) -C qemu -j 4";
    TextReplacer::literal([(
        target.to_string(),
        format!("{target}\n\t@{program} rename-objects {}", qemu_dir.display()),
    )])
}

/// Rewrites pointing call emission at the trampolines, keyed by path
/// relative to the tree root.
pub fn adapter_plan(generator: &AdapterGenerator, qemu: &Path, plan: &mut PatchPlan) {
    for (path, rule) in generator.redirect_rules() {
        plan.add(qemu.join(path), "adapter-redirect", TextReplacer::new(vec![rule]));
    }
    for (path, rule) in generator.include_rules() {
        plan.add(qemu.join(path), "adapter-include", LineInserter::new(rule));
    }
}

/// QEMU target directory for a Unicorn architecture name.
pub fn target_dir(arch: &str) -> Option<&'static str> {
    match arch {
        "x86" => Some("target-i386"),
        "arm" | "aarch64" => Some("target-arm"),
        "m68k" => Some("target-m68k"),
        "mips" => Some("target-mips"),
        "sparc" => Some("target-sparc"),
        _ => None,
    }
}

/// Target directories for `archs` (empty: every known architecture),
/// deduplicated in order. The first unknown name is the error.
pub fn target_dirs(archs: &[String]) -> Result<Vec<&'static str>, String> {
    let archs: Vec<&str> = if archs.is_empty() {
        crate::config::KNOWN_ARCHS.to_vec()
    } else {
        archs.iter().map(String::as_str).collect()
    };
    let mut dirs = Vec::new();
    for arch in archs {
        let dir = target_dir(arch).ok_or_else(|| arch.to_string())?;
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    Ok(dirs)
}

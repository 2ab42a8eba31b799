use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Architectures Unicorn's `config.mk` knows about.
pub const KNOWN_ARCHS: &[&str] = &["x86", "m68k", "arm", "aarch64", "mips", "sparc"];

/// The ABI entry points embedding code binds against, in export order.
pub const DEFAULT_EXPORTS: &[&str] = &[
    "_uc_version",
    "_uc_arch_supported",
    "_uc_open",
    "_uc_close",
    "_uc_query",
    "_uc_errno",
    "_uc_strerror",
    "_uc_reg_write",
    "_uc_reg_read",
    "_uc_reg_write_batch",
    "_uc_reg_read_batch",
    "_uc_mem_write",
    "_uc_mem_read",
    "_uc_emu_start",
    "_uc_emu_stop",
    "_uc_hook_add",
    "_uc_hook_del",
    "_uc_mem_map",
    "_uc_mem_map_ptr",
    "_uc_mem_unmap",
    "_uc_mem_protect",
    "_uc_mem_regions",
];

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub toggles: FeatureToggles,
    #[serde(default)]
    pub emit: EmitConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.tree.backup_suffix.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "tree.backup_suffix",
            });
        }

        for arch in &self.toggles.archs {
            if !KNOWN_ARCHS.contains(&arch.as_str()) {
                issues.push(ValidationIssue::UnknownArch(arch.clone()));
            }
        }

        if let Some(name) = &self.toggles.module_name {
            if name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "toggles.module_name",
                });
            }
        }

        if self.emit.exports.is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "emit.exports",
            });
        }
        for export in &self.emit.exports {
            if !export.starts_with('_') || export.len() < 2 {
                issues.push(ValidationIssue::InvalidExport(export.clone()));
            }
        }

        if self.adapter.prefix.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "adapter.prefix",
            });
        }
        if self.adapter.transport_type.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "adapter.transport_type",
            });
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(patch.id.clone()));
            }

            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            } else if !is_tree_relative(Path::new(&patch.file)) {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: format!("file '{}' must be relative to the tree root", patch.file),
                });
            }

            match &patch.operation {
                Operation::Replace { rules } => {
                    if rules.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.rules",
                        });
                    }
                    if rules.iter().any(|rule| rule.search.is_empty()) {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.rules.search",
                        });
                    }
                }
                Operation::Insert { anchor, lines } => {
                    if anchor.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.anchor",
                        });
                    }
                    if lines.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.lines",
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Directory of the QEMU fork.
    pub fn qemu_dir(&self) -> PathBuf {
        self.tree.root.join(&self.tree.qemu)
    }

    /// `archs` if given, otherwise the configured set.
    pub fn effective_archs<'a>(&'a self, archs: &'a [String]) -> &'a [String] {
        if archs.is_empty() {
            &self.toggles.archs
        } else {
            archs
        }
    }
}

fn is_tree_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unicorn API versions (from `unicorn.h`) the patches were written for.
    #[serde(default)]
    pub version_range: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TreeConfig {
    /// Unicorn checkout.
    pub root: PathBuf,
    /// QEMU fork, relative to `root`.
    pub qemu: PathBuf,
    /// Upstream QEMU providing the TCI sources; read-only.
    pub donor: Option<PathBuf>,
    pub backup_suffix: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("unicorn"),
            qemu: PathBuf::from("qemu"),
            donor: Some(PathBuf::from("externals/qemu-2.2.1")),
            backup_suffix: crate::patch::DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureToggles {
    pub archs: Vec<String>,
    pub debug: bool,
    pub shared: bool,
    pub memory_growth: bool,
    pub pthreads: bool,
    pub optimize: String,
    pub module_name: Option<String>,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            archs: vec!["x86".to_string(), "arm".to_string()],
            debug: true,
            shared: false,
            memory_growth: true,
            pthreads: true,
            optimize: "-Os".to_string(),
            module_name: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EmitConfig {
    /// Static library produced by the native build, relative to the tree root.
    pub library: PathBuf,
    pub output: PathBuf,
    pub exports: Vec<String>,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from("libunicorn.a"),
            output: PathBuf::from("src/unicorn.out.js"),
            exports: DEFAULT_EXPORTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AdapterConfig {
    pub prefix: String,
    pub transport_type: String,
    /// Defaults to the transport type.
    pub return_type: Option<String>,
    pub header_name: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            prefix: crate::adapter::DEFAULT_PREFIX.to_string(),
            transport_type: crate::adapter::DEFAULT_TRANSPORT.to_string(),
            return_type: None,
            header_name: crate::adapter::DEFAULT_HEADER_NAME.to_string(),
        }
    }
}

impl AdapterConfig {
    pub fn generator(&self) -> crate::adapter::AdapterGenerator {
        crate::adapter::AdapterGenerator::new()
            .with_prefix(&self.prefix)
            .with_transport(&self.transport_type)
            .with_return_type(self.return_type.as_deref().unwrap_or(&self.transport_type))
            .with_header_name(&self.header_name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    /// Relative to the tree root.
    pub file: String,
    pub stage: PatchStage,
    pub operation: Operation,
    /// Re-apply the executable bit after rewriting.
    #[serde(default)]
    pub executable: bool,
    /// Inherited from the defining document's `[meta]` when absent.
    #[serde(default)]
    pub version_range: Option<String>,
}

/// Pipeline step a patch belongs to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum PatchStage {
    Interpreter,
    Adapters,
    Unaligned,
    Signals,
}

impl PatchStage {
    pub const ALL: [PatchStage; 4] = [
        PatchStage::Interpreter,
        PatchStage::Adapters,
        PatchStage::Unaligned,
        PatchStage::Signals,
    ];
}

impl fmt::Display for PatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchStage::Interpreter => "interpreter",
            PatchStage::Adapters => "adapters",
            PatchStage::Unaligned => "unaligned",
            PatchStage::Signals => "signals",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    /// Literal substitute-all, rules applied in declared order.
    Replace { rules: Vec<RuleSpec> },
    /// Lines appended after the first line equal to `anchor` (both trimmed).
    Insert { anchor: String, lines: Vec<String> },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
    DuplicateId(String),
    UnknownArch(String),
    InvalidExport(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid configuration: {message}"),
            },
            ValidationIssue::DuplicateId(id) => write!(f, "patch id '{id}' is defined twice"),
            ValidationIssue::UnknownArch(arch) => write!(
                f,
                "unknown architecture '{arch}' (expected one of: {})",
                KNOWN_ARCHS.join(", ")
            ),
            ValidationIssue::InvalidExport(name) => {
                write!(f, "export '{name}' must be a C symbol with a leading underscore")
            }
        }
    }
}

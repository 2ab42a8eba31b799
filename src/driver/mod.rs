//! The build pipeline.
//!
//! ```text
//! NotPatched -> InterpreterEnabled -> AdaptersInstalled -> UnalignedReadsFixed
//!            -> Patched -> Compiled -> Emitted
//! ```
//!
//! Each transition stops at the first error. Every file operation underneath
//! is idempotent, so recovery is rerunning the whole pipeline.

pub mod emit;
pub mod toolchain;

pub use emit::{compile_invocation, emit_invocation, exported_functions};
pub use toolchain::{
    check_host, run_checked, Invocation, ProcessRunner, RecordingRunner, ToolExit, ToolRunner,
    Toolchain,
};

use crate::adapter::{HelperLine, ScanError};
use crate::config::{
    matches_requirement, parse_api_version, BuildConfig, PatchStage, VersionError, API_HEADER,
};
use crate::merge::{MergeError, MergeReport, TreeMerger};
use crate::patch::{Ledger, PatchError, PatchOutcome, PatchStore};
use crate::recipes::{self, PatchPlan, DEFAULT_HOOK_PROGRAM};
use crate::safety::{SafetyError, TreeGuard};
use crate::store::FileStore;
use semver::Version;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    NotPatched,
    InterpreterEnabled,
    AdaptersInstalled,
    UnalignedReadsFixed,
    Patched,
    Compiled,
    Emitted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NotPatched => "not patched",
            Stage::InterpreterEnabled => "interpreter enabled",
            Stage::AdaptersInstalled => "adapters installed",
            Stage::UnalignedReadsFixed => "unaligned reads fixed",
            Stage::Patched => "patched",
            Stage::Compiled => "compiled",
            Stage::Emitted => "emitted",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("version gate failed: {0}")]
    Version(#[from] VersionError),

    #[error("{program} failed ({status})")]
    ExternalToolFailure { program: String, status: ToolExit },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported host platform\n{instructions}")]
    UnsupportedHostPlatform { instructions: String },

    #[error("cannot go from '{from}' to '{to}'")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("unknown architecture '{0}'")]
    UnknownArch(String),
}

/// How one planned file patch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStatus {
    Applied { changed: bool },
    AlreadyApplied,
    SkippedVersion { reason: String },
}

impl From<PatchOutcome> for PatchStatus {
    fn from(outcome: PatchOutcome) -> Self {
        match outcome {
            PatchOutcome::Applied { changed } => PatchStatus::Applied { changed },
            PatchOutcome::AlreadyApplied => PatchStatus::AlreadyApplied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub stage: PatchStage,
    /// Relative to the tree root.
    pub path: PathBuf,
    pub ids: Vec<String>,
    pub status: PatchStatus,
}

/// A trampoline header written (or found) for one QEMU target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub path: PathBuf,
    pub helpers: usize,
    pub outcome: PatchOutcome,
}

/// Everything a driver did, in order.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub api_version: Option<Version>,
    pub merge: Option<MergeReport>,
    pub patches: Vec<PatchRecord>,
    pub headers: Vec<HeaderRecord>,
    pub invocations: Vec<Invocation>,
}

impl BuildReport {
    /// Files rewritten or created in this run.
    pub fn modified_count(&self) -> usize {
        let patched = self
            .patches
            .iter()
            .filter(|r| matches!(r.status, PatchStatus::Applied { .. }))
            .count();
        let headers = self
            .headers
            .iter()
            .filter(|h| h.outcome.modified_tree())
            .count();
        let copied = self.merge.as_ref().map_or(0, |m| m.copied.len());
        patched + headers + copied
    }
}

/// Sequences patching, the native build and the JavaScript link.
pub struct BuildDriver<S: FileStore, R: ToolRunner> {
    config: BuildConfig,
    patches: PatchStore<S>,
    runner: R,
    guard: TreeGuard,
    toolchain: Option<Toolchain>,
    hook_program: String,
    /// Architectures this run targets; empty means the configured set.
    archs: Vec<String>,
    stage: Stage,
    report: BuildReport,
}

impl<S: FileStore, R: ToolRunner> BuildDriver<S, R> {
    pub fn new(config: BuildConfig, store: S, runner: R) -> Self {
        let guard = TreeGuard::new(&config.tree.root, config.tree.donor.as_deref());
        let patches = PatchStore::with_suffix(store, config.tree.backup_suffix.clone());
        Self {
            config,
            patches,
            runner,
            guard,
            toolchain: None,
            hook_program: DEFAULT_HOOK_PROGRAM.to_string(),
            archs: Vec::new(),
            stage: Stage::NotPatched,
            report: BuildReport::default(),
        }
    }

    /// Required by [`compile`](Self::compile), [`emit`](Self::emit) and
    /// [`run`](Self::run).
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Program the Makefile hook calls for `rename-objects`.
    pub fn with_hook_program(mut self, program: impl Into<String>) -> Self {
        self.hook_program = program.into();
        self
    }

    /// Narrow the run to `archs`. Trampoline headers are generated for the
    /// same set the native build compiles.
    pub fn select_archs(&mut self, archs: &[String]) -> Result<(), DriverError> {
        check_archs(archs)?;
        self.archs = archs.to_vec();
        Ok(())
    }

    /// Architectures the run targets after falling back to the configuration.
    pub fn archs(&self) -> &[String] {
        self.config.effective_archs(&self.archs)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn store(&self) -> &S {
        self.patches.store()
    }

    pub fn ledger(&self) -> &Ledger {
        self.patches.ledger()
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_parts(self) -> (S, R, BuildReport) {
        let (store, _) = self.patches.into_inner();
        (store, self.runner, self.report)
    }

    fn advance(&mut self, from: Stage, to: Stage) -> Result<(), DriverError> {
        if self.stage != from {
            return Err(DriverError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        Ok(())
    }

    fn root(&self) -> &Path {
        &self.config.tree.root
    }

    /// Backfill TCI from the donor, switch `configure` to the interpreter and
    /// register its sources and symbols.
    pub fn enable_interpreter(&mut self) -> Result<(), DriverError> {
        self.advance(Stage::NotPatched, Stage::InterpreterEnabled)?;
        info!("enabling the TCG interpreter");
        self.report.api_version = self.read_api_version();

        let qemu = self.config.qemu_dir();
        if let Some(donor) = self.config.tree.donor.clone() {
            let report = TreeMerger::new(donor, qemu.clone()).merge(self.patches.store_mut())?;
            self.report.merge = Some(report);
        }

        let mut plan = PatchPlan::new();
        self.add_definitions(PatchStage::Interpreter, &mut plan)?;
        self.apply_plan(PatchStage::Interpreter, plan)?;

        let script = qemu.join("gen_all_header.sh");
        if self.patches.store().exists(&script) {
            let invocation = Invocation::new("bash")
                .arg("gen_all_header.sh")
                .current_dir(&qemu);
            self.run_tool(invocation)?;
        } else {
            warn!(path = %script.display(), "header generator missing, symbol headers not refreshed");
        }

        self.stage = Stage::InterpreterEnabled;
        Ok(())
    }

    /// Write trampoline headers and point helper calls at them.
    pub fn install_adapters(&mut self) -> Result<(), DriverError> {
        self.advance(Stage::InterpreterEnabled, Stage::AdaptersInstalled)?;
        info!("installing helper trampolines");

        let generator = self.config.adapter.generator();
        let qemu = self.config.qemu_dir();
        let runtime = qemu.join("tcg/tcg-runtime.h");
        let runtime_lines: Vec<HelperLine> = if self.patches.store().exists(&runtime) {
            generator.scan(self.patches.store(), &runtime)?
        } else {
            debug!(path = %runtime.display(), "no runtime helper header");
            Vec::new()
        };

        for dir in self.target_dirs()? {
            let helper_h = qemu.join(dir).join("helper.h");
            let mut lines = generator.scan(self.patches.store(), &helper_h)?;
            lines.extend(runtime_lines.iter().cloned());
            let generated = generator.generate(&lines);

            let relative = self.config.tree.qemu.join(dir).join(generator.header_name());
            let header = self.guard.validate_path(&relative)?;
            let outcome = self.patches.ensure_file(&header, &generated.header)?;
            debug!(path = %header.display(), helpers = generated.helpers, %outcome, "trampoline header");
            self.report.headers.push(HeaderRecord {
                path: relative,
                helpers: generated.helpers,
                outcome,
            });
        }

        let mut plan = PatchPlan::new();
        recipes::adapter_plan(&generator, &self.config.tree.qemu, &mut plan);
        self.add_definitions(PatchStage::Adapters, &mut plan)?;
        self.apply_plan(PatchStage::Adapters, plan)?;

        self.stage = Stage::AdaptersInstalled;
        Ok(())
    }

    /// Replace the interpreter's word reads with byte-assembled ones.
    pub fn fix_unaligned_reads(&mut self) -> Result<(), DriverError> {
        self.advance(Stage::AdaptersInstalled, Stage::UnalignedReadsFixed)?;
        info!("fixing unaligned reads");
        let mut plan = PatchPlan::new();
        self.add_definitions(PatchStage::Unaligned, &mut plan)?;
        self.apply_plan(PatchStage::Unaligned, plan)?;
        self.stage = Stage::UnalignedReadsFixed;
        Ok(())
    }

    /// Drop signal-based jumps and apply the build toggles.
    pub fn fix_signal_jumps(&mut self) -> Result<(), DriverError> {
        self.advance(Stage::UnalignedReadsFixed, Stage::Patched)?;
        info!("fixing signal jumps");
        let mut plan = PatchPlan::new();
        self.add_definitions(PatchStage::Signals, &mut plan)?;
        plan.add(
            "config.mk",
            "config-toggles",
            recipes::config_mk_rules(&self.config.toggles),
        );
        plan.add(
            "Makefile",
            "rename-objects-hook",
            recipes::rename_hook_rule(&self.hook_program, &self.config.tree.qemu),
        );
        self.apply_plan(PatchStage::Signals, plan)?;
        self.stage = Stage::Patched;
        Ok(())
    }

    /// All four patch stages.
    pub fn patch(&mut self) -> Result<(), DriverError> {
        self.enable_interpreter()?;
        self.install_adapters()?;
        self.fix_unaligned_reads()?;
        self.fix_signal_jumps()
    }

    /// `emmake make`, optionally for a narrower architecture set. An empty
    /// `archs` builds whatever [`select_archs`](Self::select_archs) chose.
    pub fn compile(&mut self, archs: &[String]) -> Result<(), DriverError> {
        self.advance(Stage::Patched, Stage::Compiled)?;
        check_archs(archs)?;
        let toolchain = self.require_toolchain()?;
        let archs = if archs.is_empty() {
            self.archs.clone()
        } else {
            archs.to_vec()
        };
        let invocation = compile_invocation(&toolchain, self.root(), &archs);
        info!(archs = %archs.join(" "), "building Unicorn");
        self.run_tool(invocation)?;
        self.stage = Stage::Compiled;
        Ok(())
    }

    /// Link the static library into JavaScript.
    pub fn emit(&mut self) -> Result<(), DriverError> {
        self.advance(Stage::Compiled, Stage::Emitted)?;
        let toolchain = self.require_toolchain()?;
        let invocation = emit_invocation(&toolchain, &self.config);
        info!(output = %self.config.emit.output.display(), "emitting JavaScript");
        self.run_tool(invocation)?;
        self.stage = Stage::Emitted;
        Ok(())
    }

    /// The whole pipeline for `archs` (empty: the configured set). The
    /// architectures and the toolchain are checked before anything is
    /// patched.
    pub fn run(&mut self, archs: &[String]) -> Result<&BuildReport, DriverError> {
        self.select_archs(archs)?;
        self.require_toolchain()?;
        self.patch()?;
        self.compile(&[])?;
        self.emit()?;
        Ok(&self.report)
    }

    fn require_toolchain(&self) -> Result<Toolchain, DriverError> {
        check_host()?;
        self.toolchain
            .clone()
            .ok_or_else(|| DriverError::UnsupportedHostPlatform {
                instructions: "no Emscripten toolchain configured; run `unicorn-patcher build` \
                               with Emscripten on PATH or $EMSCRIPTEN set"
                    .to_string(),
            })
    }

    fn run_tool(&mut self, invocation: Invocation) -> Result<(), DriverError> {
        run_checked(&mut self.runner, &invocation)?;
        self.report.invocations.push(invocation);
        Ok(())
    }

    fn read_api_version(&self) -> Option<Version> {
        let header = self.root().join(API_HEADER);
        let source = self.patches.store().read_to_string(&header).ok()?;
        let version = parse_api_version(&source);
        match &version {
            Some(version) => info!(%version, "Unicorn API version"),
            None => debug!(path = %header.display(), "no API version found"),
        }
        version
    }

    fn target_dirs(&self) -> Result<Vec<&'static str>, DriverError> {
        recipes::target_dirs(self.archs()).map_err(DriverError::UnknownArch)
    }

    /// Add the configured patches for `stage`, skipping those whose version
    /// range excludes the tree.
    fn add_definitions(&mut self, stage: PatchStage, plan: &mut PatchPlan) -> Result<(), DriverError> {
        for definition in self.config.patches.iter().filter(|p| p.stage == stage) {
            if let (Some(version), Some(range)) =
                (&self.report.api_version, definition.version_range.as_deref())
            {
                if !matches_requirement(&version.to_string(), Some(range))? {
                    let reason = format!("API version {version} does not satisfy {range}");
                    warn!(patch = %definition.id, %reason, "skipping patch");
                    self.report.patches.push(PatchRecord {
                        stage,
                        path: PathBuf::from(&definition.file),
                        ids: vec![definition.id.clone()],
                        status: PatchStatus::SkippedVersion { reason },
                    });
                    continue;
                }
            }
            plan.add_definition(definition);
        }
        Ok(())
    }

    fn apply_plan(&mut self, stage: PatchStage, plan: PatchPlan) -> Result<(), DriverError> {
        for mut entry in plan.into_entries() {
            let path = self.guard.validate_path(&entry.path)?;
            let outcome = self.patches.apply(&path, &mut entry.chain)?;
            if entry.executable {
                self.patches.mark_executable(&path)?;
            }
            debug!(path = %entry.path.display(), ids = %entry.ids.join(","), %outcome, "patch");
            self.report.patches.push(PatchRecord {
                stage,
                path: entry.path,
                ids: entry.ids,
                status: outcome.into(),
            });
        }
        Ok(())
    }
}

fn check_archs(archs: &[String]) -> Result<(), DriverError> {
    match archs.iter().find(|arch| recipes::target_dir(arch).is_none()) {
        Some(arch) => Err(DriverError::UnknownArch(arch.clone())),
        None => Ok(()),
    }
}

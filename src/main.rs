use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use unicorn_patcher::config::{self, BuildConfig, PatchStage};
use unicorn_patcher::driver::{
    exported_functions, BuildDriver, BuildReport, PatchStatus, ProcessRunner,
    RecordingRunner, Toolchain,
};
use unicorn_patcher::objects;
use unicorn_patcher::recipes::{self, DEFAULT_HOOK_PROGRAM};
use unicorn_patcher::snapshot::TreeFingerprint;
use unicorn_patcher::store::{FileStore, FsStore, MemoryStore};
use unicorn_patcher::AdapterGenerator;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "unicorn-patcher")]
#[command(about = "Patch and build Unicorn for Emscripten", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./unicorn-patcher.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all patch stages to the Unicorn tree
    Apply {
        /// Patch an in-memory copy of the tree and report what would change
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Patch, compile and emit the JavaScript module
    Build {
        /// Architectures to compile (repeatable; defaults to the configured set)
        #[arg(short, long = "arch")]
        archs: Vec<String>,

        /// Print the commands instead of running them; the tree is not touched
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Show which files are patched
    Status {
        /// Architectures whose trampoline headers to check (defaults to the configured set)
        #[arg(short, long = "arch")]
        archs: Vec<String>,
    },

    /// Show unified diffs between backups and patched files
    Diff,

    /// Print the trampoline header generated for one architecture
    Adapters {
        #[arg(short, long, default_value = "x86")]
        arch: String,

        /// Write the header here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the exported symbol list
    Exports {
        /// Print the JSON array passed to emcc
        #[arg(long)]
        json: bool,
    },

    /// Give per-target QEMU objects distinct names (run from the Makefile)
    RenameObjects {
        /// QEMU build directory
        qemu_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Apply { dry_run, diff } => cmd_apply(cli.config.as_deref(), dry_run, diff),
        Commands::Build { archs, dry_run } => cmd_build(cli.config.as_deref(), &archs, dry_run),
        Commands::Status { archs } => cmd_status(cli.config.as_deref(), &archs),
        Commands::Diff => cmd_diff(cli.config.as_deref()),
        Commands::Adapters { arch, output } => {
            cmd_adapters(cli.config.as_deref(), &arch, output.as_deref())
        }
        Commands::Exports { json } => cmd_exports(cli.config.as_deref(), json),
        Commands::RenameObjects { qemu_dir } => cmd_rename_objects(&qemu_dir),
    }
}

/// Program the Makefile hook should call: this binary when its path is
/// usable from make, otherwise whatever is on PATH.
fn hook_program() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.to_str().map(str::to_string))
        .filter(|path| !path.contains(char::is_whitespace))
        .unwrap_or_else(|| DEFAULT_HOOK_PROGRAM.to_string())
}

/// Copy the fork (and the donor, when configured) into memory.
fn mirror_tree(config: &BuildConfig) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    let mut roots = vec![config.tree.root.clone()];
    roots.extend(config.tree.donor.clone());
    for root in roots {
        if !root.is_dir() {
            continue;
        }
        let copied = store
            .mirror(&FsStore, &root)
            .with_context(|| format!("failed to read {}", root.display()))?;
        tracing::debug!(root = %root.display(), files = copied, "mirrored tree");
    }
    Ok(store)
}

fn print_header(config: &BuildConfig) {
    println!("Tree: {}", config.tree.root.display());
    if let Some(donor) = &config.tree.donor {
        println!("Donor: {}", donor.display());
    }
    println!();
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => continue,
        };
        print!("{}", sign);
    }
}

fn stage_label(stage: PatchStage) -> String {
    format!("[{stage}]").dimmed().to_string()
}

/// Per-file lines plus the summary block.
fn print_report(report: &BuildReport, dry_run: bool) {
    if let Some(version) = &report.api_version {
        println!("Unicorn API: {}", version);
    }
    if let Some(merge) = &report.merge {
        println!(
            "{} donor merge: {} copied, {} present",
            "✓".green(),
            merge.copied.len(),
            merge.skipped
        );
    }

    let mut applied = 0;
    let mut already = 0;
    let mut skipped = 0;
    let verb = if dry_run { "Would patch" } else { "Patched" };

    for record in &report.patches {
        let ids = record.ids.join(", ");
        match &record.status {
            PatchStatus::Applied { changed: true } => {
                println!(
                    "{} {} {}: {} {}",
                    "✓".green(),
                    stage_label(record.stage),
                    ids,
                    verb,
                    record.path.display()
                );
                applied += 1;
            }
            PatchStatus::Applied { changed: false } => {
                println!(
                    "{} {} {}: {} {} {}",
                    "✓".green(),
                    stage_label(record.stage),
                    ids,
                    verb,
                    record.path.display(),
                    "(no pattern matched)".dimmed()
                );
                applied += 1;
            }
            PatchStatus::AlreadyApplied => {
                println!(
                    "{} {} {}: Already applied to {}",
                    "⊙".yellow(),
                    stage_label(record.stage),
                    ids,
                    record.path.display()
                );
                already += 1;
            }
            PatchStatus::SkippedVersion { reason } => {
                println!(
                    "{} {} {}: Skipped ({})",
                    "⊘".cyan(),
                    stage_label(record.stage),
                    ids,
                    reason
                );
                skipped += 1;
            }
        }
    }

    for header in &report.headers {
        let symbol = if header.outcome.modified_tree() {
            applied += 1;
            "✓".green()
        } else {
            already += 1;
            "⊙".yellow()
        };
        println!(
            "{} {} {} ({} helpers)",
            symbol,
            stage_label(PatchStage::Adapters),
            header.path.display(),
            header.helpers
        );
    }

    for invocation in &report.invocations {
        println!("{} {}", "$".dimmed(), invocation);
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", applied).green());
    println!("  {} already applied", format!("{}", already).yellow());
    println!("  {} skipped", format!("{}", skipped).cyan());
}

fn cmd_apply(config_path: Option<&Path>, dry_run: bool, show_diff: bool) -> Result<()> {
    let config = config::load(config_path)?;
    print_header(&config);

    if dry_run {
        println!("{}", "[DRY RUN - patching an in-memory copy]".cyan());
        let store = mirror_tree(&config)?;
        let mut driver = BuildDriver::new(config, store, RecordingRunner::new())
            .with_hook_program(hook_program());
        driver.patch()?;
        print_report(driver.report(), true);
        if show_diff {
            let suffix = driver.config().tree.backup_suffix.clone();
            let store = driver.store();
            for record in &driver.report().patches {
                let path = driver.config().tree.root.join(&record.path);
                let backup = backup_of(&path, &suffix);
                if let (Some(before), Some(after)) = (store.get(&backup), store.get(&path)) {
                    if before != after {
                        display_diff(&record.path, before, after);
                    }
                }
            }
        }
        return Ok(());
    }

    let mut driver =
        BuildDriver::new(config, FsStore, ProcessRunner).with_hook_program(hook_program());
    let root = driver.config().tree.root.clone();
    let before = show_diff
        .then(|| TreeFingerprint::capture(driver.store(), &root))
        .transpose()?;
    driver.patch()?;
    print_report(driver.report(), false);

    if let Some(before) = before {
        let suffix = &driver.config().tree.backup_suffix;
        let after = TreeFingerprint::capture(&FsStore, &root)?;
        for relative in before.changed_since(&after) {
            let path = root.join(relative);
            let backup = backup_of(&path, suffix);
            if let (Ok(original), Ok(patched)) =
                (fs::read_to_string(&backup), fs::read_to_string(&path))
            {
                display_diff(relative, &original, &patched);
            }
        }
    }
    Ok(())
}

fn cmd_build(config_path: Option<&Path>, archs: &[String], dry_run: bool) -> Result<()> {
    let config = config::load(config_path)?;
    print_header(&config);

    if dry_run {
        println!("{}", "[DRY RUN - commands are printed, not run]".cyan());
        let store = mirror_tree(&config)?;
        let toolchain = Toolchain::detect().unwrap_or_else(|_| Toolchain::new("emcc", "emmake"));
        let mut driver = BuildDriver::new(config, store, RecordingRunner::new())
            .with_toolchain(toolchain)
            .with_hook_program(hook_program());
        driver.run(archs)?;
        print_report(driver.report(), true);
        return Ok(());
    }

    let toolchain = Toolchain::detect()?;
    let mut driver = BuildDriver::new(config, FsStore, ProcessRunner)
        .with_toolchain(toolchain)
        .with_hook_program(hook_program());
    let result = driver.run(archs).map(|_| ());
    print_report(driver.report(), false);
    result?;

    println!(
        "\n{} {}",
        "✓".green(),
        format!("Wrote {}", driver.config().emit.output.display()).bold()
    );
    Ok(())
}

fn backup_of(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn cmd_status(config_path: Option<&Path>, archs: &[String]) -> Result<()> {
    let config = config::load(config_path)?;
    let dirs = recipes::target_dirs(config.effective_archs(archs))
        .map_err(|arch| anyhow::anyhow!("unknown architecture '{arch}'"))?;

    println!("{}", "Patch Status Report".bold());
    print_header(&config);

    let root = &config.tree.root;
    let suffix = &config.tree.backup_suffix;

    // Every file the pipeline touches, recipe and generated alike
    let mut files: Vec<(PathBuf, Vec<String>)> = Vec::new();
    let mut note = |path: PathBuf, id: &str| match files.iter_mut().find(|(p, _)| *p == path) {
        Some((_, ids)) => ids.push(id.to_string()),
        None => files.push((path, vec![id.to_string()])),
    };
    for patch in &config.patches {
        note(PathBuf::from(&patch.file), &patch.id);
    }
    let generator = config.adapter.generator();
    for (path, _) in generator.redirect_rules() {
        note(config.tree.qemu.join(path), "adapter-redirect");
    }
    for (path, _) in generator.include_rules() {
        note(config.tree.qemu.join(path), "adapter-include");
    }
    note(PathBuf::from("config.mk"), "config-toggles");
    note(PathBuf::from("Makefile"), "rename-objects-hook");

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    for (path, ids) in files {
        let full = root.join(&path);
        if FsStore.exists(&backup_of(&full, suffix)) {
            applied.push((path, ids));
        } else if FsStore.exists(&full) {
            not_applied.push((path, ids, "not yet applied"));
        } else {
            not_applied.push((path, ids, "file missing"));
        }
    }

    let headers: Vec<PathBuf> = dirs
        .iter()
        .map(|dir| config.tree.qemu.join(dir).join(generator.header_name()))
        .collect();

    if !applied.is_empty() {
        println!(
            "{} {} ({} files)",
            "✓".green(),
            "PATCHED".green().bold(),
            applied.len()
        );
        for (path, ids) in &applied {
            println!("  - {} ({})", path.display(), ids.join(", ").dimmed());
        }
        println!();
    }

    if !not_applied.is_empty() {
        println!(
            "{} {} ({} files)",
            "⊙".yellow(),
            "NOT PATCHED".yellow().bold(),
            not_applied.len()
        );
        for (path, ids, reason) in &not_applied {
            println!(
                "  - {} ({}; {})",
                path.display(),
                ids.join(", ").dimmed(),
                reason.dimmed()
            );
        }
        println!();
    }

    println!("{}", "Trampoline headers:".bold());
    for header in &headers {
        let symbol = if FsStore.exists(&root.join(header)) {
            "✓".green()
        } else {
            "⊙".yellow()
        };
        println!("  {} {}", symbol, header.display());
    }

    let qemu = config.qemu_dir();
    if qemu.is_dir() {
        let fingerprint = TreeFingerprint::capture(&FsStore, &qemu)?;
        println!();
        println!(
            "Fingerprint: {:016x} ({} files)",
            fingerprint.combined(),
            fingerprint.len()
        );
    }

    Ok(())
}

fn cmd_diff(config_path: Option<&Path>) -> Result<()> {
    let config = config::load(config_path)?;
    let root = &config.tree.root;
    let suffix = config.tree.backup_suffix.as_str();

    let mut shown = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.path().to_str() else {
            continue;
        };
        let Some(original_path) = name.strip_suffix(suffix) else {
            continue;
        };
        let original_path = Path::new(original_path);
        let (Ok(original), Ok(patched)) = (
            fs::read_to_string(entry.path()),
            fs::read_to_string(original_path),
        ) else {
            continue;
        };
        if original != patched {
            display_diff(
                original_path.strip_prefix(root).unwrap_or(original_path),
                &original,
                &patched,
            );
            shown += 1;
        }
    }

    if shown == 0 {
        println!("{}", "No patched files differ from their backups".dimmed());
    }
    Ok(())
}

fn cmd_adapters(config_path: Option<&Path>, arch: &str, output: Option<&Path>) -> Result<()> {
    let config = config::load(config_path)?;
    let dir = recipes::target_dir(arch)
        .ok_or_else(|| anyhow::anyhow!("unknown architecture '{arch}'"))?;
    let generator: AdapterGenerator = config.adapter.generator();

    let qemu = config.qemu_dir();
    let mut lines = generator.scan(&FsStore, &qemu.join(dir).join("helper.h"))?;
    let runtime = qemu.join("tcg/tcg-runtime.h");
    if runtime.is_file() {
        lines.extend(generator.scan(&FsStore, &runtime)?);
    }
    let generated = generator.generate(&lines);

    match output {
        Some(path) => {
            fs::write(path, &generated.header)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} {} ({} helpers, {} shapes)",
                "✓".green(),
                path.display(),
                generated.helpers,
                generated.shapes.len()
            );
        }
        None => print!("{}", generated.header),
    }
    Ok(())
}

fn cmd_exports(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load(config_path)?;
    if json {
        println!("{}", exported_functions(&config.emit.exports));
    } else {
        for name in &config.emit.exports {
            println!("{}", name);
        }
    }
    Ok(())
}

fn cmd_rename_objects(qemu_dir: &Path) -> Result<()> {
    let renames = objects::rename_objects(&mut FsStore, qemu_dir)
        .with_context(|| format!("failed to rename objects in {}", qemu_dir.display()))?;
    for rename in &renames {
        let display = |p: &Path| p.strip_prefix(qemu_dir).unwrap_or(p).display().to_string();
        println!(
            "{} {} -> {}",
            "✓".green(),
            display(&rename.from),
            display(&rename.to)
        );
    }
    println!("  {} renamed", format!("{}", renames.len()).green());
    Ok(())
}

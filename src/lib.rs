//! Unicorn Patcher: idempotent source patching for an Emscripten build of
//! Unicorn.
//!
//! Unicorn's QEMU fork generates host machine code at run time, which a
//! WebAssembly target cannot execute. This crate rewrites the fork to use the
//! TCG bytecode interpreter instead, generates calling-convention trampolines
//! for every helper the interpreter calls, and drives `emmake`/`emcc` to
//! produce a JavaScript module.
//!
//! # Architecture
//!
//! Every edit is a line-oriented text transform ([`patch::TextReplacer`],
//! [`patch::LineInserter`]) run by [`patch::PatchStore`], which keeps a
//! `.bak` copy of each file it touches. The backup doubles as the completion
//! marker, so rerunning any part of the pipeline is a no-op.
//!
//! # Safety
//!
//! - A file is patched at most once; its backup holds the original bytes
//! - Patch targets are confined to the fork and kept out of the donor tree
//! - Atomic file writes (tempfile + rename)
//! - All filesystem access goes through [`store::FileStore`]
//!
//! # Example
//!
//! ```no_run
//! use unicorn_patcher::driver::{BuildDriver, ProcessRunner};
//! use unicorn_patcher::store::FsStore;
//!
//! let config = unicorn_patcher::config::load(None)?;
//! let mut driver = BuildDriver::new(config, FsStore, ProcessRunner);
//! driver.patch()?;
//! println!("{} files modified", driver.report().modified_count());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod config;
pub mod driver;
pub mod merge;
pub mod objects;
pub mod patch;
pub mod recipes;
pub mod safety;
pub mod snapshot;
pub mod store;

// Re-exports
pub use adapter::{AdapterError, AdapterGenerator, GeneratedAdapters, ScanError};
pub use config::{
    load, load_from_path, load_from_str, matches_requirement, BuildConfig, ConfigError,
    VersionError,
};
pub use driver::{BuildDriver, BuildReport, DriverError, PatchStatus, Stage};
pub use merge::{MergeError, MergeReport, TreeMerger};
pub use patch::{
    InsertionRule, Ledger, LineInserter, PatchError, PatchOutcome, PatchStore, ReplacementRule,
    TextReplacer, Transform,
};
pub use safety::{SafetyError, TreeGuard};
pub use snapshot::TreeFingerprint;
pub use store::{FileStore, FsStore, MemoryStore};

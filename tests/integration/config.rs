//! Loading user configuration from disk and feeding it to the driver.

use super::fixture::{self, fork};
use std::fs;
use tempfile::TempDir;
use unicorn_patcher::config::{self, ConfigError, ValidationIssue};
use unicorn_patcher::driver::{emit_invocation, BuildDriver, RecordingRunner, Toolchain};

const USER_CONFIG: &str = r#"
[meta]
name = "wasm-arm"

[toggles]
archs = ["arm"]
debug = false
pthreads = false
module_name = "Unicorn"

[emit]
output = "dist/unicorn-arm.js"

[adapter]
prefix = "tramp_"
header_name = "tramp.h"
"#;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unicorn-patcher.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn test_user_settings_reach_the_build() {
    let (_dir, path) = write_config(USER_CONFIG);
    let config = config::load(Some(&path)).unwrap();

    assert_eq!(config.meta.name, "wasm-arm");
    assert_eq!(config.toggles.archs, ["arm"]);
    assert!(config.patches.iter().any(|p| p.id == "enable-tci"));

    let args = emit_invocation(&Toolchain::new("emcc", "emmake"), &config).args;
    assert!(!args.iter().any(|a| a == "-g" || a == "USE_PTHREADS=1"));
    assert!(args.iter().any(|a| a == "EXPORT_NAME=Unicorn"));
    assert_eq!(args.last().map(String::as_str), Some("dist/unicorn-arm.js"));

    let mut driver = BuildDriver::new(config, fixture::tree(), RecordingRunner::new());
    driver.patch().unwrap();
    let store = driver.store();

    let header = store.get(fork("qemu/target-arm/tramp.h")).unwrap();
    assert!(header.contains("#ifndef TRAMP_H"));
    assert!(store.get(fork("qemu/target-i386/tramp.h")).is_none());
    assert!(store
        .get(fork("qemu/include/exec/helper-gen.h"))
        .unwrap()
        .contains("glue(tramp_, name)"));
    assert_eq!(
        store.get(fork("config.mk")),
        Some("UNICORN_ARCHS ?= arm\nUNICORN_DEBUG ?= no\nUNICORN_SHARED ?= no\n")
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_unknown_section_names_the_file() {
    let (_dir, path) = write_config("[toggels]\ndebug = false\n");
    let err = config::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Toml { path: Some(_), .. }));
    assert!(err.to_string().contains("unicorn-patcher.toml"));
}

#[test]
fn test_invalid_settings_listed_together() {
    let (_dir, path) = write_config(
        r#"
[toggles]
archs = ["x86", "riscv"]

[emit]
exports = ["uc_open"]
"#,
    );
    let err = config::load(Some(&path)).unwrap_err();
    let ConfigError::Validation { path: Some(_), source } = err else {
        panic!("expected a validation error with a path");
    };
    assert_eq!(
        source.issues,
        vec![
            ValidationIssue::UnknownArch("riscv".to_string()),
            ValidationIssue::InvalidExport("uc_open".to_string()),
        ]
    );
}

//! Driver state machine, external tools and version gating.

use super::fixture::{self, fork};
use unicorn_patcher::config::{self, PatchStage};
use unicorn_patcher::driver::{
    BuildDriver, DriverError, PatchStatus, RecordingRunner, Stage, ToolExit, Toolchain,
};
use unicorn_patcher::safety::SafetyError;

fn toolchain() -> Toolchain {
    Toolchain::new("/emsdk/emcc", "/emsdk/emmake")
}

#[test]
fn test_full_run_records_commands_in_order() {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new())
        .with_toolchain(toolchain());
    driver.run(&["x86".to_string()]).unwrap();
    assert_eq!(driver.stage(), Stage::Emitted);

    let commands: Vec<String> = driver
        .runner()
        .invocations
        .iter()
        .map(|inv| inv.to_string())
        .collect();
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0], "bash gen_all_header.sh");
    assert_eq!(commands[1], "/emsdk/emmake make UNICORN_ARCHS=x86");
    assert!(commands[2].starts_with("/emsdk/emcc -Os --memory-init-file 0 unicorn/libunicorn.a -s EXPORTED_FUNCTIONS=[\"_uc_version\""));
    assert!(commands[2].ends_with("-s ALLOW_MEMORY_GROWTH=1 -s USE_PTHREADS=1 -g -o src/unicorn.out.js"));
    assert_eq!(driver.report().invocations.len(), 3);
}

#[test]
fn test_failing_link_stops_at_compiled() {
    let runner = RecordingRunner::new().failing("emcc");
    let mut driver =
        BuildDriver::new(fixture::config(), fixture::tree(), runner).with_toolchain(toolchain());

    let err = driver.run(&[]).unwrap_err();
    match err {
        DriverError::ExternalToolFailure { program, status } => {
            assert_eq!(program, "emcc");
            assert_eq!(status, ToolExit::Failed(Some(2)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.stage(), Stage::Compiled);
}

#[test]
fn test_failing_header_generator_aborts_first_stage() {
    let runner = RecordingRunner::new().failing("bash");
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), runner);

    let err = driver.enable_interpreter().unwrap_err();
    assert!(matches!(err, DriverError::ExternalToolFailure { .. }));
    assert_eq!(driver.stage(), Stage::NotPatched);

    // Patches already written stay; the stage can be retried
    let configure = driver.store().get(fork("qemu/configure")).unwrap();
    assert!(configure.contains("\"yes\""));
}

#[test]
fn test_stages_must_run_in_order() {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new())
        .with_toolchain(toolchain());

    assert!(matches!(
        driver.install_adapters(),
        Err(DriverError::InvalidTransition {
            from: Stage::NotPatched,
            to: Stage::AdaptersInstalled,
        })
    ));
    assert!(matches!(
        driver.emit(),
        Err(DriverError::InvalidTransition { .. })
    ));

    driver.enable_interpreter().unwrap();
    assert!(matches!(
        driver.enable_interpreter(),
        Err(DriverError::InvalidTransition {
            from: Stage::InterpreterEnabled,
            ..
        })
    ));
    driver.install_adapters().unwrap();
    driver.fix_unaligned_reads().unwrap();
    driver.fix_signal_jumps().unwrap();
    driver.compile(&[]).unwrap();
    driver.emit().unwrap();
    assert_eq!(driver.stage(), Stage::Emitted);
}

#[test]
fn test_missing_toolchain_touches_nothing() {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new());
    let err = driver.run(&[]).unwrap_err();
    assert!(matches!(err, DriverError::UnsupportedHostPlatform { .. }));
    assert_eq!(driver.store().writes(), 0);
    assert!(driver.runner().invocations.is_empty());
}

#[test]
fn test_version_mismatch_skips_recipe_patches() {
    let mut store = fixture::tree();
    store.insert(
        fork("include/unicorn/unicorn.h"),
        "#define UC_API_MAJOR 2\n#define UC_API_MINOR 1\n",
    );
    let mut driver = BuildDriver::new(fixture::config(), store, RecordingRunner::new());
    driver.patch().unwrap();

    let report = driver.report();
    let enable = report
        .patches
        .iter()
        .find(|r| r.ids == ["enable-tci"])
        .unwrap();
    match &enable.status {
        PatchStatus::SkippedVersion { reason } => {
            assert!(reason.contains("2.1.0"));
            assert!(reason.contains(">=0.9.0, <2.0.0"));
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(
        driver.store().get(fork("qemu/configure")),
        Some(fixture::CONFIGURE)
    );

    // Generated patches carry no version range
    let config_mk = report
        .patches
        .iter()
        .find(|r| r.ids == ["config-toggles"])
        .unwrap();
    assert_eq!(config_mk.stage, PatchStage::Signals);
    assert_eq!(config_mk.status, PatchStatus::Applied { changed: true });
}

#[test]
fn test_unknown_version_applies_everything() {
    let mut store = fixture::tree();
    store.insert(fork("include/unicorn/unicorn.h"), "/* no version */\n");
    let mut driver = BuildDriver::new(fixture::config(), store, RecordingRunner::new());
    driver.patch().unwrap();

    assert_eq!(driver.report().api_version, None);
    assert!(driver
        .report()
        .patches
        .iter()
        .all(|r| matches!(r.status, PatchStatus::Applied { .. })));
}

#[test]
fn test_user_patch_runs_in_its_stage() {
    let user = config::load_from_str(
        r#"
[[patches]]
id = "quiet-cpu-exec"
file = "qemu/cpu-exec.c"
stage = "signals"

[patches.operation]
type = "replace"
rules = [{ search = "break;", replace = "break; /* tci */" }]
"#,
    )
    .unwrap();
    let config = config::resolve(Some(user)).unwrap();
    let mut driver = BuildDriver::new(config, fixture::tree(), RecordingRunner::new());
    driver.patch().unwrap();

    let record = driver
        .report()
        .patches
        .iter()
        .find(|r| r.ids.contains(&"quiet-cpu-exec".to_string()))
        .unwrap();
    assert_eq!(record.ids, ["plain-setjmp", "quiet-cpu-exec"]);

    let cpu_exec = driver.store().get(fork("qemu/cpu-exec.c")).unwrap();
    assert!(cpu_exec.contains("break; /* tci */"));
    assert!(cpu_exec.contains("setjmp(cpu->jmp_env)"));
}

#[test]
fn test_patch_into_donor_rejected() {
    let mut store = fixture::tree();
    for (path, contents) in fixture::files() {
        if let Some(rest) = path.strip_prefix(fixture::DONOR) {
            store.insert(format!("unicorn/upstream{rest}"), contents);
        }
    }
    let user = config::load_from_str(
        r#"
[tree]
donor = "unicorn/upstream"

[[patches]]
id = "touch-donor"
file = "upstream/tci.c"
stage = "signals"

[patches.operation]
type = "insert"
anchor = "{"
lines = ["    /* patched */"]
"#,
    )
    .unwrap();
    let config = config::resolve(Some(user)).unwrap();
    let mut driver = BuildDriver::new(config, store, RecordingRunner::new());

    let err = driver.patch().unwrap_err();
    assert!(matches!(
        err,
        DriverError::Safety(SafetyError::DonorTree { .. })
    ));
    assert_eq!(driver.stage(), Stage::UnalignedReadsFixed);
}

#[test]
fn test_unknown_arch_rejected_at_adapters() {
    let mut config = fixture::config();
    config.toggles.archs = vec!["z80".to_string()];
    let mut driver = BuildDriver::new(config, fixture::tree(), RecordingRunner::new());
    driver.enable_interpreter().unwrap();
    let err = driver.install_adapters().unwrap_err();
    assert!(matches!(err, DriverError::UnknownArch(arch) if arch == "z80"));
}

#[test]
fn test_requested_archs_get_headers_instead_of_toggles() {
    let mut tree = fixture::tree();
    tree.insert(
        fork("qemu/target-mips/helper.h"),
        "DEF_HELPER_2(raise_exception, noreturn, env, i32)\nDEF_HELPER_3(lwl, tl, env, tl, int)\n",
    );
    let mut driver =
        BuildDriver::new(fixture::config(), tree, RecordingRunner::new()).with_toolchain(toolchain());

    driver.run(&["mips".to_string()]).unwrap();

    let store = driver.store();
    let mips = store.get(fork("qemu/target-mips/helper-tramp.h")).unwrap();
    assert!(mips.contains("TRAMPOLINE_3_RET(lwl, env, tl, int)"));
    assert!(mips.contains("TRAMPOLINE_2_VOID(raise_exception, env, i32)"));
    assert!(store.get(fork("qemu/target-i386/helper-tramp.h")).is_none());
    assert!(store.get(fork("qemu/target-arm/helper-tramp.h")).is_none());
    assert_eq!(
        driver.runner().invocations[1].to_string(),
        "/emsdk/emmake make UNICORN_ARCHS=mips"
    );
}

#[test]
fn test_unknown_requested_arch_touches_nothing() {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new())
        .with_toolchain(toolchain());
    let err = driver.run(&["x86".to_string(), "riscv".to_string()]).unwrap_err();
    assert!(matches!(err, DriverError::UnknownArch(arch) if arch == "riscv"));
    assert_eq!(driver.store().writes(), 0);
    assert!(driver.runner().invocations.is_empty());
    assert_eq!(driver.stage(), Stage::NotPatched);
}

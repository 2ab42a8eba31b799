//! End-to-end patching
//!
//! 1. Merge the donor and patch every stage
//! 2. Check the rewritten sources
//! 3. Rerun and check nothing changes

use super::fixture::{self, fork, DONOR};
use std::path::{Path, PathBuf};
use unicorn_patcher::config::PatchStage;
use unicorn_patcher::driver::{BuildDriver, PatchStatus, RecordingRunner, Stage};
use unicorn_patcher::snapshot::TreeFingerprint;
use unicorn_patcher::store::MemoryStore;

fn patched() -> (MemoryStore, RecordingRunner) {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new());
    driver.patch().unwrap();
    assert_eq!(driver.stage(), Stage::Patched);
    let (store, runner, _) = driver.into_parts();
    (store, runner)
}

#[test]
fn test_interpreter_enabled() {
    let (store, runner) = patched();

    let configure = store.get(fork("qemu/configure")).unwrap();
    assert!(configure.contains("tcg_interpreter=\"yes\""));
    assert!(!configure.contains("tcg_interpreter=\"no\""));
    assert!(store.is_executable(fork("qemu/configure")));
    assert_eq!(
        store.get(fork("qemu/configure.bak")),
        Some(fixture::CONFIGURE)
    );

    // Donor files backfilled, then patched in the fork only
    let target_c = store.get(fork("qemu/tcg/tci/tcg-target.c")).unwrap();
    assert!(target_c.contains("s->tcg_target_available_regs[TCG_TYPE_I32]"));
    assert!(target_c.contains("s->tcg_target_call_clobber_regs"));
    assert!(target_c.contains("tcg_add_target_add_op_defs(s, tcg_target_op_defs);"));
    assert!(!store
        .get(format!("{DONOR}/tcg/tci/tcg-target.c"))
        .unwrap()
        .contains("s->"));
    assert!(store
        .get(fork("qemu/tcg/tci/tcg-target.h"))
        .unwrap()
        .starts_with("//#define tcg_qemu_tb_exec"));

    assert_eq!(
        store.get(fork("qemu/Makefile.target")),
        Some("obj-y += tcg/tcg.o tcg/optimize.o\nobj-$(CONFIG_TCG_INTERPRETER) += tci.o\nobj-y += fpu/softfloat.o\n")
    );
    assert_eq!(
        store.get(fork("qemu/header_gen.py")),
        Some("symbols = (\n    'tci_tb_ptr',\n    'tcg_qemu_tb_exec',\n    'arm_release',\n)\n")
    );

    let header_run = &runner.invocations[0];
    assert_eq!(header_run.to_string(), "bash gen_all_header.sh");
    assert_eq!(header_run.cwd.as_deref(), Some(Path::new("unicorn/qemu")));
}

#[test]
fn test_donor_never_overwrites_fork() {
    let (store, _) = patched();
    assert!(store.get(fork("qemu/configure.bak")).unwrap().contains("\"no\""));
    assert_eq!(
        store.get(format!("{DONOR}/configure")),
        Some("tcg_interpreter=\"upstream\"\n")
    );
}

#[test]
fn test_adapters_installed() {
    let (store, _) = patched();

    let x86 = store.get(fork("qemu/target-i386/helper-tramp.h")).unwrap();
    assert!(x86.contains("TRAMPOLINE_4_RET(cc_compute_all, tl, tl, tl, int)"));
    assert!(x86.contains("TRAMPOLINE_2_VOID(divb_AL, env, tl)"));
    assert!(x86.contains("#ifdef TARGET_X86_64\nTRAMPOLINE_2_VOID(syscall, env, int)\n#endif"));
    assert!(x86.contains("TRAMPOLINE_2_RET(div_i32, s32, s32)"));

    let arm = store.get(fork("qemu/target-arm/helper-tramp.h")).unwrap();
    assert!(arm.contains("TRAMPOLINE_3_RET(add_cc, env, i32, i32)"));
    assert!(arm.contains("TRAMPOLINE_1_VOID(wfi, env)"));
    assert!(!arm.contains("divb_AL"));

    let helper_gen = store.get(fork("qemu/include/exec/helper-gen.h")).unwrap();
    assert!(helper_gen.starts_with("#include <exec/helper-head.h>\n#include \"helper-tramp.h\"\n"));
    assert!(helper_gen.contains("glue(helper_tramp_, name), dh_retvar(ret)"));

    let helper_tcg = store.get(fork("qemu/include/exec/helper-tcg.h")).unwrap();
    assert!(helper_tcg.contains(".func = glue(helper_tramp_, NAME)"));

    assert_eq!(
        store.get(fork("qemu/tcg/tcg.c")),
        Some("#include \"tcg-op.h\"\n#include \"exec/helper-proto.h\"\n#include \"helper-tramp.h\"\n")
    );
    assert!(store
        .get(fork("qemu/glib_compat.c"))
        .unwrap()
        .contains("((GCompareFunc) compare_func) (l1->data, l2->data) < 0"));
}

#[test]
fn test_unaligned_reads_fixed() {
    let (store, _) = patched();
    let tci = store.get(fork("qemu/tci.c")).unwrap();

    assert!(tci.contains("static uint32_t tci_read_i32(uint8_t **tb_ptr)\n{\n    uint32_t value =\n"));
    assert!(tci.contains("(uint32_t)*((*tb_ptr) + 3) << 24;"));
    assert!(tci.contains("static uint32_t tci_read_i32_old(uint8_t **tb_ptr)"));
    assert!(tci.contains("static int32_t tci_read_s32_old(uint8_t **tb_ptr)"));
    // Old bodies survive under the new names
    assert_eq!(tci.matches("*(uint32_t *)(*tb_ptr)").count(), 1);
    assert_eq!(store.get(format!("{DONOR}/tci.c")), Some(fixture::TCI_C));
}

#[test]
fn test_signal_jumps_and_build_files() {
    let (store, _) = patched();

    let cpu_exec = store.get(fork("qemu/cpu-exec.c")).unwrap();
    assert!(cpu_exec.contains("if (setjmp(cpu->jmp_env) == 0) {"));
    assert!(cpu_exec.contains("    longjmp(cpu->jmp_env, 1);"));
    assert!(!cpu_exec.contains("sigsetjmp"));
    assert!(!cpu_exec.contains("siglongjmp"));

    assert_eq!(
        store.get(fork("config.mk")),
        Some("UNICORN_ARCHS ?= x86 arm\nUNICORN_DEBUG ?= yes\nUNICORN_SHARED ?= no\n")
    );
    assert!(store
        .get(fork("Makefile"))
        .unwrap()
        .ends_with("\t$(MAKE) -C qemu -j 4\n\t@unicorn-patcher rename-objects qemu\n"));
}

#[test]
fn test_report_covers_every_stage() {
    let mut driver = BuildDriver::new(fixture::config(), fixture::tree(), RecordingRunner::new());
    driver.patch().unwrap();
    let report = driver.report();

    assert_eq!(report.api_version, Some(semver::Version::new(1, 0, 0)));
    let merge = report.merge.as_ref().unwrap();
    assert_eq!(merge.copied.len(), 3);
    assert_eq!(merge.skipped, 1);

    for stage in PatchStage::ALL {
        assert!(
            report.patches.iter().any(|r| r.stage == stage),
            "no records for {stage}"
        );
    }
    assert!(report
        .patches
        .iter()
        .all(|r| r.status == PatchStatus::Applied { changed: true }));
    assert_eq!(report.headers.len(), 2);

    let helper_gen = report
        .patches
        .iter()
        .find(|r| r.path == PathBuf::from("qemu/include/exec/helper-gen.h"))
        .unwrap();
    assert_eq!(helper_gen.ids, ["adapter-redirect", "adapter-include"]);
}

#[test]
fn test_rerun_changes_nothing() {
    let (store, _) = patched();
    let writes = store.writes();
    let before = TreeFingerprint::capture(&store, Path::new(fixture::ROOT)).unwrap();

    let mut driver = BuildDriver::new(fixture::config(), store, RecordingRunner::new());
    driver.patch().unwrap();

    let report = driver.report().clone();
    assert!(report
        .patches
        .iter()
        .all(|r| r.status == PatchStatus::AlreadyApplied));
    assert!(report.headers.iter().all(|h| !h.outcome.modified_tree()));
    assert!(report.merge.as_ref().unwrap().copied.is_empty());
    assert_eq!(report.modified_count(), 0);

    let (store, _, _) = driver.into_parts();
    assert_eq!(store.writes(), writes);
    let after = TreeFingerprint::capture(&store, Path::new(fixture::ROOT)).unwrap();
    assert_eq!(before, after);
    assert!(before.changed_since(&after).is_empty());
}

#[test]
fn test_interrupted_run_resumes() {
    // A backup left by an earlier run marks configure as done
    let mut store = fixture::tree();
    store.insert(fork("qemu/configure.bak"), fixture::CONFIGURE);

    let mut driver = BuildDriver::new(fixture::config(), store, RecordingRunner::new());
    driver.patch().unwrap();

    let configure = driver
        .report()
        .patches
        .iter()
        .find(|r| r.path == PathBuf::from("qemu/configure"))
        .unwrap();
    assert_eq!(configure.status, PatchStatus::AlreadyApplied);
    assert!(driver.store().is_executable(fork("qemu/configure")));
    assert!(driver
        .store()
        .get(fork("qemu/cpu-exec.c"))
        .unwrap()
        .contains("setjmp(cpu->jmp_env)"));
}

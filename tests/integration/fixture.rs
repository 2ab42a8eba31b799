//! A pared-down Unicorn checkout with just the lines the pipeline rewrites.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use unicorn_patcher::config::{self, BuildConfig};
use unicorn_patcher::store::MemoryStore;

pub const ROOT: &str = "unicorn";
pub const DONOR: &str = "externals/qemu-2.2.1";

pub const UNICORN_H: &str = "\
#ifndef UNICORN_ENGINE_H
#define UNICORN_ENGINE_H
#define UC_API_MAJOR 1
#define UC_API_MINOR 0
#endif
";

pub const CONFIGURE: &str = "\
#!/bin/sh
tcg_interpreter=\"no\"
softmmu=\"yes\"
";

pub const CPU_EXEC: &str = "\
int cpu_exec(struct uc_struct *uc, CPUArchState *env)
{
    for(;;) {
        if (sigsetjmp(cpu->jmp_env, 0) == 0) {
            break;
        }
    }
}

void cpu_loop_exit(CPUState *cpu)
{
    siglongjmp(cpu->jmp_env, 1);
}
";

pub const TCI_C: &str = "\
static uint32_t tci_read_i32(uint8_t **tb_ptr)
{
    uint32_t value = *(uint32_t *)(*tb_ptr);
    *tb_ptr += sizeof(value);
    return value;
}

static int32_t tci_read_s32(uint8_t **tb_ptr)
{
    int32_t value = *(int32_t *)(*tb_ptr);
    *tb_ptr += sizeof(value);
    return value;
}
";

pub const CONFIG_MK: &str = "\
UNICORN_ARCHS ?= x86 m68k arm aarch64 mips sparc
UNICORN_DEBUG ?= yes
UNICORN_SHARED ?= yes
";

pub const MAKEFILE: &str = "\
qemu/config-host.mak: qemu/configure
\tcd qemu && ./configure
\t$(MAKE) -C qemu -j 4
";

pub fn files() -> Vec<(String, &'static str)> {
    let fork = |path: &str| format!("{ROOT}/{path}");
    let donor = |path: &str| format!("{DONOR}/{path}");
    vec![
        (fork("include/unicorn/unicorn.h"), UNICORN_H),
        (fork("config.mk"), CONFIG_MK),
        (fork("Makefile"), MAKEFILE),
        (fork("qemu/configure"), CONFIGURE),
        (fork("qemu/cpu-exec.c"), CPU_EXEC),
        (fork("qemu/gen_all_header.sh"), "#!/bin/sh\nexit 0\n"),
        (
            fork("qemu/Makefile.target"),
            "obj-y += tcg/tcg.o tcg/optimize.o\nobj-y += fpu/softfloat.o\n",
        ),
        (
            fork("qemu/header_gen.py"),
            "symbols = (\n    'arm_release',\n)\n",
        ),
        (
            fork("qemu/glib_compat.c"),
            "        if (((GCompareDataFunc) compare_func) (l1->data, l2->data, user_data) < 0) {\n",
        ),
        (
            fork("qemu/include/exec/helper-gen.h"),
            "#include <exec/helper-head.h>\n\
             #define DEF_HELPER_FLAGS_0(name, flags, ret) \\\n\
             \x20   tcg_gen_callN(tcg_ctx, HELPER(name), dh_retvar(ret), 0, NULL);\n",
        ),
        (
            fork("qemu/include/exec/helper-tcg.h"),
            "#define DEF_HELPER_FLAGS_0(NAME, FLAGS, ret) \\\n\
             \x20 { .func = HELPER(NAME), .name = str(NAME), .flags = FLAGS },\n",
        ),
        (
            fork("qemu/tcg/tcg.c"),
            "#include \"tcg-op.h\"\n#include \"exec/helper-proto.h\"\n",
        ),
        (
            fork("qemu/tcg/tcg-runtime.h"),
            "DEF_HELPER_FLAGS_2(div_i32, TCG_CALL_NO_RWG_SE, s32, s32, s32)\n",
        ),
        (
            fork("qemu/target-i386/helper.h"),
            "#include \"exec/def-helper.h\"\n\
             DEF_HELPER_FLAGS_4(cc_compute_all, TCG_CALL_NO_RWG_SE, tl, tl, tl, tl, int)\n\
             DEF_HELPER_2(divb_AL, void, env, tl)\n\
             #ifdef TARGET_X86_64\n\
             DEF_HELPER_2(syscall, void, env, int)\n\
             #endif\n",
        ),
        (
            fork("qemu/target-arm/helper.h"),
            "DEF_HELPER_3(add_cc, i32, env, i32, i32)\nDEF_HELPER_1(wfi, void, env)\n",
        ),
        (donor("tci.c"), TCI_C),
        (
            donor("tcg/tci/tcg-target.c"),
            "    tcg_target_available_regs[TCG_TYPE_I32] = BIT(TCG_TARGET_NB_REGS) - 1;\n\
             \x20   tcg_target_call_clobber_regs = BIT(TCG_TARGET_NB_REGS) - 1;\n\
             \x20   tcg_add_target_add_op_defs(tcg_target_op_defs);\n",
        ),
        (
            donor("tcg/tci/tcg-target.h"),
            "#define tcg_qemu_tb_exec(env, tb_ptr) \\\n    ((uintptr_t (*)(void *, void *))tcg_ctx.code_gen_prologue)(env, tb_ptr)\n",
        ),
        // Present in both trees: the fork's copy must win
        (donor("configure"), "tcg_interpreter=\"upstream\"\n"),
    ]
}

pub fn tree() -> MemoryStore {
    let mut store = MemoryStore::new();
    for (path, contents) in files() {
        store.insert(path, contents);
    }
    store
}

/// The effective configuration with the default layout.
pub fn config() -> BuildConfig {
    config::resolve(None).unwrap()
}

/// Write the tree below `dir`.
pub fn write_to(dir: &Path) {
    for (path, contents) in files() {
        let path = dir.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

pub fn fork(path: &str) -> String {
    format!("{ROOT}/{path}")
}

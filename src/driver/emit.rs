//! Command lines for the native build and the JavaScript link.

use crate::config::BuildConfig;
use crate::driver::toolchain::{Invocation, Toolchain};
use serde_json::Value;
use std::path::Path;

/// `EXPORTED_FUNCTIONS` value: a JSON array of the symbol names.
pub fn exported_functions(exports: &[String]) -> String {
    Value::from(exports.to_vec()).to_string()
}

/// `emmake make [UNICORN_ARCHS=...]` in the tree root.
///
/// An empty `archs` leaves the choice to `config.mk`.
pub fn compile_invocation(toolchain: &Toolchain, root: &Path, archs: &[String]) -> Invocation {
    let mut invocation = Invocation::new(&toolchain.emmake)
        .arg("make")
        .current_dir(root);
    if !archs.is_empty() {
        invocation = invocation.arg(format!("UNICORN_ARCHS={}", archs.join(" ")));
    }
    invocation
}

/// `emcc` linking the static library into the JavaScript module.
pub fn emit_invocation(toolchain: &Toolchain, config: &BuildConfig) -> Invocation {
    let toggles = &config.toggles;
    let library = config.tree.root.join(&config.emit.library);

    let mut invocation = Invocation::new(&toolchain.emcc)
        .arg(&toggles.optimize)
        .args(["--memory-init-file", "0"])
        .arg(library.display().to_string())
        .arg("-s")
        .arg(format!(
            "EXPORTED_FUNCTIONS={}",
            exported_functions(&config.emit.exports)
        ));

    if toggles.memory_growth {
        invocation = invocation.args(["-s", "ALLOW_MEMORY_GROWTH=1"]);
    }
    if toggles.pthreads {
        invocation = invocation.args(["-s", "USE_PTHREADS=1"]);
    }
    if toggles.debug {
        invocation = invocation.arg("-g");
    }
    if let Some(name) = &toggles.module_name {
        invocation = invocation
            .args(["-s", "MODULARIZE=1", "-s"])
            .arg(format!("EXPORT_NAME={name}"));
    }

    invocation.arg("-o").arg(config.emit.output.display().to_string())
}

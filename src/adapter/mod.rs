//! Calling-convention adapters for the TCG interpreter.
//!
//! The interpreter calls every helper through one pointer type: ten
//! transport-width arguments, one transport-width result. Helpers have 0–5
//! typed parameters and may return nothing. For each helper this module emits
//! a trampoline with the fixed shape that narrows its arguments, calls the
//! real helper and widens (or fabricates) the result, then rewrites the call
//! emission sites to take the trampoline's address instead of the helper's.
//!
//! Trampoline bodies are shared per shape (arity × void-ness) as C macros;
//! each helper only contributes a one-line instantiation. Void-ness is
//! decided here, at generation time.

pub mod errors;
pub mod shim;
pub mod signature;
pub mod template;

pub use errors::{AdapterError, ScanError};
pub use signature::{
    parse_helper_header, HelperLine, HelperSignature, MAX_ARITY, TRANSPORT_SLOTS, VOID_TOKENS,
};
pub use template::TrampolineTemplate;

use crate::patch::{InsertionRule, ReplacementRule};
use crate::store::FileStore;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "helper_tramp_";
pub const DEFAULT_TRANSPORT: &str = "tcg_target_ulong";
pub const DEFAULT_HEADER_NAME: &str = "helper-tramp.h";

/// Nested `#include`s followed while scanning.
const MAX_INCLUDE_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterGenerator {
    prefix: String,
    transport: String,
    return_type: String,
    header_name: String,
}

impl Default for AdapterGenerator {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            transport: DEFAULT_TRANSPORT.to_string(),
            return_type: DEFAULT_TRANSPORT.to_string(),
            header_name: DEFAULT_HEADER_NAME.to_string(),
        }
    }
}

/// A header produced by [`AdapterGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAdapters {
    pub header: String,
    pub helpers: usize,
    pub shapes: BTreeSet<TrampolineTemplate>,
}

impl AdapterGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Name of the trampoline generated for `sig`.
    pub fn trampoline_name(&self, sig: &HelperSignature) -> String {
        format!("{}{}", self.prefix, sig.name())
    }

    /// Read `header` and every quoted include next to it, splicing included
    /// declarations in place.
    pub fn scan<S: FileStore>(&self, store: &S, header: &Path) -> Result<Vec<HelperLine>, ScanError> {
        if !store.exists(header) {
            return Err(ScanError::Missing(header.to_path_buf()));
        }
        let mut out = Vec::new();
        scan_into(store, header, 0, &mut out)?;
        Ok(out)
    }

    /// Emit the trampoline header for the given helper lines.
    pub fn generate(&self, lines: &[HelperLine]) -> GeneratedAdapters {
        let shapes: BTreeSet<TrampolineTemplate> = lines
            .iter()
            .filter_map(|line| match line {
                HelperLine::Helper(sig) => Some(TrampolineTemplate::for_signature(sig)),
                _ => None,
            })
            .collect();

        let guard = self
            .header_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect::<String>();

        let mut header = String::new();
        let _ = writeln!(header, "/* Generated by unicorn-patcher. Do not edit. */");
        let _ = writeln!(header, "#ifndef {guard}");
        let _ = writeln!(header, "#define {guard} 1");
        header.push('\n');
        let _ = writeln!(header, "#include \"exec/helper-proto.h\"");
        header.push('\n');

        for shape in &shapes {
            header.push_str(&shape.render_macro(&self.prefix, &self.transport, &self.return_type));
            header.push('\n');
        }

        let mut helpers = 0;
        for line in lines {
            match line {
                HelperLine::Helper(sig) => {
                    let template = TrampolineTemplate::for_signature(sig);
                    let _ = writeln!(header, "{}", template.instantiate(sig));
                    helpers += 1;
                }
                HelperLine::Conditional(directive) => {
                    let _ = writeln!(header, "{directive}");
                }
                HelperLine::Include(_) => {}
            }
        }
        header.push('\n');

        for shape in &shapes {
            let _ = writeln!(header, "#undef {}", shape.macro_name());
        }
        header.push('\n');
        let _ = writeln!(header, "#endif /* {guard} */");

        debug!(helpers, shapes = shapes.len(), "generated trampolines");
        GeneratedAdapters {
            header,
            helpers,
            shapes,
        }
    }

    /// Rewrites of the helper call-emission sites, keyed by path relative to
    /// the QEMU root.
    ///
    /// `helper-gen.h` passes the function pointer to `tcg_gen_callN`, and
    /// `helper-tcg.h` builds the table `tcg_gen_callN` looks that pointer up
    /// in; both must name the trampoline.
    pub fn redirect_rules(&self) -> Vec<(PathBuf, ReplacementRule)> {
        let prefix = &self.prefix;
        vec![
            (
                PathBuf::from("include/exec/helper-gen.h"),
                ReplacementRule::literal(
                    "HELPER(name), dh_retvar(ret)",
                    format!("glue({prefix}, name), dh_retvar(ret)"),
                ),
            ),
            (
                PathBuf::from("include/exec/helper-tcg.h"),
                ReplacementRule::literal(
                    ".func = HELPER(NAME)",
                    format!(".func = glue({prefix}, NAME)"),
                ),
            ),
        ]
    }

    /// Includes that make the trampolines visible where they are referenced.
    pub fn include_rules(&self) -> Vec<(PathBuf, InsertionRule)> {
        let include = format!("#include \"{}\"", self.header_name);
        vec![
            (
                PathBuf::from("include/exec/helper-gen.h"),
                InsertionRule::new("#include <exec/helper-head.h>", [include.clone()]),
            ),
            (
                PathBuf::from("tcg/tcg.c"),
                InsertionRule::new("#include \"exec/helper-proto.h\"", [include]),
            ),
        ]
    }
}

fn scan_into<S: FileStore>(
    store: &S,
    path: &Path,
    depth: usize,
    out: &mut Vec<HelperLine>,
) -> Result<(), ScanError> {
    let source = store.read_to_string(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let lines = parse_helper_header(&source).map_err(|source| ScanError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = path.parent().unwrap_or(Path::new(""));
    for line in lines {
        if let HelperLine::Include(name) = &line {
            let nested = dir.join(name);
            if depth < MAX_INCLUDE_DEPTH && store.exists(&nested) {
                scan_into(store, &nested, depth + 1, out)?;
            }
            continue;
        }
        out.push(line);
    }
    Ok(())
}

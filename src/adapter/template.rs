use crate::adapter::errors::AdapterError;
use crate::adapter::signature::{HelperSignature, MAX_ARITY, TRANSPORT_SLOTS};
use std::fmt::Write;

/// The shared trampoline body for every helper of one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrampolineTemplate {
    arity: usize,
    returns_void: bool,
}

impl TrampolineTemplate {
    pub fn new(arity: usize, returns_void: bool) -> Result<Self, AdapterError> {
        if arity > MAX_ARITY {
            return Err(AdapterError::UnsupportedArity {
                name: format!("<{arity}-argument shape>"),
                arity,
                max: MAX_ARITY,
            });
        }
        Ok(Self {
            arity,
            returns_void,
        })
    }

    pub fn for_signature(sig: &HelperSignature) -> Self {
        // HelperSignature::new already bounds the arity
        Self {
            arity: sig.arity(),
            returns_void: sig.returns_void(),
        }
    }

    /// All twelve shapes, in arity order, void first.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=MAX_ARITY).flat_map(|arity| {
            [true, false].into_iter().map(move |returns_void| Self {
                arity,
                returns_void,
            })
        })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn returns_void(&self) -> bool {
        self.returns_void
    }

    /// `TRAMPOLINE_<arity>_<VOID|RET>`
    pub fn macro_name(&self) -> String {
        let kind = if self.returns_void { "VOID" } else { "RET" };
        format!("TRAMPOLINE_{}_{}", self.arity, kind)
    }

    /// The C macro defining this shape's body.
    ///
    /// `prefix` is glued onto the helper name to form the trampoline name;
    /// `transport` is the interpreter's argument type and `ret` the type it
    /// expects back.
    pub fn render_macro(&self, prefix: &str, transport: &str, ret: &str) -> String {
        let mut params = vec!["name".to_string()];
        params.extend((1..=self.arity).map(|i| format!("t{i}")));

        let slots: Vec<String> = (0..TRANSPORT_SLOTS)
            .map(|i| format!("{transport} a{i}"))
            .collect();

        let args: Vec<String> = (0..self.arity)
            .map(|i| format!("(dh_ctype(t{}))a{i}", i + 1))
            .collect();
        let call = format!("HELPER(name)({})", args.join(", "));

        let mut out = String::new();
        let _ = writeln!(out, "#define {}({}) \\", self.macro_name(), params.join(", "));
        let _ = writeln!(out, "static inline {ret} glue({prefix}, name)( \\");
        let _ = writeln!(out, "    {}, \\", slots[..5].join(", "));
        let _ = writeln!(out, "    {}) \\", slots[5..].join(", "));
        let _ = writeln!(out, "{{ \\");
        if self.returns_void {
            let _ = writeln!(out, "    {call}; \\");
            let _ = writeln!(out, "    return 0; \\");
        } else {
            let _ = writeln!(out, "    return ({ret}){call}; \\");
        }
        out.push_str("}\n");
        out
    }

    /// The one-line instantiation of this shape for `sig`.
    pub fn instantiate(&self, sig: &HelperSignature) -> String {
        let mut args = vec![sig.name().to_string()];
        args.extend(sig.params().iter().cloned());
        format!("{}({})", self.macro_name(), args.join(", "))
    }
}

use crate::adapter::errors::AdapterError;
use std::fmt;

/// Largest helper arity a trampoline template exists for.
pub const MAX_ARITY: usize = 5;

/// Argument slots in the interpreter's single call shape.
pub const TRANSPORT_SLOTS: usize = 10;

/// Return-type spellings that mean "no value".
pub const VOID_TOKENS: &[&str] = &["void", "noreturn"];

/// A helper as declared by `DEF_HELPER_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSignature {
    name: String,
    ret: String,
    params: Vec<String>,
}

impl HelperSignature {
    pub fn new<P: Into<String>>(
        name: impl Into<String>,
        ret: impl Into<String>,
        params: impl IntoIterator<Item = P>,
    ) -> Result<Self, AdapterError> {
        let name = name.into();
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        if params.len() > MAX_ARITY {
            return Err(AdapterError::UnsupportedArity {
                name,
                arity: params.len(),
                max: MAX_ARITY,
            });
        }
        Ok(Self {
            name,
            ret: ret.into(),
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ret(&self) -> &str {
        &self.ret
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn returns_void(&self) -> bool {
        VOID_TOKENS.contains(&self.ret.trim())
    }
}

impl fmt::Display for HelperSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}({})", self.ret, self.name, self.params.join(", "))
    }
}

/// One meaningful line of a helper header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperLine {
    Helper(HelperSignature),
    /// `#if`, `#ifdef`, `#ifndef`, `#elif`, `#else`, `#endif`, kept verbatim.
    Conditional(String),
    /// Target of a quoted `#include`.
    Include(String),
}

const CONDITIONALS: &[&str] = &["if", "ifdef", "ifndef", "elif", "else", "endif"];

/// Extract helper declarations from a QEMU `helper.h`-style header.
///
/// Declarations may span several physical lines; they end at the closing
/// parenthesis.
pub fn parse_helper_header(source: &str) -> Result<Vec<HelperLine>, AdapterError> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if let Some((start, mut text)) = pending.take() {
            text.push(' ');
            text.push_str(trimmed);
            if text.contains(')') {
                lines.push(HelperLine::Helper(parse_declaration(start, &text)?));
            } else {
                pending = Some((start, text));
            }
            continue;
        }

        if let Some(directive) = trimmed.strip_prefix('#') {
            let directive = directive.trim_start();
            let keyword = directive
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("");
            if CONDITIONALS.contains(&keyword) {
                lines.push(HelperLine::Conditional(format!("#{directive}")));
            } else if keyword == "include" {
                let target = directive["include".len()..].trim();
                if let Some(quoted) = target
                    .strip_prefix('"')
                    .and_then(|rest| rest.strip_suffix('"'))
                {
                    lines.push(HelperLine::Include(quoted.to_string()));
                }
            }
            continue;
        }

        if !trimmed.starts_with("DEF_HELPER_") {
            continue;
        }
        if trimmed.contains(')') {
            lines.push(HelperLine::Helper(parse_declaration(line_no, trimmed)?));
        } else {
            pending = Some((line_no, trimmed.to_string()));
        }
    }

    if let Some((start, _)) = pending {
        return Err(AdapterError::Unterminated { line: start });
    }

    Ok(lines)
}

fn parse_declaration(line: usize, text: &str) -> Result<HelperSignature, AdapterError> {
    let malformed = || AdapterError::MalformedDeclaration {
        line,
        text: text.to_string(),
    };

    let (head, rest) = text.split_once('(').ok_or_else(malformed)?;
    let (flags, digits) = match head.trim().strip_prefix("DEF_HELPER_FLAGS_") {
        Some(digits) => (true, digits),
        None => (
            false,
            head.trim()
                .strip_prefix("DEF_HELPER_")
                .ok_or_else(malformed)?,
        ),
    };
    let arity: usize = digits.parse().map_err(|_| malformed())?;

    let close = rest.find(')').ok_or_else(malformed)?;
    let args: Vec<&str> = rest[..close].split(',').map(str::trim).collect();

    let fixed = if flags { 3 } else { 2 };
    if args.len() != fixed + arity || args.iter().any(|a| a.is_empty()) {
        return Err(malformed());
    }

    let name = args[0];
    let ret = args[fixed - 1];
    HelperSignature::new(name, ret, args[fixed..].iter().copied())
}

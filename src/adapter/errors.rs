use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("helper '{name}' takes {arity} arguments; trampolines exist for at most {max}")]
    UnsupportedArity {
        name: String,
        arity: usize,
        max: usize,
    },

    #[error("malformed helper declaration on line {line}: {text}")]
    MalformedDeclaration { line: usize, text: String },

    #[error("helper declaration on line {line} is missing a closing parenthesis")]
    Unterminated { line: usize },
}

/// Failure while collecting helper declarations from the fork.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("helper header does not exist: {0}")]
    Missing(std::path::PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: AdapterError,
    },
}

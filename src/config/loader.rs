use crate::config::schema::{BuildConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Default user configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "unicorn-patcher.toml";

/// The built-in Emscripten recipe.
pub const EMBEDDED_RECIPE: &str = include_str!("../../patches/unicorn-js.toml");

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read build config from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse build config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse build config TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid build config ({}): {}", path.display(), source),
                None => write!(f, "invalid build config: {}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

/// Parse and validate one document.
///
/// Patches without their own `version_range` inherit the document's.
pub fn load_from_str(input: &str) -> Result<BuildConfig, ConfigError> {
    let mut config: BuildConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    if let Some(range) = &config.meta.version_range {
        for patch in &mut config.patches {
            if patch.version_range.is_none() {
                patch.version_range = Some(range.clone());
            }
        }
    }
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<BuildConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

pub fn load_recipe() -> Result<BuildConfig, ConfigError> {
    load_from_str(EMBEDDED_RECIPE)
}

/// The effective configuration for a run.
///
/// Settings come from `user` (or defaults); patches are the embedded
/// recipe's followed by the user's. The merged set is validated again so
/// user patches cannot reuse a recipe id.
pub fn resolve(user: Option<BuildConfig>) -> Result<BuildConfig, ConfigError> {
    let recipe = load_recipe()?;
    let mut config = user.unwrap_or_default();
    let mut patches = recipe.patches;
    patches.append(&mut config.patches);
    config.patches = patches;
    if config.meta.name.is_empty() {
        config.meta = recipe.meta;
    }
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

/// Load `path` if given, else `unicorn-patcher.toml` when present, and
/// merge it with the embedded recipe.
pub fn load(path: Option<&Path>) -> Result<BuildConfig, ConfigError> {
    let source = match path {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
    };
    let user = source
        .as_deref()
        .map(|path| load_from_path(path))
        .transpose()?;
    resolve(user).map_err(|error| match &source {
        Some(source) => error.with_path(source),
        None => error,
    })
}

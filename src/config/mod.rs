pub mod loader;
pub mod schema;
pub mod version;

pub use loader::{
    load, load_from_path, load_from_str, load_recipe, resolve, ConfigError, DEFAULT_CONFIG_FILE,
    EMBEDDED_RECIPE,
};
pub use schema::{
    AdapterConfig, BuildConfig, EmitConfig, FeatureToggles, Metadata, Operation, PatchDefinition,
    PatchStage, RuleSpec, TreeConfig, ValidationError, ValidationIssue, DEFAULT_EXPORTS,
    KNOWN_ARCHS,
};
pub use version::{matches_requirement, parse_api_version, VersionError, API_HEADER};

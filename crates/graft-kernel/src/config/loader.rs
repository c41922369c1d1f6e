use std::path::Path;
use std::sync::LazyLock;

pub use config::FileFormat;
use config::{Config as Cfg, Environment, File};
use regex::Regex;
use serde::de::DeserializeOwned;

use super::schema::HostConfig;

/// Prefix of environment variables overriding host configuration.
pub const ENV_PREFIX: &str = "GRAFT";

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid regex"));

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// `.yaml`/`.yml`, `.toml`, `.json`, `.ini`, `.ron` and `.json5` are
/// recognised.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// `${VAR_NAME}` is replaced first, then `$VAR_NAME`. References to unset
/// variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };

    let braced = BRACED_VAR.replace_all(content, lookup).into_owned();
    BARE_VAR.replace_all(&braced, lookup).into_owned()
}

/// Load configuration from a file
///
/// The format is detected from the extension; environment variables are
/// substituted before parsing.
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration with environment variable overrides
///
/// Environment variables are prefixed with `env_prefix` followed by `_`, and
/// use double underscores for nesting: `reload.debounce_ms` is overridden by
/// `GRAFT_RELOAD__DEBOUNCE_MS` when the prefix is `GRAFT`.
pub fn load_with_env<T>(path: Option<&str>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();

    if let Some(path) = path {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&content);
        builder = builder.add_source(File::from_str(&substituted, format));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load the host configuration, optionally from a file, with `GRAFT_*`
/// overrides applied on top.
pub fn load_host_config(path: Option<&str>) -> ConfigResult<HostConfig> {
    load_with_env(path, ENV_PREFIX)
}

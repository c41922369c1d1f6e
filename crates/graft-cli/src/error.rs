use graft_kernel::config::ConfigError;
use graft_kernel::plugin::PluginError;
use graft_plugins::ReloadError;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Hot reload error: {0}")]
    Reload(#[from] ReloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("`{0}` failed")]
    Command(&'static str),

    #[error("{0}")]
    Other(String),
}

pub type CliResult<T> = Result<T, error_stack::Report<CliError>>;

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError::Other(s.to_string())
    }
}

impl From<String> for CliError {
    fn from(s: String) -> Self {
        CliError::Other(s)
    }
}

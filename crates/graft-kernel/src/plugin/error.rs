//! Typed errors for the plugin sub-system.

use std::path::PathBuf;

use error_stack::Report;
use thiserror::Error;

/// Plain result alias for plugin operations.
pub type PluginResult<T> = ::std::result::Result<T, PluginError>;

/// Error-stack–backed result alias for callers that attach context.
///
/// Equivalent to `Result<T, error_stack::Report<PluginError>>`.
pub type PluginReportResult<T> = ::std::result::Result<T, Report<PluginError>>;

/// Extension trait to convert `Result<T, PluginError>` into [`PluginReportResult<T>`].
pub trait IntoPluginReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> PluginReportResult<T>;
}

impl<T> IntoPluginReport<T> for ::std::result::Result<T, PluginError> {
    #[inline]
    fn into_report(self) -> PluginReportResult<T> {
        self.map_err(Report::new)
    }
}

/// Errors that can occur during plugin lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// The named plugin is not present in the registry.
    #[error("Plugin not registered: {0}")]
    NotRegistered(String),

    /// `load` was requested for a plugin that is already loaded.
    #[error("Plugin already loaded: {0}")]
    AlreadyLoaded(String),

    /// `unload` was requested for a plugin that is not loaded.
    #[error("Plugin not loaded: {0}")]
    NotLoaded(String),

    /// The plugin is already present in the installed-modules directory.
    #[error("Plugin already installed: {0}")]
    AlreadyInstalled(String),

    /// The plugin is absent from the installed-modules directory.
    #[error("Plugin not installed: {0}")]
    NotInstalled(String),

    /// The plugin manifest declares neither `main` nor an `./entry` export.
    #[error("Plugin {0} declares no entry point")]
    MissingEntryPoint(String),

    /// A plugin name or specifier could not be resolved to installed code.
    #[error("Unable to resolve plugin {0}")]
    ResolutionFailure(String),

    /// The package-fetch collaborator exited unsuccessfully.
    #[error("Plugin installation failed:\n{0}")]
    InstallFailure(String),

    /// A tracked script could not be parsed.
    #[error("Failed to parse {}: {message}", .path.display())]
    ParseFailure {
        /// The file that failed to parse.
        path: PathBuf,
        /// Parser diagnostics.
        message: String,
    },

    /// A reload of the same plugin is already running.
    #[error("Plugin {0} is already reloading")]
    ReloadInProgress(String),

    /// A lifecycle hook reported an error or timed out.
    #[error("Plugin {plugin} failed in {hook} hook: {message}")]
    HookFailed {
        /// Plugin name.
        plugin: String,
        /// `load` or `unload`.
        hook: &'static str,
        /// Failure description.
        message: String,
    },

    /// Script evaluation failed while importing a plugin generation.
    #[error("Script error in {plugin}: {message}")]
    Script {
        /// Plugin name.
        plugin: String,
        /// Engine diagnostics.
        message: String,
    },

    /// An I/O error surfaced during a plugin operation.
    #[error("Plugin I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A (de)serialization error surfaced during a plugin operation.
    #[error("Plugin serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Catch-all for errors that don't fit the above categories.
    #[error("{0}")]
    Other(String),
}

impl PluginError {
    /// Whether the error is a lifecycle-state violation rather than an
    /// operational failure.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Self::NotRegistered(_)
                | Self::AlreadyLoaded(_)
                | Self::NotLoaded(_)
                | Self::AlreadyInstalled(_)
                | Self::NotInstalled(_)
                | Self::ReloadInProgress(_)
        )
    }
}

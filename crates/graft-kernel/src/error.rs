//! Crate-level error types for `graft-kernel`.
//!
//! [`KernelError`] composes the typed errors of every sub-module; pair it
//! with [`error_stack::Report`] (via [`KernelResult`]) to attach context as
//! errors travel towards the binary.
//!
//! ```rust,ignore
//! use graft_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_manifest() -> KernelResult<String> {
//!     let raw = std::fs::read_to_string("plugins/package.json")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("reading the root manifest")?;
//!     Ok(raw)
//! }
//! ```

use thiserror::Error;

/// Crate-level error type for `graft-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A plugin sub-system error.
    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::plugin::PluginError),

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;

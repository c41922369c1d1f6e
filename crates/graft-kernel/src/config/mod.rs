//! Host configuration.
//!
//! [`schema`] holds the typed configuration; the loader functions below
//! (behind the `config` feature) read it from YAML, TOML, JSON, INI, RON or
//! JSON5 files.
//!
//! ## Features
//!
//! - Auto-detection of format from file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - `GRAFT_`-prefixed environment overrides, `__` separating nested keys

pub mod schema;

pub use schema::{
    FetcherConfig, HostConfig, LayoutConfig, ReloadConfig, ScriptLimits, StrategyKind,
};

#[cfg(feature = "config")]
mod loader;

#[cfg(feature = "config")]
pub use loader::*;

//! Graft plugin engine.
//!
//! - [`installer`]: installs plugin packages through an external fetcher
//! - [`script`]: Rhai host with a generation-aware module cache
//! - [`registry`]: plugin lifecycle and reloads
//! - [`hot_reload`]: import graphs, invalidation and file watching

pub mod hot_reload;
pub mod installer;
pub mod registry;
pub mod script;
pub mod specifier;

pub use graft_kernel::plugin::{
    Generation, HookContext, Manifest, NoHooks, PluginError, PluginHooks, PluginResult,
    PluginState, ReloadEvent, ReloadPolicy, ReloadStrategy,
};
pub use hot_reload::{HotReloadManager, ImportGraph, Invalidation, Invalidator, ReloadError};
pub use installer::{CommandFetcher, Installer, PackageFetcher, SetupEntry};
pub use registry::{PluginHandle, PluginInfo, PluginRegistry, RegistryOptions, ReloadGuard};
pub use script::{HostCounters, ScriptHost, ScriptInstance};
pub use specifier::SpecifierNormalizer;

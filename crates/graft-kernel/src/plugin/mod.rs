//! Plugin lifecycle contracts.
//!
//! The kernel defines what a plugin looks like to the host (its state, its
//! hooks, the events emitted around it); `graft-plugins` provides the
//! registry, installer and hot-reload machinery built on these types.

pub mod error;
pub mod manifest;


pub use error::{IntoPluginReport, PluginError, PluginReportResult, PluginResult};
pub use manifest::{ENTRY_EXPORT, ExportTarget, Exports, HOST_CONDITION, Manifest};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a plugin.
///
/// A plugin missing from the registry is `Unregistered`. `Loaded` implies
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    Unregistered,
    Registered,
    Loaded,
}

impl PluginState {
    pub fn is_registered(self) -> bool {
        !matches!(self, Self::Unregistered)
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Loaded => "loaded",
        };
        f.write_str(s)
    }
}

/// Cache generation token.
///
/// Issued in strictly increasing order by the script host; a module evaluated
/// for generation `T` is only reused while `T` is still the generation its
/// file requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a hook gets to know about the plugin it runs for.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub plugin: String,
    pub generation: Generation,
    pub manifest: Arc<Manifest>,
}

impl HookContext {
    pub fn new(plugin: impl Into<String>, generation: Generation, manifest: Arc<Manifest>) -> Self {
        Self {
            plugin: plugin.into(),
            generation,
            manifest,
        }
    }
}

/// Load and unload hooks of one plugin instance.
///
/// Both hooks are optional; the default implementations do nothing, which is
/// how an absent hook behaves.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Run after the instance has been imported, before it is marked loaded.
    async fn load(&self, ctx: &HookContext) -> PluginResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Run before the instance is dropped.
    async fn unload(&self, ctx: &HookContext) -> PluginResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Whether the instance provides a load hook.
    fn has_load(&self) -> bool {
        true
    }

    /// Whether the instance provides an unload hook.
    fn has_unload(&self) -> bool {
        true
    }
}

/// Hooks for a plugin that exports neither hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl PluginHooks for NoHooks {
    fn has_load(&self) -> bool {
        false
    }

    fn has_unload(&self) -> bool {
        false
    }
}

/// What happens to a reload request for a plugin that is already reloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Fail the second request with [`PluginError::ReloadInProgress`].
    Reject,
    /// Wait for the running reload to finish, then run.
    #[default]
    Queue,
}

/// How file changes are turned into reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStrategy {
    /// Reload on every change notification.
    Immediate,
    /// Reload once changes to a file have settled for the given duration.
    Debounced(Duration),
    /// Never reload automatically; changes are only recorded.
    Manual,
}

impl Default for ReloadStrategy {
    fn default() -> Self {
        Self::Debounced(Duration::from_millis(300))
    }
}

/// Lifecycle and reload notifications, broadcast by the registry.
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    Registered {
        plugin: String,
        generation: Generation,
    },
    Loaded {
        plugin: String,
        generation: Generation,
    },
    Unloaded {
        plugin: String,
        generation: Generation,
    },
    Unregistered {
        plugin: String,
    },
    Installed {
        plugin: String,
        specifier: String,
    },
    Uninstalled {
        plugin: String,
    },
    ReloadStarted {
        plugin: String,
        reinstall: bool,
    },
    ReloadCompleted {
        plugin: String,
        generation: Generation,
        /// Files evaluated fresh for this generation.
        touched: Vec<PathBuf>,
        duration: Duration,
    },
    ReloadFailed {
        plugin: String,
        error: String,
    },
    HookFailed {
        plugin: String,
        hook: &'static str,
        error: String,
    },
}

impl ReloadEvent {
    /// Name of the plugin the event concerns.
    pub fn plugin(&self) -> &str {
        match self {
            Self::Registered { plugin, .. }
            | Self::Loaded { plugin, .. }
            | Self::Unloaded { plugin, .. }
            | Self::Unregistered { plugin }
            | Self::Installed { plugin, .. }
            | Self::Uninstalled { plugin }
            | Self::ReloadStarted { plugin, .. }
            | Self::ReloadCompleted { plugin, .. }
            | Self::ReloadFailed { plugin, .. }
            | Self::HookFailed { plugin, .. } => plugin,
        }
    }
}

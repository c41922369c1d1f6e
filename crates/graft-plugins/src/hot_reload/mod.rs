//! Hot reload for script plugins
//!
//! - [`graph`]: static import graph of each plugin
//! - [`invalidator`]: propagation of a change to a new cache generation
//! - [`watcher`]: file system notifications for tracked files
//! - [`manager`]: turns notifications into registry reloads

pub mod graph;
pub mod invalidator;
pub mod manager;
pub mod watcher;

pub use graph::{DependantEdge, ImportGraph, ImportStatement, ParsedFile};
pub use invalidator::{Invalidation, Invalidator};
pub use manager::HotReloadManager;
pub use watcher::{PluginWatcher, WatchConfig, WatchEvent, WatchEventKind};

use graft_kernel::plugin::PluginError;

/// Hot-reload errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReloadError {
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Hot-reload manager already running")]
    AlreadyRunning,

    #[error("Watch event receiver already taken")]
    ReceiverTaken,
}

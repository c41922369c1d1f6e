//! Registry entries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use graft_kernel::plugin::{Generation, HookContext, Manifest, PluginHooks, PluginState};
use serde::Serialize;

use crate::hot_reload::graph::ImportGraph;
use crate::script::ScriptInstance;

/// Code backing a registered plugin.
pub enum PluginCode {
    /// Rhai entry script with its import graph and active instance.
    Script {
        graph: ImportGraph,
        instance: Arc<ScriptInstance>,
    },
    /// Hooks implemented in Rust.
    Native { hooks: Arc<dyn PluginHooks> },
}

impl PluginCode {
    pub fn hooks(&self) -> Arc<dyn PluginHooks> {
        match self {
            Self::Script { instance, .. } => instance.clone() as Arc<dyn PluginHooks>,
            Self::Native { hooks } => hooks.clone(),
        }
    }

    pub fn graph(&self) -> Option<&ImportGraph> {
        match self {
            Self::Script { graph, .. } => Some(graph),
            Self::Native { .. } => None,
        }
    }
}

/// A registered plugin. Only reachable through a registry slot.
pub struct Plugin {
    pub(crate) name: String,
    pub(crate) specifier: String,
    pub(crate) entry_file: Option<PathBuf>,
    pub(crate) manifest: Arc<Manifest>,
    pub(crate) state: PluginState,
    pub(crate) code: PluginCode,
    pub(crate) generation: Generation,
    pub(crate) registered_at: DateTime<Utc>,
    pub(crate) loaded_at: Option<DateTime<Utc>>,
    /// Set once the plugin left the registry; holders of a stale slot treat
    /// it as unregistered.
    pub(crate) removed: bool,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    pub fn entry_file(&self) -> Option<&Path> {
        self.entry_file.as_deref()
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn state(&self) -> PluginState {
        if self.removed {
            PluginState::Unregistered
        } else {
            self.state
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn graph(&self) -> Option<&ImportGraph> {
        self.code.graph()
    }

    pub fn hooks(&self) -> Arc<dyn PluginHooks> {
        self.code.hooks()
    }

    pub fn context(&self) -> HookContext {
        HookContext::new(self.name.clone(), self.generation, self.manifest.clone())
    }

    pub fn info(&self) -> PluginInfo {
        let hooks = self.hooks();
        PluginInfo {
            name: self.name.clone(),
            specifier: self.specifier.clone(),
            state: self.state(),
            generation: self.generation,
            entry_file: self.entry_file.clone(),
            files: self.graph().map(ImportGraph::len).unwrap_or(0),
            has_load: hooks.has_load(),
            has_unload: hooks.has_unload(),
            registered_at: self.registered_at,
            loaded_at: self.loaded_at,
        }
    }
}

/// Read-only view of a plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub specifier: String,
    pub state: PluginState,
    pub generation: Generation,
    pub entry_file: Option<PathBuf>,
    /// Tracked script files.
    pub files: usize,
    pub has_load: bool,
    pub has_unload: bool,
    pub registered_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
}

//! Plugin registry.
//!
//! Owns every registered plugin and drives its lifecycle:
//! `Unregistered -> Registered -> Loaded`, plus the reload transition that
//! swaps a plugin's code for a new cache generation.
//!
//! Each plugin lives in its own slot behind a `tokio::sync::Mutex` that is
//! held for a whole transition, hook included, so transitions of one plugin
//! never interleave while different plugins proceed independently. The index
//! of slots is a `parking_lot::RwLock` that is never held across an await.

pub mod guard;
pub mod plugin;

pub use guard::{ReloadGuard, ReloadPermit};
pub use plugin::{Plugin, PluginCode, PluginInfo};

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use graft_kernel::config::ReloadConfig;
use graft_kernel::plugin::{
    Generation, Manifest, PluginError, PluginHooks, PluginResult, PluginState, ReloadEvent,
    ReloadPolicy,
};
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::hot_reload::graph::{ImportGraph, content_hash};
use crate::hot_reload::invalidator::Invalidator;
use crate::installer::{Installer, SetupEntry};
use crate::script::{LOAD_HOOK, ScriptHost, ScriptInstance};

/// Shared handle to a registry slot.
pub type PluginHandle = Arc<Mutex<Plugin>>;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// What a reload request does while the same plugin is reloading.
    pub policy: ReloadPolicy,
    /// Upper bound for a single hook; `None` waits forever.
    pub hook_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            policy: ReloadPolicy::default(),
            hook_timeout: None,
            event_capacity: 1024,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self {
            policy: config.policy,
            hook_timeout: config.hook_timeout(),
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: ReloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = Some(timeout);
        self
    }
}

#[derive(Default)]
struct Index {
    /// Registration order.
    order: Vec<String>,
    slots: HashMap<String, PluginHandle>,
    /// Mirror of each slot's state, readable without awaiting the slot.
    states: HashMap<String, PluginState>,
    /// Script file -> plugins whose import graph contains it.
    tracked: HashMap<PathBuf, BTreeSet<String>>,
}

/// What a successful reload produced.
struct Swap {
    generation: Generation,
    touched: Vec<PathBuf>,
}

/// A new generation imported but not yet swapped in.
struct Prepared {
    graph: ImportGraph,
    instance: ScriptInstance,
    generation: Generation,
    touched: Vec<PathBuf>,
}

enum Trigger<'a> {
    Explicit,
    Reinstall,
    Changed(&'a Path),
}

/// Registry of installed plugins.
pub struct PluginRegistry {
    host: Arc<ScriptHost>,
    installer: Arc<Installer>,
    index: RwLock<Index>,
    guard: ReloadGuard,
    options: RegistryOptions,
    event_tx: broadcast::Sender<ReloadEvent>,
}

impl PluginRegistry {
    pub fn new(host: Arc<ScriptHost>, installer: Arc<Installer>, options: RegistryOptions) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            host,
            installer,
            index: RwLock::new(Index::default()),
            guard: ReloadGuard::new(options.policy),
            options,
            event_tx,
        }
    }

    pub fn host(&self) -> &Arc<ScriptHost> {
        &self.host
    }

    pub fn installer(&self) -> &Arc<Installer> {
        &self.installer
    }

    pub fn guard(&self) -> &ReloadGuard {
        &self.guard
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Subscribe to lifecycle and reload events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ReloadEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register an installed script plugin.
    ///
    /// The plugin must be listed in the root manifest and ship a manifest
    /// with an entry point. Its import graph is built and the entry imported
    /// at a fresh generation. Registering a name that is already registered
    /// replaces its code and keeps its state; a loaded plugin runs its old
    /// unload hook and its new load hook around the swap.
    pub async fn register(&self, name: &str) -> PluginResult<PluginHandle> {
        let specifier = self.installer.install_specifier(name).ok_or_else(|| {
            PluginError::ResolutionFailure(format!(
                "{} is not listed in {}",
                name,
                self.installer.manifest_path().display()
            ))
        })?;
        let manifest = Arc::new(self.installer.plugin_manifest(name)?);
        let entry = self.installer.entry_file(name)?;

        let prepared = self.import_fresh(name, &entry).await?;
        if !prepared.instance.has_load() {
            warn!("Plugin {} does not export an {} hook", name, LOAD_HOOK);
        }

        let generation = prepared.generation;
        let code = PluginCode::Script {
            graph: prepared.graph,
            instance: Arc::new(prepared.instance),
        };
        Ok(self
            .insert(name, specifier, Some(entry), manifest, code, generation)
            .await)
    }

    /// Register a plugin implemented in Rust. It has no import graph; a
    /// reload only cycles its hooks.
    pub async fn register_native(
        &self,
        name: &str,
        specifier: impl Into<String>,
        hooks: Arc<dyn PluginHooks>,
        mut manifest: Manifest,
    ) -> PluginHandle {
        if manifest.name.is_empty() {
            manifest.name = name.to_string();
        }
        let generation = self.host.next_generation();
        self.insert(
            name,
            specifier.into(),
            None,
            Arc::new(manifest),
            PluginCode::Native { hooks },
            generation,
        )
        .await
    }

    /// Build the graph of `entry` and import every file of it fresh.
    async fn import_fresh(&self, name: &str, entry: &Path) -> PluginResult<Prepared> {
        let engine = self.host.engine().clone();
        let entry_path = entry.to_path_buf();
        let graph = tokio::task::spawn_blocking(move || ImportGraph::build(&engine, &entry_path))
            .await
            .map_err(join_error)??;

        let generation = self.host.next_generation();
        let touched = graph.files();
        let snapshot = self.host.cache().advance(&touched, generation);
        match self.host.import(name, graph.entry(), generation).await {
            Ok(instance) => Ok(Prepared {
                graph,
                instance,
                generation,
                touched,
            }),
            Err(e) => {
                self.host.cache().restore(snapshot);
                Err(e)
            }
        }
    }


    async fn insert(
        &self,
        name: &str,
        specifier: String,
        entry_file: Option<PathBuf>,
        manifest: Arc<Manifest>,
        code: PluginCode,
        generation: Generation,
    ) -> PluginHandle {
        let files = code.graph().map(ImportGraph::files).unwrap_or_default();

        let existing = self.index.read().slots.get(name).cloned();
        if let Some(handle) = existing {
            let mut plugin = handle.lock().await;
            if !plugin.removed {
                // the running instance is torn down before its code goes away
                let was_loaded = plugin.state.is_loaded();
                if was_loaded {
                    self.unload_locked(&mut plugin).await;
                }
                plugin.specifier = specifier;
                plugin.entry_file = entry_file;
                plugin.manifest = manifest;
                plugin.generation = generation;
                plugin.code = code;
                info!(
                    "Re-registered plugin {} at generation {} ({})",
                    name, generation, plugin.state
                );
                if was_loaded {
                    self.load_locked(&mut plugin).await;
                }
                drop(plugin);
                self.finish_registration(name, &files, generation);
                return handle;
            }
        }

        let handle = Arc::new(Mutex::new(Plugin {
            name: name.to_string(),
            specifier,
            entry_file,
            manifest,
            state: PluginState::Registered,
            code,
            generation,
            registered_at: Utc::now(),
            loaded_at: None,
            removed: false,
        }));

        {
            let mut index = self.index.write();
            if !index.order.iter().any(|n| n == name) {
                index.order.push(name.to_string());
            }
            index.slots.insert(name.to_string(), handle.clone());
            index
                .states
                .insert(name.to_string(), PluginState::Registered);
        }

        info!("Registered plugin {} at generation {}", name, generation);
        self.finish_registration(name, &files, generation);
        handle
    }

    fn finish_registration(&self, name: &str, files: &[PathBuf], generation: Generation) {
        let orphaned = self.retrack(name, files);
        self.host.cache().forget(&orphaned);
        self.emit(ReloadEvent::Registered {
            plugin: name.to_string(),
            generation,
        });
    }

    /// Point the tracked-file index of `name` at `files`; returns files no
    /// plugin tracks any more.
    fn retrack(&self, name: &str, files: &[PathBuf]) -> Vec<PathBuf> {
        let mut index = self.index.write();
        let mut orphaned = Vec::new();
        index.tracked.retain(|path, owners| {
            owners.remove(name);
            if owners.is_empty() && !files.contains(path) {
                orphaned.push(path.clone());
                false
            } else {
                true
            }
        });
        for file in files {
            index
                .tracked
                .entry(file.clone())
                .or_default()
                .insert(name.to_string());
        }
        orphaned
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn slot(&self, name: &str) -> PluginResult<PluginHandle> {
        self.index
            .read()
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))
    }

    fn set_state(&self, name: &str, state: PluginState) {
        let mut index = self.index.write();
        if index.slots.contains_key(name) {
            index.states.insert(name.to_string(), state);
        }
    }

    /// Run the load hook and mark the plugin loaded.
    ///
    /// A failing load hook is reported and the plugin is still loaded.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let handle = self.slot(name)?;
        let mut plugin = handle.lock().await;
        if plugin.removed {
            return Err(PluginError::NotRegistered(name.to_string()));
        }
        if plugin.state.is_loaded() {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        self.load_locked(&mut plugin).await;
        Ok(())
    }

    /// Run the unload hook and mark the plugin registered; with `unregister`
    /// the plugin then leaves the registry.
    pub async fn unload(&self, name: &str, unregister: bool) -> PluginResult<()> {
        let handle = self.slot(name)?;
        let mut plugin = handle.lock().await;
        if plugin.removed {
            return Err(PluginError::NotRegistered(name.to_string()));
        }
        if !plugin.state.is_loaded() {
            return Err(PluginError::NotLoaded(name.to_string()));
        }
        self.unload_locked(&mut plugin).await;
        if unregister {
            self.remove_locked(&mut plugin);
        }
        Ok(())
    }

    /// Remove a plugin from the registry, unloading it first if loaded.
    pub async fn unregister(&self, name: &str) -> PluginResult<()> {
        let handle = self.slot(name)?;
        let mut plugin = handle.lock().await;
        if plugin.removed {
            return Err(PluginError::NotRegistered(name.to_string()));
        }
        if plugin.state.is_loaded() {
            self.unload_locked(&mut plugin).await;
        }
        self.remove_locked(&mut plugin);
        Ok(())
    }

    /// Load every registered plugin that is not loaded yet, in registration
    /// order. Returns the plugins loaded by this pass.
    pub async fn load_all(&self) -> Vec<String> {
        let mut loaded = Vec::new();
        for name in self.registered_plugins() {
            match self.load(&name).await {
                Ok(()) => loaded.push(name),
                Err(PluginError::AlreadyLoaded(_)) => {}
                Err(e) => error!("Failed to load plugin {}: {}", name, e),
            }
        }
        loaded
    }

    /// Unload every loaded plugin in reverse registration order. With
    /// `unregister` every plugin, loaded or not, leaves the registry.
    /// Returns the plugins visited.
    pub async fn unload_all(&self, unregister: bool) -> Vec<String> {
        let mut visited = Vec::new();
        for name in self.registered_plugins().into_iter().rev() {
            let Ok(handle) = self.slot(&name) else {
                continue;
            };
            let mut plugin = handle.lock().await;
            if plugin.removed {
                continue;
            }
            let was_loaded = plugin.state.is_loaded();
            if was_loaded {
                self.unload_locked(&mut plugin).await;
            }
            if unregister {
                self.remove_locked(&mut plugin);
            }
            if was_loaded || unregister {
                visited.push(name);
            }
        }
        visited
    }

    async fn load_locked(&self, plugin: &mut Plugin) {
        let hooks = plugin.hooks();
        let ctx = plugin.context();
        self.call_hook(&plugin.name, "load", hooks.load(&ctx)).await;

        plugin.state = PluginState::Loaded;
        plugin.loaded_at = Some(Utc::now());
        self.set_state(&plugin.name, PluginState::Loaded);
        info!("Loaded plugin {} (generation {})", plugin.name, plugin.generation);
        self.emit(ReloadEvent::Loaded {
            plugin: plugin.name.clone(),
            generation: plugin.generation,
        });
    }

    async fn unload_locked(&self, plugin: &mut Plugin) {
        let hooks = plugin.hooks();
        let ctx = plugin.context();
        self.call_hook(&plugin.name, "unload", hooks.unload(&ctx)).await;

        plugin.state = PluginState::Registered;
        plugin.loaded_at = None;
        self.set_state(&plugin.name, PluginState::Registered);
        info!("Unloaded plugin {} (generation {})", plugin.name, plugin.generation);
        self.emit(ReloadEvent::Unloaded {
            plugin: plugin.name.clone(),
            generation: plugin.generation,
        });
    }

    fn remove_locked(&self, plugin: &mut Plugin) {
        plugin.removed = true;
        {
            let mut index = self.index.write();
            index.order.retain(|n| *n != plugin.name);
            index.slots.remove(&plugin.name);
            index.states.remove(&plugin.name);
        }
        let orphaned = self.retrack(&plugin.name, &[]);
        self.host.cache().forget(&orphaned);

        info!("Unregistered plugin {}", plugin.name);
        self.emit(ReloadEvent::Unregistered {
            plugin: plugin.name.clone(),
        });
    }

    /// Await a hook, bounded by the configured timeout. Failures are
    /// reported and swallowed.
    async fn call_hook<F>(&self, plugin: &str, hook: &'static str, call: F)
    where
        F: Future<Output = PluginResult<()>>,
    {
        let result = match self.options.hook_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(PluginError::HookFailed {
                    plugin: plugin.to_string(),
                    hook,
                    message: format!("timed out after {limit:?}"),
                }),
            },
            None => call.await,
        };

        if let Err(e) = result {
            error!("The {} hook of plugin {} failed: {}", hook, plugin, e);
            self.emit(ReloadEvent::HookFailed {
                plugin: plugin.to_string(),
                hook,
                error: e.to_string(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Reload
    // ------------------------------------------------------------------

    /// Reload a plugin and leave it loaded.
    ///
    /// Without `reinstall` the next generation is prepared from the files
    /// that changed on disk plus the entry; the previous generation keeps
    /// running if that fails. With `reinstall` the plugin is uninstalled,
    /// installed again from its recorded specifier, registered and loaded.
    pub async fn reload(&self, name: &str, reinstall: bool) -> PluginResult<Generation> {
        let trigger = if reinstall {
            Trigger::Reinstall
        } else {
            Trigger::Explicit
        };
        self.run_reload(name, trigger).await
    }

    /// React to a change of `path` on disk: every plugin tracking it moves to
    /// a new generation and keeps its loaded state. Plugins whose copy of the
    /// file is already current are skipped.
    pub async fn handle_change(&self, path: &Path) -> Vec<(String, PluginResult<Generation>)> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| crate::specifier::clean(path));
        let mut results = Vec::new();

        for name in self.plugins_tracking(&path) {
            if self.is_current(&name, &path).await {
                debug!("{:?} unchanged for plugin {}", path, name);
                continue;
            }
            let result = self.run_reload(&name, Trigger::Changed(&path)).await;
            results.push((name, result));
        }
        results
    }

    async fn is_current(&self, name: &str, path: &Path) -> bool {
        let Ok(handle) = self.slot(name) else {
            return true;
        };
        let plugin = handle.lock().await;
        let Some(parsed) = plugin.graph().and_then(|g| g.file(path)) else {
            return true;
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => content_hash(&bytes) == parsed.hash,
            Err(_) => false,
        }
    }

    async fn run_reload(&self, name: &str, trigger: Trigger<'_>) -> PluginResult<Generation> {
        let _permit = self.guard.acquire(name).await?;
        let started = Instant::now();
        let reinstall = matches!(trigger, Trigger::Reinstall);

        info!("Reloading plugin {}{}", name, if reinstall { " (reinstall)" } else { "" });
        self.emit(ReloadEvent::ReloadStarted {
            plugin: name.to_string(),
            reinstall,
        });

        let result = match trigger {
            Trigger::Reinstall => self.reinstall(name).await,
            Trigger::Explicit => self.swap(name, None, true).await,
            Trigger::Changed(path) => self.swap(name, Some(path), false).await,
        };

        match result {
            Ok(swap) => {
                let duration = started.elapsed();
                info!(
                    "Reloaded plugin {} at generation {} in {:?} ({} files evaluated)",
                    name,
                    swap.generation,
                    duration,
                    swap.touched.len()
                );
                self.emit(ReloadEvent::ReloadCompleted {
                    plugin: name.to_string(),
                    generation: swap.generation,
                    touched: swap.touched,
                    duration,
                });
                Ok(swap.generation)
            }
            Err(e) => {
                error!("Failed to reload plugin {}: {}", name, e);
                self.emit(ReloadEvent::ReloadFailed {
                    plugin: name.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Move a registered plugin to a new generation.
    ///
    /// `changed` names the one file that changed; without it every tracked
    /// file whose content differs from what was parsed counts as changed, and
    /// the entry always does. The plugin ends up loaded when `load` is set or
    /// when it was loaded before.
    async fn swap(&self, name: &str, changed: Option<&Path>, load: bool) -> PluginResult<Swap> {
        let handle = self.slot(name)?;
        let mut plugin = handle.lock().await;
        if plugin.removed {
            return Err(PluginError::NotRegistered(name.to_string()));
        }
        let was_loaded = plugin.state.is_loaded();

        let swap = match plugin.graph().cloned() {
            Some(graph) => {
                let roots = match changed {
                    Some(path) => vec![path.to_path_buf()],
                    None => {
                        let mut roots = graph.changed_files();
                        let entry = graph.entry().to_path_buf();
                        if !roots.contains(&entry) {
                            roots.push(entry);
                        }
                        roots
                    }
                };
                let prepared = self.prepare(name, graph, &roots).await?;

                if was_loaded {
                    self.unload_locked(&mut plugin).await;
                }

                let files = prepared.graph.files();
                plugin.code = PluginCode::Script {
                    graph: prepared.graph,
                    instance: Arc::new(prepared.instance),
                };
                plugin.generation = prepared.generation;
                match self.installer.plugin_manifest(name) {
                    Ok(manifest) => plugin.manifest = Arc::new(manifest),
                    Err(e) => warn!("Keeping previous manifest of plugin {}: {}", name, e),
                }

                let orphaned = self.retrack(name, &files);
                self.host.cache().forget(&orphaned);

                Swap {
                    generation: prepared.generation,
                    touched: prepared.touched,
                }
            }
            None => {
                if was_loaded {
                    self.unload_locked(&mut plugin).await;
                }
                plugin.generation = self.host.next_generation();
                Swap {
                    generation: plugin.generation,
                    touched: Vec::new(),
                }
            }
        };

        if load || was_loaded {
            self.load_locked(&mut plugin).await;
        }
        Ok(swap)
    }

    /// Re-parse `roots`, invalidate from them and import the entry at a new
    /// generation. Nothing of the running generation is touched; on failure
    /// the cache requirements are rolled back.
    async fn prepare(
        &self,
        name: &str,
        graph: ImportGraph,
        roots: &[PathBuf],
    ) -> PluginResult<Prepared> {
        let engine = self.host.engine().clone();
        let reparse = roots.to_vec();
        let mut graph = tokio::task::spawn_blocking(move || {
            let mut graph = graph;
            for file in &reparse {
                if graph.contains(file) {
                    graph.refresh(&engine, file)?;
                }
            }
            Ok::<_, PluginError>(graph)
        })
        .await
        .map_err(join_error)??;

        let generation = self.host.next_generation();
        let invalidation = Invalidator::invalidate(&mut graph, roots, generation);
        let touched = invalidation.touched();
        debug!(
            "Plugin {}: generation {} touches {:?}",
            name, generation, touched
        );

        let snapshot = self.host.cache().advance(&touched, generation);
        match self.host.import(name, graph.entry(), generation).await {
            Ok(instance) => Ok(Prepared {
                graph,
                instance,
                generation,
                touched,
            }),
            Err(e) => {
                self.host.cache().restore(snapshot);
                Err(e)
            }
        }
    }

    async fn reinstall(&self, name: &str) -> PluginResult<Swap> {
        let registered = match self.get(name) {
            Some(handle) => {
                let plugin = handle.lock().await;
                Some(plugin.specifier.clone())
            }
            None => None,
        };
        let specifier = registered
            .or_else(|| self.installer.install_specifier(name))
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;

        if self.is_registered(name) {
            self.unregister(name).await?;
        }
        if self.installer.is_installed(name) {
            self.installer.uninstall(name).await?;
            self.emit(ReloadEvent::Uninstalled {
                plugin: name.to_string(),
            });
        }

        let installed = self
            .installer
            .install_normalized(std::slice::from_ref(&specifier))
            .await;
        if installed.into_iter().next().flatten().is_none() {
            return Err(PluginError::InstallFailure(format!(
                "could not reinstall {name} from {specifier}"
            )));
        }
        self.emit(ReloadEvent::Installed {
            plugin: name.to_string(),
            specifier,
        });

        let handle = self.register(name).await?;
        self.load(name).await?;

        let plugin = handle.lock().await;
        Ok(Swap {
            generation: plugin.generation,
            touched: plugin.graph().map(ImportGraph::files).unwrap_or_default(),
        })
    }

    // ------------------------------------------------------------------
    // Installation
    // ------------------------------------------------------------------

    /// Setup pass: install what is missing, then register every plugin the
    /// specifiers resolve to.
    pub async fn setup<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<SetupEntry> {
        if let Err(e) = self.installer.ensure_root().await {
            error!("Failed to prepare plugins root: {}", e);
            return Vec::new();
        }

        let entries = self.installer.ensure_installed(specifiers).await;
        for entry in &entries {
            let Some(name) = &entry.name else {
                warn!(
                    "Plugin specifier \"{}\" did not resolve to an installed plugin",
                    entry.specifier
                );
                continue;
            };

            if entry.fresh {
                info!("Plugin {} installed", name);
                self.emit(ReloadEvent::Installed {
                    plugin: name.clone(),
                    specifier: entry.specifier.clone(),
                });
            } else {
                info!("Plugin {} already installed and up to date", name);
            }

            if let Err(e) = self.register(name).await {
                error!("Failed to register plugin {}: {}", name, e);
            }
        }
        entries
    }

    /// Install a batch of specifiers and register what resolved.
    pub async fn install<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<Option<String>> {
        let names = self.installer.install(specifiers).await;
        for (specifier, name) in specifiers.iter().zip(&names) {
            let Some(name) = name else {
                continue;
            };
            self.emit(ReloadEvent::Installed {
                plugin: name.clone(),
                specifier: specifier.as_ref().to_string(),
            });
            if let Err(e) = self.register(name).await {
                error!("Failed to register plugin {}: {}", name, e);
            }
        }
        names
    }

    /// Install one specifier that must not be installed yet.
    pub async fn install_new(&self, specifier: &str) -> PluginResult<String> {
        if let Some(name) = self.installer.find_plugin_name(specifier) {
            if self.installer.is_installed(&name) {
                return Err(PluginError::AlreadyInstalled(name));
            }
        }
        self.install(&[specifier])
            .await
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| PluginError::InstallFailure(specifier.to_string()))
    }

    /// Unregister a plugin if needed and remove its installed files.
    pub async fn uninstall(&self, name: &str) -> PluginResult<()> {
        if self.is_registered(name) {
            self.unregister(name).await?;
        }
        self.installer.uninstall(name).await?;
        self.emit(ReloadEvent::Uninstalled {
            plugin: name.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_registered(&self, name: &str) -> bool {
        self.index.read().states.contains_key(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name).is_loaded()
    }

    pub fn state(&self, name: &str) -> PluginState {
        self.index
            .read()
            .states
            .get(name)
            .copied()
            .unwrap_or(PluginState::Unregistered)
    }

    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        self.index.read().slots.get(name).cloned()
    }

    pub async fn info(&self, name: &str) -> Option<PluginInfo> {
        let handle = self.get(name)?;
        let plugin = handle.lock().await;
        (!plugin.removed).then(|| plugin.info())
    }

    /// Info of every registered plugin, in registration order.
    pub async fn list(&self) -> Vec<PluginInfo> {
        let mut infos = Vec::new();
        for name in self.registered_plugins() {
            if let Some(info) = self.info(&name).await {
                infos.push(info);
            }
        }
        infos
    }

    /// Registered plugin names in registration order.
    pub fn registered_plugins(&self) -> Vec<String> {
        self.index.read().order.clone()
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter(|n| index.states.get(*n).is_some_and(|s| s.is_loaded()))
            .cloned()
            .collect()
    }

    /// Plugins whose import graph contains `path`, in registration order.
    pub fn plugins_tracking(&self, path: &Path) -> Vec<String> {
        let index = self.index.read();
        let Some(owners) = index.tracked.get(path) else {
            return Vec::new();
        };
        index
            .order
            .iter()
            .filter(|n| owners.contains(*n))
            .cloned()
            .collect()
    }

    /// Every script file some plugin depends on, sorted.
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.index.read().tracked.keys().cloned().collect();
        files.sort();
        files
    }

    /// Directories holding tracked files.
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.index
            .read()
            .tracked
            .keys()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn join_error(e: tokio::task::JoinError) -> PluginError {
    PluginError::Other(format!("blocking task failed: {e}"))
}

//! Hot-reload manager
//!
//! Feeds file notifications from a [`PluginWatcher`] into
//! [`PluginRegistry::handle_change`] according to a [`ReloadStrategy`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use graft_kernel::config::ReloadConfig;
use graft_kernel::plugin::{Generation, PluginResult, ReloadStrategy};
use parking_lot::Mutex;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ReloadError;
use super::watcher::{PluginWatcher, WatchConfig, WatchEvent, WatchEventKind};
use crate::registry::PluginRegistry;

/// Changed files waiting to be reloaded, with the instant they become due.
type Pending = Arc<Mutex<HashMap<PathBuf, Instant>>>;

const MIN_TICK: Duration = Duration::from_millis(10);

/// Hot-reload manager
pub struct HotReloadManager {
    registry: Arc<PluginRegistry>,
    strategy: ReloadStrategy,
    watcher: Arc<RwLock<PluginWatcher>>,
    pending: Pending,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HotReloadManager {
    pub fn new(registry: Arc<PluginRegistry>, strategy: ReloadStrategy, watch_config: WatchConfig) -> Self {
        Self {
            registry,
            strategy,
            watcher: Arc::new(RwLock::new(PluginWatcher::new(watch_config))),
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn from_config(registry: Arc<PluginRegistry>, config: &ReloadConfig) -> Self {
        let watch_config = WatchConfig::new().with_extensions(config.extensions.iter().cloned());
        Self::new(registry, config.strategy(), watch_config)
    }

    pub fn strategy(&self) -> ReloadStrategy {
        self.strategy
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Watch the directories of every tracked file and start reacting to
    /// changes.
    pub async fn start(&mut self) -> Result<(), ReloadError> {
        if self.task.is_some() {
            return Err(ReloadError::AlreadyRunning);
        }
        info!("Starting hot-reload manager ({:?})", self.strategy);

        let mut event_rx = {
            let mut watcher = self.watcher.write().await;
            let event_rx = watcher.take_event_receiver().ok_or(ReloadError::ReceiverTaken)?;
            watcher.sync_paths(&self.registry.watch_dirs()).await?;
            watcher.start().await?;
            event_rx
        };

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let registry = self.registry.clone();
        let watcher = self.watcher.clone();
        let pending = self.pending.clone();
        let strategy = self.strategy;
        let tick = match strategy {
            ReloadStrategy::Debounced(delay) => (delay / 4).max(MIN_TICK),
            _ => Duration::from_millis(100),
        };

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let debounced = matches!(strategy, ReloadStrategy::Debounced(_));

            loop {
                tokio::select! {
                    event = event_rx.recv() => {
                        let Some(event) = event else {
                            debug!("Watch event channel closed");
                            break;
                        };
                        let Some(path) = Self::tracked_path(&registry, &event) else {
                            continue;
                        };
                        match strategy {
                            ReloadStrategy::Immediate => {
                                Self::apply(&registry, &watcher, vec![path]).await;
                            }
                            ReloadStrategy::Debounced(delay) => {
                                pending.lock().insert(path, Instant::now() + delay);
                            }
                            ReloadStrategy::Manual => {
                                debug!("Manual reload mode, recording change to {:?}", path);
                                pending.lock().entry(path).or_insert_with(Instant::now);
                            }
                        }
                    }
                    _ = ticker.tick(), if debounced => {
                        let due = Self::take_due(&pending, Instant::now());
                        if !due.is_empty() {
                            Self::apply(&registry, &watcher, due).await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Hot-reload loop shutting down");
                        break;
                    }
                }
            }
        }));

        info!("Hot-reload manager started");
        Ok(())
    }

    /// Resolve an event to a file some plugin tracks.
    fn tracked_path(registry: &PluginRegistry, event: &WatchEvent) -> Option<PathBuf> {
        let path = match &event.kind {
            WatchEventKind::Renamed { to, .. } => to,
            _ => &event.path,
        };
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| crate::specifier::clean(path));
        if registry.plugins_tracking(&path).is_empty() {
            None
        } else {
            Some(path)
        }
    }

    fn take_due(pending: &Pending, now: Instant) -> Vec<PathBuf> {
        let mut pending = pending.lock();
        let mut due: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        for path in &due {
            pending.remove(path);
        }
        due
    }

    async fn apply(
        registry: &PluginRegistry,
        watcher: &RwLock<PluginWatcher>,
        paths: Vec<PathBuf>,
    ) -> Vec<(String, PluginResult<Generation>)> {
        let mut results = Vec::new();
        for path in paths {
            results.extend(registry.handle_change(&path).await);
        }

        for (name, result) in &results {
            if let Err(e) = result {
                warn!("Plugin {} keeps its previous generation: {}", name, e);
            }
        }

        // reloads may have added or dropped files
        if let Err(e) = watcher.write().await.sync_paths(&registry.watch_dirs()).await {
            warn!("Failed to update watched directories: {}", e);
        }
        results
    }

    /// Files changed since they were last reloaded.
    pub fn pending(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.pending.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Reload every pending file now, due or not.
    pub async fn reload_pending(&self) -> Vec<(String, PluginResult<Generation>)> {
        let paths: Vec<PathBuf> = {
            let mut pending = self.pending.lock();
            let mut paths: Vec<PathBuf> = pending.drain().map(|(path, _)| path).collect();
            paths.sort();
            paths
        };
        Self::apply(&self.registry, &self.watcher, paths).await
    }

    /// Re-sync watched directories with the registry's tracked files.
    pub async fn refresh_watches(&self) -> Result<(), ReloadError> {
        let dirs = self.registry.watch_dirs();
        self.watcher.write().await.sync_paths(&dirs).await?;
        Ok(())
    }

    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher.read().await.watched_paths().await
    }

    /// Stop the watcher and the reload loop. Pending changes are dropped.
    pub async fn stop(&mut self) {
        info!("Stopping hot-reload manager");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.watcher.write().await.stop().await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.pending.lock().clear();
    }
}

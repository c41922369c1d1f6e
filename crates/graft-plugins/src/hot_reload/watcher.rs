//! File system watcher for plugin sources
//!
//! Watches the directories holding tracked script files and forwards
//! relevant changes as [`WatchEvent`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

/// Watch event kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Source file created (including atomic-save replacements)
    Created,
    /// Source file modified
    Modified,
    /// Source file removed
    Removed,
    /// Source file renamed
    Renamed { from: PathBuf, to: PathBuf },
}

/// Watch event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub timestamp: Instant,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            timestamp: Instant::now(),
        }
    }

    /// Whether the event leaves new content at `path`.
    pub fn has_content(&self) -> bool {
        !matches!(self.kind, WatchEventKind::Removed)
    }
}

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// File extensions to watch
    pub extensions: Vec<String>,
    /// Whether to watch subdirectories
    pub recursive: bool,
    /// Ignore patterns (`*suffix`, `prefix*` or exact file names)
    pub ignore_patterns: Vec<String>,
    /// Poll interval for platforms without native notifications
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["rhai".to_string()],
            recursive: false,
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the watched extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Check if a path should be watched
    pub fn should_watch(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        for pattern in &self.ignore_patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if file_name.ends_with(suffix) {
                    return false;
                }
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                if file_name.starts_with(prefix) {
                    return false;
                }
            } else if file_name == pattern {
                return false;
            }
        }

        true
    }

    fn mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

/// Plugin source watcher
pub struct PluginWatcher {
    watch_paths: Arc<RwLock<Vec<PathBuf>>>,
    config: WatchConfig,
    event_tx: mpsc::Sender<WatchEvent>,
    event_rx: Option<mpsc::Receiver<WatchEvent>>,
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl PluginWatcher {
    pub fn new(config: WatchConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);

        Self {
            watch_paths: Arc::new(RwLock::new(Vec::new())),
            config,
            event_tx,
            event_rx: Some(event_rx),
            watcher: None,
            shutdown_tx: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.event_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Add a directory to watch
    pub async fn watch<P: AsRef<Path>>(&mut self, path: P) -> Result<(), notify::Error> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            warn!("Watch path does not exist: {:?}", path);
            return Ok(());
        }

        {
            let mut paths = self.watch_paths.write().await;
            if paths.contains(&path) {
                return Ok(());
            }
            paths.push(path.clone());
        }
        debug!("Adding watch path: {:?}", path);

        if let Some(ref mut watcher) = self.watcher {
            watcher.watch(&path, self.config.mode())?;
        }

        Ok(())
    }

    /// Remove a directory from watching
    pub async fn unwatch<P: AsRef<Path>>(&mut self, path: P) -> Result<(), notify::Error> {
        let path = path.as_ref().to_path_buf();
        debug!("Removing watch path: {:?}", path);

        {
            let mut paths = self.watch_paths.write().await;
            paths.retain(|p| p != &path);
        }

        if let Some(ref mut watcher) = self.watcher {
            watcher.unwatch(&path)?;
        }

        Ok(())
    }

    /// Watch exactly `dirs`, adding and removing paths as needed.
    pub async fn sync_paths(&mut self, dirs: &[PathBuf]) -> Result<(), notify::Error> {
        let wanted: HashSet<&PathBuf> = dirs.iter().collect();
        let current = self.watched_paths().await;

        for path in current.iter().filter(|p| !wanted.contains(p)) {
            self.unwatch(path).await?;
        }
        for path in dirs.iter().filter(|p| !current.contains(p)) {
            self.watch(path).await?;
        }
        Ok(())
    }

    /// Start watching for changes
    pub async fn start(&mut self) -> Result<(), notify::Error> {
        info!("Starting plugin watcher");

        let event_tx = self.event_tx.clone();
        let config = self.config.clone();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let (tx, mut rx) = mpsc::channel(1024);

        let watcher_config = Config::default().with_poll_interval(self.config.poll_interval);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => error!("Watch error: {}", e),
            },
            watcher_config,
        )?;

        let paths = self.watch_paths.read().await;
        for path in paths.iter() {
            watcher.watch(path, self.config.mode())?;
        }
        drop(paths);

        self.watcher = Some(watcher);

        tokio::spawn(async move {
            let mut rename_from: Option<PathBuf> = None;

            loop {
                tokio::select! {
                    Some(event) = rx.recv() => {
                        for watch_event in translate(&config, event, &mut rename_from) {
                            debug!("Watch event: {:?}", watch_event);
                            if event_tx.send(watch_event).await.is_err() {
                                debug!("Watch event receiver dropped");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Plugin watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop watching
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            info!("Stopping plugin watcher");
            let _ = tx.send(()).await;
        }
        self.watcher = None;
    }

    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.watch_paths.read().await.clone()
    }

    pub async fn is_watching<P: AsRef<Path>>(&self, path: P) -> bool {
        let paths = self.watch_paths.read().await;
        paths.contains(&path.as_ref().to_path_buf())
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }
}

/// Map a raw notification to watch events for relevant files.
fn translate(config: &WatchConfig, event: Event, rename_from: &mut Option<PathBuf>) -> Vec<WatchEvent> {
    let mut out = Vec::new();

    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if let [from, to] = event.paths.as_slice() {
            if config.should_watch(to) {
                out.push(WatchEvent::new(
                    WatchEventKind::Renamed {
                        from: from.clone(),
                        to: to.clone(),
                    },
                    to.clone(),
                ));
            }
        }
        return out;
    }

    for path in event.paths {
        if !config.should_watch(&path) {
            continue;
        }

        let kind = match event.kind {
            EventKind::Create(_) => Some(WatchEventKind::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                *rename_from = Some(path.clone());
                None
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => match rename_from.take() {
                Some(from) => Some(WatchEventKind::Renamed {
                    from,
                    to: path.clone(),
                }),
                None => Some(WatchEventKind::Created),
            },
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                Some(WatchEventKind::Modified)
            }
            EventKind::Remove(_) => Some(WatchEventKind::Removed),
            _ => None,
        };

        if let Some(kind) = kind {
            out.push(WatchEvent::new(kind, path));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange};

    #[test]
    fn should_watch_filters_extensions_and_ignores() {
        let config = WatchConfig::default();

        assert!(config.should_watch(Path::new("/p/main.rhai")));
        assert!(!config.should_watch(Path::new("/p/main.rs")));
        assert!(!config.should_watch(Path::new("/p/.main.rhai.swp")));

        let config = WatchConfig::new().with_extensions(["rhai", "json"]).with_ignore("package*");
        assert!(!config.should_watch(Path::new("/p/package.json")));
        assert!(config.should_watch(Path::new("/p/settings.json")));
    }

    #[test]
    fn translate_maps_kinds() {
        let config = WatchConfig::default();
        let mut rename_from = None;

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/p/util.rhai"))
            .add_path(PathBuf::from("/p/notes.txt"));
        let events = translate(&config, modified, &mut rename_from);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Modified);

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/p/new.rhai"));
        assert_eq!(translate(&config, created, &mut rename_from)[0].kind, WatchEventKind::Created);

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/p/old.rhai"));
        assert!(translate(&config, from, &mut rename_from).is_empty());
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/p/renamed.rhai"));
        let events = translate(&config, to, &mut rename_from);
        assert_eq!(
            events[0].kind,
            WatchEventKind::Renamed {
                from: PathBuf::from("/p/old.rhai"),
                to: PathBuf::from("/p/renamed.rhai"),
            }
        );
        assert!(events[0].has_content());
    }

    #[tokio::test]
    async fn watch_paths_are_synced() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut watcher = PluginWatcher::new(WatchConfig::default());

        watcher.sync_paths(&[a.path().to_path_buf()]).await.unwrap();
        assert!(watcher.is_watching(a.path()).await);

        watcher.sync_paths(&[b.path().to_path_buf()]).await.unwrap();
        assert!(!watcher.is_watching(a.path()).await);
        assert!(watcher.is_watching(b.path()).await);
    }
}

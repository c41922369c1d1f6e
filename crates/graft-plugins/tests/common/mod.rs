//! Shared fixtures: a plugins root inside a temp dir and a fetcher that
//! "downloads" packages from a local sources directory.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graft_kernel::config::{LayoutConfig, ScriptLimits};
use graft_kernel::plugin::{
    HookContext, Manifest, PluginError, PluginHooks, PluginResult, ReloadEvent, ReloadPolicy,
};
use graft_plugins::installer::{Installer, PackageFetcher};
use graft_plugins::registry::{PluginRegistry, RegistryOptions};
use graft_plugins::script::ScriptHost;
use graft_plugins::specifier::SpecifierNormalizer;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Copies `<sources>/<name>` into `node_modules/<name>` and records the
/// dependency, like a package manager would.
pub struct DirFetcher {
    sources: PathBuf,
    pub fetched: Mutex<Vec<String>>,
    pub offline: Mutex<HashSet<String>>,
}

impl DirFetcher {
    fn package_name(specifier: &str) -> &str {
        match specifier.rfind('@') {
            Some(0) | None => specifier,
            Some(at) => &specifier[..at],
        }
    }
}

#[async_trait]
impl PackageFetcher for DirFetcher {
    async fn fetch(&self, root: &Path, specifiers: &[String]) -> PluginResult<()> {
        let manifest_path = root.join("package.json");
        let mut manifest = Manifest::read(&manifest_path)?;

        for specifier in specifiers {
            let name = Self::package_name(specifier);
            let source = self.sources.join(name);
            if self.offline.lock().contains(name) || !source.is_dir() {
                return Err(PluginError::InstallFailure(format!(
                    "\t404 Not Found - GET {name}"
                )));
            }
            copy_dir(&source, &root.join("node_modules").join(name))?;
            manifest
                .dependencies
                .insert(name.to_string(), "^1.0.0".to_string());
            self.fetched.lock().push(specifier.clone());
        }

        manifest.write(&manifest_path)
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

pub struct Fixture {
    pub dir: TempDir,
    pub registry: Arc<PluginRegistry>,
    pub fetcher: Arc<DirFetcher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_policy(policy: ReloadPolicy) -> Self {
        Self::with_options(RegistryOptions::default().with_policy(policy))
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(DirFetcher {
            sources: dir.path().join("sources"),
            fetched: Mutex::new(Vec::new()),
            offline: Mutex::new(HashSet::new()),
        });
        let normalizer = SpecifierNormalizer::with_base_dir("plugins", dir.path());
        let installer = Arc::new(Installer::with_normalizer(
            normalizer,
            LayoutConfig::default(),
            fetcher.clone(),
        ));
        let host = Arc::new(ScriptHost::new(&ScriptLimits::default(), None));
        let registry = Arc::new(PluginRegistry::new(host, installer, options));
        Self {
            dir,
            registry,
            fetcher,
        }
    }

    /// Publish a package with a `main.rhai` entry and extra files.
    pub fn publish(&self, name: &str, files: &[(&str, &str)]) {
        let dir = self.dir.path().join("sources").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.json"),
            format!(r#"{{ "name": "{name}", "version": "1.0.0", "main": "main.rhai" }}"#),
        )
        .unwrap();
        for (file, content) in files {
            std::fs::write(dir.join(file), content).unwrap();
        }
    }

    /// Install and register.
    pub async fn setup(&self, names: &[&str]) {
        let entries = self.registry.setup(names).await;
        for entry in entries {
            let name = entry.name.expect("plugin resolved");
            assert!(self.registry.is_registered(&name), "{name} registered");
        }
    }

    /// Path of an installed plugin file.
    pub fn installed(&self, plugin: &str, file: &str) -> PathBuf {
        let dir = self.registry.installer().module_dir(plugin);
        std::fs::canonicalize(&dir).unwrap_or(dir).join(file)
    }

    /// Rewrite an installed file.
    pub fn edit(&self, plugin: &str, file: &str, content: &str) -> PathBuf {
        let path = self.installed(plugin, file);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.registry.host().counters().get(name)
    }
}

/// Native hooks appending `<name>:load` / `<name>:unload` to a shared log.
pub struct Recorder {
    pub name: String,
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_load: bool,
    pub delay: Duration,
}

impl Recorder {
    pub fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fail_load: false,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl PluginHooks for Recorder {
    async fn load(&self, ctx: &HookContext) -> PluginResult<()> {
        tokio::time::sleep(self.delay).await;
        self.log.lock().push(format!("{}:load", self.name));
        if self.fail_load {
            return Err(PluginError::Other(format!("{} refuses to load", ctx.plugin)));
        }
        Ok(())
    }

    async fn unload(&self, _ctx: &HookContext) -> PluginResult<()> {
        tokio::time::sleep(self.delay).await;
        self.log.lock().push(format!("{}:unload", self.name));
        Ok(())
    }
}

/// Events received so far.
pub fn drain(rx: &mut broadcast::Receiver<ReloadEvent>) -> Vec<ReloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! Package installer.
//!
//! Wraps a [`PackageFetcher`] with the bookkeeping around it: the root
//! manifest is created on first use and restored when a batch fails, and
//! installed specifiers are mapped back to plugin names through the
//! manifest's `dependencies`.

pub mod fetcher;

pub use fetcher::{CommandFetcher, PackageFetcher};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_kernel::config::LayoutConfig;
use graft_kernel::plugin::{Manifest, PluginError, PluginResult};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::specifier::SpecifierNormalizer;

/// Outcome of ensuring one specifier is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupEntry {
    pub specifier: String,
    /// Resolved plugin name, `None` if installation failed or the name could
    /// not be recovered from the manifest.
    pub name: Option<String>,
    /// Whether this pass installed it.
    pub fresh: bool,
}

/// Installs, locates and removes plugin packages under one plugins root.
pub struct Installer {
    root: PathBuf,
    layout: LayoutConfig,
    normalizer: SpecifierNormalizer,
    fetcher: Arc<dyn PackageFetcher>,
    /// Normalized specifier -> plugin name.
    names: Mutex<HashMap<String, String>>,
    /// One batch at a time; the manifest snapshot must not interleave.
    batch: tokio::sync::Mutex<()>,
}

impl Installer {
    pub fn new(root: impl AsRef<Path>, layout: LayoutConfig, fetcher: Arc<dyn PackageFetcher>) -> Self {
        let normalizer = SpecifierNormalizer::new(root.as_ref());
        Self::with_normalizer(normalizer, layout, fetcher)
    }

    /// Use a normalizer with an explicit base directory.
    pub fn with_normalizer(
        normalizer: SpecifierNormalizer,
        layout: LayoutConfig,
        fetcher: Arc<dyn PackageFetcher>,
    ) -> Self {
        Self {
            root: normalizer.root().to_path_buf(),
            layout,
            normalizer,
            fetcher,
            names: Mutex::new(HashMap::new()),
            batch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn normalizer(&self) -> &SpecifierNormalizer {
        &self.normalizer
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.layout.manifest_file)
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(&self.layout.modules_dir)
    }

    /// Directory an installed plugin lives in. Scoped names map to nested
    /// directories.
    pub fn module_dir(&self, name: &str) -> PathBuf {
        name.split('/')
            .fold(self.modules_dir(), |dir, part| dir.join(part))
    }

    /// Create the plugins root and its manifest if they are missing.
    pub async fn ensure_root(&self) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.manifest_path();
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        info!("Creating plugin manifest at {:?}", path);
        Manifest::root().write(&path)
    }

    /// The root manifest; an empty one when nothing was installed yet.
    pub fn root_manifest(&self) -> PluginResult<Manifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Manifest::root());
        }
        Manifest::read(&path)
    }

    /// Manifest shipped by an installed plugin.
    pub fn plugin_manifest(&self, name: &str) -> PluginResult<Manifest> {
        if !self.is_installed(name) {
            return Err(PluginError::NotInstalled(name.to_string()));
        }
        let mut manifest = Manifest::read(&self.module_dir(name).join(&self.layout.manifest_file))?;
        if manifest.name.is_empty() {
            manifest.name = name.to_string();
        }
        Ok(manifest)
    }

    /// Absolute path of an installed plugin's entry script.
    pub fn entry_file(&self, name: &str) -> PluginResult<PathBuf> {
        let manifest = self.plugin_manifest(name)?;
        let entry = manifest.entry_point()?;
        let dir = self.module_dir(name);
        // npm links `file:` packages; resolve so watched paths are the real ones
        let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
        Ok(crate::specifier::clean(&dir.join(entry)))
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.module_dir(name).is_dir()
    }

    /// Install a batch of specifiers.
    ///
    /// Returns the resolved plugin name for each specifier, in order. When the
    /// fetcher fails, every entry is `None` and the root manifest is put back
    /// the way it was before the batch.
    pub async fn install<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<Option<String>> {
        let normalized = self.normalizer.normalize_all(specifiers);
        self.install_normalized(&normalized).await
    }

    /// Install specifiers that are already in their installable form, such
    /// as those recorded in the root manifest.
    pub async fn install_normalized(&self, normalized: &[String]) -> Vec<Option<String>> {
        if normalized.is_empty() {
            return Vec::new();
        }

        let _batch = self.batch.lock().await;

        if let Err(e) = self.ensure_root().await {
            error!("Failed to prepare plugins root {:?}: {}", self.root, e);
            return vec![None; normalized.len()];
        }

        let snapshot = match tokio::fs::read(self.manifest_path()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to read plugin manifest: {}", e);
                return vec![None; normalized.len()];
            }
        };

        info!("Installing plugins {:?}", normalized);
        if let Err(e) = self.fetcher.fetch(&self.root, normalized).await {
            error!(
                "Failed to install plugins {:?}.\n\tRoot: {}\n{}",
                normalized,
                self.root.display(),
                match &e {
                    PluginError::InstallFailure(relayed) => relayed.clone(),
                    other => format!("\t{other}"),
                }
            );
            if let Err(e) = tokio::fs::write(self.manifest_path(), &snapshot).await {
                error!("Failed to restore plugin manifest: {}", e);
            }
            return vec![None; normalized.len()];
        }

        let manifest = match self.root_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Failed to read plugin manifest after install: {}", e);
                return vec![None; normalized.len()];
            }
        };

        normalized
            .iter()
            .map(|specifier| {
                let name = self.name_in(&manifest, specifier);
                if name.is_none() {
                    warn!("Failed to find name of plugin specified by \"{}\"", specifier);
                }
                name
            })
            .collect()
    }

    /// Install only the specifiers that are not installed yet.
    pub async fn ensure_installed<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<SetupEntry> {
        let mut entries = Vec::with_capacity(specifiers.len());
        let mut pending = Vec::new();

        for specifier in specifiers {
            let specifier = specifier.as_ref();
            match self.find_plugin_name(specifier) {
                Some(name) if self.is_installed(&name) => {
                    debug!("{} already installed as {}", specifier, name);
                    entries.push(SetupEntry {
                        specifier: specifier.to_string(),
                        name: Some(name),
                        fresh: false,
                    });
                }
                _ => {
                    pending.push((entries.len(), specifier.to_string()));
                    entries.push(SetupEntry {
                        specifier: specifier.to_string(),
                        name: None,
                        fresh: true,
                    });
                }
            }
        }

        if !pending.is_empty() {
            let batch: Vec<&str> = pending.iter().map(|(_, s)| s.as_str()).collect();
            let names = self.install(&batch).await;
            for ((index, _), name) in pending.iter().zip(names) {
                entries[*index].name = name;
            }
        }

        entries
    }

    /// Remove an installed plugin's files.
    pub async fn uninstall(&self, name: &str) -> PluginResult<()> {
        if !self.is_installed(name) {
            return Err(PluginError::NotInstalled(name.to_string()));
        }

        let dir = self.module_dir(name);
        let link = tokio::fs::symlink_metadata(&dir).await?;
        if link.file_type().is_symlink() {
            tokio::fs::remove_file(&dir).await?;
        } else {
            tokio::fs::remove_dir_all(&dir).await?;
        }

        self.names.lock().retain(|_, n| n != name);
        info!("Uninstalled plugin {}", name);
        Ok(())
    }

    /// Recover the plugin name a specifier was installed under.
    pub fn find_plugin_name(&self, specifier: &str) -> Option<String> {
        let normalized = self.normalizer.normalize(specifier);
        if let Some(name) = self.names.lock().get(&normalized) {
            return Some(name.clone());
        }
        let manifest = self.root_manifest().ok()?;
        self.name_in(&manifest, &normalized)
    }

    /// Specifier recorded for an installed plugin.
    pub fn recorded_specifier(&self, name: &str) -> Option<String> {
        self.root_manifest()
            .ok()
            .and_then(|m| m.dependency(name).map(str::to_string))
    }

    /// Specifier that installs `name` again: local and URL specifiers as
    /// recorded, registry version ranges as `name@range`.
    pub fn install_specifier(&self, name: &str) -> Option<String> {
        let recorded = self.recorded_specifier(name)?;
        if recorded.contains(':') || recorded == name {
            Some(recorded)
        } else {
            Some(format!("{name}@{recorded}"))
        }
    }

    fn name_in(&self, manifest: &Manifest, specifier: &str) -> Option<String> {
        let name = manifest
            .dependency_for_specifier(specifier)
            .or_else(|| {
                manifest
                    .dependencies
                    .get_key_value(specifier)
                    .map(|(k, _)| k.as_str())
            })
            .or_else(|| {
                let bare = registry_name(specifier)?;
                manifest
                    .dependencies
                    .get_key_value(bare)
                    .map(|(k, _)| k.as_str())
            })?
            .to_string();

        self.names.lock().insert(specifier.to_string(), name.clone());
        Some(name)
    }
}

/// Package name of a registry specifier: `pkg@1.0.0` -> `pkg`,
/// `@scope/pkg@^2` -> `@scope/pkg`.
fn registry_name(specifier: &str) -> Option<&str> {
    if SpecifierNormalizer::is_local(specifier) {
        return None;
    }
    match specifier.rfind('@') {
        Some(0) | None => Some(specifier),
        Some(at) => Some(&specifier[..at]),
    }
}

//! Host context: every service a command needs, built once from configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use graft_kernel::config::{HostConfig, load_host_config};
use graft_plugins::{
    CommandFetcher, Installer, PackageFetcher, PluginRegistry, RegistryOptions, ScriptHost,
};

use crate::error::{CliError, CliResult};

pub struct HostContext {
    pub config: HostConfig,
    pub host: Arc<ScriptHost>,
    pub installer: Arc<Installer>,
    pub registry: Arc<PluginRegistry>,
}

impl HostContext {
    /// Read the configuration (file, then `GRAFT_*` overrides) and build the
    /// host from it.
    pub fn load(path: Option<&Path>, root: Option<PathBuf>) -> CliResult<Self> {
        let display = path.map(|p| p.display().to_string());
        let mut config = load_host_config(display.as_deref())
            .map_err(CliError::from)
            .map_err(Report::new)
            .attach(format!(
                "loading configuration from {}",
                display.as_deref().unwrap_or("defaults and environment")
            ))?;

        if let Some(root) = root {
            config.plugins_root = root;
        }
        Ok(Self::new(config))
    }

    /// Build the host with the configured package fetcher.
    pub fn new(config: HostConfig) -> Self {
        let fetcher = Arc::new(CommandFetcher::new(config.fetcher.clone()));
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: HostConfig, fetcher: Arc<dyn PackageFetcher>) -> Self {
        let installer = Arc::new(Installer::new(
            &config.plugins_root,
            config.layout.clone(),
            fetcher,
        ));
        let host = Arc::new(ScriptHost::new(
            &config.script,
            Some(installer.modules_dir()),
        ));
        let registry = Arc::new(PluginRegistry::new(
            host.clone(),
            installer.clone(),
            RegistryOptions::from_config(&config.reload),
        ));

        Self {
            config,
            host,
            installer,
            registry,
        }
    }
}

//! Host configuration schema.
//!
//! Every section has serde defaults so an empty file is a valid
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plugin::{ReloadPolicy, ReloadStrategy};

/// Top-level host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding the root manifest and the installed modules.
    pub plugins_root: PathBuf,
    /// Plugin specifiers installed and registered at startup.
    pub plugins: Vec<String>,
    pub fetcher: FetcherConfig,
    pub layout: LayoutConfig,
    pub reload: ReloadConfig,
    pub script: ScriptLimits,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            plugins: Vec::new(),
            fetcher: FetcherConfig::default(),
            layout: LayoutConfig::default(),
            reload: ReloadConfig::default(),
            script: ScriptLimits::default(),
        }
    }
}

/// External package-fetch process.
///
/// Invoked as `<program> <args...> <specifiers...> <flags...>` in the plugins
/// root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub program: String,
    pub args: Vec<String>,
    pub flags: Vec<String>,
    /// Line prefix stripped from relayed failure output.
    pub noise_prefix: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["install".to_string()],
            flags: [
                "--no-progress",
                "--no-audit",
                "--save",
                "--package-lock=false",
                "--omit=dev",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            noise_prefix: "npm ERR! ".to_string(),
        }
    }
}

/// On-disk layout produced by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Manifest file name, both at the root and inside each module.
    pub manifest_file: String,
    /// Installed-modules directory, relative to the plugins root.
    pub modules_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            manifest_file: "package.json".to_string(),
            modules_dir: "node_modules".to_string(),
        }
    }
}

/// Strategy as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Immediate,
    #[default]
    Debounced,
    Manual,
}

/// Hot-reload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Watch tracked files and reload on change.
    pub watch: bool,
    pub strategy: StrategyKind,
    pub debounce_ms: u64,
    pub policy: ReloadPolicy,
    /// Upper bound for one hook invocation; unset means no limit.
    pub hook_timeout_ms: Option<u64>,
    /// File extensions that trigger reloads.
    pub extensions: Vec<String>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            watch: true,
            strategy: StrategyKind::default(),
            debounce_ms: 300,
            policy: ReloadPolicy::default(),
            hook_timeout_ms: None,
            extensions: vec!["rhai".to_string()],
        }
    }
}

impl ReloadConfig {
    pub fn strategy(&self) -> ReloadStrategy {
        match self.strategy {
            StrategyKind::Immediate => ReloadStrategy::Immediate,
            StrategyKind::Debounced => {
                ReloadStrategy::Debounced(Duration::from_millis(self.debounce_ms))
            }
            StrategyKind::Manual => ReloadStrategy::Manual,
        }
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_ms.map(Duration::from_millis)
    }
}

/// Resource limits applied to the script engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_call_levels: usize,
    pub max_operations: u64,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_string_size: usize,
    pub max_modules: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_call_levels: 64,
            max_operations: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_string_size: 1_000_000,
            max_modules: 1_024,
        }
    }
}

//! Package manifests.
//!
//! The same JSON schema describes the root manifest kept in the plugins root
//! (which records `dependencies: name -> resolved specifier`) and the manifest
//! shipped by each installed plugin (which declares its entry point).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{PluginError, PluginResult};

/// Export condition preferred over `default` when resolving the entry point.
pub const HOST_CONDITION: &str = "graft";

/// Subpath export consulted when a manifest has no `main`.
pub const ENTRY_EXPORT: &str = "./entry";

/// A package manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Exports>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Free-form plugin settings, handed to lifecycle hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,

    /// Fields this host does not interpret, kept so rewrites are lossless.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `exports` field: either a bare path or a map of subpath exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Exports {
    Path(String),
    Subpaths(BTreeMap<String, ExportTarget>),
}

/// Target of one subpath export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportTarget {
    Path(String),
    Conditional {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        graft: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Other(serde_json::Value),
}

impl ExportTarget {
    /// The path this target points to for this host, preferring the
    /// host-specific condition over `default`.
    pub fn resolve(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Conditional { graft, default } => graft.as_deref().or(default.as_deref()),
            Self::Other(_) => None,
        }
    }
}

impl Manifest {
    /// The manifest written into an empty plugins root.
    pub fn root() -> Self {
        Self {
            name: "graft.plugins".to_string(),
            kind: Some("module".to_string()),
            ..Default::default()
        }
    }

    /// Read a manifest from disk.
    pub fn read(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the manifest as pretty JSON.
    pub fn write(&self, path: &Path) -> PluginResult<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Entry point of the package, relative to its directory.
    ///
    /// `main` wins when present. Otherwise the `./entry` subpath export is
    /// used: a plain path, or a conditional pair where the `graft` condition
    /// is preferred over `default`.
    pub fn entry_point(&self) -> PluginResult<&str> {
        if let Some(main) = self.main.as_deref().filter(|m| !m.is_empty()) {
            return Ok(main);
        }

        let entry = match &self.exports {
            Some(Exports::Subpaths(subpaths)) => {
                subpaths.get(ENTRY_EXPORT).and_then(ExportTarget::resolve)
            }
            _ => None,
        };

        entry.ok_or_else(|| PluginError::MissingEntryPoint(self.name.clone()))
    }

    /// Recorded specifier for a dependency.
    pub fn dependency(&self, name: &str) -> Option<&str> {
        self.dependencies.get(name).map(String::as_str)
    }

    /// Name of the dependency whose recorded specifier equals `specifier`.
    pub fn dependency_for_specifier(&self, specifier: &str) -> Option<&str> {
        self.dependencies
            .iter()
            .find(|(_, recorded)| recorded.as_str() == specifier)
            .map(|(name, _)| name.as_str())
    }
}

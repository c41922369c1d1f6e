//! The external package-fetch process.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use graft_kernel::config::FetcherConfig;
use graft_kernel::plugin::{PluginError, PluginResult};
use tokio::process::Command;
use tracing::debug;

/// Materializes packages into a plugins root.
///
/// Implementations must either install every specifier of the batch and
/// record each one in the root manifest's `dependencies`, or fail with
/// [`PluginError::InstallFailure`].
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    async fn fetch(&self, root: &Path, specifiers: &[String]) -> PluginResult<()>;
}

/// Runs a package manager as a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandFetcher {
    config: FetcherConfig,
}

impl CommandFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Indent every line of the collaborator's failure output with a tab and
    /// drop its own line prefix.
    pub fn relay(&self, output: &str) -> String {
        let noise = self.config.noise_prefix.as_str();
        output
            .trim_end()
            .lines()
            .map(|line| {
                let line = if noise.is_empty() {
                    line
                } else {
                    line.strip_prefix(noise).unwrap_or(line)
                };
                format!("\t{line}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl PackageFetcher for CommandFetcher {
    async fn fetch(&self, root: &Path, specifiers: &[String]) -> PluginResult<()> {
        debug!(
            "Running {} {:?} {:?} {:?} in {:?}",
            self.config.program, self.config.args, specifiers, self.config.flags, root
        );

        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .args(specifiers)
            .args(&self.config.flags)
            .current_dir(root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                PluginError::InstallFailure(format!(
                    "\tfailed to start {}: {}",
                    self.config.program, e
                ))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() {
            stdout
        } else {
            stderr
        };

        let mut relayed = self.relay(&message);
        if relayed.is_empty() {
            relayed = format!("\t{} exited with {}", self.config.program, output.status);
        }
        Err(PluginError::InstallFailure(relayed))
    }
}

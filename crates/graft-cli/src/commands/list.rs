//! `graft list` command implementation

use colored::Colorize;
use error_stack::ResultExt;
use graft_kernel::plugin::IntoPluginReport;
use serde::Serialize;

use crate::context::HostContext;
use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, Serialize)]
struct InstalledPlugin {
    name: String,
    specifier: String,
    installed: bool,
    entry: Option<String>,
}

/// Execute the `graft list` command
pub fn run(ctx: &HostContext, json: bool) -> CliResult<()> {
    let plugins = installed_plugins(ctx)?;

    if json {
        let out = serde_json::to_string_pretty(&plugins)
            .map_err(CliError::from)
            .map_err(error_stack::Report::new)?;
        println!("{out}");
        return Ok(());
    }

    println!(
        "{} Plugins in {}",
        "→".green(),
        ctx.installer.root().display()
    );
    println!();
    if plugins.is_empty() {
        println!("  No plugins installed.");
        return Ok(());
    }
    for plugin in &plugins {
        let status = if plugin.installed {
            "installed".green()
        } else {
            "missing".red()
        };
        println!(
            "  {} {} [{}] {}",
            plugin.name.bold(),
            plugin.specifier.dimmed(),
            status,
            plugin.entry.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn installed_plugins(ctx: &HostContext) -> CliResult<Vec<InstalledPlugin>> {
    if !ctx.installer.manifest_path().exists() {
        return Ok(Vec::new());
    }
    let manifest = ctx
        .installer
        .root_manifest()
        .into_report()
        .attach(format!("reading {}", ctx.installer.manifest_path().display()))
        .change_context(CliError::Command("list"))?;

    Ok(manifest
        .dependencies
        .iter()
        .map(|(name, specifier)| {
            let installed = ctx.installer.is_installed(name);
            let entry = installed
                .then(|| ctx.installer.entry_file(name).ok())
                .flatten()
                .map(|path| path.display().to_string());
            InstalledPlugin {
                name: name.clone(),
                specifier: specifier.clone(),
                installed,
                entry,
            }
        })
        .collect())
}

//! `graft graph` command implementation

use std::path::Path;

use colored::Colorize;
use error_stack::{Report, ResultExt};
use graft_kernel::plugin::IntoPluginReport;
use graft_plugins::{ImportGraph, ScriptHost};

use crate::context::HostContext;
use crate::error::{CliError, CliResult};

/// Execute the `graft graph` command
pub fn run(ctx: &HostContext, entry: &Path) -> CliResult<()> {
    let graph = build(ctx, entry)?;

    println!("{} Import graph ({} file(s))", "→".green(), graph.len());
    println!();
    print!("{}", graph.render());
    Ok(())
}

fn build(ctx: &HostContext, entry: &Path) -> CliResult<ImportGraph> {
    let entry = std::fs::canonicalize(entry)
        .map_err(CliError::from)
        .map_err(Report::new)
        .attach(format!("resolving {}", entry.display()))?;

    // a private host keeps parsing away from the shared module cache
    let host = ScriptHost::new(&ctx.config.script, None);
    ImportGraph::build(host.engine(), &entry)
        .into_report()
        .attach(format!("entry {}", entry.display()))
        .change_context(CliError::Command("graph"))
}

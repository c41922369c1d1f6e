//! `graft uninstall` command implementation

use colored::Colorize;
use error_stack::ResultExt;
use graft_kernel::plugin::IntoPluginReport;

use crate::context::HostContext;
use crate::error::{CliError, CliResult};

/// Execute the `graft uninstall` command
pub async fn run(ctx: &HostContext, name: &str) -> CliResult<()> {
    println!("{} Uninstalling {}", "→".green(), name);

    ctx.installer
        .uninstall(name)
        .await
        .into_report()
        .attach(format!("plugins root {}", ctx.installer.root().display()))
        .change_context(CliError::Command("uninstall"))?;

    println!("{} Removed {}", "✓".green(), name);
    Ok(())
}

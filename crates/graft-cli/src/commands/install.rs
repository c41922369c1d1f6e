//! `graft install` command implementation

use colored::Colorize;
use error_stack::{Report, ResultExt};
use graft_kernel::plugin::IntoPluginReport;

use crate::context::HostContext;
use crate::error::{CliError, CliResult};

/// Execute the `graft install` command
pub async fn run(ctx: &HostContext, specifiers: &[String]) -> CliResult<()> {
    println!(
        "{} Installing {} into {}",
        "→".green(),
        specifiers.join(" "),
        ctx.installer.root().display()
    );

    ctx.installer
        .ensure_root()
        .await
        .into_report()
        .attach(format!("plugins root {}", ctx.installer.root().display()))
        .change_context(CliError::Command("install"))?;

    let names = ctx.installer.install(specifiers).await;
    let mut failed = 0;
    for (specifier, name) in specifiers.iter().zip(&names) {
        match name {
            Some(name) => println!("  {} {} ({})", "✓".green(), name, specifier),
            None => {
                failed += 1;
                println!("  {} {}", "✗".red(), specifier);
            }
        }
    }

    if failed > 0 {
        return Err(Report::new(CliError::Other(format!(
            "{failed} specifier(s) could not be installed"
        ))));
    }
    Ok(())
}

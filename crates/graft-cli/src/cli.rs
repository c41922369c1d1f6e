//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Graft - plugin host with generation-aware hot reload
#[derive(Parser)]
#[command(name = "graft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "GRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Plugins root, overriding the configured one
    #[arg(short = 'r', long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Install, register and load plugins, then serve the operator console
    Run {
        /// Specifiers to set up in addition to the configured ones
        plugins: Vec<String>,

        /// Do not watch plugin files for changes
        #[arg(long)]
        no_watch: bool,
    },

    /// Install plugins into the plugins root
    Install {
        /// Package specifiers (registry names, ranges or local paths)
        #[arg(required = true)]
        specifiers: Vec<String>,
    },

    /// Remove an installed plugin
    Uninstall {
        /// Plugin name
        name: String,
    },

    /// List plugins recorded in the root manifest
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the import graph of a script
    Graph {
        /// Entry script
        entry: PathBuf,
    },
}

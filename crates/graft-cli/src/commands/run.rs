//! `graft run` command implementation: the plugin host supervisor

use std::sync::Arc;

use colored::Colorize;
use error_stack::{Report, ResultExt};
use graft_plugins::{HotReloadManager, PluginInfo, PluginRegistry};
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::console::{CommandConsole, Flow, Matcher};
use crate::context::HostContext;
use crate::error::{CliError, CliResult};

type SharedManager = Option<Arc<Mutex<HotReloadManager>>>;

/// Execute the `graft run` command
pub async fn run(ctx: &HostContext, extra: &[String], watch: bool) -> CliResult<()> {
    let mut specifiers = ctx.config.plugins.clone();
    specifiers.extend(extra.iter().cloned());

    println!(
        "{} Setting up {} plugin(s) in {}",
        "→".green(),
        specifiers.len(),
        ctx.installer.root().display()
    );
    let entries = ctx.registry.setup(&specifiers).await;
    for entry in entries.iter().filter(|e| e.name.is_none()) {
        println!("  {} {} could not be resolved", "✗".red(), entry.specifier);
    }

    let loaded = ctx.registry.load_all().await;
    if !loaded.is_empty() {
        println!("{} Loaded {}", "✓".green(), loaded.join(", "));
    }

    let manager = if watch && ctx.config.reload.watch {
        let mut manager = HotReloadManager::from_config(ctx.registry.clone(), &ctx.config.reload);
        manager
            .start()
            .await
            .map_err(CliError::from)
            .map_err(Report::new)
            .attach("starting the file watcher")?;
        println!(
            "{} Watching {} file(s) ({:?})",
            "→".green(),
            ctx.registry.tracked_files().len(),
            manager.strategy()
        );
        Some(Arc::new(Mutex::new(manager)))
    } else {
        None
    };

    let console = CommandConsole::new();
    register_console_commands(&console, ctx.registry.clone(), manager.clone())?;
    println!("{} Console ready, type `stop` to shut down", "→".green());

    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin())) => {
            if let Err(e) = result {
                warn!("Console stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    shutdown(&ctx.registry, manager).await;
    Ok(())
}

async fn shutdown(registry: &PluginRegistry, manager: SharedManager) {
    println!("{} Shutting down", "→".yellow());
    if let Some(manager) = manager {
        manager.lock().await.stop().await;
    }
    let unloaded = registry.unload_all(true).await;
    println!("{} Unloaded {} plugin(s)", "✓".green(), unloaded.len());
}

/// Wire the operator commands to the registry.
pub fn register_console_commands(
    console: &CommandConsole,
    registry: Arc<PluginRegistry>,
    manager: SharedManager,
) -> CliResult<()> {
    console.register_command("stop", |_| async { Ok(Flow::Stop) });

    let (r, m) = (registry.clone(), manager.clone());
    console.register_command("reload", move |args| {
        let (registry, manager) = (r.clone(), m.clone());
        async move {
            let (name, reinstall) = reload_args(&args)?;
            let generation = registry.reload(&name, reinstall).await?;
            println!("{} Reloaded {} (generation {})", "✓".green(), name, generation);
            refresh_watches(&manager).await;
            Ok(Flow::Continue)
        }
    });

    let r = registry.clone();
    console.register_command("load", move |args| {
        let registry = r.clone();
        async move {
            let name = single_arg(&args, "load <name>")?;
            registry.load(&name).await?;
            println!("{} Loaded {}", "✓".green(), name);
            Ok(Flow::Continue)
        }
    });

    let r = registry.clone();
    console.register_command("unload", move |args| {
        let registry = r.clone();
        async move {
            let name = single_arg(&args, "unload <name>")?;
            registry.unload(&name, false).await?;
            println!("{} Unloaded {}", "✓".green(), name);
            Ok(Flow::Continue)
        }
    });

    let r = registry.clone();
    console.register_command("list", move |_| {
        let registry = r.clone();
        async move {
            print_plugins(&registry.list().await);
            Ok(Flow::Continue)
        }
    });

    let (r, m) = (registry.clone(), manager.clone());
    console.register_command("install", move |args| {
        let (registry, manager) = (r.clone(), m.clone());
        async move {
            if args.is_empty() {
                anyhow::bail!("usage: install <spec>...");
            }
            let names = registry.install(&args).await;
            for (specifier, name) in args.iter().zip(names) {
                let Some(name) = name else {
                    println!("  {} {} could not be installed", "✗".red(), specifier);
                    continue;
                };
                if !registry.is_loaded(&name) {
                    registry.load(&name).await?;
                }
                println!("{} Installed {}", "✓".green(), name);
            }
            refresh_watches(&manager).await;
            Ok(Flow::Continue)
        }
    });

    let (r, m) = (registry.clone(), manager.clone());
    console.register_command("uninstall", move |args| {
        let (registry, manager) = (r.clone(), m.clone());
        async move {
            let name = single_arg(&args, "uninstall <name>")?;
            registry.uninstall(&name).await?;
            println!("{} Uninstalled {}", "✓".green(), name);
            refresh_watches(&manager).await;
            Ok(Flow::Continue)
        }
    });

    let help = Matcher::pattern(r"^(help|\?)$")
        .map_err(|e| Report::new(CliError::Other(e.to_string())))
        .attach("compiling the help matcher")?;
    console.register_command(help, |_| async {
        println!("Commands:");
        for usage in [
            "stop",
            "reload <name> [--reinstall]",
            "load <name>",
            "unload <name>",
            "list",
            "install <spec>...",
            "uninstall <name>",
        ] {
            println!("  {usage}");
        }
        Ok(Flow::Continue)
    });

    Ok(())
}

fn single_arg(args: &[String], usage: &str) -> anyhow::Result<String> {
    match args {
        [name] => Ok(name.clone()),
        _ => anyhow::bail!("usage: {usage}"),
    }
}

fn reload_args(args: &[String]) -> anyhow::Result<(String, bool)> {
    let reinstall = args.iter().any(|a| a == "--reinstall");
    let names: Vec<&String> = args.iter().filter(|a| *a != "--reinstall").collect();
    match names.as_slice() {
        [name] => Ok(((*name).clone(), reinstall)),
        _ => anyhow::bail!("usage: reload <name> [--reinstall]"),
    }
}

async fn refresh_watches(manager: &SharedManager) {
    if let Some(manager) = manager {
        if let Err(e) = manager.lock().await.refresh_watches().await {
            warn!("Failed to update watched directories: {}", e);
        }
    }
}

pub fn print_plugins(plugins: &[PluginInfo]) {
    if plugins.is_empty() {
        println!("  No plugins registered.");
        return;
    }
    for info in plugins {
        let state = format!("{:?}", info.state);
        let state = if info.state.is_loaded() {
            state.green()
        } else {
            state.yellow()
        };
        println!(
            "  {} {} [{}] generation {}, {} file(s)",
            info.name.bold(),
            info.specifier.dimmed(),
            state,
            info.generation,
            info.files
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use graft_kernel::config::HostConfig;
    use graft_kernel::plugin::{Manifest, PluginError, PluginResult, PluginState};
    use graft_plugins::PackageFetcher;

    /// Copies packages from a sources directory, like a registry would.
    struct LocalFetcher {
        sources: std::path::PathBuf,
    }

    #[async_trait]
    impl PackageFetcher for LocalFetcher {
        async fn fetch(&self, root: &Path, specifiers: &[String]) -> PluginResult<()> {
            let manifest_path = root.join("package.json");
            let mut manifest = Manifest::read(&manifest_path)?;
            for name in specifiers {
                let source = self.sources.join(name);
                if !source.is_dir() {
                    return Err(PluginError::InstallFailure(format!("\tno such package {name}")));
                }
                let target = root.join("node_modules").join(name);
                std::fs::create_dir_all(&target)?;
                for entry in std::fs::read_dir(&source)? {
                    let entry = entry?;
                    std::fs::copy(entry.path(), target.join(entry.file_name()))?;
                }
                manifest.dependencies.insert(name.clone(), "^1.0.0".to_string());
            }
            manifest.write(&manifest_path)
        }
    }

    fn host(dir: &Path) -> HostContext {
        let sources = dir.join("sources").join("echo");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(
            sources.join("package.json"),
            r#"{ "name": "echo", "version": "1.0.0", "main": "main.rhai" }"#,
        )
        .unwrap();
        std::fs::write(
            sources.join("main.rhai"),
            "fn on_load() { counter_inc(\"echo:load\"); }\nfn on_unload() { counter_inc(\"echo:unload\"); }\n",
        )
        .unwrap();

        let config = HostConfig {
            plugins_root: dir.join("plugins"),
            ..HostConfig::default()
        };
        let fetcher = Arc::new(LocalFetcher {
            sources: dir.join("sources"),
        });
        HostContext::with_fetcher(config, fetcher)
    }

    #[test]
    fn reload_arguments_accept_the_flag_anywhere() {
        let args = |s: &[&str]| s.iter().map(|a| a.to_string()).collect::<Vec<_>>();

        assert_eq!(reload_args(&args(&["pkg-a"])).unwrap(), ("pkg-a".to_string(), false));
        assert_eq!(
            reload_args(&args(&["--reinstall", "pkg-a"])).unwrap(),
            ("pkg-a".to_string(), true)
        );
        assert!(reload_args(&args(&["--reinstall"])).is_err());
        assert!(reload_args(&args(&["a", "b"])).is_err());
    }

    #[tokio::test]
    async fn console_drives_the_plugin_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = host(dir.path());
        let console = CommandConsole::new();
        register_console_commands(&console, ctx.registry.clone(), None).unwrap();
        let counters = ctx.host.counters();

        console.dispatch("install echo").await.unwrap();
        assert_eq!(ctx.registry.state("echo"), PluginState::Loaded);
        assert_eq!(counters.get("echo:load"), 1);

        console.dispatch("reload echo").await.unwrap();
        assert_eq!(counters.get("echo:load"), 2);
        assert_eq!(counters.get("echo:unload"), 1);

        console.dispatch("unload echo").await.unwrap();
        assert!(console.dispatch("unload echo").await.is_err());
        console.dispatch("load echo").await.unwrap();
        assert_eq!(counters.get("echo:load"), 3);

        console.dispatch("uninstall echo").await.unwrap();
        assert!(!ctx.registry.is_registered("echo"));
        assert!(!ctx.installer.is_installed("echo"));

        assert_eq!(console.dispatch("stop").await.unwrap(), Flow::Stop);
    }

    #[tokio::test]
    async fn usage_errors_leave_the_registry_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = host(dir.path());
        let console = CommandConsole::new();
        register_console_commands(&console, ctx.registry.clone(), None).unwrap();

        assert!(console.dispatch("load").await.is_err());
        assert!(console.dispatch("install").await.is_err());
        assert!(console.dispatch("load ghost").await.is_err());
        assert_eq!(console.dispatch("help").await.unwrap(), Flow::Continue);
        assert!(ctx.registry.registered_plugins().is_empty());
    }
}

//! Setup pass, install and uninstall through the registry.

mod common;

use common::{Fixture, drain};
use graft_kernel::plugin::{PluginError, PluginState, ReloadEvent};

const ENTRY: &str = "fn on_load() { counter_inc(\"load\"); }\n";

#[tokio::test]
async fn setup_installs_only_missing_plugins() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    fx.publish("pkg-b", &[("main.rhai", ENTRY)]);

    let first = fx.registry.setup(&["pkg-a"]).await;
    assert!(first[0].fresh);

    let second = fx.registry.setup(&["pkg-a", "pkg-b"]).await;
    assert!(!second[0].fresh);
    assert!(second[1].fresh);
    assert_eq!(second[1].name.as_deref(), Some("pkg-b"));

    assert_eq!(*fx.fetcher.fetched.lock(), vec!["pkg-a", "pkg-b"]);
    assert_eq!(fx.registry.registered_plugins(), vec!["pkg-a", "pkg-b"]);

    let manifest = fx.registry.installer().root_manifest().unwrap();
    assert_eq!(manifest.name, "graft.plugins");
    assert!(manifest.dependency("pkg-b").is_some());
}

#[tokio::test]
async fn unresolved_specifiers_are_skipped() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    let manifest_path = fx.registry.installer().manifest_path();

    let entries = fx.registry.setup(&["pkg-a"]).await;
    assert!(entries[0].name.is_some());
    let before = std::fs::read(&manifest_path).unwrap();

    // one unknown package fails the whole batch
    let entries = fx.registry.setup(&["missing", "also-missing"]).await;

    assert!(entries.iter().all(|e| e.name.is_none()));
    assert_eq!(std::fs::read(&manifest_path).unwrap(), before);
    assert_eq!(fx.registry.registered_plugins(), vec!["pkg-a"]);
}

#[tokio::test]
async fn install_new_rejects_installed_plugins() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    let mut events = fx.registry.subscribe();

    assert_eq!(fx.registry.install_new("pkg-a").await.unwrap(), "pkg-a");
    assert!(fx.registry.is_registered("pkg-a"));
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, ReloadEvent::Installed { plugin, .. } if plugin == "pkg-a"))
    );

    assert!(matches!(
        fx.registry.install_new("pkg-a").await,
        Err(PluginError::AlreadyInstalled(n)) if n == "pkg-a"
    ));
    assert!(matches!(
        fx.registry.install_new("nowhere").await,
        Err(PluginError::InstallFailure(_))
    ));
}

#[tokio::test]
async fn uninstall_unregisters_and_removes_files() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    fx.setup(&["pkg-a"]).await;
    fx.registry.load("pkg-a").await.unwrap();

    fx.registry.uninstall("pkg-a").await.unwrap();

    assert!(!fx.registry.is_registered("pkg-a"));
    assert!(!fx.registry.installer().is_installed("pkg-a"));
    assert!(matches!(
        fx.registry.uninstall("pkg-a").await,
        Err(PluginError::NotInstalled(_))
    ));
}

#[tokio::test]
async fn reinstall_of_an_unregistered_plugin_uses_the_root_manifest() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    fx.registry.installer().install(&["pkg-a"]).await;
    assert!(!fx.registry.is_registered("pkg-a"));

    fx.registry.reload("pkg-a", true).await.unwrap();

    assert!(fx.registry.is_loaded("pkg-a"));
    assert_eq!(fx.counter("load"), 1);
}

#[tokio::test]
async fn failed_reinstall_is_reported() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", ENTRY)]);
    fx.setup(&["pkg-a"]).await;
    fx.fetcher.offline.lock().insert("pkg-a".to_string());
    let mut events = fx.registry.subscribe();

    let err = fx.registry.reload("pkg-a", true).await.unwrap_err();

    assert!(matches!(err, PluginError::InstallFailure(_)));
    assert!(!fx.registry.is_registered("pkg-a"));
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, ReloadEvent::ReloadFailed { .. }))
    );
}

#[tokio::test]
async fn installing_a_loaded_plugin_cycles_its_hooks() {
    let fx = Fixture::new();
    fx.publish(
        "pkg-a",
        &[(
            "main.rhai",
            "fn on_load() { counter_inc(\"load\"); }\nfn on_unload() { counter_inc(\"unload\"); }\n",
        )],
    );
    fx.setup(&["pkg-a"]).await;
    fx.registry.load("pkg-a").await.unwrap();
    let before = fx.registry.info("pkg-a").await.unwrap().generation;
    let mut events = fx.registry.subscribe();

    fx.registry.install(&["pkg-a"]).await;

    let info = fx.registry.info("pkg-a").await.unwrap();
    assert!(info.generation > before);
    assert_eq!(info.state, PluginState::Loaded);
    assert_eq!(fx.counter("load"), 2);
    assert_eq!(fx.counter("unload"), 1);

    let events = drain(&mut events);
    let unloaded = events
        .iter()
        .position(|e| matches!(e, ReloadEvent::Unloaded { .. }));
    let loaded = events
        .iter()
        .position(|e| matches!(e, ReloadEvent::Loaded { generation, .. } if *generation == info.generation));
    assert!(unloaded.is_some() && loaded.is_some());
    assert!(unloaded < loaded);
}

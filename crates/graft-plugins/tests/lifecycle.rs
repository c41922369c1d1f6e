//! Registry lifecycle: register, load, unload, unregister.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Fixture, Recorder, drain};
use graft_kernel::plugin::{Manifest, PluginError, PluginState, ReloadEvent};
use graft_plugins::registry::RegistryOptions;
use parking_lot::Mutex;

const HOOKS: &str = r#"
fn on_load(manifest) { counter_inc("load:" + manifest.name); }
fn on_unload() { counter_inc("unload"); }
"#;

#[tokio::test]
async fn register_then_load_runs_the_load_hook_once() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;

    assert_eq!(fx.registry.state("pkg-a"), PluginState::Registered);
    fx.registry.load("pkg-a").await.unwrap();

    assert!(fx.registry.is_loaded("pkg-a"));
    assert_eq!(fx.counter("load:pkg-a"), 1);
    assert_eq!(fx.counter("unload"), 0);
}

#[tokio::test]
async fn pkg_a_load_and_unregister() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.registry.installer().install(&["pkg-a@1.0.0"]).await;

    fx.registry.register("pkg-a").await.unwrap();
    fx.registry.load("pkg-a").await.unwrap();
    assert_eq!(fx.counter("load:pkg-a"), 1);

    fx.registry.unload("pkg-a", true).await.unwrap();
    assert_eq!(fx.counter("unload"), 1);
    assert!(!fx.registry.is_registered("pkg-a"));
    assert_eq!(fx.registry.state("pkg-a"), PluginState::Unregistered);
    assert!(fx.registry.tracked_files().is_empty());
}

#[tokio::test]
async fn second_load_is_rejected() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;

    fx.registry.load("pkg-a").await.unwrap();
    let err = fx.registry.load("pkg-a").await.unwrap_err();

    assert!(matches!(err, PluginError::AlreadyLoaded(ref n) if n == "pkg-a"));
    assert_eq!(fx.counter("load:pkg-a"), 1);
}

#[tokio::test]
async fn unknown_names_are_not_registered() {
    let fx = Fixture::new();

    assert!(matches!(
        fx.registry.load("ghost").await,
        Err(PluginError::NotRegistered(_))
    ));
    assert!(matches!(
        fx.registry.unload("ghost", false).await,
        Err(PluginError::NotRegistered(_))
    ));
    assert!(matches!(
        fx.registry.unregister("ghost").await,
        Err(PluginError::NotRegistered(_))
    ));
    assert!(matches!(
        fx.registry.reload("ghost", false).await,
        Err(PluginError::NotRegistered(_))
    ));
}

#[tokio::test]
async fn unload_requires_a_loaded_plugin() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;

    assert!(matches!(
        fx.registry.unload("pkg-a", false).await,
        Err(PluginError::NotLoaded(_))
    ));

    fx.registry.load("pkg-a").await.unwrap();
    fx.registry.unload("pkg-a", false).await.unwrap();
    assert_eq!(fx.registry.state("pkg-a"), PluginState::Registered);
}

#[tokio::test]
async fn register_requires_a_recorded_dependency() {
    let fx = Fixture::new();
    assert!(matches!(
        fx.registry.register("ghost").await,
        Err(PluginError::ResolutionFailure(_))
    ));
}

#[tokio::test]
async fn register_requires_an_entry_point() {
    let fx = Fixture::new();
    fx.publish("bare", &[]);
    std::fs::write(
        fx.dir.path().join("sources/bare/package.json"),
        r#"{ "name": "bare", "version": "1.0.0" }"#,
    )
    .unwrap();
    fx.registry.installer().install(&["bare"]).await;

    assert!(matches!(
        fx.registry.register("bare").await,
        Err(PluginError::MissingEntryPoint(_))
    ));
    assert!(!fx.registry.is_registered("bare"));
}

#[tokio::test]
async fn plugins_without_hooks_still_transition() {
    let fx = Fixture::new();
    fx.publish("quiet", &[("main.rhai", "counter_inc(\"quiet:top\");\n")]);
    fx.setup(&["quiet"]).await;

    fx.registry.load("quiet").await.unwrap();
    fx.registry.unload("quiet", false).await.unwrap();

    assert_eq!(fx.registry.state("quiet"), PluginState::Registered);
    assert_eq!(fx.counter("quiet:top"), 1);
    let info = fx.registry.info("quiet").await.unwrap();
    assert!(!info.has_load);
    assert!(!info.has_unload);
}

#[tokio::test]
async fn re_registering_keeps_the_state() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;
    fx.registry.load("pkg-a").await.unwrap();
    let before = fx.registry.info("pkg-a").await.unwrap().generation;

    fx.registry.register("pkg-a").await.unwrap();

    let info = fx.registry.info("pkg-a").await.unwrap();
    assert_eq!(info.state, PluginState::Loaded);
    assert!(info.generation > before);
    assert_eq!(fx.registry.registered_plugins(), vec!["pkg-a"]);
    assert_eq!(fx.counter("load:pkg-a"), 2);
    assert_eq!(fx.counter("unload"), 1);
}

#[tokio::test]
async fn re_registering_an_idle_plugin_runs_no_hooks() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;

    fx.registry.register("pkg-a").await.unwrap();

    assert_eq!(fx.registry.state("pkg-a"), PluginState::Registered);
    assert_eq!(fx.counter("load:pkg-a"), 0);
    assert_eq!(fx.counter("unload"), 0);
}

#[tokio::test]
async fn unload_all_runs_in_reverse_registration_order() {
    let fx = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "b", "c", "d"] {
        fx.registry
            .register_native(name, name, Arc::new(Recorder::new(name, &log)), Manifest::default())
            .await;
    }

    assert_eq!(fx.registry.load_all().await, vec!["a", "b", "c", "d"]);
    assert_eq!(fx.registry.unload_all(true).await, vec!["d", "c", "b", "a"]);

    assert_eq!(
        *log.lock(),
        vec![
            "a:load", "b:load", "c:load", "d:load", "d:unload", "c:unload", "b:unload", "a:unload",
        ]
    );
    assert!(fx.registry.registered_plugins().is_empty());
}

#[tokio::test]
async fn load_all_skips_loaded_plugins_and_unload_all_skips_idle_ones() {
    let fx = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "b", "c"] {
        fx.registry
            .register_native(name, name, Arc::new(Recorder::new(name, &log)), Manifest::default())
            .await;
    }
    fx.registry.load("b").await.unwrap();

    assert_eq!(fx.registry.load_all().await, vec!["a", "c"]);
    fx.registry.unload("a", false).await.unwrap();
    log.lock().clear();

    assert_eq!(fx.registry.unload_all(false).await, vec!["c", "b"]);
    assert_eq!(*log.lock(), vec!["c:unload", "b:unload"]);
    assert_eq!(fx.registry.registered_plugins(), vec!["a", "b", "c"]);
    assert!(fx.registry.loaded_plugins().is_empty());
}

#[tokio::test]
async fn failing_load_hook_still_loads() {
    let fx = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let hooks = Arc::new(Recorder::new("grumpy", &log).failing());
    fx.registry
        .register_native("grumpy", "grumpy", hooks, Manifest::default())
        .await;
    let mut events = fx.registry.subscribe();

    fx.registry.load("grumpy").await.unwrap();

    assert!(fx.registry.is_loaded("grumpy"));
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        ReloadEvent::HookFailed { hook: "load", error, .. } if error.contains("refuses")
    )));
    assert!(matches!(events.last(), Some(ReloadEvent::Loaded { .. })));
}

#[tokio::test]
async fn slow_hooks_are_cut_off_by_the_timeout() {
    let fx = Fixture::with_options(
        RegistryOptions::default().with_hook_timeout(Duration::from_millis(50)),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let hooks = Arc::new(Recorder::new("slow", &log).delayed(Duration::from_secs(5)));
    fx.registry
        .register_native("slow", "slow", hooks, Manifest::default())
        .await;
    let mut events = fx.registry.subscribe();

    tokio::time::timeout(Duration::from_secs(2), fx.registry.load("slow"))
        .await
        .expect("load returns once the hook times out")
        .unwrap();

    assert!(fx.registry.is_loaded("slow"));
    assert!(log.lock().is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ReloadEvent::HookFailed { error, .. } if error.contains("timed out")
    )));
}

#[tokio::test]
async fn unregister_unloads_first() {
    let fx = Fixture::new();
    fx.publish("pkg-a", &[("main.rhai", HOOKS)]);
    fx.setup(&["pkg-a"]).await;
    fx.registry.load("pkg-a").await.unwrap();
    let mut events = fx.registry.subscribe();

    fx.registry.unregister("pkg-a").await.unwrap();

    assert_eq!(fx.counter("unload"), 1);
    let events = drain(&mut events);
    assert!(matches!(events[0], ReloadEvent::Unloaded { .. }));
    assert!(matches!(events[1], ReloadEvent::Unregistered { .. }));
    assert!(fx.registry.get("pkg-a").is_none());
}

#[tokio::test]
async fn list_reports_plugins_in_registration_order() {
    let fx = Fixture::new();
    fx.publish("one", &[("main.rhai", HOOKS)]);
    fx.publish("two", &[("main.rhai", HOOKS)]);
    fx.setup(&["two", "one"]).await;
    fx.registry.load("one").await.unwrap();

    let infos = fx.registry.list().await;
    let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["two", "one"]);
    assert_eq!(infos[1].state, PluginState::Loaded);
    assert!(infos[1].loaded_at.is_some());
    assert_eq!(infos[0].files, 1);
}

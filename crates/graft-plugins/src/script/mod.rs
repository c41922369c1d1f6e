//! Rhai script host.
//!
//! One [`ScriptHost`] owns the engine shared by every plugin. Importing a
//! plugin entry yields a [`ScriptInstance`]: the entry module evaluated for
//! one generation, pinned in the cache so its hooks can be called.

pub mod resolver;

pub use resolver::{CacheResolver, GenerationCache, GenerationSnapshot, INSTANCE_PREFIX};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use graft_kernel::config::ScriptLimits;
use graft_kernel::plugin::{Generation, HookContext, PluginError, PluginHooks, PluginResult};
use rhai::{AST, Dynamic, Engine, Position, Scope};
use tracing::{debug, error, info, warn};

/// Exported function invoked after an instance is imported.
pub const LOAD_HOOK: &str = "on_load";
/// Exported function invoked before an instance is dropped.
pub const UNLOAD_HOOK: &str = "on_unload";

/// Named integer counters scripts can bump; shared across all plugins.
#[derive(Debug, Default, Clone)]
pub struct HostCounters {
    inner: Arc<DashMap<String, i64>>,
}

impl HostCounters {
    pub fn increment(&self, name: &str) -> i64 {
        let mut entry = self.inner.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn get(&self, name: &str) -> i64 {
        self.inner.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn reset(&self) {
        self.inner.clear();
    }
}

/// Owner of the shared engine and module cache.
pub struct ScriptHost {
    engine: Arc<Engine>,
    cache: Arc<GenerationCache>,
    counters: HostCounters,
    instances: AtomicU64,
}

impl ScriptHost {
    /// Create a host whose non-relative imports are looked up under
    /// `library_root`.
    pub fn new(limits: &ScriptLimits, library_root: Option<PathBuf>) -> Self {
        let cache = Arc::new(GenerationCache::new(library_root));
        let counters = HostCounters::default();

        let mut engine = Engine::new();
        Self::apply_limits(&mut engine, limits);
        Self::register_host_functions(&mut engine, &counters);
        engine.set_module_resolver(CacheResolver(cache.clone()));

        Self {
            engine: Arc::new(engine),
            cache,
            counters,
            instances: AtomicU64::new(0),
        }
    }

    fn apply_limits(engine: &mut Engine, limits: &ScriptLimits) {
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_modules(limits.max_modules);
    }

    fn register_host_functions(engine: &mut Engine, counters: &HostCounters) {
        engine.on_print(|msg| info!("[script] {}", msg));
        engine.on_debug(|msg, source, pos| {
            debug!("[script] {} ({}:{})", msg, source.unwrap_or("<host>"), pos)
        });

        engine.register_fn("log", |msg: &str| info!("[script] {}", msg));
        engine.register_fn("info", |msg: &str| info!("[script] {}", msg));
        engine.register_fn("warn", |msg: &str| warn!("[script] {}", msg));
        engine.register_fn("error", |msg: &str| error!("[script] {}", msg));

        let c = counters.clone();
        engine.register_fn("counter_inc", move |name: &str| -> i64 { c.increment(name) });
        let c = counters.clone();
        engine.register_fn("counter_get", move |name: &str| -> i64 { c.get(name) });
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    pub fn counters(&self) -> &HostCounters {
        &self.counters
    }

    /// Issue the token for a new generation.
    pub fn next_generation(&self) -> Generation {
        self.cache.next_generation()
    }

    /// Import `entry` at the generations currently required by the cache.
    ///
    /// Runs the engine on the blocking pool; top-level code of every module
    /// not cached at its required generation executes here.
    pub async fn import(
        self: &Arc<Self>,
        plugin: &str,
        entry: &Path,
        generation: Generation,
    ) -> PluginResult<ScriptInstance> {
        let host = self.clone();
        let plugin_name = plugin.to_string();
        let entry_path = entry.to_path_buf();

        tokio::task::spawn_blocking(move || host.import_blocking(&plugin_name, &entry_path, generation))
            .await
            .map_err(|e| PluginError::Other(format!("import task failed: {e}")))?
    }

    fn import_blocking(
        self: &Arc<Self>,
        plugin: &str,
        entry: &Path,
        generation: Generation,
    ) -> PluginResult<ScriptInstance> {
        let (module, functions) = self
            .cache
            .load_file(&self.engine, entry, Position::NONE)
            .map_err(|e| PluginError::Script {
                plugin: plugin.to_string(),
                message: e.to_string(),
            })?;

        let id = self.instances.fetch_add(1, Ordering::SeqCst);
        let key = format!("{INSTANCE_PREFIX}{plugin}/{id}");
        self.cache.pin(&key, module);

        let load = HookCall::find(&functions, LOAD_HOOK);
        let unload = HookCall::find(&functions, UNLOAD_HOOK);

        let instance = ScriptInstance {
            plugin: plugin.to_string(),
            entry: entry.to_path_buf(),
            generation,
            key: key.clone(),
            engine: self.engine.clone(),
            cache: self.cache.clone(),
            load: self.driver(&key, load)?,
            unload: self.driver(&key, unload)?,
        };

        debug!(
            "Imported {} from {:?} (generation {}, load hook: {}, unload hook: {})",
            plugin,
            entry,
            generation,
            instance.has_load(),
            instance.has_unload()
        );
        Ok(instance)
    }

    fn driver(&self, key: &str, call: Option<HookCall>) -> PluginResult<Option<Arc<AST>>> {
        let Some(call) = call else {
            return Ok(None);
        };
        let args = if call.takes_manifest { "manifest" } else { "" };
        let script = format!("import \"{key}\" as plugin;\nplugin::{}({args});", call.name);
        let ast = self
            .engine
            .compile(&script)
            .map_err(|e| PluginError::Other(format!("hook driver: {e}")))?;
        Ok(Some(Arc::new(ast)))
    }
}

#[derive(Debug, Clone, Copy)]
struct HookCall {
    name: &'static str,
    takes_manifest: bool,
}

impl HookCall {
    /// Zero- or one-parameter public function with the given name; the
    /// one-parameter form wins when both exist.
    fn find(functions: &[(String, usize)], name: &'static str) -> Option<Self> {
        let arities: Vec<usize> = functions
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, arity)| *arity)
            .collect();

        if arities.contains(&1) {
            Some(Self { name, takes_manifest: true })
        } else if arities.contains(&0) {
            Some(Self { name, takes_manifest: false })
        } else {
            None
        }
    }
}

/// One evaluated generation of a script plugin.
pub struct ScriptInstance {
    plugin: String,
    entry: PathBuf,
    generation: Generation,
    key: String,
    engine: Arc<Engine>,
    cache: Arc<GenerationCache>,
    load: Option<Arc<AST>>,
    unload: Option<Arc<AST>>,
}

impl std::fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("plugin", &self.plugin)
            .field("entry", &self.entry)
            .field("generation", &self.generation)
            .finish()
    }
}

impl ScriptInstance {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    async fn run(&self, hook: &'static str, driver: &Option<Arc<AST>>, ctx: &HookContext) -> PluginResult<()> {
        let Some(driver) = driver.clone() else {
            return Ok(());
        };

        let manifest: Dynamic = rhai::serde::to_dynamic(&*ctx.manifest).map_err(|e| {
            PluginError::HookFailed {
                plugin: self.plugin.clone(),
                hook,
                message: e.to_string(),
            }
        })?;
        let engine = self.engine.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            scope.push_constant_dynamic("manifest", manifest);
            engine.run_ast_with_scope(&mut scope, &driver)
        })
        .await
        .map_err(|e| PluginError::HookFailed {
            plugin: self.plugin.clone(),
            hook,
            message: format!("hook task failed: {e}"),
        })?;

        result.map_err(|e| PluginError::HookFailed {
            plugin: self.plugin.clone(),
            hook,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PluginHooks for ScriptInstance {
    async fn load(&self, ctx: &HookContext) -> PluginResult<()> {
        self.run("load", &self.load, ctx).await
    }

    async fn unload(&self, ctx: &HookContext) -> PluginResult<()> {
        self.run("unload", &self.unload, ctx).await
    }

    fn has_load(&self) -> bool {
        self.load.is_some()
    }

    fn has_unload(&self) -> bool {
        self.unload.is_some()
    }
}

impl Drop for ScriptInstance {
    fn drop(&mut self) {
        self.cache.unpin(&self.key);
    }
}

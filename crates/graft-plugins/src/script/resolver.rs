//! Generation-aware module cache.
//!
//! The engine resolves every `import` through [`CacheResolver`]. A module is
//! evaluated once per generation its file requires; until the invalidator
//! raises that requirement the cached module is handed out again and its
//! top-level code does not run.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use graft_kernel::plugin::Generation;
use parking_lot::Mutex;
use rhai::{Engine, EvalAltResult, FnAccess, Module, ModuleResolver, Position, Scope};
use tracing::debug;

use crate::hot_reload::graph::resolve_import;

/// Import paths with this prefix name pinned plugin instances, not files.
pub const INSTANCE_PREFIX: &str = "@instance/";

/// Public function of an evaluated module: name and arity.
pub type FnSignature = (String, usize);

#[derive(Clone)]
struct CachedModule {
    generation: Generation,
    module: Arc<Module>,
    functions: Arc<Vec<FnSignature>>,
}

#[derive(Default)]
struct CacheState {
    /// Generation each file must be evaluated at.
    required: HashMap<PathBuf, Generation>,
    modules: HashMap<PathBuf, CachedModule>,
    pinned: HashMap<String, Arc<Module>>,
    evaluating: HashSet<(ThreadId, PathBuf)>,
}

/// Snapshot of generation requirements, used to undo a failed reload.
#[derive(Debug, Clone)]
pub struct GenerationSnapshot {
    required: Vec<(PathBuf, Option<Generation>)>,
}

/// Evaluated modules keyed by file and generation.
pub struct GenerationCache {
    state: Mutex<CacheState>,
    issued: AtomicU64,
    library_root: Option<PathBuf>,
}

impl GenerationCache {
    /// `library_root` is where non-relative import paths are looked up.
    pub fn new(library_root: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            issued: AtomicU64::new(0),
            library_root,
        }
    }

    /// Issue a fresh generation token.
    pub fn next_generation(&self) -> Generation {
        Generation(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Most recently issued generation.
    pub fn current_generation(&self) -> Generation {
        Generation(self.issued.load(Ordering::SeqCst))
    }

    /// Require `files` to be evaluated at `generation` from now on.
    pub fn advance(&self, files: &[PathBuf], generation: Generation) -> GenerationSnapshot {
        let mut state = self.state.lock();
        let required = files
            .iter()
            .map(|file| {
                let previous = state.required.insert(file.clone(), generation);
                (file.clone(), previous)
            })
            .collect();
        GenerationSnapshot { required }
    }

    /// Put generation requirements back to a snapshot taken by [`advance`].
    ///
    /// [`advance`]: GenerationCache::advance
    pub fn restore(&self, snapshot: GenerationSnapshot) {
        let mut state = self.state.lock();
        for (file, previous) in snapshot.required.into_iter().rev() {
            match previous {
                Some(generation) => state.required.insert(file, generation),
                None => state.required.remove(&file),
            };
        }
    }

    /// Generation a file is currently required at, if tracked.
    pub fn required_generation(&self, file: &Path) -> Option<Generation> {
        self.state.lock().required.get(file).copied()
    }

    /// Generation of the cached module for `file`, if any.
    pub fn cached_generation(&self, file: &Path) -> Option<Generation> {
        self.state.lock().modules.get(file).map(|m| m.generation)
    }

    /// Drop cached modules and requirements for files no longer used.
    pub fn forget(&self, files: &[PathBuf]) {
        let mut state = self.state.lock();
        for file in files {
            state.modules.remove(file);
            state.required.remove(file);
        }
    }

    pub(crate) fn pin(&self, key: &str, module: Arc<Module>) {
        self.state.lock().pinned.insert(key.to_string(), module);
    }

    pub(crate) fn unpin(&self, key: &str) {
        self.state.lock().pinned.remove(key);
    }

    /// Module for `file` at its required generation, evaluating it if the
    /// cached copy is older.
    pub fn load_file(
        &self,
        engine: &Engine,
        file: &Path,
        pos: Position,
    ) -> Result<(Arc<Module>, Arc<Vec<FnSignature>>), Box<EvalAltResult>> {
        let key = (std::thread::current().id(), file.to_path_buf());
        let generation = {
            let mut state = self.state.lock();
            let generation = match state.required.get(file) {
                Some(generation) => *generation,
                None => {
                    let generation = self.current_generation();
                    state.required.insert(file.to_path_buf(), generation);
                    generation
                }
            };

            if let Some(cached) = state.modules.get(file) {
                if cached.generation == generation {
                    return Ok((cached.module.clone(), cached.functions.clone()));
                }
            }

            if !state.evaluating.insert(key.clone()) {
                return Err(format!("cyclic import of {}", file.display()).into());
            }
            generation
        };

        debug!("Evaluating {:?} for generation {}", file, generation);
        let result = evaluate(engine, file, pos);

        let mut state = self.state.lock();
        state.evaluating.remove(&key);
        let (module, functions) = result?;
        let cached = CachedModule {
            generation,
            module: Arc::new(module),
            functions: Arc::new(functions),
        };
        state.modules.insert(file.to_path_buf(), cached.clone());
        Ok((cached.module, cached.functions))
    }

    fn resolve_import(&self, source: Option<&str>, path: &str) -> Option<PathBuf> {
        let importer = source.map(Path::new);
        resolve_import(importer, path).or_else(|| {
            let root = self.library_root.as_ref()?;
            Some(crate::specifier::clean(&with_extension(root.join(path))))
        })
    }
}

fn with_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("rhai")
    }
}

fn evaluate(
    engine: &Engine,
    file: &Path,
    pos: Position,
) -> Result<(Module, Vec<FnSignature>), Box<EvalAltResult>> {
    let source = std::fs::read_to_string(file).map_err(|e| {
        Box::new(EvalAltResult::ErrorInModule(
            file.display().to_string(),
            format!("cannot read: {e}").into(),
            pos,
        ))
    })?;

    let mut ast = engine.compile(&source).map_err(|e| {
        Box::new(EvalAltResult::ErrorInModule(
            file.display().to_string(),
            e.to_string().into(),
            pos,
        ))
    })?;
    ast.set_source(file.to_string_lossy().to_string());

    let functions = ast
        .iter_functions()
        .filter(|f| f.access == FnAccess::Public)
        .map(|f| (f.name.to_string(), f.params.len()))
        .collect();

    let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)?;
    Ok((module, functions))
}

/// The [`ModuleResolver`] installed into the host engine.
#[derive(Clone)]
pub struct CacheResolver(pub Arc<GenerationCache>);

impl ModuleResolver for CacheResolver {
    fn resolve(
        &self,
        engine: &Engine,
        source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        if path.starts_with(INSTANCE_PREFIX) {
            return self
                .0
                .state
                .lock()
                .pinned
                .get(path)
                .cloned()
                .ok_or_else(|| Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos)));
        }

        let file = self
            .0
            .resolve_import(source, path)
            .ok_or_else(|| Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos)))?;

        if !file.is_file() {
            return Err(Box::new(EvalAltResult::ErrorModuleNotFound(
                path.to_string(),
                pos,
            )));
        }

        self.0.load_file(engine, &file, pos).map(|(module, _)| module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_increase() {
        let cache = GenerationCache::new(None);
        let a = cache.next_generation();
        let b = cache.next_generation();
        assert!(b > a);
        assert_eq!(cache.current_generation(), b);
    }

    #[test]
    fn restore_undoes_advance() {
        let cache = GenerationCache::new(None);
        let a = PathBuf::from("/p/a.rhai");
        let b = PathBuf::from("/p/b.rhai");

        let g1 = cache.next_generation();
        cache.advance(&[a.clone()], g1);

        let g2 = cache.next_generation();
        let snapshot = cache.advance(&[a.clone(), b.clone()], g2);
        assert_eq!(cache.required_generation(&a), Some(g2));
        assert_eq!(cache.required_generation(&b), Some(g2));

        cache.restore(snapshot);
        assert_eq!(cache.required_generation(&a), Some(g1));
        assert_eq!(cache.required_generation(&b), None);
    }
}

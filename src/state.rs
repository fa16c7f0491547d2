//! Interpreter state: the module registry and extension snapshots.
//!
//! The module map is the sole source of truth for "has this been imported".
//! A module is registered *before* its body runs, so circular imports see a
//! partially-populated module instead of recursing forever. Cleanup detaches
//! the map first, which makes every later import fail cleanly.

use crate::api;
use crate::config::ImportConfig;
use crate::host::{Compiler, Evaluator, NativeLoader, RegisteredModuleFinder};
use crate::marshal::{BincodeCodec, CodeCodec};
use crate::resolver::{default_filetab, FileDescr};
use crate::script::{ScriptCompiler, ScriptEvaluator};
use crate::tables::{BuiltinInitFn, BuiltinTable, FrozenTable};
use crate::value::{deep_copy_dict, merge_dict, Dict, ImportHookFn, Module, Value};
use dashmap::DashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub type ModuleMap = DashMap<String, Arc<Module>>;

// =============================================================================
// InterpreterState
// =============================================================================

/// Everything the import core needs, passed explicitly instead of living in
/// process globals. Interior mutability keeps re-entrant imports (module
/// bodies importing further modules) on shared references.
pub struct InterpreterState {
    pub config: ImportConfig,
    /// `None` once `cleanup` has run; imports then fail with `SystemError`.
    modules: RwLock<Option<Arc<ModuleMap>>>,
    /// Namespace snapshots of initialized extension modules, keyed by
    /// filename (native) or name (builtin).
    extensions: DashMap<String, Arc<Dict>>,
    builtins_table: BuiltinTable,
    frozen_table: FrozenTable,
    filetab: Vec<FileDescr>,
    builtins_dict: Arc<Dict>,
    pub compiler: Box<dyn Compiler>,
    pub evaluator: Box<dyn Evaluator>,
    pub codec: Box<dyn CodeCodec>,
    pub native_loader: Option<Box<dyn NativeLoader>>,
    pub registered_finder: Option<Box<dyn RegisteredModuleFinder>>,
}

impl InterpreterState {
    /// Builder with the reference host wired in as the default.
    pub fn builder(config: ImportConfig) -> InterpreterBuilder {
        InterpreterBuilder::new(config)
    }

    /// Default state: reference host, empty tables.
    pub fn with_defaults(config: ImportConfig) -> InterpreterState {
        InterpreterBuilder::new(config).build()
    }

    // -------------------------------------------------------------------------
    // Module registry
    // -------------------------------------------------------------------------

    /// Handle to the module map, or `SystemError` after cleanup.
    pub fn modules(&self) -> crate::error::Result<Arc<ModuleMap>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .cloned()
            .ok_or_else(|| {
                crate::error::ImportError::System("no module dictionary".to_string())
            })
    }

    /// Fetch-or-create: returns the registered module if one exists, else
    /// creates an empty module and registers it. The registry owns its
    /// entries; callers get a shared handle.
    pub fn add_module(&self, name: &str) -> crate::error::Result<Arc<Module>> {
        let map = self.modules()?;
        if let Some(m) = map.get(name).map(|e| e.value().clone()) {
            return Ok(m);
        }
        let m = Module::new(name);
        map.insert(name.to_string(), m.clone());
        Ok(m)
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules().ok()?.get(name).map(|e| e.value().clone())
    }

    pub fn remove_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules().ok()?.remove(name).map(|(_, m)| m)
    }

    // -------------------------------------------------------------------------
    // Extension snapshots
    // -------------------------------------------------------------------------

    /// Record a just-initialized extension module: deep-copy its namespace
    /// under `filename` so later imports can skip the native initializer.
    /// `SystemError` if the module is not actually registered.
    pub fn fixup_extension(
        &self,
        name: &str,
        filename: &str,
    ) -> crate::error::Result<Arc<Dict>> {
        let module = self.get_module(name).ok_or_else(|| {
            crate::error::ImportError::System(format!(
                "fixup_extension: module {} not loaded",
                name
            ))
        })?;
        let copy = deep_copy_dict(module.dict());
        self.extensions.insert(filename.to_string(), copy.clone());
        Ok(copy)
    }

    /// Re-materialize a previously initialized extension module from its
    /// snapshot: fetch-or-create the module, then overlay the snapshot into
    /// its namespace. `Ok(None)` when no snapshot exists.
    pub fn find_extension(
        &self,
        name: &str,
        filename: &str,
    ) -> crate::error::Result<Option<Arc<Module>>> {
        let Some(snapshot) = self.extensions.get(filename).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let module = self.add_module(name)?;
        merge_dict(&snapshot, module.dict());
        if self.config.verbose >= 1 {
            eprintln!("import {} # previously loaded ({})", name, filename);
        }
        Ok(Some(module))
    }

    pub fn has_extension(&self, filename: &str) -> bool {
        self.extensions.contains_key(filename)
    }

    // -------------------------------------------------------------------------
    // Tables and static data
    // -------------------------------------------------------------------------

    pub fn builtin_table(&self) -> &BuiltinTable {
        &self.builtins_table
    }

    pub fn frozen_table(&self) -> &FrozenTable {
        &self.frozen_table
    }

    pub fn filetab(&self) -> &[FileDescr] {
        &self.filetab
    }

    pub fn max_suffix_len(&self) -> usize {
        self.filetab.iter().map(|fd| fd.suffix.len()).max().unwrap_or(0)
    }

    /// The standard builtin namespace seeded into executing modules as
    /// `__builtins__`. Contains the default `__import__` hook.
    pub fn builtins_dict(&self) -> &Arc<Dict> {
        &self.builtins_dict
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Tear down the module registry. The map is detached first so re-entrant
    /// imports triggered by teardown fail instead of repopulating it; each
    /// module namespace is then cleared in two phases.
    pub fn cleanup(&self) {
        let detached = self
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(map) = detached {
            for entry in map.iter() {
                clear_dict_carefully(entry.value().dict());
            }
            map.clear();
        }
    }
}

/// Two-phase namespace clear: names starting with a single underscore are
/// first rebound to `None`, tearing down private state while dunder metadata
/// is still intact; then the whole dict is cleared. This gives interdependent
/// module globals a deterministic coarse teardown order.
fn clear_dict_carefully(dict: &Dict) {
    let keys: Vec<String> = dict.iter().map(|e| e.key().clone()).collect();
    for key in &keys {
        if key.starts_with('_') && !key.starts_with("__") {
            let already_none = dict.get(key).map_or(false, |v| matches!(v.value(), Value::None));
            if !already_none {
                dict.insert(key.clone(), Value::None);
            }
        }
    }
    dict.clear();
}

// =============================================================================
// Builder
// =============================================================================

pub struct InterpreterBuilder {
    config: ImportConfig,
    builtins: BuiltinTable,
    frozen: FrozenTable,
    compiler: Option<Box<dyn Compiler>>,
    evaluator: Option<Box<dyn Evaluator>>,
    codec: Option<Box<dyn CodeCodec>>,
    native_loader: Option<Box<dyn NativeLoader>>,
    registered_finder: Option<Box<dyn RegisteredModuleFinder>>,
}

impl InterpreterBuilder {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            builtins: BuiltinTable::new(),
            frozen: FrozenTable::new(),
            compiler: None,
            evaluator: None,
            codec: None,
            native_loader: None,
            registered_finder: None,
        }
    }

    /// Register a built-in module with its initializer.
    pub fn builtin<F>(mut self, name: &str, init: F) -> Self
    where
        F: Fn(&InterpreterState) -> crate::error::Result<()> + Send + Sync + 'static,
    {
        self.builtins.register(name, Some(Arc::new(init) as BuiltinInitFn));
        self
    }

    /// Register a built-in that the runtime initializes itself and that can
    /// never be re-initialized through the import machinery.
    pub fn internal_builtin(mut self, name: &str) -> Self {
        self.builtins.register(name, None);
        self
    }

    /// Register a frozen module from its marshaled code bytes.
    pub fn frozen(mut self, name: &str, code: Vec<u8>) -> Self {
        self.frozen.register(name, code);
        self
    }

    pub fn compiler(mut self, compiler: Box<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn codec(mut self, codec: Box<dyn CodeCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn native_loader(mut self, loader: Box<dyn NativeLoader>) -> Self {
        self.native_loader = Some(loader);
        self
    }

    pub fn registered_finder(mut self, finder: Box<dyn RegisteredModuleFinder>) -> Self {
        self.registered_finder = Some(finder);
        self
    }

    pub fn build(self) -> InterpreterState {
        let mut filetab = default_filetab();
        if self.config.optimize {
            // Optimized byte-code gets its own cache namespace.
            for fd in filetab.iter_mut() {
                if fd.suffix == ".pyc" {
                    fd.suffix = ".pyo".to_string();
                }
            }
        }

        let default_hook: ImportHookFn = Arc::new(
            |state: &InterpreterState,
             name: &str,
             globals: Option<&Arc<Dict>>,
             locals: Option<&Arc<Dict>>,
             fromlist: &[Value]| {
                api::import_module_ex(state, name, globals, locals, fromlist)
            },
        );
        let builtins_dict = Dict::new();
        builtins_dict.insert("__import__".to_string(), Value::ImportFn(default_hook));

        InterpreterState {
            config: self.config,
            modules: RwLock::new(Some(Arc::new(ModuleMap::new()))),
            extensions: DashMap::new(),
            builtins_table: self.builtins,
            frozen_table: self.frozen,
            filetab,
            builtins_dict: Arc::new(builtins_dict),
            compiler: self.compiler.unwrap_or_else(|| Box::new(ScriptCompiler)),
            evaluator: self.evaluator.unwrap_or_else(|| Box::new(ScriptEvaluator)),
            codec: self.codec.unwrap_or_else(|| Box::new(BincodeCodec)),
            native_loader: self.native_loader,
            registered_finder: self.registered_finder,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

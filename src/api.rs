//! Public import API.
//!
//! `import_module` is the workhorse: registry hit or resolve-and-load.
//! `import_hooked` is the user-facing entry point that defers to whatever
//! `__import__` is bound in the caller's builtins, so embedders can install
//! import hooks without touching the core.

use crate::error::{ImportError, Result};
use crate::loader::load_module;
pub use crate::loader::exec_code_module;
use crate::resolver::find_module;
use crate::state::InterpreterState;
use crate::value::{Dict, Module, Value};
use std::sync::Arc;

/// Import `name`: return the registered module if present, otherwise
/// resolve, load, register and return it. Each name executes at most once
/// per interpreter lifetime.
pub fn import_module(state: &InterpreterState, name: &str) -> Result<Arc<Module>> {
    let map = state.modules()?;
    if let Some(module) = map.get(name).map(|e| e.value().clone()) {
        return Ok(module);
    }
    let found = find_module(state, name, None)?;
    load_module(state, name, found.file, &found.path, found.descr.kind)
}

/// Hook-compatible import signature. The core resolves the plain name;
/// `fromlist` handling and relative-name resolution belong to the
/// user-level `__import__` that wraps this.
pub fn import_module_ex(
    state: &InterpreterState,
    name: &str,
    _globals: Option<&Arc<Dict>>,
    _locals: Option<&Arc<Dict>>,
    _fromlist: &[Value],
) -> Result<Arc<Module>> {
    import_module(state, name)
}

/// Re-import a module in place. The argument must be the module currently
/// registered under its own name; the loader then mutates that same module
/// object, so references held by user code stay valid.
pub fn reload_module(state: &InterpreterState, module: &Value) -> Result<Arc<Module>> {
    let Value::Module(module) = module else {
        return Err(ImportError::Type(
            "reload() argument must be module".to_string(),
        ));
    };
    let name = module.name();
    let registered = state.get_module(name);
    if registered.map_or(true, |r| !Arc::ptr_eq(&r, module)) {
        return Err(ImportError::Import(format!(
            "reload(): module {} not in sys.modules",
            name
        )));
    }
    let found = find_module(state, name, None)?;
    load_module(state, name, found.file, &found.path, found.descr.kind)
}

/// Import through the `__import__` bound in the caller's builtins.
///
/// With no caller globals, the interpreter's standard builtins are used and
/// a one-entry globals dict is synthesized around them. The hook receives a
/// synthetic `["__doc__"]` fromlist, mirroring how an `import` statement
/// asks for the module object itself.
pub fn import_hooked(
    state: &InterpreterState,
    name: &str,
    globals: Option<&Arc<Dict>>,
) -> Result<Arc<Module>> {
    let owned_globals: Arc<Dict>;
    let (globals_ref, builtins) = match globals {
        Some(g) => {
            let builtins = g.get("__builtins__").map(|e| e.value().clone()).ok_or_else(
                || ImportError::System("no __builtins__ in globals".to_string()),
            )?;
            (g, builtins)
        }
        None => {
            let builtins = Value::Dict(state.builtins_dict().clone());
            let fake = Dict::new();
            fake.insert("__builtins__".to_string(), builtins.clone());
            owned_globals = Arc::new(fake);
            (&owned_globals, builtins)
        }
    };

    // __builtins__ may be either a namespace dict or a module.
    let hook = match &builtins {
        Value::Dict(d) => d.get("__import__").map(|e| e.value().clone()),
        Value::Module(m) => m.get("__import__"),
        _ => None,
    }
    .ok_or_else(|| ImportError::System("no __import__ in __builtins__".to_string()))?;

    let Value::ImportFn(hook) = hook else {
        return Err(ImportError::Type(format!(
            "__import__ is not callable (found {})",
            hook.type_name()
        )));
    };

    let fromlist = [Value::Str("__doc__".to_string())];
    hook(state, name, Some(globals_ref), Some(globals_ref), &fromlist)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;

    fn state() -> InterpreterState {
        InterpreterState::with_defaults(ImportConfig::default())
    }

    #[test]
    fn test_reload_rejects_non_module() {
        let state = state();
        let err = reload_module(&state, &Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: reload() argument must be module");
    }

    #[test]
    fn test_reload_rejects_unregistered_module() {
        let state = state();
        let stray = Module::new("stray");
        let err = reload_module(&state, &Value::Module(stray)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: reload(): module stray not in sys.modules"
        );
    }

    #[test]
    fn test_reload_rejects_shadowed_module() {
        // Same name registered, but a different object: still an error.
        let state = state();
        state.add_module("spam").unwrap();
        let imposter = Module::new("spam");
        let err = reload_module(&state, &Value::Module(imposter)).unwrap_err();
        assert!(matches!(err, ImportError::Import(_)));
    }

    #[test]
    fn test_import_missing_module() {
        let state = InterpreterState::with_defaults(ImportConfig {
            search_path: vec![],
            ..ImportConfig::default()
        });
        let err = import_module(&state, "ghost").unwrap_err();
        assert_eq!(err.to_string(), "ImportError: No module named ghost");
    }

    #[test]
    fn test_import_registry_hit_skips_resolution() {
        // An empty search path cannot resolve anything, so a hit proves the
        // registry short-circuit.
        let state = InterpreterState::with_defaults(ImportConfig {
            search_path: vec![],
            ..ImportConfig::default()
        });
        let planted = state.add_module("planted").unwrap();
        let fetched = import_module(&state, "planted").unwrap();
        assert!(Arc::ptr_eq(&planted, &fetched));
    }

    #[test]
    fn test_hooked_import_uses_standard_builtins_without_globals() {
        let state = state();
        state.add_module("present").unwrap();
        let module = import_hooked(&state, "present", None).unwrap();
        assert_eq!(module.name(), "present");
    }

    #[test]
    fn test_hooked_import_reads_hook_from_caller_globals() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let state = state();
        state.add_module("present").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let counting_hook: crate::value::ImportHookFn = Arc::new(
            move |state: &InterpreterState,
                  name: &str,
                  _: Option<&Arc<Dict>>,
                  _: Option<&Arc<Dict>>,
                  _: &[Value]| {
                seen.fetch_add(1, Ordering::SeqCst);
                import_module(state, name)
            },
        );
        let custom_builtins = Arc::new(Dict::new());
        custom_builtins.insert("__import__".to_string(), Value::ImportFn(counting_hook));
        let globals = Arc::new(Dict::new());
        globals.insert("__builtins__".to_string(), Value::Dict(custom_builtins));

        let module = import_hooked(&state, "present", Some(&globals)).unwrap();
        assert_eq!(module.name(), "present");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hooked_import_requires_builtins() {
        let state = state();
        let globals = Arc::new(Dict::new());
        let err = import_hooked(&state, "x", Some(&globals)).unwrap_err();
        assert!(matches!(err, ImportError::System(_)));
    }
}

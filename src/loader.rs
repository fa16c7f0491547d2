//! Module Loaders: turn a resolved location into a live, registered module.
//!
//! Every loader funnels through `exec_code_module`, which registers the
//! module *before* executing its body (circular imports then see a partial
//! module) and re-fetches it afterwards (the body may have rebound or
//! removed it). A loader that fails leaves the partial registry entry in
//! place; debuggers can inspect it and a retry returns it as-is.

use crate::cache::{
    check_compiled_module, compiled_pathname, read_compiled_module, source_mtime,
    write_compiled_module, MAGIC,
};
use crate::error::{ImportError, Result};
use crate::marshal::{read_code_from_bytes, read_long};
use crate::resolver::{find_module, ModuleKind};
use crate::state::InterpreterState;
use crate::value::{CodeObject, Module, Value};
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

/// Outcome of a builtin/frozen initialization attempt. "Not found" is not
/// an error; the caller may have other sources to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized,
    NotFound,
}

// =============================================================================
// Code execution
// =============================================================================

/// Execute a code object as the body of module `name` and return the module.
///
/// Observable order: register, seed `__builtins__`, seed `__file__`, run the
/// body with globals and locals both aliasing the module namespace, then
/// re-fetch from the registry.
pub fn exec_code_module(
    state: &InterpreterState,
    name: &str,
    code: &CodeObject,
) -> Result<Arc<Module>> {
    let module = state.add_module(name)?;
    let dict = module.dict().clone();

    if !dict.contains_key("__builtins__") {
        dict.insert(
            "__builtins__".to_string(),
            Value::Dict(state.builtins_dict().clone()),
        );
    }
    // Informational only; the module works without it.
    dict.insert(
        "__file__".to_string(),
        Value::Str(code.filename.clone()),
    );

    state.evaluator.eval(state, code, &dict, &dict)?;

    state.get_module(name).ok_or_else(|| {
        ImportError::Import(format!(
            "Loaded module {} not found in sys.modules",
            name
        ))
    })
}

// =============================================================================
// Kind dispatch
// =============================================================================

/// Load a resolved module. Source and compiled kinds require the open
/// handle produced by resolution.
pub fn load_module(
    state: &InterpreterState,
    name: &str,
    file: Option<File>,
    path: &str,
    kind: ModuleKind,
) -> Result<Arc<Module>> {
    match kind {
        ModuleKind::SourceFile | ModuleKind::CompiledFile => {
            let mut file = file.ok_or_else(|| {
                ImportError::Value(format!(
                    "file object required for import (type code {})",
                    kind.code()
                ))
            })?;
            if kind == ModuleKind::SourceFile {
                load_source_module(state, name, path, &mut file)
            } else {
                load_compiled_module(state, name, path, &mut file)
            }
        }
        ModuleKind::NativeExtension => load_native_module(state, name, path),
        ModuleKind::PackageDirectory => load_package(state, name, path),
        ModuleKind::Builtin | ModuleKind::Frozen => {
            let what = if kind == ModuleKind::Builtin {
                "builtin"
            } else {
                "frozen"
            };
            let outcome = if kind == ModuleKind::Builtin {
                init_builtin(state, name)?
            } else {
                import_frozen_module(state, name)?
            };
            match outcome {
                InitOutcome::NotFound => Err(ImportError::Import(format!(
                    "Purported {} module {} not found",
                    what, name
                ))),
                InitOutcome::Initialized => state.get_module(name).ok_or_else(|| {
                    ImportError::Import(format!(
                        "{} module {} not properly initialized",
                        what, name
                    ))
                }),
            }
        }
    }
}

// =============================================================================
// Source and compiled files
// =============================================================================

/// Load from source, preferring a fresh byte-code companion when one exists.
/// After compiling, the companion is rewritten best-effort.
pub fn load_source_module(
    state: &InterpreterState,
    name: &str,
    path: &str,
    file: &mut File,
) -> Result<Arc<Module>> {
    let mtime = source_mtime(path);
    let compiled = compiled_pathname(path, state.config.optimize, state.config.max_path_len);

    let mut code = None;
    if let Some(cpath) = &compiled {
        if let Some(mut handle) = check_compiled_module(state, path, mtime, cpath) {
            let decoded = read_compiled_module(state, cpath, &mut handle)?;
            if state.config.verbose >= 1 {
                eprintln!("import {} # precompiled from {}", name, cpath);
            }
            code = Some(decoded);
        }
    }

    let code = match code {
        Some(code) => code,
        None => {
            let mut source = String::new();
            file.read_to_string(&mut source)?;
            let code = state.compiler.compile(&source, path)?;
            if state.config.verbose >= 1 {
                eprintln!("import {} # from {}", name, path);
            }
            if let Some(cpath) = &compiled {
                write_compiled_module(state, &code, cpath, mtime);
            }
            code
        }
    };

    exec_code_module(state, name, &code)
}

/// Load a byte-code file found directly on the path. The magic is
/// re-checked against this handle; a stale file found this way is an error,
/// not a recompilation trigger, because there is no known source to prefer.
pub fn load_compiled_module(
    state: &InterpreterState,
    name: &str,
    compiled_path: &str,
    file: &mut File,
) -> Result<Arc<Module>> {
    let magic = read_long(file).unwrap_or(0);
    if magic != MAGIC {
        return Err(ImportError::Import(format!(
            "Bad magic number in {}",
            compiled_path
        )));
    }
    let _ = read_long(file); // mtime: meaningless without a source file
    let code = read_compiled_module(state, compiled_path, file)?;
    if state.config.verbose >= 1 {
        eprintln!("import {} # precompiled from {}", name, compiled_path);
    }
    exec_code_module(state, name, &code)
}

// =============================================================================
// Packages
// =============================================================================

/// Load a package directory: register the module, seed `__file__` and
/// `__path__`, then execute its `__init__` file if one resolves inside the
/// package. A package without `__init__` stays registered and empty.
pub fn load_package(state: &InterpreterState, name: &str, path: &str) -> Result<Arc<Module>> {
    let module = state.add_module(name)?;
    module.set("__file__", Value::Str(path.to_string()));
    module.set(
        "__path__",
        Value::List(vec![Value::Str(path.to_string())]),
    );

    let search = [Value::Str(path.to_string())];
    match find_module(state, "__init__", Some(&search[..])) {
        Ok(found) => load_module(state, name, found.file, &found.path, found.descr.kind),
        Err(e) if e.is_import() => Ok(module),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Native extensions
// =============================================================================

/// Load a native extension, serving repeat requests from the namespace
/// snapshot instead of re-running a possibly non-idempotent initializer.
pub fn load_native_module(
    state: &InterpreterState,
    name: &str,
    path: &str,
) -> Result<Arc<Module>> {
    if let Some(module) = state.find_extension(name, path)? {
        return Ok(module);
    }
    let loader = state.native_loader.as_ref().ok_or_else(|| {
        ImportError::Import(format!(
            "cannot load {}: no dynamic loader installed",
            path
        ))
    })?;
    let module = loader.load(state, name, path)?;
    if state.get_module(name).is_none() {
        return Err(ImportError::System(format!(
            "dynamic loader did not register module {}",
            name
        )));
    }
    state.fixup_extension(name, path)?;
    Ok(module)
}

// =============================================================================
// Builtin and frozen modules
// =============================================================================

/// Initialize a built-in module. First-time initialization runs the table's
/// init function and snapshots the result; later requests re-materialize
/// from the snapshot without touching native code.
pub fn init_builtin(state: &InterpreterState, name: &str) -> Result<InitOutcome> {
    if state.find_extension(name, name)?.is_some() {
        return Ok(InitOutcome::Initialized);
    }
    let Some(entry) = state.builtin_table().lookup(name) else {
        return Ok(InitOutcome::NotFound);
    };
    let init = entry.init.clone().ok_or_else(|| {
        ImportError::Import(format!("Cannot re-init internal module {}", name))
    })?;
    if state.config.verbose >= 1 {
        eprintln!("import {} # builtin", name);
    }
    init(state)?;
    state.fixup_extension(name, name)?;
    Ok(InitOutcome::Initialized)
}

/// Initialize a frozen module from its embedded code bytes.
pub fn import_frozen_module(state: &InterpreterState, name: &str) -> Result<InitOutcome> {
    let Some(entry) = state.frozen_table().find(name) else {
        return Ok(InitOutcome::NotFound);
    };
    let bytes = entry.code.clone();
    if state.config.verbose >= 1 {
        eprintln!("import {} # frozen", name);
    }
    let code = read_code_from_bytes(state.codec.as_ref(), &bytes).map_err(|_| {
        ImportError::Type(format!("frozen object {} is not a code object", name))
    })?;
    exec_code_module(state, name, &code)?;
    Ok(InitOutcome::Initialized)
}

/// Decode a frozen module's code object without executing it.
pub fn get_frozen_object(state: &InterpreterState, name: &str) -> Result<CodeObject> {
    let entry = state.frozen_table().find(name).ok_or_else(|| {
        ImportError::Import(format!("No such frozen object named {}", name))
    })?;
    read_code_from_bytes(state.codec.as_ref(), &entry.code).map_err(|_| {
        ImportError::Type(format!("frozen object {} is not a code object", name))
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::marshal::write_code_to_bytes;
    use crate::script::ScriptCompiler;
    use crate::host::Compiler;

    fn state() -> InterpreterState {
        InterpreterState::with_defaults(ImportConfig::default())
    }

    fn compile(source: &str, filename: &str) -> CodeObject {
        ScriptCompiler.compile(source, filename).unwrap()
    }

    #[test]
    fn test_exec_seeds_builtins_and_file() {
        let state = state();
        let code = compile("x = 5\n", "mod.py");
        let module = exec_code_module(&state, "mod", &code).unwrap();

        assert_eq!(module.get("x"), Some(Value::Int(5)));
        assert_eq!(module.get("__file__"), Some(Value::Str("mod.py".to_string())));
        assert!(matches!(module.get("__builtins__"), Some(Value::Dict(_))));
    }

    #[test]
    fn test_exec_registers_before_running() {
        // A body that removes its own registry entry must produce the
        // "not found in sys.modules" error, proving registration happened
        // before execution and the re-fetch after.
        let state = state();
        let code = compile("forget vanishing\n", "vanishing.py");
        let err = exec_code_module(&state, "vanishing", &code).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: Loaded module vanishing not found in sys.modules"
        );
    }

    #[test]
    fn test_exec_failure_keeps_partial_module() {
        let state = state();
        let code = compile("x = 1\nfail \"boom\"\n", "broken.py");
        let err = exec_code_module(&state, "broken", &code).unwrap_err();
        assert!(matches!(err, ImportError::Exec(_)));

        // Deliberate: the partial module stays observable in the registry.
        let partial = state.get_module("broken").unwrap();
        assert_eq!(partial.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_load_module_requires_handle_for_files() {
        let state = state();
        let err =
            load_module(&state, "spam", None, "spam.py", ModuleKind::SourceFile).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: file object required for import (type code 1)"
        );
    }

    #[test]
    fn test_init_builtin_not_found() {
        let state = state();
        assert_eq!(init_builtin(&state, "nope").unwrap(), InitOutcome::NotFound);
    }

    #[test]
    fn test_init_builtin_runs_and_snapshots() {
        let state = InterpreterState::builder(ImportConfig::default())
            .builtin("posix", |s: &InterpreterState| {
                let m = s.add_module("posix")?;
                m.set("sep", Value::Str("/".to_string()));
                Ok(())
            })
            .build();

        assert_eq!(init_builtin(&state, "posix").unwrap(), InitOutcome::Initialized);
        assert!(state.has_extension("posix"));
        assert_eq!(
            state.get_module("posix").unwrap().get("sep"),
            Some(Value::Str("/".to_string()))
        );
    }

    #[test]
    fn test_internal_builtin_cannot_reinit() {
        let state = InterpreterState::builder(ImportConfig::default())
            .internal_builtin("sys")
            .build();
        let err = init_builtin(&state, "sys").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: Cannot re-init internal module sys"
        );
    }

    #[test]
    fn test_frozen_roundtrip() {
        let code = compile("marker = \"frozen\"\n", "<frozen boot>");
        let bytes = write_code_to_bytes(&crate::marshal::BincodeCodec, &code).unwrap();
        let state = InterpreterState::builder(ImportConfig::default())
            .frozen("boot", bytes)
            .build();

        assert_eq!(
            import_frozen_module(&state, "boot").unwrap(),
            InitOutcome::Initialized
        );
        assert_eq!(
            state.get_module("boot").unwrap().get("marker"),
            Some(Value::Str("frozen".to_string()))
        );
    }

    #[test]
    fn test_frozen_garbage_is_type_error() {
        let state = InterpreterState::builder(ImportConfig::default())
            .frozen("junk", vec![0xDE, 0xAD])
            .build();
        let err = import_frozen_module(&state, "junk").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: frozen object junk is not a code object"
        );
    }

    #[test]
    fn test_frozen_not_found() {
        let state = state();
        assert_eq!(
            import_frozen_module(&state, "ghost").unwrap(),
            InitOutcome::NotFound
        );
        let err = get_frozen_object(&state, "ghost").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: No such frozen object named ghost"
        );
    }

    #[test]
    fn test_native_without_loader_errors() {
        let state = state();
        let err = load_native_module(&state, "ext", "ext.so").unwrap_err();
        assert!(matches!(err, ImportError::Import(_)));
    }
}

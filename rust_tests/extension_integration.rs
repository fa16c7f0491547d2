//! Extension & Table Integration Tests
//!
//! Builtin/frozen resolution priority, single initialization of native and
//! builtin extensions, snapshot re-materialization, and the platform
//! registered-module hook.

use pyimport_core::api;
use pyimport_core::config::ImportConfig;
use pyimport_core::error::ImportError;
use pyimport_core::host::{Compiler, NativeLoader, RegisteredModuleFinder};
use pyimport_core::marshal::{write_code_to_bytes, BincodeCodec};
use pyimport_core::resolver::FoundModule;
use pyimport_core::script::ScriptCompiler;
use pyimport_core::state::InterpreterState;
use pyimport_core::value::{Module, Value};
use std::fs::{self, File};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Fake dynamic loader: "loads" any .so path by registering a module and
/// counting invocations.
struct FakeNativeLoader {
    calls: Arc<AtomicUsize>,
}

impl NativeLoader for FakeNativeLoader {
    fn load(
        &self,
        state: &InterpreterState,
        name: &str,
        path: &str,
    ) -> pyimport_core::error::Result<Arc<Module>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let module = state.add_module(name)?;
        module.set("origin", Value::Str(path.to_string()));
        module.set("handle", Value::Int(42));
        Ok(module)
    }
}

fn frozen_code(source: &str, tag: &str) -> Vec<u8> {
    let code = ScriptCompiler.compile(source, tag).unwrap();
    write_code_to_bytes(&BincodeCodec, &code).unwrap()
}

#[test]
fn test_builtin_initialized_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("posix", move |s: &InterpreterState| {
            seen.fetch_add(1, Ordering::SeqCst);
            let m = s.add_module("posix")?;
            m.set("sep", Value::Str("/".to_string()));
            Ok(())
        })
        .build();

    let first = api::import_module(&state, "posix").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.get("sep"), Some(Value::Str("/".to_string())));

    // Simulate a torn-down module table; the snapshot serves the re-import
    // without running the initializer again.
    state.remove_module("posix");
    let second = api::import_module(&state, "posix").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.get("sep"), Some(Value::Str("/".to_string())));
}

#[test]
fn test_builtin_beats_source_file_on_path() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("posix.py"), "shadowed = true\n").unwrap();

    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![temp.path().to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
    .builtin("posix", |s: &InterpreterState| {
        s.add_module("posix")?.set("sep", Value::Str("/".to_string()));
        Ok(())
    })
    .build();

    let module = api::import_module(&state, "posix").unwrap();
    assert!(module.get("shadowed").is_none());
    assert_eq!(module.get("sep"), Some(Value::Str("/".to_string())));
}

#[test]
fn test_internal_builtin_import_is_rejected() {
    let state = InterpreterState::builder(ImportConfig::default())
        .internal_builtin("sys")
        .build();
    let err = api::import_module(&state, "sys").unwrap_err();
    assert_eq!(
        err.to_string(),
        "ImportError: Cannot re-init internal module sys"
    );
}

#[test]
fn test_builtin_init_that_forgets_to_register_is_system_error() {
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("lazy", |_| Ok(()))
        .build();
    let err = api::import_module(&state, "lazy").unwrap_err();
    assert!(matches!(err, ImportError::System(_)));
}

#[test]
fn test_frozen_import_and_priority_over_path() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("boot.py"), "from_disk = true\n").unwrap();

    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![temp.path().to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
    .frozen("boot", frozen_code("stage = \"frozen\"\n", "<frozen boot>"))
    .build();

    let module = api::import_module(&state, "boot").unwrap();
    assert_eq!(module.get("stage"), Some(Value::Str("frozen".to_string())));
    assert!(module.get("from_disk").is_none());
}

#[test]
fn test_native_loader_called_once_per_path() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("accel.so"), b"\x7fELF").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![temp.path().to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
    .native_loader(Box::new(FakeNativeLoader {
        calls: calls.clone(),
    }))
    .build();

    let first = api::import_module(&state, "accel").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.get("handle"), Some(Value::Int(42)));

    // Drop the registry entry; the snapshot keyed by filename answers the
    // re-import without touching the loader.
    state.remove_module("accel");
    let second = api::import_module(&state, "accel").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.get("handle"), Some(Value::Int(42)));
    assert_eq!(
        second.get("origin"),
        first.get("origin"),
        "snapshot must restore the original load path"
    );
}

#[test]
fn test_snapshot_restores_deleted_attributes() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("accel.so"), b"\x7fELF").unwrap();

    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![temp.path().to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
    .native_loader(Box::new(FakeNativeLoader {
        calls: Arc::new(AtomicUsize::new(0)),
    }))
    .build();

    let module = api::import_module(&state, "accel").unwrap();
    // User code deletes an attribute after initialization.
    module.dict().remove("handle");
    assert!(module.get("handle").is_none());

    // Re-materialization overlays the snapshot, so the attribute reappears.
    state.remove_module("accel");
    let again = api::import_module(&state, "accel").unwrap();
    assert_eq!(again.get("handle"), Some(Value::Int(42)));
}

#[test]
fn test_registered_module_hook_priority() {
    let temp = TempDir::new().unwrap();
    // Same name reachable via the hook and via the search path; the hook
    // must win.
    fs::write(temp.path().join("regmod.py"), "origin = \"path\"\n").unwrap();
    let hook_file = temp.path().join("hooked_regmod.py");
    fs::write(&hook_file, "origin = \"registry\"\n").unwrap();

    struct Hook {
        target: String,
    }
    impl RegisteredModuleFinder for Hook {
        fn find(&self, name: &str) -> Option<FoundModule> {
            if name != "regmod" {
                return None;
            }
            let file = File::open(&self.target).ok()?;
            Some(FoundModule {
                descr: pyimport_core::resolver::FileDescr {
                    suffix: ".py".to_string(),
                    mode: "r",
                    kind: pyimport_core::resolver::ModuleKind::SourceFile,
                },
                path: self.target.clone(),
                file: Some(file),
            })
        }
    }

    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![temp.path().to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
    .registered_finder(Box::new(Hook {
        target: hook_file.to_string_lossy().to_string(),
    }))
    .build();

    let module = api::import_module(&state, "regmod").unwrap();
    assert_eq!(module.get("origin"), Some(Value::Str("registry".to_string())));
}

#[test]
fn test_frozen_module_importing_builtin() {
    // Frozen bootstrap code that itself imports a builtin exercises
    // re-entrant loading across kinds.
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("posix", move |s: &InterpreterState| {
            seen.fetch_add(1, Ordering::SeqCst);
            s.add_module("posix")?.set("ok", Value::Bool(true));
            Ok(())
        })
        .frozen(
            "boot",
            frozen_code("import posix\nstage = 2\n", "<frozen boot>"),
        )
        .build();

    let boot = api::import_module(&state, "boot").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(boot.get("stage"), Some(Value::Int(2)));
    let posix = state.get_module("posix").unwrap();
    assert_eq!(boot.get("posix"), Some(Value::Module(posix)));
}

/// Compiler that refuses everything; proves that builtin/frozen paths never
/// touch the compiler.
struct RefusingCompiler;

impl Compiler for RefusingCompiler {
    fn compile(
        &self,
        _source: &str,
        filename: &str,
    ) -> pyimport_core::error::Result<pyimport_core::value::CodeObject> {
        Err(ImportError::Syntax(format!("{}: no compiler here", filename)))
    }
}

#[test]
fn test_builtin_and_frozen_bypass_compiler() {
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("posix", |s: &InterpreterState| {
            s.add_module("posix")?.set("ok", Value::Bool(true));
            Ok(())
        })
        .frozen("boot", frozen_code("stage = 1\n", "<frozen boot>"))
        .compiler(Box::new(RefusingCompiler))
        .build();

    assert!(api::import_module(&state, "posix").is_ok());
    assert!(api::import_module(&state, "boot").is_ok());
}

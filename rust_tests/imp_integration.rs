//! Introspection Surface Integration Tests
//!
//! The user-visible primitives: magic number, suffix table, find/load by
//! descriptor, and the frozen/builtin init helpers.

use pyimport_core::api;
use pyimport_core::config::ImportConfig;
use pyimport_core::imp;
use pyimport_core::marshal::{write_code_to_bytes, BincodeCodec};
use pyimport_core::script::ScriptCompiler;
use pyimport_core::host::Compiler;
use pyimport_core::state::InterpreterState;
use pyimport_core::value::Value;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn state_with_path(dir: &std::path::Path) -> InterpreterState {
    InterpreterState::with_defaults(ImportConfig {
        search_path: vec![dir.to_string_lossy().to_string()],
        ..ImportConfig::default()
    })
}

#[test]
fn test_get_magic_wire_format() {
    let magic = imp::get_magic();
    assert_eq!(magic.len(), 4);
    assert_eq!(magic[2], b'\r');
    assert_eq!(magic[3], b'\n');
}

#[test]
fn test_find_module_source_descriptor() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
    let state = state_with_path(temp.path());

    let (file, path, descr) = imp::find_module(&state, "spam", None).unwrap();
    assert!(file.is_some());
    assert!(path.ends_with("spam.py"));
    assert_eq!(descr, (".py".to_string(), "r".to_string(), imp::PY_SOURCE));
}

#[test]
fn test_find_module_builtin_descriptor() {
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("posix", |s: &InterpreterState| {
            s.add_module("posix")?.set("ok", Value::Bool(true));
            Ok(())
        })
        .build();

    let (file, path, descr) = imp::find_module(&state, "posix", None).unwrap();
    assert!(file.is_none());
    assert!(path.is_empty());
    assert_eq!(descr.2, imp::C_BUILTIN);
}

#[test]
fn test_find_then_load_module_end_to_end() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
    let state = state_with_path(temp.path());

    let (file, path, descr) = imp::find_module(&state, "spam", None).unwrap();
    let module = imp::load_module(&state, "spam", file, &path, &descr).unwrap();
    assert_eq!(module.get("x"), Some(Value::Int(1)));
    assert!(state.get_module("spam").is_some());
}

#[test]
fn test_load_source_and_load_compiled() {
    let temp = TempDir::new().unwrap();
    let source_path = temp.path().join("spam.py");
    fs::write(&source_path, "x = 4\n").unwrap();
    let state = state_with_path(temp.path());

    // load_source compiles and leaves a companion behind.
    let module = imp::load_source(&state, "spam", &source_path.to_string_lossy()).unwrap();
    assert_eq!(module.get("x"), Some(Value::Int(4)));
    let compiled_path = temp.path().join("spam.pyc");
    assert!(compiled_path.exists());

    // A second interpreter can load the companion directly.
    let other = state_with_path(temp.path());
    let module = imp::load_compiled(&other, "spam", &compiled_path.to_string_lossy()).unwrap();
    assert_eq!(module.get("x"), Some(Value::Int(4)));
}

#[test]
fn test_load_compiled_rejects_source_file() {
    let temp = TempDir::new().unwrap();
    let source_path = temp.path().join("spam.py");
    fs::write(&source_path, "x = 4\n").unwrap();
    let state = state_with_path(temp.path());

    let err = imp::load_compiled(&state, "spam", &source_path.to_string_lossy()).unwrap_err();
    assert!(err.to_string().contains("Bad magic number"));
}

#[test]
fn test_load_module_mode_validation() {
    let state = InterpreterState::with_defaults(ImportConfig::default());
    let descr = (".py".to_string(), "r+".to_string(), imp::PY_SOURCE);
    let err = imp::load_module(&state, "spam", None, "spam.py", &descr).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: invalid file open mode r+");
}

#[test]
fn test_init_frozen_and_get_frozen_object() {
    let code = ScriptCompiler.compile("stage = 1\n", "<frozen boot>").unwrap();
    let bytes = write_code_to_bytes(&BincodeCodec, &code).unwrap();
    let state = InterpreterState::builder(ImportConfig::default())
        .frozen("boot", bytes)
        .build();

    // Peeking at the code object does not execute or register anything.
    let frozen = imp::get_frozen_object(&state, "boot").unwrap();
    assert_eq!(frozen.filename, "<frozen boot>");
    assert!(state.get_module("boot").is_none());

    let module = imp::init_frozen(&state, "boot").unwrap().unwrap();
    assert_eq!(module.get("stage"), Some(Value::Int(1)));

    // Unknown names are a non-error None.
    assert!(imp::init_frozen(&state, "ghost").unwrap().is_none());
}

#[test]
fn test_is_builtin_is_frozen_probes() {
    let state = InterpreterState::builder(ImportConfig::default())
        .builtin("posix", |s: &InterpreterState| {
            s.add_module("posix")?;
            Ok(())
        })
        .internal_builtin("sys")
        .frozen("boot", vec![1, 2, 3])
        .build();

    assert_eq!(imp::is_builtin(&state, "posix"), 1);
    assert_eq!(imp::is_builtin(&state, "sys"), -1);
    assert_eq!(imp::is_builtin(&state, "boot"), 0);
    assert!(imp::is_frozen(&state, "boot"));
    assert!(!imp::is_frozen(&state, "posix"));
}

#[test]
fn test_find_module_in_package_and_directory() {
    let temp = TempDir::new().unwrap();
    let pkg_dir = temp.path().join("pkg");
    fs::create_dir(&pkg_dir).unwrap();
    fs::write(pkg_dir.join("__init__.py"), "").unwrap();
    fs::write(pkg_dir.join("sub.py"), "y = 5\n").unwrap();
    let state = state_with_path(temp.path());

    api::import_module(&state, "pkg").unwrap();

    let (file, path, descr) = imp::find_module_in_package(&state, "sub", "pkg").unwrap();
    assert_eq!(descr.2, imp::PY_SOURCE);
    let module = imp::load_module(&state, "pkg.sub", file, &path, &descr).unwrap();
    assert_eq!(module.get("y"), Some(Value::Int(5)));

    let (_, dir_path, _) =
        imp::find_module_in_directory(&state, "sub", &pkg_dir.to_string_lossy()).unwrap();
    assert!(dir_path.ends_with("sub.py"));
}

#[test]
fn test_find_module_in_package_empty_name_is_toplevel() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
    let state = state_with_path(temp.path());

    let (_, path, _) = imp::find_module_in_package(&state, "spam", "").unwrap();
    assert!(path.ends_with("spam.py"));
}

#[test]
fn test_hooked_import_dispatches_through_module_globals() {
    // A module's own globals carry __builtins__; the hookable entry point
    // must find __import__ there and resolve through it.
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("host.py"), "x = 1\n").unwrap();
    fs::write(temp.path().join("spam.py"), "y = 2\n").unwrap();
    let state = state_with_path(temp.path());

    let host = api::import_module(&state, "host").unwrap();
    let spam = api::import_hooked(&state, "spam", Some(host.dict())).unwrap();
    assert_eq!(spam.get("y"), Some(Value::Int(2)));
    assert!(Arc::ptr_eq(&spam, &state.get_module("spam").unwrap()));
}

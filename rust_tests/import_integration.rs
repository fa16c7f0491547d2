//! Import Pipeline Integration Tests
//!
//! These tests drive the full pipeline on disk: resolution over a real
//! directory, byte-code cache reads and writes, execution through the
//! reference host, and registry behavior across repeated imports.

use pyimport_core::api;
use pyimport_core::cache;
use pyimport_core::config::ImportConfig;
use pyimport_core::error::ImportError;
use pyimport_core::host::Compiler;
use pyimport_core::marshal::write_long;
use pyimport_core::script::ScriptCompiler;
use pyimport_core::state::InterpreterState;
use pyimport_core::value::{CodeObject, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Compiler wrapper that counts invocations, so tests can prove whether a
/// given import compiled or hit the byte-code cache.
struct CountingCompiler {
    count: Arc<AtomicUsize>,
}

impl Compiler for CountingCompiler {
    fn compile(&self, source: &str, filename: &str) -> pyimport_core::error::Result<CodeObject> {
        self.count.fetch_add(1, Ordering::SeqCst);
        ScriptCompiler.compile(source, filename)
    }
}

fn counting_state(dir: &Path, optimize: bool) -> (InterpreterState, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let state = InterpreterState::builder(ImportConfig {
        search_path: vec![dir.to_string_lossy().to_string()],
        optimize,
        ..ImportConfig::default()
    })
    .compiler(Box::new(CountingCompiler {
        count: count.clone(),
    }))
    .build();
    (state, count)
}

fn write_module(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(format!("{}.py", name)), content).unwrap();
}

#[test]
fn test_fresh_import_compiles_and_writes_cache() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");
    let (state, count) = counting_state(temp.path(), false);

    let module = api::import_module(&state, "foo").unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(module.get("x"), Some(Value::Int(1)));

    // __file__ points at the resolved source path.
    let source_path = temp.path().join("foo.py");
    assert_eq!(
        module.get("__file__"),
        Some(Value::Str(source_path.to_string_lossy().to_string()))
    );

    // The companion carries (MAGIC, source mtime) in its header.
    let compiled_path = temp.path().join("foo.pyc");
    assert!(compiled_path.exists());
    let mut header = [0u8; 8];
    File::open(&compiled_path)
        .unwrap()
        .read_exact(&mut header)
        .unwrap();
    assert_eq!(&header[0..4], &cache::magic_bytes());
    let mtime = cache::source_mtime(&source_path.to_string_lossy());
    assert_eq!(&header[4..8], &mtime.to_le_bytes());
}

#[test]
fn test_second_import_returns_same_module_without_io() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");
    let (state, count) = counting_state(temp.path(), false);

    let first = api::import_module(&state, "foo").unwrap();
    let second = api::import_module(&state, "foo").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fresh_interpreter_loads_from_cache_without_compiling() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 7\n");

    let (warm, warm_count) = counting_state(temp.path(), false);
    api::import_module(&warm, "foo").unwrap();
    assert_eq!(warm_count.load(Ordering::SeqCst), 1);

    // New interpreter, same directory: the cache must satisfy the import.
    let (cold, cold_count) = counting_state(temp.path(), false);
    let module = api::import_module(&cold, "foo").unwrap();
    assert_eq!(cold_count.load(Ordering::SeqCst), 0);
    assert_eq!(module.get("x"), Some(Value::Int(7)));
}

#[test]
fn test_stale_mtime_forces_recompile_and_rewrites_header() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");

    let (first, _) = counting_state(temp.path(), false);
    api::import_module(&first, "foo").unwrap();

    // Forge a stale header, as if the source had moved on since compilation.
    let compiled_path = temp.path().join("foo.pyc");
    let mut file = OpenOptions::new().write(true).open(&compiled_path).unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    write_long(&mut file, 1).unwrap();
    drop(file);

    let (second, count) = counting_state(temp.path(), false);
    api::import_module(&second, "foo").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1, "stale cache must recompile");

    // The rewritten companion matches the source again.
    let mut header = [0u8; 8];
    File::open(&compiled_path)
        .unwrap()
        .read_exact(&mut header)
        .unwrap();
    let source_path = temp.path().join("foo.py");
    let mtime = cache::source_mtime(&source_path.to_string_lossy());
    assert_eq!(&header[4..8], &mtime.to_le_bytes());
}

#[test]
fn test_touched_source_recompiles() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");

    let (first, _) = counting_state(temp.path(), false);
    api::import_module(&first, "foo").unwrap();

    // Header mtime has one-second granularity; step past it.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    write_module(temp.path(), "foo", "x = 2\n");

    let (second, count) = counting_state(temp.path(), false);
    let module = api::import_module(&second, "foo").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(module.get("x"), Some(Value::Int(2)));
}

#[test]
fn test_bad_magic_without_source_fails() {
    let temp = TempDir::new().unwrap();
    let compiled_path = temp.path().join("orphan.pyc");
    let mut file = File::create(&compiled_path).unwrap();
    write_long(&mut file, cache::MAGIC ^ 0xFFFF).unwrap();
    write_long(&mut file, 1000).unwrap();
    drop(file);

    let (state, _) = counting_state(temp.path(), false);
    let err = api::import_module(&state, "orphan").unwrap_err();
    assert!(matches!(err, ImportError::Import(_)));
    assert!(err.to_string().contains("Bad magic number"));
}

#[test]
fn test_corrupt_cache_with_source_recompiles() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 3\n");
    // A companion with the wrong magic is simply stale next to its source.
    let compiled_path = temp.path().join("foo.pyc");
    let mut file = File::create(&compiled_path).unwrap();
    write_long(&mut file, 0xDEAD_BEEF).unwrap();
    write_long(&mut file, 1000).unwrap();
    drop(file);

    let (state, count) = counting_state(temp.path(), false);
    let module = api::import_module(&state, "foo").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(module.get("x"), Some(Value::Int(3)));
}

#[test]
fn test_optimize_flag_uses_distinct_cache_namespace() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");

    let (optimized, opt_count) = counting_state(temp.path(), true);
    api::import_module(&optimized, "foo").unwrap();
    assert_eq!(opt_count.load(Ordering::SeqCst), 1);
    assert!(temp.path().join("foo.pyo").exists());
    assert!(!temp.path().join("foo.pyc").exists());

    // A plain interpreter never cross-loads the optimized cache.
    let (plain, plain_count) = counting_state(temp.path(), false);
    api::import_module(&plain, "foo").unwrap();
    assert_eq!(plain_count.load(Ordering::SeqCst), 1);
    assert!(temp.path().join("foo.pyc").exists());
}

#[test]
fn test_package_import_runs_init() {
    let temp = TempDir::new().unwrap();
    let pkg_dir = temp.path().join("pkg");
    fs::create_dir(&pkg_dir).unwrap();
    fs::write(pkg_dir.join("__init__.py"), "ready = true\n").unwrap();

    let (state, _) = counting_state(temp.path(), false);
    let module = api::import_module(&state, "pkg").unwrap();

    let pkg_path = pkg_dir.to_string_lossy().to_string();
    assert_eq!(
        module.get("__path__"),
        Some(Value::List(vec![Value::Str(pkg_path)]))
    );
    assert_eq!(module.get("ready"), Some(Value::Bool(true)));
    // __file__ tracks the executed __init__ file.
    let file_attr = module.get("__file__").unwrap();
    assert!(file_attr.as_str().unwrap().ends_with("__init__.py"));
}

#[test]
fn test_package_without_init_is_empty_but_valid() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("bare")).unwrap();

    let (state, _) = counting_state(temp.path(), false);
    let module = api::import_module(&state, "bare").unwrap();

    assert!(module.get("__path__").is_some());
    assert!(module.get("ready").is_none());
    assert!(state.get_module("bare").is_some());
}

#[test]
fn test_submodule_resolution_through_package_path() {
    let temp = TempDir::new().unwrap();
    let pkg_dir = temp.path().join("pkg");
    fs::create_dir(&pkg_dir).unwrap();
    fs::write(pkg_dir.join("__init__.py"), "").unwrap();
    fs::write(pkg_dir.join("sub.py"), "y = 9\n").unwrap();

    let (state, _) = counting_state(temp.path(), false);
    let pkg = api::import_module(&state, "pkg").unwrap();

    // Sub-module lookup is driven by the package's __path__, as the
    // user-level import machinery would do it.
    let Some(Value::List(path)) = pkg.get("__path__") else {
        panic!("package missing __path__");
    };
    let found = pyimport_core::resolver::find_module(&state, "sub", Some(path.as_slice())).unwrap();
    let sub = pyimport_core::loader::load_module(
        &state,
        "pkg.sub",
        found.file,
        &found.path,
        found.descr.kind,
    )
    .unwrap();
    assert_eq!(sub.get("y"), Some(Value::Int(9)));
    assert!(state.get_module("pkg.sub").is_some());
}

#[test]
fn test_circular_imports_terminate() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "alpha", "import beta\nx = 1\n");
    write_module(temp.path(), "beta", "import alpha\ny = 2\n");

    let (state, _) = counting_state(temp.path(), false);
    let alpha = api::import_module(&state, "alpha").unwrap();
    let beta = state.get_module("beta").unwrap();

    assert_eq!(alpha.get("x"), Some(Value::Int(1)));
    assert_eq!(beta.get("y"), Some(Value::Int(2)));
    // Both sides hold the same registered instances.
    assert_eq!(alpha.get("beta"), Some(Value::Module(beta.clone())));
    assert_eq!(beta.get("alpha"), Some(Value::Module(alpha.clone())));
}

#[test]
fn test_reload_preserves_identity_and_reruns_body() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");
    let (state, _) = counting_state(temp.path(), false);

    let module = api::import_module(&state, "foo").unwrap();
    assert_eq!(module.get("x"), Some(Value::Int(1)));

    // New source; drop the companion so the rewrite is picked up even
    // within the same mtime tick.
    write_module(temp.path(), "foo", "x = 2\n");
    let _ = fs::remove_file(temp.path().join("foo.pyc"));

    let reloaded = api::reload_module(&state, &Value::Module(module.clone())).unwrap();
    assert!(Arc::ptr_eq(&module, &reloaded));
    assert_eq!(module.get("x"), Some(Value::Int(2)));
}

#[test]
fn test_failed_import_leaves_partial_module() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "broken", "x = 1\nfail \"boom\"\n");
    let (state, _) = counting_state(temp.path(), false);

    let err = api::import_module(&state, "broken").unwrap_err();
    assert!(matches!(err, ImportError::Exec(_)));

    // The partial module stays registered, and a retry returns it as-is.
    let partial = state.get_module("broken").unwrap();
    assert_eq!(partial.get("x"), Some(Value::Int(1)));
    let retried = api::import_module(&state, "broken").unwrap();
    assert!(Arc::ptr_eq(&partial, &retried));
}

#[test]
fn test_compile_error_propagates() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "bad", "this is not a statement\n");
    let (state, _) = counting_state(temp.path(), false);

    let err = api::import_module(&state, "bad").unwrap_err();
    assert!(matches!(err, ImportError::Syntax(_)));
}

#[test]
fn test_import_after_cleanup_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");
    let (state, _) = counting_state(temp.path(), false);

    let module = api::import_module(&state, "foo").unwrap();
    state.cleanup();

    assert!(module.dict().is_empty());
    let err = api::import_module(&state, "foo").unwrap_err();
    assert!(matches!(err, ImportError::System(_)));
}

#[test]
fn test_unwritable_cache_directory_does_not_block_import() {
    let temp = TempDir::new().unwrap();
    write_module(temp.path(), "foo", "x = 1\n");

    let mut perms = fs::metadata(temp.path()).unwrap().permissions();
    let original = perms.clone();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o555);
    fs::set_permissions(temp.path(), perms).unwrap();

    let (state, _) = counting_state(temp.path(), false);
    let result = api::import_module(&state, "foo");

    fs::set_permissions(temp.path(), original).unwrap();

    let module = result.unwrap();
    assert_eq!(module.get("x"), Some(Value::Int(1)));
    assert!(!temp.path().join("foo.pyc").exists());
}

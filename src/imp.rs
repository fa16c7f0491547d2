//! Reflective introspection surface: the primitives of the import machinery
//! exposed to hosted programs, as thin wrappers over the core.
//!
//! Where the core works with typed `ModuleKind`s, this layer speaks the
//! integer kind codes and `(suffix, mode, code)` descriptor triples that
//! user programs see.

use crate::cache::magic_bytes;
use crate::error::{ImportError, Result};
use crate::loader::{self, InitOutcome};
use crate::resolver::{self, ModuleKind};
use crate::state::InterpreterState;
use crate::value::{CodeObject, Module, Value};
use std::fs::File;
use std::sync::Arc;

pub const SEARCH_ERROR: u32 = 0;
pub const PY_SOURCE: u32 = 1;
pub const PY_COMPILED: u32 = 2;
pub const C_EXTENSION: u32 = 3;
pub const PY_RESOURCE: u32 = 4;
pub const PKG_DIRECTORY: u32 = 5;
pub const C_BUILTIN: u32 = 6;
pub const PY_FROZEN: u32 = 7;

/// A `(suffix, mode, kind_code)` triple as exposed to user programs.
pub type SuffixDescr = (String, String, u32);

/// The byte-code magic in its on-disk (little-endian) byte order.
pub fn get_magic() -> [u8; 4] {
    magic_bytes()
}

/// The suffix table driving in-directory search, in priority order.
pub fn get_suffixes(state: &InterpreterState) -> Vec<SuffixDescr> {
    state
        .filetab()
        .iter()
        .map(|fd| (fd.suffix.clone(), fd.mode.to_string(), fd.kind.code()))
        .collect()
}

/// Locate a module: `(open handle or None, resolved path, descriptor)`.
pub fn find_module(
    state: &InterpreterState,
    name: &str,
    path: Option<&[Value]>,
) -> Result<(Option<File>, String, SuffixDescr)> {
    let found = resolver::find_module(state, name, path)?;
    let descr = (
        found.descr.suffix.clone(),
        found.descr.mode.to_string(),
        found.descr.kind.code(),
    );
    Ok((found.file, found.path, descr))
}

/// Resolve `name` relative to a loaded package's `__path__`. An empty
/// package name falls back to a top-level lookup.
pub fn find_module_in_package(
    state: &InterpreterState,
    name: &str,
    package: &str,
) -> Result<(Option<File>, String, SuffixDescr)> {
    if package.is_empty() {
        return find_module(state, name, None);
    }
    let pkg = state
        .get_module(package)
        .ok_or_else(|| ImportError::Import(format!("No package named {}", package)))?;
    let path = pkg.get("__path__").ok_or_else(|| {
        ImportError::Import(format!("Package {} has no __path__ attribute", package))
    })?;
    let Value::List(entries) = path else {
        return Err(ImportError::Import(format!(
            "Package {} has no __path__ attribute",
            package
        )));
    };
    find_module(state, name, Some(entries.as_slice()))
}

/// Resolve `name` inside a single directory.
pub fn find_module_in_directory(
    state: &InterpreterState,
    name: &str,
    directory: &str,
) -> Result<(Option<File>, String, SuffixDescr)> {
    let path = [Value::Str(directory.to_string())];
    find_module(state, name, Some(&path[..]))
}

/// Load a module from the pieces `find_module` produced. The descriptor's
/// open mode must be plain read (`"r"` or `"rb"`); anything else is refused
/// before any loader runs.
pub fn load_module(
    state: &InterpreterState,
    name: &str,
    file: Option<File>,
    pathname: &str,
    descr: &SuffixDescr,
) -> Result<Arc<Module>> {
    let mode = &descr.1;
    if !mode.is_empty() && (!mode.starts_with('r') || mode.contains('+')) {
        return Err(ImportError::Value(format!(
            "invalid file open mode {}",
            mode
        )));
    }
    let kind = ModuleKind::from_code(descr.2).ok_or_else(|| {
        ImportError::Import(format!(
            "Don't know how to import {} (type code {})",
            name, descr.2
        ))
    })?;
    loader::load_module(state, name, file, pathname, kind)
}

/// Load a source module by pathname, opening the file on the caller's
/// behalf.
pub fn load_source(state: &InterpreterState, name: &str, pathname: &str) -> Result<Arc<Module>> {
    let mut file = File::open(pathname)?;
    loader::load_source_module(state, name, pathname, &mut file)
}

/// Load a byte-code module by pathname.
pub fn load_compiled(
    state: &InterpreterState,
    name: &str,
    pathname: &str,
) -> Result<Arc<Module>> {
    let mut file = File::open(pathname)?;
    loader::load_compiled_module(state, name, pathname, &mut file)
}

/// Load a native extension by pathname.
pub fn load_dynamic(state: &InterpreterState, name: &str, pathname: &str) -> Result<Arc<Module>> {
    loader::load_native_module(state, name, pathname)
}

/// Load a package by directory pathname.
pub fn load_package(state: &InterpreterState, name: &str, pathname: &str) -> Result<Arc<Module>> {
    loader::load_package(state, name, pathname)
}

/// A fresh, unregistered module object.
pub fn new_module(name: &str) -> Arc<Module> {
    Module::new(name)
}

/// Initialize a built-in module. `Ok(None)` when no such builtin exists.
pub fn init_builtin(state: &InterpreterState, name: &str) -> Result<Option<Arc<Module>>> {
    match loader::init_builtin(state, name)? {
        InitOutcome::NotFound => Ok(None),
        InitOutcome::Initialized => Ok(Some(state.add_module(name)?)),
    }
}

/// Initialize a frozen module. `Ok(None)` when no such frozen entry exists.
pub fn init_frozen(state: &InterpreterState, name: &str) -> Result<Option<Arc<Module>>> {
    match loader::import_frozen_module(state, name)? {
        InitOutcome::NotFound => Ok(None),
        InitOutcome::Initialized => Ok(Some(state.add_module(name)?)),
    }
}

/// Tri-state builtin probe: 1 = present, 0 = absent, -1 = present but not
/// re-initializable.
pub fn is_builtin(state: &InterpreterState, name: &str) -> i32 {
    state.builtin_table().status(name)
}

pub fn is_frozen(state: &InterpreterState, name: &str) -> bool {
    state.frozen_table().contains(name)
}

/// The code object of a frozen module, without executing it.
pub fn get_frozen_object(state: &InterpreterState, name: &str) -> Result<CodeObject> {
    loader::get_frozen_object(state, name)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MAGIC;
    use crate::config::ImportConfig;

    fn state() -> InterpreterState {
        InterpreterState::with_defaults(ImportConfig::default())
    }

    #[test]
    fn test_get_magic_matches_constant() {
        assert_eq!(u32::from_le_bytes(get_magic()), MAGIC);
    }

    #[test]
    fn test_get_suffixes_order_and_codes() {
        let suffixes = get_suffixes(&state());
        assert_eq!(suffixes[0], (".py".to_string(), "r".to_string(), PY_SOURCE));
        assert_eq!(
            suffixes[1],
            (".pyc".to_string(), "rb".to_string(), PY_COMPILED)
        );
        assert_eq!(
            suffixes[2],
            (".so".to_string(), "rb".to_string(), C_EXTENSION)
        );
    }

    #[test]
    fn test_load_module_rejects_write_modes() {
        let state = state();
        for mode in ["rb+", "r+", "w", "a"] {
            let descr = (".py".to_string(), mode.to_string(), PY_SOURCE);
            let err = load_module(&state, "spam", None, "spam.py", &descr).unwrap_err();
            assert!(
                matches!(err, ImportError::Value(_)),
                "mode {:?} should be rejected",
                mode
            );
        }
    }

    #[test]
    fn test_load_module_rejects_unknown_kind_code() {
        let state = state();
        let descr = (String::new(), String::new(), 42);
        let err = load_module(&state, "spam", None, "", &descr).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ImportError: Don't know how to import spam (type code 42)"
        );
    }

    #[test]
    fn test_reserved_resource_code_is_unknown() {
        let state = state();
        let descr = (String::new(), String::new(), PY_RESOURCE);
        assert!(load_module(&state, "spam", None, "", &descr).is_err());
    }

    #[test]
    fn test_is_builtin_tristate() {
        let state = InterpreterState::builder(ImportConfig::default())
            .builtin("posix", |_| Ok(()))
            .internal_builtin("sys")
            .build();
        assert_eq!(is_builtin(&state, "posix"), 1);
        assert_eq!(is_builtin(&state, "sys"), -1);
        assert_eq!(is_builtin(&state, "nope"), 0);
    }

    #[test]
    fn test_init_builtin_absent_is_none() {
        let state = state();
        assert!(init_builtin(&state, "nope").unwrap().is_none());
    }

    #[test]
    fn test_load_source_missing_file_is_io_error() {
        let state = state();
        let err = load_source(&state, "spam", "/no/such/spam.py").unwrap_err();
        assert!(matches!(err, ImportError::Io(_)));
    }

    #[test]
    fn test_find_module_in_package_requires_registered_package() {
        let state = state();
        let err = find_module_in_package(&state, "sub", "pkg").unwrap_err();
        assert_eq!(err.to_string(), "ImportError: No package named pkg");
    }

    #[test]
    fn test_new_module_is_unregistered() {
        let state = state();
        let m = new_module("floating");
        assert_eq!(m.name(), "floating");
        assert!(state.get_module("floating").is_none());
    }
}

//! Module Resolution: name -> kind + location.
//!
//! Resolution priority for a top-level name: builtin, frozen, platform
//! registered-module hook, then the search-path walk. Within a directory a
//! package subdirectory beats every suffix, and suffixes are tried in
//! filetab order. "Not found" keeps the walk going; only an exhausted walk
//! becomes an error.

use crate::error::{ImportError, Result};
use crate::state::InterpreterState;
use crate::value::Value;
use std::fs;
use std::fs::File;
use std::path::MAIN_SEPARATOR;

/// How a resolved module will be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    SourceFile,
    CompiledFile,
    NativeExtension,
    PackageDirectory,
    Builtin,
    Frozen,
}

impl ModuleKind {
    /// Wire code exposed through the introspection surface.
    pub fn code(self) -> u32 {
        match self {
            ModuleKind::SourceFile => 1,
            ModuleKind::CompiledFile => 2,
            ModuleKind::NativeExtension => 3,
            ModuleKind::PackageDirectory => 5,
            ModuleKind::Builtin => 6,
            ModuleKind::Frozen => 7,
        }
    }

    /// Inverse of [`ModuleKind::code`]. Unassigned codes (including the
    /// reserved resource-module slot, 4) yield `None`.
    pub fn from_code(code: u32) -> Option<ModuleKind> {
        match code {
            1 => Some(ModuleKind::SourceFile),
            2 => Some(ModuleKind::CompiledFile),
            3 => Some(ModuleKind::NativeExtension),
            5 => Some(ModuleKind::PackageDirectory),
            6 => Some(ModuleKind::Builtin),
            7 => Some(ModuleKind::Frozen),
            _ => None,
        }
    }
}

/// One entry of the suffix table driving in-directory search.
#[derive(Debug, Clone)]
pub struct FileDescr {
    pub suffix: String,
    pub mode: &'static str,
    pub kind: ModuleKind,
}

impl FileDescr {
    fn handleless(kind: ModuleKind) -> FileDescr {
        FileDescr {
            suffix: String::new(),
            mode: "",
            kind,
        }
    }
}

/// The ordered suffix table. Source first, then byte-code, then native
/// extensions; the optimize flag rewrites `.pyc` to `.pyo` at interpreter
/// construction.
pub fn default_filetab() -> Vec<FileDescr> {
    vec![
        FileDescr {
            suffix: ".py".to_string(),
            mode: "r",
            kind: ModuleKind::SourceFile,
        },
        FileDescr {
            suffix: ".pyc".to_string(),
            mode: "rb",
            kind: ModuleKind::CompiledFile,
        },
        FileDescr {
            suffix: ".so".to_string(),
            mode: "rb",
            kind: ModuleKind::NativeExtension,
        },
    ]
}

/// A successful resolution. `file` is an open handle for file-backed kinds;
/// directory, builtin and frozen hits carry no handle. Ownership of the
/// handle passes to the caller, which must consume or drop it on every path.
#[derive(Debug)]
pub struct FoundModule {
    pub descr: FileDescr,
    pub path: String,
    pub file: Option<File>,
}

impl FoundModule {
    pub fn handleless(kind: ModuleKind) -> FoundModule {
        FoundModule {
            descr: FileDescr::handleless(kind),
            path: String::new(),
            file: None,
        }
    }
}

/// Locate `name`. With `path = None` this is a top-level lookup (builtins,
/// frozen modules and the platform hook are consulted, then the configured
/// search path); with an explicit `path` only that list is walked, skipping
/// entries that are not strings.
pub fn find_module(
    state: &InterpreterState,
    name: &str,
    path: Option<&[Value]>,
) -> Result<FoundModule> {
    if path.is_none() {
        // A builtin that can no longer be re-initialized still resolves as
        // a builtin; the loader reports the re-init failure.
        if state.builtin_table().status(name) != 0 {
            return Ok(FoundModule::handleless(ModuleKind::Builtin));
        }
        if state.frozen_table().contains(name) {
            return Ok(FoundModule::handleless(ModuleKind::Frozen));
        }
        if let Some(finder) = &state.registered_finder {
            if let Some(found) = finder.find(name) {
                return Ok(found);
            }
        }
    }

    let config_path: Vec<Value>;
    let entries: &[Value] = match path {
        Some(p) => p,
        None => {
            config_path = state
                .config
                .search_path
                .iter()
                .map(|d| Value::Str(d.clone()))
                .collect();
            &config_path
        }
    };

    let max_suffix = state.max_suffix_len();
    for entry in entries {
        // Non-string entries are tolerated and skipped.
        let Some(dir) = entry.as_str() else {
            continue;
        };
        if dir.len() + name.len() + max_suffix + 2 >= state.config.max_path_len {
            continue;
        }
        if dir.contains('\0') {
            continue;
        }

        let mut buf = String::with_capacity(dir.len() + name.len() + max_suffix + 1);
        buf.push_str(dir);
        if !buf.is_empty() && !buf.ends_with(MAIN_SEPARATOR) {
            buf.push(MAIN_SEPARATOR);
        }
        buf.push_str(name);

        // A directory matching the bare name short-circuits suffix search.
        if fs::metadata(&buf).map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(FoundModule {
                descr: FileDescr::handleless(ModuleKind::PackageDirectory),
                path: buf,
                file: None,
            });
        }

        for fd in state.filetab() {
            let candidate = format!("{}{}", buf, fd.suffix);
            if state.config.verbose >= 2 {
                eprintln!("# trying {}", candidate);
            }
            if let Ok(file) = File::open(&candidate) {
                return Ok(FoundModule {
                    descr: fd.clone(),
                    path: candidate,
                    file: Some(file),
                });
            }
        }
    }

    Err(ImportError::Import(format!("No module named {}", name)))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use std::fs;
    use tempfile::TempDir;

    fn state_with_path(dirs: Vec<String>) -> InterpreterState {
        let config = ImportConfig {
            search_path: dirs,
            ..ImportConfig::default()
        };
        InterpreterState::with_defaults(config)
    }

    #[test]
    fn test_kind_codes_roundtrip() {
        for kind in [
            ModuleKind::SourceFile,
            ModuleKind::CompiledFile,
            ModuleKind::NativeExtension,
            ModuleKind::PackageDirectory,
            ModuleKind::Builtin,
            ModuleKind::Frozen,
        ] {
            assert_eq!(ModuleKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ModuleKind::from_code(0), None);
        assert_eq!(ModuleKind::from_code(4), None);
        assert_eq!(ModuleKind::from_code(8), None);
    }

    #[test]
    fn test_finds_source_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
        let state = state_with_path(vec![temp.path().to_string_lossy().to_string()]);

        let found = find_module(&state, "spam", None).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::SourceFile);
        assert!(found.path.ends_with("spam.py"));
        assert!(found.file.is_some());
    }

    #[test]
    fn test_source_beats_compiled() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
        fs::write(temp.path().join("spam.pyc"), b"junk").unwrap();
        let state = state_with_path(vec![temp.path().to_string_lossy().to_string()]);

        let found = find_module(&state, "spam", None).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::SourceFile);
    }

    #[test]
    fn test_directory_beats_suffixes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("spam")).unwrap();
        fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
        let state = state_with_path(vec![temp.path().to_string_lossy().to_string()]);

        let found = find_module(&state, "spam", None).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::PackageDirectory);
        assert!(found.file.is_none());
    }

    #[test]
    fn test_earlier_directory_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("spam.py"), "x = 1\n").unwrap();
        fs::write(second.path().join("spam.py"), "x = 2\n").unwrap();
        let state = state_with_path(vec![
            first.path().to_string_lossy().to_string(),
            second.path().to_string_lossy().to_string(),
        ]);

        let found = find_module(&state, "spam", None).unwrap();
        assert!(found.path.starts_with(&*first.path().to_string_lossy()));
    }

    #[test]
    fn test_builtin_beats_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("posix.py"), "x = 1\n").unwrap();
        let state = InterpreterState::builder(ImportConfig {
            search_path: vec![temp.path().to_string_lossy().to_string()],
            ..ImportConfig::default()
        })
        .builtin("posix", |_| Ok(()))
        .build();

        let found = find_module(&state, "posix", None).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::Builtin);
    }

    #[test]
    fn test_explicit_path_skips_builtin_check() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("posix.py"), "x = 1\n").unwrap();
        let state = InterpreterState::builder(ImportConfig::default())
            .builtin("posix", |_| Ok(()))
            .build();

        let path = [Value::Str(temp.path().to_string_lossy().to_string())];
        let found = find_module(&state, "posix", Some(&path[..])).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::SourceFile);
    }

    #[test]
    fn test_non_string_path_entries_skipped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
        let path = [
            Value::Int(7),
            Value::None,
            Value::Str(temp.path().to_string_lossy().to_string()),
        ];
        let state = state_with_path(vec![]);

        let found = find_module(&state, "spam", Some(&path[..])).unwrap();
        assert_eq!(found.descr.kind, ModuleKind::SourceFile);
    }

    #[test]
    fn test_nul_in_entry_skipped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("spam.py"), "x = 1\n").unwrap();
        let poisoned = format!("{}\0junk", temp.path().to_string_lossy());
        let state = state_with_path(vec![poisoned]);

        let err = find_module(&state, "spam", None).unwrap_err();
        assert!(matches!(err, ImportError::Import(_)));
    }

    #[test]
    fn test_overlong_entry_skipped() {
        let long_dir = "d".repeat(2000);
        let state = state_with_path(vec![long_dir]);
        let err = find_module(&state, "spam", None).unwrap_err();
        assert_eq!(err.to_string(), "ImportError: No module named spam");
    }

    #[test]
    fn test_exhausted_walk_reports_name() {
        let temp = TempDir::new().unwrap();
        let state = state_with_path(vec![temp.path().to_string_lossy().to_string()]);
        let err = find_module(&state, "missing", None).unwrap_err();
        assert_eq!(err.to_string(), "ImportError: No module named missing");
    }
}

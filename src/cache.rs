//! Byte-code cache: companion-file naming, freshness checks, and the
//! compiled-file format.
//!
//! Layout: 4-byte magic, 4-byte source mtime, marshaled code object. The
//! magic embeds CR and LF so a file that ever passes through text-mode
//! newline translation stops validating and forces recompilation.

use crate::error::{ImportError, Result};
use crate::marshal::{read_long, write_long};
use crate::state::InterpreterState;
use crate::value::CodeObject;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::time::UNIX_EPOCH;

/// Byte-code ABI tag. Low 16 bits are the format version counter; bytes 2
/// and 3 are CR and LF. Bump the counter for every incompatible change.
pub const MAGIC: u32 = 24071 | ((b'\r' as u32) << 16) | ((b'\n' as u32) << 24);

/// The magic as it appears on disk (little-endian).
pub fn magic_bytes() -> [u8; 4] {
    MAGIC.to_le_bytes()
}

/// Companion path for a source file: append one character, so `spam.py`
/// maps to `spam.pyc` (or `spam.pyo` under the optimize flag). `None` when
/// the result would not fit the configured path bound.
pub fn compiled_pathname(source_path: &str, optimize: bool, max_path_len: usize) -> Option<String> {
    if source_path.len() + 2 > max_path_len {
        return None;
    }
    let tag = if optimize { 'o' } else { 'c' };
    Some(format!("{}{}", source_path, tag))
}

/// Modification time of a source file as the 4-byte header quantity.
/// Unreadable metadata degrades to 0, which can never match a real header.
pub fn source_mtime(path: &str) -> u32 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Check whether `compiled_path` caches the current version of the source.
/// On success the returned handle is positioned just past the header, ready
/// for a marshal read. Any mismatch or I/O trouble means "stale": the
/// caller recompiles, it never errors out of this check.
pub fn check_compiled_module(
    state: &InterpreterState,
    source_path: &str,
    mtime: u32,
    compiled_path: &str,
) -> Option<File> {
    let mut file = File::open(compiled_path).ok()?;
    let magic = read_long(&mut file).ok()?;
    if magic != MAGIC {
        if state.config.verbose >= 1 {
            eprintln!("# {} has bad magic", compiled_path);
        }
        return None;
    }
    let cached_mtime = read_long(&mut file).ok()?;
    if cached_mtime != mtime {
        if state.config.verbose >= 1 {
            eprintln!("# {} has bad mtime", compiled_path);
        }
        return None;
    }
    if state.config.verbose >= 1 {
        eprintln!("# {} matches {}", compiled_path, source_path);
    }
    Some(file)
}

/// Marshal-read the code object from a handle positioned past the header.
pub fn read_compiled_module(
    state: &InterpreterState,
    compiled_path: &str,
    file: &mut File,
) -> Result<CodeObject> {
    state
        .codec
        .read_code(file)
        .map_err(|_| ImportError::Import(format!("Non-code object in {}", compiled_path)))
}

/// Write a compiled module, stamping the source mtime into the header.
///
/// The mtime field is first written as 0 and only overwritten with the real
/// value after the whole payload landed, so a crash mid-write leaves a file
/// that can never validate. Errors are not reported to the caller; a partial
/// file is unlinked and the import proceeds from source.
pub fn write_compiled_module(
    state: &InterpreterState,
    code: &CodeObject,
    compiled_path: &str,
    mtime: u32,
) {
    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(compiled_path)
    {
        Ok(f) => f,
        Err(_) => {
            if state.config.verbose >= 1 {
                eprintln!("# can't create {}", compiled_path);
            }
            return;
        }
    };

    let body = (|| {
        write_long(&mut file, MAGIC)?;
        write_long(&mut file, 0)?;
        state.codec.write_code(&mut file, code)
    })();
    if body.is_err() {
        if state.config.verbose >= 1 {
            eprintln!("# can't write {}", compiled_path);
        }
        drop(file);
        let _ = fs::remove_file(compiled_path);
        return;
    }

    let stamp = (|| {
        file.seek(SeekFrom::Start(4))?;
        write_long(&mut file, mtime)?;
        file.flush()
    })();
    if stamp.is_err() {
        if state.config.verbose >= 1 {
            eprintln!("# can't write {}", compiled_path);
        }
        drop(file);
        let _ = fs::remove_file(compiled_path);
        return;
    }

    if state.config.verbose >= 1 {
        eprintln!("# wrote {}", compiled_path);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

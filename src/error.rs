//! Error kinds surfaced by the import core.
//!
//! Resolution keeps "not found" out of the error channel wherever the
//! algorithm wants to keep probing (next directory, next suffix); an error
//! is only produced once a walk is exhausted or a file that *was* selected
//! turns out to be unusable.

use thiserror::Error;

/// The error type for every fallible operation in the import core.
///
/// Variants map one-to-one onto the exception kinds a hosted program would
/// observe. `Syntax` and `Exec` are the pass-through channels for the
/// external compiler and evaluator; the core never inspects them, it only
/// propagates.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("ImportError: {0}")]
    Import(String),

    #[error("ValueError: {0}")]
    Value(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("SystemError: {0}")]
    System(String),

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("RuntimeError: {0}")]
    Exec(String),
}

impl ImportError {
    /// True for the `ImportError` kind only. `load_package` uses this to
    /// swallow a missing `__init__` while still propagating everything else.
    pub fn is_import(&self) -> bool {
        matches!(self, ImportError::Import(_))
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_prefix() {
        let e = ImportError::Import("No module named spam".to_string());
        assert_eq!(e.to_string(), "ImportError: No module named spam");

        let e = ImportError::Value("invalid file open mode rb+".to_string());
        assert!(e.to_string().starts_with("ValueError:"));
    }

    #[test]
    fn test_is_import_discriminates() {
        assert!(ImportError::Import("x".into()).is_import());
        assert!(!ImportError::Type("x".into()).is_import());
        assert!(!ImportError::System("x".into()).is_import());
    }
}

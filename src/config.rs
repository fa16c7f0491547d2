//! Interpreter Configuration
//! - Search path, optimize flag and verbosity for the import machinery
//! - Optional overrides from an `interp.toml` project file
//! - CLI argument parsing with clap for the driver binary

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Upper bound on a constructed module path, in bytes. Search-path entries
/// that cannot fit `entry + separator + name + suffix` under this bound are
/// skipped during resolution.
pub const DEFAULT_MAX_PATH_LEN: usize = 1024;

// =============================================================================
// Import configuration
// =============================================================================

/// Interpreter-global knobs consumed by the import core.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Ordered directories searched for top-level modules (the `sys.path`
    /// analogue).
    pub search_path: Vec<String>,
    /// When set, compiled files use the `.pyo` suffix instead of `.pyc`,
    /// giving optimized byte-code its own cache namespace.
    pub optimize: bool,
    /// 0 = quiet, 1 = one line per resolution step, 2 = also log every
    /// candidate path probed.
    pub verbose: u8,
    /// See [`DEFAULT_MAX_PATH_LEN`].
    pub max_path_len: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            search_path: vec![".".to_string()],
            optimize: false,
            verbose: 0,
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

// =============================================================================
// Project file overrides
// =============================================================================

#[derive(Deserialize, Default)]
struct ProjectFile {
    interpreter: Option<InterpreterSection>,
}

#[derive(Deserialize, Default)]
struct InterpreterSection {
    path: Option<Vec<String>>,
    optimize: Option<bool>,
    verbose: Option<u8>,
}

/// Apply `[interpreter]` overrides from `<root>/interp.toml`, if present.
///
/// Missing file is not an error; a malformed file is reported to stderr and
/// otherwise ignored, so a broken config can never keep the interpreter from
/// starting.
pub fn apply_project_config(root: &Path, config: &mut ImportConfig) {
    let config_path = root.join("interp.toml");
    if !config_path.exists() {
        return;
    }

    let contents = match fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[config] Failed to read interp.toml: {}", e);
            return;
        }
    };

    let project: ProjectFile = match toml::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[config] Failed to parse interp.toml: {}", e);
            return;
        }
    };

    if let Some(section) = project.interpreter {
        if let Some(path) = section.path {
            config.search_path = path;
        }
        if let Some(optimize) = section.optimize {
            config.optimize = optimize;
        }
        if let Some(verbose) = section.verbose {
            config.verbose = verbose;
        }
    }
}

// =============================================================================
// CLI configuration
// =============================================================================

/// Output format for the driver binary
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable namespace listing (to stdout)
    #[default]
    Human,
    /// Machine-readable JSON (to stdout)
    Json,
}

/// Module import driver
#[derive(Parser)]
#[command(name = "pyimport-core", version, about = "Module import core driver")]
pub struct Cli {
    /// Output format (also: PYIMPORT_FORMAT env var)
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, env = "PYIMPORT_FORMAT")]
    pub format: OutputFormat,

    /// Search path entries, in priority order (also: PYIMPORT_PATH env var)
    #[arg(long, short = 'p', env = "PYIMPORT_PATH", value_delimiter = ':')]
    pub path: Vec<String>,

    /// Trace resolution steps to stderr (-v once per step, -vv per probe)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Use the optimized byte-code cache namespace (.pyo)
    #[arg(long, short = 'O')]
    pub optimize: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Import a module and print its namespace
    Import {
        /// Module name to import
        name: String,
    },
    /// List the recognized filename suffixes
    Suffixes,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_interpreter_section() {
        let toml_content = r#"
[interpreter]
path = ["lib", "vendor"]
optimize = true
verbose = 2
"#;
        let project: ProjectFile = toml::from_str(toml_content).unwrap();
        let section = project.interpreter.unwrap();
        assert_eq!(section.path.unwrap(), vec!["lib", "vendor"]);
        assert_eq!(section.optimize, Some(true));
        assert_eq!(section.verbose, Some(2));
    }

    #[test]
    fn test_parse_empty_project_file() {
        let project: ProjectFile = toml::from_str("").unwrap();
        assert!(project.interpreter.is_none());
    }

    #[test]
    fn test_apply_overrides() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("interp.toml"),
            "[interpreter]\npath = [\"src\"]\nverbose = 1\n",
        )
        .unwrap();

        let mut config = ImportConfig::default();
        apply_project_config(temp.path(), &mut config);

        assert_eq!(config.search_path, vec!["src"]);
        assert_eq!(config.verbose, 1);
        // Unspecified keys keep their defaults.
        assert!(!config.optimize);
    }

    #[test]
    fn test_apply_missing_file_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut config = ImportConfig::default();
        apply_project_config(temp.path(), &mut config);
        assert_eq!(config.search_path, vec!["."]);
    }

    #[test]
    fn test_apply_malformed_file_is_noop() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("interp.toml"), "not [ valid toml").unwrap();
        let mut config = ImportConfig::default();
        apply_project_config(temp.path(), &mut config);
        assert_eq!(config.search_path, vec!["."]);
    }
}

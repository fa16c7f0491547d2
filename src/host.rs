//! Interfaces the import core requires from its host runtime.
//!
//! Compilation, evaluation and native module loading live outside the core;
//! the interpreter state carries one implementation of each. The in-tree
//! defaults come from `script.rs` (compiler + evaluator) and `marshal.rs`
//! (codec); there is no default native loader.

use crate::error::Result;
use crate::resolver::FoundModule;
use crate::state::InterpreterState;
use crate::value::{CodeObject, Dict, Module, Value};
use std::sync::Arc;

/// The parser + byte-code compiler.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &str, filename: &str) -> Result<CodeObject>;
}

/// The evaluator. `eval` may execute arbitrary module-level code, including
/// further imports back into the core; implementations receive the state so
/// that re-entry is possible.
pub trait Evaluator: Send + Sync {
    fn eval(
        &self,
        state: &InterpreterState,
        code: &CodeObject,
        globals: &Arc<Dict>,
        locals: &Arc<Dict>,
    ) -> Result<Value>;
}

/// The dynamic loader for native extension modules. On success the loader
/// must have registered the module in the interpreter's module map under
/// `name`; the core then snapshots its namespace for init deduplication.
pub trait NativeLoader: Send + Sync {
    fn load(&self, state: &InterpreterState, name: &str, path: &str) -> Result<Arc<Module>>;
}

/// Platform hook consulted for top-level names before the path walk, after
/// builtins and frozen modules (Windows-registry-style registered modules).
pub trait RegisteredModuleFinder: Send + Sync {
    fn find(&self, name: &str) -> Option<FoundModule>;
}

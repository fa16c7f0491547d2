//! Static module tables registered at interpreter construction.
//!
//! Builtins are `(name, init_fn)` pairs; an entry with no init function
//! exists but can never be re-initialized (the runtime set it up itself).
//! Frozen modules are `(name, code_bytes)` pairs whose marshaled code is
//! baked into the binary.

use crate::error::Result;
use crate::state::InterpreterState;
use std::sync::Arc;

/// Initializer for a built-in module. Must register the module in the
/// interpreter's module map before returning.
pub type BuiltinInitFn = Arc<dyn Fn(&InterpreterState) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct BuiltinEntry {
    pub name: String,
    /// `None` marks a module that exists but cannot be re-initialized.
    pub init: Option<BuiltinInitFn>,
}

#[derive(Default)]
pub struct BuiltinTable {
    entries: Vec<BuiltinEntry>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, init: Option<BuiltinInitFn>) {
        self.entries.push(BuiltinEntry {
            name: name.to_string(),
            init,
        });
    }

    pub fn lookup(&self, name: &str) -> Option<&BuiltinEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Tri-state presence check: 1 = present, 0 = absent, -1 = present but
    /// not re-initializable.
    pub fn status(&self, name: &str) -> i32 {
        match self.lookup(name) {
            None => 0,
            Some(e) if e.init.is_none() => -1,
            Some(_) => 1,
        }
    }
}

/// A frozen module: marshaled code bytes embedded at build time.
#[derive(Debug, Clone)]
pub struct FrozenEntry {
    pub name: String,
    pub code: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FrozenTable {
    entries: Vec<FrozenEntry>,
}

impl FrozenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, code: Vec<u8>) {
        self.entries.push(FrozenEntry {
            name: name.to_string(),
            code,
        });
    }

    pub fn find(&self, name: &str) -> Option<&FrozenEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

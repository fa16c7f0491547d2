//! Runtime value model shared between the import core and its host.
//!
//! Namespaces are concurrent maps so that code executing inside a module
//! body can mutate its own namespace (and the module registry) while the
//! import machinery is still on the stack. The interpreter itself is
//! single-threaded with respect to imports; DashMap just gives us interior
//! mutability without threading `&mut` through re-entrant calls.

use crate::error::Result;
use crate::state::InterpreterState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A namespace: string keys to values. Module dicts, `__builtins__`, and
/// the extension snapshots are all `Dict`s.
pub type Dict = DashMap<String, Value>;

/// Signature of a user-level `__import__` hook. The default hook is the
/// in-tree resolver; embedders rebind `__import__` in a builtins namespace
/// to intercept imports.
pub type ImportHookFn = Arc<
    dyn Fn(
            &InterpreterState,
            &str,
            Option<&Arc<Dict>>,
            Option<&Arc<Dict>>,
            &[Value],
        ) -> Result<Arc<Module>>
        + Send
        + Sync,
>;

/// An executable artifact produced by the external compiler.
///
/// The core never looks inside `payload`; only the compiler, the evaluator
/// and the marshal codec agree on its meaning. `filename` is carried along
/// so executed modules can be seeded with a `__file__` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeObject {
    pub filename: String,
    pub payload: Vec<u8>,
}

impl CodeObject {
    pub fn new(filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            payload,
        }
    }
}

/// A module record: a name plus a shared namespace dict.
///
/// Modules are created empty (apart from `__name__`) and mutated during
/// execution. Identity is `Arc` pointer identity; `reload` must hand back
/// the very same allocation.
pub struct Module {
    name: String,
    dict: Arc<Dict>,
}

impl Module {
    pub fn new(name: &str) -> Arc<Module> {
        let dict = Dict::new();
        dict.insert("__name__".to_string(), Value::Str(name.to_string()));
        Arc::new(Module {
            name: name.to_string(),
            dict: Arc::new(dict),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dict(&self) -> &Arc<Dict> {
        &self.dict
    }

    /// Clone an attribute out of the namespace.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.dict.get(key).map(|e| e.value().clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.dict.insert(key.to_string(), value);
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module '{}'>", self.name)
    }
}

/// A runtime value as far as the import core cares.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Arc<Dict>),
    Code(Arc<CodeObject>),
    Module(Arc<Module>),
    ImportFn(ImportHookFn),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&Arc<Module>> {
        match self {
            Value::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Code(_) => "code",
            Value::Module(_) => "module",
            Value::ImportFn(_) => "builtin_function",
        }
    }

    /// Structural copy used for extension snapshots. Containers are copied
    /// recursively; modules, code objects and functions stay shared.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => Value::List(items.iter().map(Value::deep_copy).collect()),
            Value::Dict(d) => Value::Dict(deep_copy_dict(d)),
            other => other.clone(),
        }
    }
}

/// Deep-copy a namespace into a fresh dict.
pub fn deep_copy_dict(src: &Dict) -> Arc<Dict> {
    let copy = Dict::new();
    for entry in src.iter() {
        copy.insert(entry.key().clone(), entry.value().deep_copy());
    }
    Arc::new(copy)
}

/// Overlay `src` into `dst`, clobbering existing keys. Values are shared,
/// not copied; this is the `update` step that re-materializes an extension
/// module from its snapshot.
pub fn merge_dict(src: &Dict, dst: &Dict) {
    for entry in src.iter() {
        dst.insert(entry.key().clone(), entry.value().clone());
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                a.len() == b.len()
                    && a.iter()
                        .all(|e| b.get(e.key()).map_or(false, |v| *v.value() == *e.value()))
            }
            (Value::Code(a), Value::Code(b)) => a == b,
            // Modules compare by identity, matching registry semantics.
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::ImportFn(a), Value::ImportFn(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b<{} bytes>", b.len()),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Dict(d) => {
                let mut keys: Vec<String> = d.iter().map(|e| e.key().clone()).collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match d.get(k) {
                        Some(v) => write!(f, "{:?}: {:?}", k, v.value())?,
                        None => write!(f, "{:?}: <removed>", k)?,
                    }
                }
                write!(f, "}}")
            }
            Value::Code(c) => write!(f, "<code object, file {:?}>", c.filename),
            Value::Module(m) => write!(f, "{:?}", m),
            Value::ImportFn(_) => write!(f, "<built-in function __import__>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_module_has_name_attribute() {
        let m = Module::new("spam");
        assert_eq!(m.name(), "spam");
        assert_eq!(m.get("__name__"), Some(Value::Str("spam".to_string())));
    }

    #[test]
    fn test_module_identity_vs_structure() {
        let a = Module::new("same");
        let b = Module::new("same");
        assert_ne!(Value::Module(a.clone()), Value::Module(b));
        assert_eq!(Value::Module(a.clone()), Value::Module(a));
    }

    #[test]
    fn test_deep_copy_detaches_nested_dicts() {
        let inner = Arc::new(Dict::new());
        inner.insert("x".to_string(), Value::Int(1));
        let src = Dict::new();
        src.insert("nested".to_string(), Value::Dict(inner.clone()));

        let copy = deep_copy_dict(&src);
        inner.insert("x".to_string(), Value::Int(2));

        // The copy kept the value from snapshot time.
        let Some(Value::Dict(copied)) = copy.get("nested").map(|e| e.value().clone()) else {
            panic!("nested dict missing from copy");
        };
        assert_eq!(copied.get("x").map(|e| e.value().clone()), Some(Value::Int(1)));
    }

    #[test]
    fn test_merge_dict_overlays_and_keeps_unrelated_keys() {
        let snapshot = Dict::new();
        snapshot.insert("a".to_string(), Value::Int(1));
        snapshot.insert("b".to_string(), Value::Int(2));

        let dst = Dict::new();
        dst.insert("b".to_string(), Value::Int(99));
        dst.insert("c".to_string(), Value::Int(3));

        merge_dict(&snapshot, &dst);
        assert_eq!(dst.get("a").map(|e| e.value().clone()), Some(Value::Int(1)));
        assert_eq!(dst.get("b").map(|e| e.value().clone()), Some(Value::Int(2)));
        assert_eq!(dst.get("c").map(|e| e.value().clone()), Some(Value::Int(3)));
    }

    #[test]
    fn test_dict_equality_is_structural() {
        let a = Arc::new(Dict::new());
        a.insert("k".to_string(), Value::Str("v".to_string()));
        let b = Arc::new(Dict::new());
        b.insert("k".to_string(), Value::Str("v".to_string()));
        assert_eq!(Value::Dict(a), Value::Dict(b));
    }
}

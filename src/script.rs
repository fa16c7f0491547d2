//! Reference host: a deliberately tiny script language.
//!
//! The import core only consumes the `Compiler`/`Evaluator` interfaces; this
//! module provides the in-tree implementations that the CLI driver and the
//! integration tests run on. One statement per line:
//!
//! ```text
//! # comment
//! answer = 42
//! greeting = "hello"
//! flag = true
//! nothing = none
//! import helper          # re-enters the import machinery, binds the module
//! forget helper          # removes a module from the registry
//! fail "reason"          # aborts execution with an error
//! ```
//!
//! Compilation parses the statements and packs them into the code payload
//! with bincode, so the artifact round-trips through the byte-code cache
//! like any other marshaled code object.

use crate::api;
use crate::error::{ImportError, Result};
use crate::host::{Compiler, Evaluator};
use crate::state::InterpreterState;
use crate::value::{CodeObject, Dict, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Value {
        match lit {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Stmt {
    Assign { name: String, value: Literal },
    Import { name: String },
    Forget { name: String },
    Fail { message: String },
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Module names may be dotted; each segment must be an identifier.
fn is_module_name(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

fn parse_literal(s: &str) -> Option<Literal> {
    match s {
        "none" => return Some(Literal::None),
        "true" => return Some(Literal::Bool(true)),
        "false" => return Some(Literal::Bool(false)),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Literal::Int(i));
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let body = &s[1..s.len() - 1];
        if !body.contains('"') {
            return Some(Literal::Str(body.to_string()));
        }
    }
    None
}

fn parse(source: &str, filename: &str) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = idx + 1;
        let syntax_err =
            |msg: &str| ImportError::Syntax(format!("{}:{}: {}", filename, lineno, msg));

        if let Some(rest) = line.strip_prefix("import ") {
            let name = rest.trim();
            if !is_module_name(name) {
                return Err(syntax_err("invalid module name"));
            }
            stmts.push(Stmt::Import {
                name: name.to_string(),
            });
        } else if let Some(rest) = line.strip_prefix("forget ") {
            let name = rest.trim();
            if !is_module_name(name) {
                return Err(syntax_err("invalid module name"));
            }
            stmts.push(Stmt::Forget {
                name: name.to_string(),
            });
        } else if let Some(rest) = line.strip_prefix("fail ") {
            match parse_literal(rest.trim()) {
                Some(Literal::Str(message)) => stmts.push(Stmt::Fail { message }),
                _ => return Err(syntax_err("fail takes a string literal")),
            }
        } else if let Some((name, value)) = line.split_once('=') {
            let name = name.trim();
            if !is_identifier(name) {
                return Err(syntax_err("invalid assignment target"));
            }
            let value =
                parse_literal(value.trim()).ok_or_else(|| syntax_err("invalid literal"))?;
            stmts.push(Stmt::Assign {
                name: name.to_string(),
                value,
            });
        } else {
            return Err(syntax_err("unrecognized statement"));
        }
    }
    Ok(stmts)
}

/// Compiler for the reference script language.
pub struct ScriptCompiler;

impl Compiler for ScriptCompiler {
    fn compile(&self, source: &str, filename: &str) -> Result<CodeObject> {
        let stmts = parse(source, filename)?;
        let payload = bincode::serialize(&stmts)
            .map_err(|e| ImportError::Syntax(format!("{}: cannot encode program: {}", filename, e)))?;
        Ok(CodeObject::new(filename, payload))
    }
}

/// Evaluator for the reference script language.
pub struct ScriptEvaluator;

impl Evaluator for ScriptEvaluator {
    fn eval(
        &self,
        state: &InterpreterState,
        code: &CodeObject,
        globals: &Arc<Dict>,
        _locals: &Arc<Dict>,
    ) -> Result<Value> {
        let stmts: Vec<Stmt> = bincode::deserialize(&code.payload).map_err(|e| {
            ImportError::Exec(format!("{}: corrupt code payload: {}", code.filename, e))
        })?;

        for stmt in stmts {
            match stmt {
                Stmt::Assign { name, value } => {
                    globals.insert(name, Value::from(&value));
                }
                Stmt::Import { name } => {
                    let module = api::import_module(state, &name)?;
                    globals.insert(name, Value::Module(module));
                }
                Stmt::Forget { name } => {
                    state.remove_module(&name);
                }
                Stmt::Fail { message } => {
                    return Err(ImportError::Exec(message));
                }
            }
        }
        Ok(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments_and_comments() {
        let stmts = parse(
            "# header\n\nanswer = 42\nname = \"spam\"\nflag = false\nblank = none\n",
            "t.py",
        )
        .unwrap();
        assert_eq!(stmts.len(), 4);
        assert_eq!(
            stmts[0],
            Stmt::Assign {
                name: "answer".to_string(),
                value: Literal::Int(42)
            }
        );
        assert_eq!(
            stmts[1],
            Stmt::Assign {
                name: "name".to_string(),
                value: Literal::Str("spam".to_string())
            }
        );
    }

    #[test]
    fn test_parse_import_forget_fail() {
        let stmts = parse("import a.b\nforget a.b\nfail \"boom\"\n", "t.py").unwrap();
        assert_eq!(
            stmts,
            vec![
                Stmt::Import {
                    name: "a.b".to_string()
                },
                Stmt::Forget {
                    name: "a.b".to_string()
                },
                Stmt::Fail {
                    message: "boom".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_junk_with_location() {
        let err = parse("x = 1\n!!!\n", "bad.py").unwrap_err();
        let ImportError::Syntax(msg) = err else {
            panic!("expected syntax error");
        };
        assert!(msg.starts_with("bad.py:2:"));
    }

    #[test]
    fn test_parse_rejects_bad_literal() {
        assert!(parse("x = maybe\n", "t.py").is_err());
        assert!(parse("x = \"unter\"minated\"\n", "t.py").is_err());
    }

    #[test]
    fn test_compile_roundtrips_through_payload() {
        let code = ScriptCompiler.compile("x = 1\n", "m.py").unwrap();
        assert_eq!(code.filename, "m.py");
        let stmts: Vec<Stmt> = bincode::deserialize(&code.payload).unwrap();
        assert_eq!(
            stmts,
            vec![Stmt::Assign {
                name: "x".to_string(),
                value: Literal::Int(1)
            }]
        );
    }
}

use anyhow::Result;
use clap::Parser;
use pyimport_core::api;
use pyimport_core::config::{self, Cli, Commands, ImportConfig, OutputFormat};
use pyimport_core::imp;
use pyimport_core::state::InterpreterState;
use pyimport_core::value::Value;
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut import_config = ImportConfig::default();
    config::apply_project_config(Path::new("."), &mut import_config);
    if !cli.path.is_empty() {
        import_config.search_path = cli.path.clone();
    }
    if cli.verbose > 0 {
        import_config.verbose = cli.verbose;
    }
    if cli.optimize {
        import_config.optimize = true;
    }

    let state = InterpreterState::with_defaults(import_config);

    match cli.command {
        Commands::Suffixes => {
            for (suffix, mode, code) in imp::get_suffixes(&state) {
                println!("{}\t{}\t{}", suffix, mode, code);
            }
        }
        Commands::Import { name } => {
            let module = api::import_module(&state, &name)?;
            match cli.format {
                OutputFormat::Human => {
                    let mut keys: Vec<String> =
                        module.dict().iter().map(|e| e.key().clone()).collect();
                    keys.sort();
                    for key in keys {
                        if let Some(value) = module.get(&key) {
                            println!("{} = {:?}", key, value);
                        }
                    }
                }
                OutputFormat::Json => {
                    let mut map = serde_json::Map::new();
                    let mut keys: Vec<String> =
                        module.dict().iter().map(|e| e.key().clone()).collect();
                    keys.sort();
                    for key in keys {
                        if let Some(value) = module.get(&key) {
                            map.insert(key, to_json(&value));
                        }
                    }
                    println!("{}", serde_json::Value::Object(map));
                }
            }
        }
    }

    Ok(())
}

/// Render a runtime value for the JSON output mode. Opaque values become
/// descriptive strings.
fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            let mut keys: Vec<String> = d.iter().map(|e| e.key().clone()).collect();
            keys.sort();
            for key in keys {
                if let Some(entry) = d.get(&key) {
                    let rendered = to_json(entry.value());
                    map.insert(key, rendered);
                }
            }
            serde_json::Value::Object(map)
        }
        Value::Code(c) => serde_json::Value::String(format!("<code {}>", c.filename)),
        Value::Module(m) => serde_json::Value::String(format!("<module '{}'>", m.name())),
        Value::ImportFn(_) => serde_json::Value::String("<built-in function __import__>".to_string()),
    }
}

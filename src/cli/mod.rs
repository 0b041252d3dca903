//! CLI module for doe - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;

use eyre::{Result, bail, eyre};
use serde_json::{Map, Value};

/// Build a run's input record from `--json` and `-i key=value` pairs.
///
/// Values that parse as JSON keep their type (`max=3` is a number);
/// anything else is a string.
pub fn build_inputs(pairs: &[String], json: Option<&str>) -> Result<Value> {
    let mut inputs = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            other => bail!("--json must be an object, got {}", other),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("Input '{}' is not key=value", pair))?;
        if key.is_empty() {
            bail!("Input '{}' has an empty key", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(Value::Object(inputs))
}

//! `HOSTCALL_<SECTION>_<KEY>` environment overrides.
//!
//! Overrides are applied to the merged TOML tree before deserialization, so
//! they take precedence over every file layer.

use std::collections::HashMap;

use toml::Value;
use toml::map::Map;

use crate::error::{ConfigError, ConfigResult};

/// Prefix shared by every override variable.
pub const ENV_PREFIX: &str = "HOSTCALL_";

#[derive(Debug, Clone, Copy)]
enum Kind {
    Bool,
    Integer,
    Text,
    List,
}

/// Overridable keys as `(section, key, kind)`.
const OVERRIDES: &[(&str, &str, Kind)] = &[
    ("runtime", "failure_policy", Kind::Text),
    ("runtime", "max_memory_bytes", Kind::Integer),
    ("runtime", "wasi", Kind::Bool),
    ("runtime", "timeout_ms", Kind::Integer),
    ("manifest", "require_hash", Kind::Bool),
    ("pool", "max_instances", Kind::Integer),
    ("pool", "acquire_timeout_ms", Kind::Integer),
    ("logging", "level", Kind::Text),
    ("logging", "format", Kind::Text),
    ("logging", "directives", Kind::List),
    ("logging", "file", Kind::Text),
];

/// Environment variable name for a config key.
#[must_use]
pub fn env_var_name(section: &str, key: &str) -> String {
    format!(
        "{ENV_PREFIX}{}_{}",
        section.to_ascii_uppercase(),
        key.to_ascii_uppercase()
    )
}

/// Snapshot the process environment, keeping only `HOSTCALL_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect()
}

/// Apply overrides from `env` to a config tree. Returns how many were applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a variable cannot be parsed as
/// its key's type.
pub fn apply_env_overrides(tree: &mut Value, env: &HashMap<String, String>) -> ConfigResult<usize> {
    let mut applied = 0usize;
    for &(section, key, kind) in OVERRIDES {
        let var_name = env_var_name(section, key);
        let Some(raw) = env.get(&var_name) else {
            continue;
        };
        let value = parse(&var_name, raw, kind)?;
        let Some(root) = tree.as_table_mut() else {
            return Err(ConfigError::ValidationError {
                field: "<root>".to_owned(),
                message: "configuration root is not a table".to_owned(),
            });
        };
        let table = root.entry(section).or_insert(Value::Table(Map::new()));
        if let Some(table) = table.as_table_mut() {
            table.insert(key.to_owned(), value);
            applied = applied.saturating_add(1);
        }
    }
    Ok(applied)
}

fn parse(var_name: &str, raw: &str, kind: Kind) -> ConfigResult<Value> {
    let err = |message: String| ConfigError::EnvError {
        var_name: var_name.to_owned(),
        message,
    };
    let raw = raw.trim();
    match kind {
        Kind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Boolean(false)),
            other => Err(err(format!("expected a boolean, got '{other}'"))),
        },
        Kind::Integer => match raw.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(Value::Integer(n)),
            Ok(n) => Err(err(format!("expected a non-negative integer, got {n}"))),
            Err(e) => Err(err(format!("expected an integer: {e}"))),
        },
        Kind::Text => Ok(Value::String(raw.to_owned())),
        Kind::List => Ok(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_owned()))
                .collect(),
        )),
    }
}

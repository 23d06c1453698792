//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Smallest usable guest memory: one 64 KiB page.
const MIN_MEMORY_BYTES: u64 = 65_536;

/// Largest addressable wasm32 memory (4 GiB).
const MAX_MEMORY_BYTES: u64 = 4_294_967_296;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_runtime(config)?;
    validate_pool(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message,
    }
}

fn validate_runtime(config: &Config) -> ConfigResult<()> {
    let r = &config.runtime;
    if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&r.max_memory_bytes) {
        return Err(invalid(
            "runtime.max_memory_bytes",
            format!(
                "{} is out of range; must be between {MIN_MEMORY_BYTES} and {MAX_MEMORY_BYTES}",
                r.max_memory_bytes
            ),
        ));
    }
    if r.timeout_ms == Some(0) {
        return Err(invalid(
            "runtime.timeout_ms",
            "timeout must be positive; omit the key to disable it".to_owned(),
        ));
    }
    Ok(())
}

fn validate_pool(config: &Config) -> ConfigResult<()> {
    let p = &config.pool;
    if p.max_instances == 0 {
        return Err(invalid(
            "pool.max_instances",
            "must allow at least one instance".to_owned(),
        ));
    }
    if p.acquire_timeout_ms == 0 {
        return Err(invalid(
            "pool.acquire_timeout_ms",
            "acquire timeout must be positive".to_owned(),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    if config.logging.file.as_deref() == Some("") {
        return Err(invalid(
            "logging.file",
            "log destination must not be empty".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn test_memory_bounds() {
        let mut config = Config::default();
        config.runtime.max_memory_bytes = 1024;
        assert_eq!(field_of(validate(&config).unwrap_err()), "runtime.max_memory_bytes");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.runtime.timeout_ms = Some(0);
        assert_eq!(field_of(validate(&config).unwrap_err()), "runtime.timeout_ms");
    }

    #[test]
    fn test_pool_limits() {
        let mut config = Config::default();
        config.pool.max_instances = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "pool.max_instances");
    }

    #[test]
    fn test_logging_values() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}

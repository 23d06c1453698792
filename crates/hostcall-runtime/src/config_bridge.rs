//! Bridge from `hostcall_config::Config` to runtime types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates its sections into the resolver, runtime options, pool
//! and logging types, so the conversion happens in one place.

use std::time::Duration;

use hostcall_config::{Config, FailurePolicySetting};
use hostcall_core::FailurePolicy;
use hostcall_manifest::ManifestResolver;
use hostcall_telemetry::{LogConfig, LogFormat, LogTarget};

use crate::error::RuntimeResult;
use crate::options::RuntimeOptions;
use crate::pool::InstancePool;

/// Convert a failure policy setting.
#[must_use]
pub fn to_failure_policy(setting: FailurePolicySetting) -> FailurePolicy {
    match setting {
        FailurePolicySetting::TerminateCall => FailurePolicy::TerminateCall,
        FailurePolicySetting::PoisonInstance => FailurePolicy::PoisonInstance,
    }
}

/// Convert config to [`RuntimeOptions`].
#[must_use]
pub fn to_runtime_options(cfg: &Config) -> RuntimeOptions {
    let mut options = RuntimeOptions::new()
        .with_failure_policy(to_failure_policy(cfg.runtime.failure_policy))
        .with_max_memory_bytes(cfg.runtime.max_memory_bytes)
        .with_wasi(cfg.runtime.wasi);
    if let Some(ms) = cfg.runtime.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    options
}

/// Build a [`ManifestResolver`] honouring `manifest.require_hash`.
#[must_use]
pub fn to_resolver(cfg: &Config) -> ManifestResolver {
    ManifestResolver::new().with_require_hash(cfg.manifest.require_hash)
}

/// Build an empty [`InstancePool`] sized by the `[pool]` section.
#[must_use]
pub fn to_instance_pool(cfg: &Config) -> InstancePool {
    InstancePool::new(cfg.pool.max_instances)
        .with_default_timeout(Duration::from_millis(cfg.pool.acquire_timeout_ms))
}

/// Convert config to [`LogConfig`].
///
/// # Errors
///
/// Returns an error if the log format is unknown.
pub fn to_log_config(cfg: &Config) -> RuntimeResult<LogConfig> {
    let format: LogFormat = cfg.logging.format.parse()?;
    let mut log = LogConfig::new(&cfg.logging.level).with_format(format);
    if let Some(destination) = &cfg.logging.file {
        log = log.with_target(LogTarget::parse(destination));
    }
    for directive in &cfg.logging.directives {
        log = log.with_directive(directive);
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_runtime_options_from_config() {
        let mut cfg = Config::default();
        cfg.runtime.failure_policy = FailurePolicySetting::PoisonInstance;
        cfg.runtime.timeout_ms = Some(1500);
        cfg.runtime.wasi = true;

        let options = to_runtime_options(&cfg);
        assert_eq!(options.failure_policy, FailurePolicy::PoisonInstance);
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.max_memory_bytes, 67_108_864);
        assert!(options.wasi);
    }

    #[test]
    fn test_pool_and_resolver_from_config() {
        let mut cfg = Config::default();
        cfg.pool.max_instances = 3;
        cfg.manifest.require_hash = true;
        assert_eq!(to_instance_pool(&cfg).max_instances(), 3);
        assert!(to_resolver(&cfg).require_hash());
    }

    #[test]
    fn test_log_config_from_config() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".into();
        cfg.logging.file = Some("/var/log/hostcall.log".into());
        cfg.logging.directives = vec!["hostcall_core=debug".into()];

        let log = to_log_config(&cfg).unwrap();
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/var/log/hostcall.log")));
        assert_eq!(log.directives, vec!["hostcall_core=debug"]);

        cfg.logging.format = "xml".into();
        assert!(to_log_config(&cfg).is_err());
    }
}

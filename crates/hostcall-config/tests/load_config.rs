//! File-based configuration loading.

use std::collections::HashMap;

use hostcall_config::loader::load_layers;
use hostcall_config::{Config, ConfigError, FailurePolicySetting};

#[test]
fn test_full_file_round_trips_through_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostcall.toml");
    std::fs::write(
        &path,
        r#"
[runtime]
failure_policy = "poison_instance"
max_memory_bytes = 1048576
wasi = true
timeout_ms = 5000

[manifest]
require_hash = true

[pool]
max_instances = 8
acquire_timeout_ms = 250

[logging]
level = "debug"
format = "json"
directives = ["hostcall_core=trace"]
file = "stderr"
"#,
    )
    .unwrap();

    let config = Config::load_file(&path).unwrap();
    assert_eq!(config.runtime.failure_policy, FailurePolicySetting::PoisonInstance);
    assert_eq!(config.runtime.timeout_ms, Some(5000));
    assert!(config.runtime.wasi);
    assert!(config.manifest.require_hash);
    assert_eq!(config.pool.max_instances, 8);
    assert_eq!(config.logging.directives, vec!["hostcall_core=trace".to_owned()]);
    assert_eq!(config.logging.file.as_deref(), Some("stderr"));

    let rendered = config.to_toml().unwrap();
    let reparsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_env_beats_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostcall.toml");
    std::fs::write(&path, "[manifest]\nrequire_hash = false\n").unwrap();

    let env: HashMap<String, String> = [
        ("HOSTCALL_MANIFEST_REQUIRE_HASH".to_owned(), "1".to_owned()),
        ("HOSTCALL_RUNTIME_FAILURE_POLICY".to_owned(), "poison_instance".to_owned()),
    ]
    .into();
    let config = load_layers(None, Some(&path), &env).unwrap();
    assert!(config.manifest.require_hash);
    assert_eq!(config.runtime.failure_policy, FailurePolicySetting::PoisonInstance);
}

#[test]
fn test_unknown_policy_is_a_parse_error() {
    let env: HashMap<String, String> =
        [("HOSTCALL_RUNTIME_FAILURE_POLICY".to_owned(), "retry".to_owned())].into();
    let err = load_layers(None, None, &env).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
}

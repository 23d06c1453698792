//! Installs the global subscriber, so it lives in its own test binary.

#[test]
fn test_set_log_file_writes_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("host.log");

    hostcall_telemetry::set_log_file(path.to_str().unwrap(), Some("debug")).unwrap();
    tracing::info!(plugin = "p1", "guest says hello");

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("guest says hello"));

    let again = hostcall_telemetry::set_log_file("stderr", None);
    assert!(matches!(
        again,
        Err(hostcall_telemetry::TelemetryError::InitError(_))
    ));
}

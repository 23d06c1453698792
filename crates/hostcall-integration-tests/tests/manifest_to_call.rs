//! Manifest resolution feeding plugin instances.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MODULE_BYTES, ScriptLoader, scope};
use hostcall_core::FailurePolicy;
use hostcall_manifest::{
    ContentHash, HashAlgorithm, Manifest, ManifestResolver, MemoryTransport, ResolutionError,
    WasmSource,
};
use hostcall_runtime::{PluginInstance, RuntimeError, RuntimeOptions};

fn sha256(bytes: &[u8]) -> String {
    ContentHash::compute(HashAlgorithm::Sha256, bytes).to_string()
}

#[test]
fn test_inline_module_without_hash_runs_hello_world() {
    let manifest = Manifest::new([WasmSource::data(MODULE_BYTES)]);
    let resolved = ManifestResolver::new().resolve_manifest(&manifest).unwrap();

    let mut plugin = PluginInstance::new(
        Arc::new(ScriptLoader::default()),
        Arc::new(resolved),
        scope(),
        &RuntimeOptions::default(),
    )
    .unwrap();
    assert_eq!(plugin.call("greet", "anyone").unwrap(), b"Hello from Python!");
}

#[test]
fn test_file_module_with_matching_hash() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("plugin.wasm"), MODULE_BYTES).unwrap();

    let manifest = Manifest::new([WasmSource::file("plugin.wasm").with_hash(sha256(MODULE_BYTES))]);
    let resolved = ManifestResolver::new()
        .with_require_hash(true)
        .with_base_dir(dir.path())
        .resolve_manifest(&manifest)
        .unwrap();
    assert_eq!(resolved.modules.len(), 1);

    let mut plugin = PluginInstance::new(
        Arc::new(ScriptLoader::default()),
        Arc::new(resolved),
        scope(),
        &RuntimeOptions::default(),
    )
    .unwrap();
    assert_eq!(plugin.call("greet", "").unwrap(), b"Hello from Python!");
}

#[test]
fn test_wrong_hash_never_reaches_the_loader() {
    let manifest =
        Manifest::new([WasmSource::data(MODULE_BYTES).with_hash(sha256(b"something else"))]);
    let err = ManifestResolver::new().resolve_manifest(&manifest).unwrap_err();
    assert!(matches!(err, ResolutionError::HashMismatch { .. }));
}

#[test]
fn test_required_hash_rejects_bare_source() {
    let manifest = Manifest::new([WasmSource::data(MODULE_BYTES)]);
    let err = ManifestResolver::new()
        .with_require_hash(true)
        .resolve_manifest(&manifest)
        .unwrap_err();
    assert!(matches!(err, ResolutionError::HashRequired { .. }));
}

#[test]
fn test_url_module_through_transport() {
    let transport = Arc::new(
        MemoryTransport::new().with_body("https://plugins.example.com/greet.wasm", MODULE_BYTES),
    );
    let manifest = Manifest::new([WasmSource::url("https://plugins.example.com/greet.wasm")
        .with_hash(sha256(MODULE_BYTES))])
    .with_config_key("greeting", "hi");
    let resolved = ManifestResolver::new()
        .with_transport(transport.clone())
        .resolve_manifest(&manifest)
        .unwrap();
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(resolved.config.get("greeting").map(String::as_str), Some("hi"));

    let loader = Arc::new(ScriptLoader::default());
    let mut plugin = PluginInstance::new(
        loader.clone(),
        Arc::new(resolved),
        scope(),
        &RuntimeOptions::new().with_failure_policy(FailurePolicy::PoisonInstance),
    )
    .unwrap();
    assert_eq!(plugin.call("greet", "").unwrap(), b"Hello from Python!");
    assert_eq!(loader.instantiations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_loader_rejection_is_instantiation_error() {
    let manifest = Manifest::new([WasmSource::data(b"not wasm".to_vec())]);
    let resolved = ManifestResolver::new().resolve_manifest(&manifest).unwrap();
    let err = PluginInstance::new(
        Arc::new(ScriptLoader::default()),
        Arc::new(resolved),
        scope(),
        &RuntimeOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RuntimeError::Instantiation(_)));
}

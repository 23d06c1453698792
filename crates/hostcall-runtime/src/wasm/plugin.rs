//! Extism-backed plugins built from resolved manifests.

use std::any::Any;
use std::sync::Arc;

use extism::{Manifest, PluginBuilder, Wasm};
use hostcall_core::FunctionScope;
use hostcall_manifest::ResolvedManifest;
use tracing::{info, warn};
use uuid::Uuid;

use super::functions::{HostCallState, functions_with_state};
use crate::error::{CallError, CallErrorKind, RuntimeError, RuntimeResult};
use crate::options::RuntimeOptions;

/// Translate a resolved manifest into an Extism manifest.
///
/// Module bytes are passed inline; hashes were already verified during
/// resolution. Memory and timeout limits come from `options`, which should
/// already be narrowed by the manifest's own limits.
#[must_use]
pub fn to_extism_manifest(resolved: &ResolvedManifest, options: &RuntimeOptions) -> Manifest {
    let wasm = resolved.modules.iter().map(|module| {
        let data = Wasm::data(module.bytes().to_vec());
        match module.name() {
            Some(name) => data.with_name(name),
            None => data,
        }
    });

    let mut manifest = Manifest::new(wasm).with_memory_max(options.max_pages());
    if let Some(timeout) = options.timeout {
        manifest = manifest.with_timeout(timeout);
    }
    for (key, value) in &resolved.config {
        manifest = manifest.with_config_key(key, value);
    }
    if let Some(hosts) = &resolved.allowed_hosts {
        for host in hosts {
            manifest = manifest.with_allowed_host(host);
        }
    }
    if let Some(paths) = &resolved.allowed_paths {
        for (host_path, guest_path) in paths {
            manifest = manifest.with_allowed_path(host_path.clone(), guest_path);
        }
    }
    manifest
}

/// A guest running on Extism with the hostcall function scope linked in.
pub struct ExtismPlugin {
    id: Uuid,
    plugin: extism::Plugin,
    state: Arc<HostCallState>,
    last_error: Option<CallError>,
}

impl std::fmt::Debug for ExtismPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtismPlugin")
            .field("id", &self.id)
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

impl ExtismPlugin {
    /// Build a plugin from `resolved`, linking every function in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WasmError`] if Extism rejects the modules.
    pub fn new(
        resolved: &ResolvedManifest,
        scope: &Arc<FunctionScope>,
        options: &RuntimeOptions,
    ) -> RuntimeResult<Self> {
        let options = options.restricted_by(&resolved.memory, resolved.timeout_ms);
        let id = Uuid::new_v4();
        let state = Arc::new(HostCallState::new(id.to_string()));
        let functions = functions_with_state(scope, options.failure_policy, &state);

        let plugin = PluginBuilder::new(to_extism_manifest(resolved, &options))
            .with_wasi(options.wasi)
            .with_functions(functions)
            .build()
            .map_err(|e| RuntimeError::WasmError(format!("failed to build Extism plugin: {e}")))?;

        info!(plugin = %id, functions = scope.len(), "Extism plugin created");
        Ok(Self {
            id,
            plugin,
            state,
            last_error: None,
        })
    }

    /// Unique id of this plugin.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the guest exports `name`.
    #[must_use]
    pub fn function_exists(&self, name: &str) -> bool {
        self.plugin.function_exists(name)
    }

    /// Whether an earlier host failure poisoned this plugin.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.poison_message().is_some()
    }

    /// The error of the most recent call.
    #[must_use]
    pub fn last_error(&self) -> Option<&CallError> {
        self.last_error.as_ref()
    }

    /// Call export `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] when the plugin is poisoned, a host call
    /// fails, or the guest traps or reports an error.
    pub fn call(&mut self, name: &str, input: impl AsRef<[u8]>) -> Result<Vec<u8>, CallError> {
        self.call_inner(name, input.as_ref(), None)
    }

    /// Like [`call`](Self::call) with a host context visible to host functions.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn call_with_context(
        &mut self,
        name: &str,
        input: impl AsRef<[u8]>,
        host_context: Arc<dyn Any + Send + Sync>,
    ) -> Result<Vec<u8>, CallError> {
        self.call_inner(name, input.as_ref(), Some(host_context))
    }

    fn call_inner(
        &mut self,
        name: &str,
        input: &[u8],
        host_context: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Vec<u8>, CallError> {
        if let Some(message) = self.state.poison_message() {
            let err = CallError::new(CallErrorKind::Poisoned, message);
            self.last_error = Some(err.clone());
            return Err(err);
        }

        self.state.take_failure();
        self.state.set_host_context(host_context);
        let result = self.plugin.call::<&[u8], Vec<u8>>(name, input);
        self.state.set_host_context(None);

        let failure = self.state.take_failure();
        let result = match (result, failure) {
            (_, Some(failure)) => Err(CallError::from(&failure)),
            (Ok(output), None) => Ok(output),
            (Err(e), None) => Err(CallError::guest(e.to_string())),
        };
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                warn!(plugin = %self.id, export = name, kind = %e.kind, error = %e.message, "Call failed");
                self.last_error = Some(e.clone());
            },
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hostcall_manifest::{ResolvedManifest, ResolvedModule};

    use super::*;

    #[test]
    fn test_manifest_carries_limits_and_config() {
        let mut resolved = ResolvedManifest::from_module(ResolvedModule::from_bytes(b"\0asm".to_vec()));
        resolved.config.insert("key".into(), "value".into());
        resolved.allowed_hosts = Some(vec!["example.com".into()]);

        let options = RuntimeOptions::new()
            .with_max_memory_bytes(1_048_576)
            .with_timeout(Duration::from_secs(2));
        let manifest = to_extism_manifest(&resolved, &options);

        assert_eq!(manifest.wasm.len(), 1);
        assert_eq!(manifest.memory.max_pages, Some(16));
        assert_eq!(manifest.timeout_ms, Some(2000));
        assert_eq!(manifest.config.get("key").map(String::as_str), Some("value"));
        assert_eq!(manifest.allowed_hosts, Some(vec!["example.com".to_string()]));
    }
}

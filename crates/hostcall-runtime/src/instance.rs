//! Plugin instances.
//!
//! A [`PluginInstance`] couples one instantiated guest with its private
//! memory arena, vars, manifest config and the frozen function scope it may
//! call. Calls take `&mut self`, so an instance runs one export at a time;
//! different instances are independent and may run on different threads.

use std::any::Any;
use std::sync::Arc;

use hostcall_core::{CallContext, FailurePolicy, FunctionScope, InvocationBridge, Region};
use hostcall_manifest::ResolvedManifest;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CallError, CallErrorKind, RuntimeResult};
use crate::guest::{GuestLoader, GuestModule};
use crate::kernel::{Kernel, KernelState};
use crate::options::RuntimeOptions;

/// One instantiated plugin.
pub struct PluginInstance {
    id: Uuid,
    loader: Arc<dyn GuestLoader>,
    manifest: Arc<ResolvedManifest>,
    module: Box<dyn GuestModule>,
    bridge: InvocationBridge,
    state: KernelState,
    options: RuntimeOptions,
    last_error: Option<CallError>,
    /// Message of the failure that poisoned this instance.
    poisoned: Option<String>,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("modules", &self.manifest.modules.len())
            .field("functions", &self.bridge.scope().len())
            .field("policy", &self.bridge.policy())
            .field("poisoned", &self.poisoned.is_some())
            .finish_non_exhaustive()
    }
}

impl PluginInstance {
    /// Instantiate `manifest` with `loader`, granting access to `scope`.
    ///
    /// The manifest's own memory and timeout limits narrow `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader fails.
    pub fn new(
        loader: Arc<dyn GuestLoader>,
        manifest: Arc<ResolvedManifest>,
        scope: Arc<FunctionScope>,
        options: &RuntimeOptions,
    ) -> RuntimeResult<Self> {
        let options = options.restricted_by(&manifest.memory, manifest.timeout_ms);
        let module = loader.instantiate(&manifest.modules)?;
        let bridge = InvocationBridge::new(scope).with_policy(options.failure_policy);
        let state = KernelState::new(
            options.max_memory_bytes,
            manifest.config.clone(),
            options.max_var_bytes,
        );
        let id = Uuid::new_v4();
        info!(
            plugin = %id,
            modules = manifest.modules.len(),
            functions = bridge.scope().len(),
            "Plugin instance created"
        );
        Ok(Self {
            id,
            loader,
            manifest,
            module,
            bridge,
            state,
            options,
            last_error: None,
            poisoned: None,
        })
    }

    /// Unique id of this instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Effective options after manifest limits were applied.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// The function scope guests may call.
    #[must_use]
    pub fn scope(&self) -> &Arc<FunctionScope> {
        self.bridge.scope()
    }

    /// Whether the guest exports `name`.
    #[must_use]
    pub fn function_exists(&self, name: &str) -> bool {
        self.module.function_exists(name)
    }

    /// Whether an earlier host failure poisoned this instance.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// The error of the most recent call, cleared when a call succeeds.
    #[must_use]
    pub fn last_error(&self) -> Option<&CallError> {
        self.last_error.as_ref()
    }

    /// Current value of var `key`.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&[u8]> {
        self.state.vars.get(key).map(Vec::as_slice)
    }

    /// Bytes of guest memory currently in use.
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        self.state.memory.size()
    }

    /// Call export `name` with `input` and return its output.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the instance is poisoned, the export is
    /// missing, a host call fails, or the guest sets an error or returns a
    /// non-zero code. The same error is kept in [`last_error`](Self::last_error).
    pub fn call(&mut self, name: &str, input: impl AsRef<[u8]>) -> Result<Vec<u8>, CallError> {
        self.call_inner(name, input.as_ref(), None)
    }

    /// Like [`call`](Self::call), exposing `host_context` to host functions
    /// through [`CallContext::host_context`].
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

    /// Rebuild the guest from the same manifest: fresh memory, no vars,
    /// cleared poison and error.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader fails; the old guest is kept then.
    pub fn reinstantiate(&mut self) -> RuntimeResult<()> {
        let module = self.loader.instantiate(&self.manifest.modules)?;
        self.module = module;
        self.state.reset();
        self.last_error = None;
        self.poisoned = None;
        info!(plugin = %self.id, "Plugin instance reinstantiated");
        Ok(())
    }

    fn call_inner(
        &mut self,
        name: &str,
        input: &[u8],
        host_context: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Vec<u8>, CallError> {
        let result = self.run(name, input, host_context);
        match &result {
            Ok(output) => {
                self.last_error = None;
                debug!(plugin = %self.id, export = name, bytes = output.len(), "Call succeeded");
            },
            Err(e) => {
                warn!(plugin = %self.id, export = name, kind = %e.kind, error = %e.message, "Call failed");
                self.last_error = Some(e.clone());
            },
        }
        result
    }

    fn run(
        &mut self,
        name: &str,
        input: &[u8],
        host_context: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Vec<u8>, CallError> {
        if let Some(message) = &self.poisoned {
            return Err(CallError::new(CallErrorKind::Poisoned, message.clone()));
        }
        if !self.module.function_exists(name) {
            return Err(CallError::guest(format!("export not found: {name}")));
        }

        self.state
            .begin_call(input)
            .map_err(|e| CallError::new(CallErrorKind::MemoryOutOfBounds, e.to_string()))?;

        let plugin = self.id.to_string();
        let mut ctx = CallContext::new(Some(plugin));
        ctx.set_host_context(host_context);

        let outcome = {
            let mut kernel = Kernel::new(&mut self.state, &self.bridge, &mut ctx);
            self.module.call(name, &mut kernel)
        };

        // A host failure ends the call even if the guest swallowed the trap.
        if let Some(failure) = self.state.host_failure.take() {
            let err = CallError::from(&failure);
            if self.bridge.policy() == FailurePolicy::PoisonInstance {
                warn!(plugin = %self.id, error = %failure, "Instance poisoned");
                self.poisoned = Some(failure.to_string());
            }
            return Err(err);
        }

        let code = outcome.map_err(CallError::from)?;

        if let Some(region) = self.state.error {
            return Err(self.guest_error(region));
        }
        if code != 0 {
            return Err(CallError::guest(format!(
                "{name} returned non-zero exit code {code}"
            )));
        }

        match self.state.output {
            Some(region) => self
                .state
                .memory
                .read_bytes(region.offset, region.len)
                .map_err(|e| CallError::new(CallErrorKind::MemoryOutOfBounds, e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// The error the guest placed in its error slot.
    fn guest_error(&self, region: Region) -> CallError {
        match self.state.memory.read_bytes(region.offset, region.len) {
            Ok(bytes) => CallError::guest(String::from_utf8_lossy(&bytes)),
            Err(e) => {
                warn!(plugin = %self.id, error = %e, "Guest error slot unreadable");
                CallError::new(
                    CallErrorKind::MemoryOutOfBounds,
                    format!("guest error message unreadable: {e}"),
                )
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use hostcall_core::{HostError, HostFunction, HostFunctionRegistry};
    use hostcall_manifest::ResolvedModule;

    use super::*;
    use crate::error::GuestTrap;

    /// Echoes its input through the `shout` host function.
    struct Shouter;

    impl GuestModule for Shouter {
        fn function_exists(&self, name: &str) -> bool {
            matches!(name, "run" | "count")
        }

        fn call(&mut self, name: &str, kernel: &mut Kernel<'_>) -> Result<i32, GuestTrap> {
            match name {
                "run" => {
                    let input = kernel.input()?;
                    let arg = kernel.write_block(input)?;
                    let out = kernel.call_host("shout", &[arg])?;
                    kernel.output_set(out, kernel.length(out))?;
                    Ok(0)
                },
                "count" => {
                    let key = kernel.write_block("n")?;
                    let current = match kernel.var_get(key)? {
                        0 => 0,
                        offset => kernel.load_u8(offset)?,
                    };
                    let next = kernel.write_block([current.saturating_add(1)])?;
                    kernel.var_set(key, next)?;
                    kernel.set_output([current.saturating_add(1)])?;
                    Ok(0)
                },
                _ => Err(GuestTrap::abort("unknown export")),
            }
        }
    }

    fn shouter_loader() -> Arc<dyn GuestLoader> {
        Arc::new(|_: &[ResolvedModule]| -> RuntimeResult<Box<dyn GuestModule>> {
            Ok(Box::new(Shouter))
        })
    }

    fn scope() -> Arc<FunctionScope> {
        let mut registry = HostFunctionRegistry::new();
        registry
            .define(HostFunction::new("shout").typed(|s: String| -> Result<String, HostError> {
                if s.is_empty() {
                    return Err(HostError::msg("nothing to shout"));
                }
                Ok(s.to_uppercase())
            }))
            .unwrap();
        Arc::new(registry.freeze())
    }

    fn instance(policy: FailurePolicy) -> PluginInstance {
        let manifest = Arc::new(ResolvedManifest::from_module(ResolvedModule::from_bytes(
            b"\0asm".to_vec(),
        )));
        PluginInstance::new(
            shouter_loader(),
            manifest,
            scope(),
            &RuntimeOptions::new().with_failure_policy(policy),
        )
        .unwrap()
    }

    #[test]
    fn test_call_round_trip() {
        let mut plugin = instance(FailurePolicy::TerminateCall);
        assert_eq!(plugin.call("run", "hello").unwrap(), b"HELLO");
        assert!(plugin.last_error().is_none());
    }

    #[test]
    fn test_terminate_call_keeps_instance_usable() {
        let mut plugin = instance(FailurePolicy::TerminateCall);
        let err = plugin.call("run", "").unwrap_err();
        assert_eq!(err.kind, CallErrorKind::HostFunctionFailed);
        assert!(err.message.contains("nothing to shout"));
        assert_eq!(plugin.last_error(), Some(&err));

        assert_eq!(plugin.call("run", "again").unwrap(), b"AGAIN");
        assert!(plugin.last_error().is_none());
    }

    #[test]
    fn test_poison_policy_refuses_later_calls() {
        let mut plugin = instance(FailurePolicy::PoisonInstance);
        plugin.call("run", "").unwrap_err();
        assert!(plugin.is_poisoned());

        let err = plugin.call("run", "fine").unwrap_err();
        assert_eq!(err.kind, CallErrorKind::Poisoned);

        plugin.reinstantiate().unwrap();
        assert!(!plugin.is_poisoned());
        assert_eq!(plugin.call("run", "fine").unwrap(), b"FINE");
    }

    #[test]
    fn test_vars_persist_until_reinstantiation() {
        let mut plugin = instance(FailurePolicy::TerminateCall);
        assert_eq!(plugin.call("count", "").unwrap(), vec![1]);
        assert_eq!(plugin.call("count", "").unwrap(), vec![2]);
        assert_eq!(plugin.var("n"), Some(&[2u8][..]));

        plugin.reinstantiate().unwrap();
        assert_eq!(plugin.var("n"), None);
        assert_eq!(plugin.call("count", "").unwrap(), vec![1]);
    }

    #[test]
    fn test_missing_export() {
        let mut plugin = instance(FailurePolicy::TerminateCall);
        assert!(!plugin.function_exists("nope"));
        let err = plugin.call("nope", "").unwrap_err();
        assert_eq!(err.kind, CallErrorKind::Guest);
    }

    #[test]
    fn test_unreadable_error_slot_is_reported() {
        let mut plugin = instance(FailurePolicy::TerminateCall);
        plugin.call("run", "hello").unwrap();
        let size = plugin.memory_size();

        let err = plugin.guest_error(Region::new(size, 16));
        assert_eq!(err.kind, CallErrorKind::MemoryOutOfBounds);
        assert!(err.message.contains("unreadable"));
    }
}

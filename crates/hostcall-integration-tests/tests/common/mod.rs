//! Shared fixtures: a scripted guest and a small host function scope.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hostcall_core::{FailurePolicy, FunctionScope, HostError, HostFunction, HostFunctionRegistry};
use hostcall_manifest::ResolvedModule;
use hostcall_runtime::{
    GuestLoader, GuestModule, GuestTrap, Kernel, PluginInstance, RuntimeError, RuntimeOptions,
    RuntimeResult,
};

/// Stand-in module bytes accepted by [`ScriptLoader`].
pub const MODULE_BYTES: &[u8] = b"\0asm\x01\0\0\0";

/// Guest with a fixed set of exports:
///
/// - `greet`: `hello_world(input)` into the output
/// - `fail_host`: calls `explode`, propagating the trap
/// - `swallow`: calls `explode`, ignores the trap and returns 0
/// - `count`: bumps the `calls` var and outputs its value
pub struct ScriptGuest;

impl GuestModule for ScriptGuest {
    fn function_exists(&self, name: &str) -> bool {
        matches!(name, "greet" | "fail_host" | "swallow" | "count")
    }

    fn call(&mut self, name: &str, kernel: &mut Kernel<'_>) -> Result<i32, GuestTrap> {
        match name {
            "greet" => {
                let arg = kernel.input_offset();
                let out = kernel.call_host("hello_world", &[arg])?;
                kernel.output_set(out, kernel.length(out))?;
            },
            "fail_host" => {
                kernel.call_host("explode", &[])?;
            },
            "swallow" => {
                let _ = kernel.call_host("explode", &[]);
            },
            "count" => {
                let key = kernel.write_block("calls")?;
                let current = kernel.var_get(key)?;
                let n = if current == 0 {
                    0
                } else {
                    kernel.read_string(current)?.parse::<u64>().unwrap_or(0)
                };
                let next = n.saturating_add(1).to_string();
                let value = kernel.write_block(&next)?;
                kernel.var_set(key, value)?;
                kernel.set_output(next)?;
            },
            _ => return Err(GuestTrap::abort("unknown export")),
        }
        Ok(0)
    }
}

/// Loader that checks the resolved bytes and counts instantiations.
#[derive(Debug, Default)]
pub struct ScriptLoader {
    pub instantiations: AtomicUsize,
}

impl GuestLoader for ScriptLoader {
    fn instantiate(&self, modules: &[ResolvedModule]) -> RuntimeResult<Box<dyn GuestModule>> {
        let main = modules
            .first()
            .ok_or_else(|| RuntimeError::Instantiation("no modules".into()))?;
        if main.bytes() != MODULE_BYTES {
            return Err(RuntimeError::Instantiation("not a wasm module".into()));
        }
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptGuest))
    }
}

/// `hello_world` and an always-failing `explode`.
pub fn scope() -> Arc<FunctionScope> {
    let mut registry = HostFunctionRegistry::new();
    registry
        .define(
            HostFunction::new("hello_world")
                .typed(|_name: String| "Hello from Python!".to_string()),
        )
        .unwrap();
    registry
        .define(
            HostFunction::new("explode")
                .typed(|| -> Result<(), HostError> { Err(HostError::msg("boom")) }),
        )
        .unwrap();
    Arc::new(registry.freeze())
}

/// Instance over [`MODULE_BYTES`] with the given policy.
pub fn instance(loader: Arc<ScriptLoader>, policy: FailurePolicy) -> PluginInstance {
    let manifest = hostcall_manifest::ResolvedManifest::from_module(ResolvedModule::from_bytes(
        MODULE_BYTES.to_vec(),
    ));
    PluginInstance::new(
        loader,
        Arc::new(manifest),
        scope(),
        &RuntimeOptions::new().with_failure_policy(policy),
    )
    .unwrap()
}

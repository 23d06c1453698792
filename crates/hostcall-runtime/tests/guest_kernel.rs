//! Rust guests driving the kernel imports end to end.

use std::sync::Arc;

use hostcall_core::{CallContext, HostError, HostFunction, HostFunctionRegistry, Json};
use hostcall_manifest::{ResolvedManifest, ResolvedModule};
use hostcall_runtime::{
    CallErrorKind, GuestLoader, GuestModule, GuestTrap, Kernel, PluginInstance, RuntimeOptions,
    RuntimeResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    item: String,
    quantity: u32,
}

/// Exports:
/// - `greet`: calls `hello_world(input)`
/// - `order`: calls `price(input as json)` and emits the u64 result
/// - `config`: emits the `region` config value
/// - `tenant`: calls `whoami()`
/// - `bad_arg`: calls `hello_world` with a dangling offset
/// - `fail`: sets an error message
/// - `exit`: returns 3
struct TestGuest;

impl GuestModule for TestGuest {
    fn function_exists(&self, name: &str) -> bool {
        matches!(
            name,
            "greet" | "order" | "config" | "tenant" | "bad_arg" | "fail" | "exit"
        )
    }

    fn call(&mut self, name: &str, kernel: &mut Kernel<'_>) -> Result<i32, GuestTrap> {
        match name {
            "greet" => {
                let arg = kernel.input_offset();
                let out = kernel.call_host("hello_world", &[arg])?;
                let log = kernel.write_block("greeted")?;
                kernel.log_info(log)?;
                kernel.output_set(out, kernel.length(out))?;
            },
            "order" => {
                let arg = kernel.input_offset();
                let out = kernel.call_host("price", &[arg])?;
                let cents = kernel.load_u64(out)?;
                kernel.set_output(cents.to_string())?;
            },
            "config" => {
                let key = kernel.write_block("region")?;
                let value = kernel.config_get(key)?;
                if value == 0 {
                    kernel.set_error("region not configured")?;
                    return Ok(1);
                }
                kernel.output_set(value, kernel.length(value))?;
            },
            "tenant" => {
                let out = kernel.call_host("whoami", &[])?;
                kernel.output_set(out, kernel.length(out))?;
            },
            "bad_arg" => {
                kernel.call_host("hello_world", &[999_999])?;
            },
            "fail" => {
                kernel.set_error("guest refused")?;
            },
            "exit" => return Ok(3),
            _ => return Err(GuestTrap::abort("unknown export")),
        }
        Ok(0)
    }
}

struct Tenant(&'static str);

fn scope() -> Arc<hostcall_core::FunctionScope> {
    let mut registry = HostFunctionRegistry::new();
    registry
        .define(
            HostFunction::new("hello_world")
                .typed(|_name: String| "Hello from Python!".to_string()),
        )
        .unwrap();
    registry
        .define(
            HostFunction::new("price").typed(|order: Json<Order>| -> Result<u64, HostError> {
                let order = order.into_inner();
                if order.quantity == 0 {
                    return Err(HostError::msg("empty order"));
                }
                Ok(u64::from(order.quantity).saturating_mul(250))
            }),
        )
        .unwrap();
    registry
        .define(
            HostFunction::new("whoami")
                .typed_with_context(|ctx: &mut CallContext| -> Result<String, HostError> {
                    let tenant = ctx
                        .host_context::<Tenant>()
                        .ok_or_else(|| HostError::msg("no tenant"))?;
                    Ok(tenant.0.to_string())
                }),
        )
        .unwrap();
    Arc::new(registry.freeze())
}

fn instance() -> PluginInstance {
    let loader: Arc<dyn GuestLoader> =
        Arc::new(|_: &[ResolvedModule]| -> RuntimeResult<Box<dyn GuestModule>> {
            Ok(Box::new(TestGuest))
        });
    let mut manifest =
        ResolvedManifest::from_module(ResolvedModule::from_bytes(b"\0asm\x01\0\0\0".to_vec()));
    manifest.config.insert("region".into(), "eu-west".into());
    PluginInstance::new(loader, Arc::new(manifest), scope(), &RuntimeOptions::default()).unwrap()
}

#[test]
fn test_hello_world_through_kernel() {
    let mut plugin = instance();
    let output = plugin.call("greet", "world").unwrap();
    assert_eq!(output, b"Hello from Python!");
}

#[test]
fn test_json_argument_and_numeric_result() {
    let mut plugin = instance();
    let input = serde_json::to_vec(&Order {
        item: "widget".into(),
        quantity: 4,
    })
    .unwrap();
    assert_eq!(plugin.call("order", &input).unwrap(), b"1000");

    let err = plugin.call("order", b"{not json").unwrap_err();
    assert_eq!(err.kind, CallErrorKind::ArgumentDecodeFailed);

    let zero = serde_json::to_vec(&Order {
        item: "widget".into(),
        quantity: 0,
    })
    .unwrap();
    let err = plugin.call("order", &zero).unwrap_err();
    assert_eq!(err.kind, CallErrorKind::HostFunctionFailed);
    assert!(err.message.contains("empty order"));
}

#[test]
fn test_manifest_config_is_visible() {
    let mut plugin = instance();
    assert_eq!(plugin.call("config", "").unwrap(), b"eu-west");
}

#[test]
fn test_host_context_reaches_host_function() {
    let mut plugin = instance();
    let output = plugin
        .call_with_context("tenant", "", Arc::new(Tenant("acme")))
        .unwrap();
    assert_eq!(output, b"acme");

    let err = plugin.call("tenant", "").unwrap_err();
    assert_eq!(err.kind, CallErrorKind::HostFunctionFailed);
}

#[test]
fn test_dangling_offset_is_out_of_bounds() {
    let mut plugin = instance();
    let err = plugin.call("bad_arg", "").unwrap_err();
    assert_eq!(err.kind, CallErrorKind::MemoryOutOfBounds);
    assert_eq!(plugin.last_error().map(|e| e.kind), Some(CallErrorKind::MemoryOutOfBounds));
}

#[test]
fn test_guest_errors() {
    let mut plugin = instance();
    let err = plugin.call("fail", "").unwrap_err();
    assert_eq!(err.kind, CallErrorKind::Guest);
    assert_eq!(err.message, "guest refused");

    let err = plugin.call("exit", "").unwrap_err();
    assert!(err.message.contains("non-zero exit code 3"));
}

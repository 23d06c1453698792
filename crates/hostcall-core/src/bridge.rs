//! Invocation bridge: executes one guest-to-host call.
//!
//! The guest passes one memory offset per argument. The bridge resolves the
//! function, maps every offset to a bounds-checked region before decoding
//! anything, runs the handler, then writes the encoded result into a fresh
//! block and hands its region back. Nothing is written to guest memory
//! unless the call succeeds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EncodeError, InvocationError, MemoryError};
use crate::memory::{GuestMemory, Region};
use crate::registry::FunctionScope;
use crate::signature::{CallContext, CallFailure, HostFunctionDescriptor};

/// What a failed host call does to the calling instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Trap the current guest call; the instance stays usable.
    #[default]
    TerminateCall,
    /// Trap the call and refuse every later call on the instance.
    PoisonInstance,
}

/// Regions touched by one guest-to-host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    function: String,
    args: Vec<Region>,
    result: Option<Region>,
}

impl CallFrame {
    /// Called function.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Argument regions in call order.
    #[must_use]
    pub fn args(&self) -> &[Region] {
        &self.args
    }

    /// Region of the encoded result, `None` for unit functions.
    #[must_use]
    pub fn result(&self) -> Option<Region> {
        self.result
    }
}

/// Dispatches guest calls against a frozen function scope.
#[derive(Debug, Clone)]
pub struct InvocationBridge {
    scope: Arc<FunctionScope>,
    policy: FailurePolicy,
}

impl InvocationBridge {
    /// Create a bridge over `scope` with the default failure policy.
    #[must_use]
    pub fn new(scope: Arc<FunctionScope>) -> Self {
        Self {
            scope,
            policy: FailurePolicy::default(),
        }
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Configured failure policy.
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// The scope calls resolve against.
    #[must_use]
    pub fn scope(&self) -> &Arc<FunctionScope> {
        &self.scope
    }

    /// Invoke `name` with argument offsets, returning the result region.
    ///
    /// # Errors
    ///
    /// Returns an [`InvocationError`] for any failed step; guest memory is not
    /// written on failure.
    pub fn invoke(
        &self,
        memory: &mut dyn GuestMemory,
        ctx: &mut CallContext,
        name: &str,
        offsets: &[u64],
    ) -> Result<Option<Region>, InvocationError> {
        self.invoke_frame(memory, ctx, name, offsets)
            .map(|frame| frame.result)
    }

    /// Like [`invoke`](Self::invoke) but returns the whole call frame.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub fn invoke_frame(
        &self,
        memory: &mut dyn GuestMemory,
        ctx: &mut CallContext,
        name: &str,
        offsets: &[u64],
    ) -> Result<CallFrame, InvocationError> {
        let result = self.dispatch(memory, ctx, name, offsets);
        if let Err(e) = &result {
            warn!(
                function = name,
                plugin = ctx.plugin().unwrap_or("-"),
                kind = %e.kind(),
                error = %e,
                "Host function call failed"
            );
        }
        result
    }

    fn dispatch(
        &self,
        memory: &mut dyn GuestMemory,
        ctx: &mut CallContext,
        name: &str,
        offsets: &[u64],
    ) -> Result<CallFrame, InvocationError> {
        let descriptor = self
            .scope
            .resolve(name)
            .map_err(|_| InvocationError::NotFound {
                name: name.to_string(),
            })?;
        let function = descriptor.name();

        if offsets.len() != descriptor.arity() {
            return Err(InvocationError::ArityMismatch {
                function: function.to_string(),
                expected: descriptor.arity(),
                actual: offsets.len(),
            });
        }

        let mem_err = |source: MemoryError| InvocationError::MemoryOutOfBounds {
            function: function.to_string(),
            source,
        };

        let args = offsets
            .iter()
            .map(|&offset| memory.region(offset))
            .collect::<Result<Vec<_>, _>>()
            .map_err(mem_err)?;

        let mut values = Vec::with_capacity(args.len());
        for (index, (region, spec)) in args.iter().zip(descriptor.params()).enumerate() {
            let raw = memory.read(*region).map_err(mem_err)?;
            let value = spec
                .decode(&raw)
                .map_err(|source| InvocationError::ArgumentDecodeFailed {
                    function: function.to_string(),
                    index,
                    source,
                })?;
            values.push(value);
        }

        ctx.set_function(function);
        let output = descriptor
            .call(ctx, values)
            .map_err(|failure| call_failure(&descriptor, failure))?;

        let result = match (descriptor.returns(), output) {
            (Some(spec), Some(value)) => {
                let bytes =
                    spec.encode(&value)
                        .map_err(|source| InvocationError::ResultEncodeFailed {
                            function: function.to_string(),
                            source,
                        })?;
                Some(memory.alloc_bytes(&bytes).map_err(mem_err)?)
            },
            (Some(_), None) => {
                return Err(InvocationError::ResultEncodeFailed {
                    function: function.to_string(),
                    source: EncodeError::MissingValue,
                });
            },
            (None, Some(_)) => {
                debug!(function, "Discarding value returned by unit host function");
                None
            },
            (None, None) => None,
        };

        Ok(CallFrame {
            function: function.to_string(),
            args,
            result,
        })
    }
}

fn call_failure(descriptor: &HostFunctionDescriptor, failure: CallFailure) -> InvocationError {
    let function = descriptor.name().to_string();
    match failure {
        CallFailure::Argument { index, error } => InvocationError::ArgumentDecodeFailed {
            function,
            index,
            source: error.into(),
        },
        CallFailure::Host(message) => InvocationError::HostFunctionFailed { function, message },
        CallFailure::Result(error) => InvocationError::ResultEncodeFailed {
            function,
            source: error.into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Value, WireType};
    use crate::error::{DecodeError, HostError, InvocationErrorKind};
    use crate::memory::LinearMemory;
    use crate::registry::HostFunctionRegistry;
    use crate::signature::HostFunction;

    fn bridge() -> InvocationBridge {
        let mut registry = HostFunctionRegistry::new();
        registry
            .define(HostFunction::new("hello_world").typed(|s: String| format!("Hello, {s}!")))
            .unwrap();
        registry
            .define(HostFunction::new("add").typed(|a: i64, b: i64| a.saturating_add(b)))
            .unwrap();
        registry
            .define(HostFunction::new("count").typed(|v: serde_json::Value| {
                v.as_array().map_or(0u64, |a| a.len() as u64)
            }))
            .unwrap();
        registry
            .define(HostFunction::new("fail").typed(|| -> Result<String, HostError> {
                Err(HostError::msg("nope"))
            }))
            .unwrap();
        registry
            .define(HostFunction::new("silent").typed(|_s: String| ()))
            .unwrap();
        registry
            .define(
                HostFunction::new("lying")
                    .returns::<String>()
                    .handler(|_ctx, _args| Ok(None)),
            )
            .unwrap();
        InvocationBridge::new(Arc::new(registry.freeze()))
    }

    fn invoke(
        bridge: &InvocationBridge,
        mem: &mut LinearMemory,
        name: &str,
        offsets: &[u64],
    ) -> Result<Option<Region>, InvocationError> {
        bridge.invoke(mem, &mut CallContext::new(Some("test".into())), name, offsets)
    }

    #[test]
    fn test_string_call_round_trip() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let arg = mem.alloc_bytes(b"world").unwrap();
        let out = invoke(&bridge, &mut mem, "hello_world", &[arg.offset])
            .unwrap()
            .unwrap();
        assert_eq!(mem.read(out).unwrap(), b"Hello, world!");
        assert_eq!(mem.block_len(out.offset).unwrap(), out.len);
    }

    #[test]
    fn test_numeric_and_json_args() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let a = mem.alloc_bytes(&40i64.to_le_bytes()).unwrap();
        let b = mem.alloc_bytes(&2i64.to_le_bytes()).unwrap();
        let out = invoke(&bridge, &mut mem, "add", &[a.offset, b.offset])
            .unwrap()
            .unwrap();
        assert_eq!(mem.read(out).unwrap(), 42i64.to_le_bytes());

        let list = mem.alloc_bytes(b"[1, 2, 3]").unwrap();
        let out = invoke(&bridge, &mut mem, "count", &[list.offset])
            .unwrap()
            .unwrap();
        assert_eq!(mem.read(out).unwrap(), 3u64.to_le_bytes());
    }

    #[test]
    fn test_not_found_leaves_memory_untouched() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let arg = mem.alloc_bytes(b"x").unwrap();
        let blocks = mem.live_blocks();
        let err = invoke(&bridge, &mut mem, "nope", &[arg.offset]).unwrap_err();
        assert_eq!(err.kind(), InvocationErrorKind::NotFound);
        assert_eq!(mem.live_blocks(), blocks);
    }

    #[test]
    fn test_arity_mismatch() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let err = invoke(&bridge, &mut mem, "add", &[0]).unwrap_err();
        assert_eq!(
            err,
            InvocationError::ArityMismatch {
                function: "add".into(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_bad_offset_is_out_of_bounds_and_writes_nothing() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let good = mem.alloc_bytes(&1i64.to_le_bytes()).unwrap();
        let blocks = mem.live_blocks();
        let err = invoke(&bridge, &mut mem, "add", &[good.offset, 999_999]).unwrap_err();
        assert_eq!(err.kind(), InvocationErrorKind::MemoryOutOfBounds);
        assert_eq!(mem.live_blocks(), blocks);
    }

    #[test]
    fn test_decode_failure_reports_index() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let a = mem.alloc_bytes(&1i64.to_le_bytes()).unwrap();
        let short = mem.alloc_bytes(&[1, 2]).unwrap();
        let err = invoke(&bridge, &mut mem, "add", &[a.offset, short.offset]).unwrap_err();
        assert!(matches!(
            err,
            InvocationError::ArgumentDecodeFailed {
                index: 1,
                source: DecodeError::InvalidLength { wire: WireType::I64, .. },
                ..
            }
        ));

        let bad = mem.alloc_bytes(b"{oops").unwrap();
        let err = invoke(&bridge, &mut mem, "count", &[bad.offset]).unwrap_err();
        assert_eq!(err.kind(), InvocationErrorKind::ArgumentDecodeFailed);
    }

    #[test]
    fn test_host_failure_message_reaches_caller() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let err = invoke(&bridge, &mut mem, "fail", &[]).unwrap_err();
        assert_eq!(
            err,
            InvocationError::HostFunctionFailed {
                function: "fail".into(),
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_unit_function_returns_no_region() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let arg = mem.alloc_bytes(b"quiet").unwrap();
        assert_eq!(invoke(&bridge, &mut mem, "silent", &[arg.offset]).unwrap(), None);
    }

    #[test]
    fn test_missing_return_value_fails_encoding() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let err = invoke(&bridge, &mut mem, "lying", &[]).unwrap_err();
        assert!(matches!(
            err,
            InvocationError::ResultEncodeFailed {
                source: EncodeError::MissingValue,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_records_regions() {
        let bridge = bridge();
        let mut mem = LinearMemory::default();
        let arg = mem.alloc_bytes(b"frame").unwrap();
        let frame = bridge
            .invoke_frame(&mut mem, &mut CallContext::default(), "hello_world", &[arg.offset])
            .unwrap();
        assert_eq!(frame.function(), "hello_world");
        assert_eq!(frame.args(), [arg]);
        assert!(frame.result().is_some());
    }

    #[test]
    fn test_policy_defaults_to_terminate_call() {
        let bridge = bridge();
        assert_eq!(bridge.policy(), FailurePolicy::TerminateCall);
        let bridge = bridge.with_policy(FailurePolicy::PoisonInstance);
        assert_eq!(bridge.policy(), FailurePolicy::PoisonInstance);
        let parsed: FailurePolicy = serde_json::from_str("\"poison_instance\"").unwrap();
        assert_eq!(parsed, FailurePolicy::PoisonInstance);
    }

    #[test]
    fn test_value_slots_pass_through() {
        let mut registry = HostFunctionRegistry::new();
        registry
            .define(
                HostFunction::new("echo")
                    .typed(|v: Value| v)
                    .tag_param(0, WireType::Utf8String)
                    .tag_return(WireType::RawBytes),
            )
            .unwrap();
        let bridge = InvocationBridge::new(Arc::new(registry.freeze()));
        let mut mem = LinearMemory::default();
        let arg = mem.alloc_bytes("ünïcode".as_bytes()).unwrap();
        let out = invoke(&bridge, &mut mem, "echo", &[arg.offset]).unwrap().unwrap();
        assert_eq!(mem.read(out).unwrap(), "ünïcode".as_bytes());
    }
}

//! Guest/host function-call bridge for WebAssembly plugins.
//!
//! Provides the host side of the Extism-style calling convention:
//!
//! - [`codec`]: [`WireType`]s and the [`Value`] codec between host values and guest bytes
//! - [`HostType`] / [`Json`]: wire metadata carried by host types
//! - [`HostFunction`]: builder that infers a function's signature from its handler
//! - [`HostFunctionRegistry`] / [`FunctionScope`]: name-keyed dispatch tables
//! - [`GuestMemory`] / [`LinearMemory`]: bounds-checked guest memory
//! - [`InvocationBridge`]: decodes arguments, runs the handler, encodes the result
//!
//! # Calling Convention
//!
//! Every parameter and result is passed as a `u64` offset into guest memory.
//! The offset names an allocated block whose length the allocator records,
//! so the guest never passes lengths explicitly.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bridge;
pub mod codec;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod registry;
pub mod signature;
pub mod types;

pub use bridge::{CallFrame, FailurePolicy, InvocationBridge};
pub use codec::{Codec, Value, WireType, decode, encode};
pub use error::{
    ConversionError, DecodeError, EncodeError, HostError, HostResult, InvocationError,
    InvocationErrorKind, MemoryError, RegistryError, SignatureError, Slot,
};
pub use memory::{DEFAULT_MAX_MEMORY_BYTES, GuestMemory, LinearMemory, PAGE_SIZE, Region};
pub use registry::{FunctionScope, HostFunctionRegistry, RegistrationHandle};
pub use signature::{
    CallContext, CallFailure, ContextHandler, DEFAULT_NAMESPACE, DynHandler, HostFunction,
    HostFunctionDescriptor, HostReturn, ParamSpec, TypedHandler,
};
pub use types::{HostType, Json, TypeInfo};

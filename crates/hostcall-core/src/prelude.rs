//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hostcall_core::prelude::*;` to import the registration surface.
//!
//! # Example
//!
//! ```rust
//! use hostcall_core::prelude::*;
//!
//! # fn main() -> Result<(), RegistryError> {
//! let mut registry = HostFunctionRegistry::new();
//! registry.define(HostFunction::new("hello_world").typed(|name: String| {
//!     format!("Hello, {name}!")
//! }))?;
//! let scope = std::sync::Arc::new(registry.freeze());
//! assert!(scope.contains("hello_world"));
//! # Ok(())
//! # }
//! ```

// Errors
pub use crate::{HostError, HostResult, InvocationError, RegistryError, SignatureError};

// Registration
pub use crate::{CallContext, HostFunction, HostFunctionRegistry, Json, Value, WireType};

// Dispatch
pub use crate::{FailurePolicy, FunctionScope, InvocationBridge, LinearMemory};

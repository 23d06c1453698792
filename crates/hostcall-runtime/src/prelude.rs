//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hostcall_runtime::prelude::*;` to import all essential types.

// Errors
pub use crate::{CallError, CallErrorKind, GuestTrap, PoolError, RuntimeError, RuntimeResult};

// Instances
pub use crate::{GuestLoader, GuestModule, Kernel, PluginInstance, RuntimeOptions};

// Pooling
pub use crate::{InstancePool, PooledInstance};

#[cfg(feature = "extism")]
pub use crate::wasm::ExtismPlugin;

//! Hostcall Runtime - plugin instances and the guest call surface.
//!
//! This crate provides:
//! - [`PluginInstance`]: a guest plus its private memory, vars, config and error slot
//! - [`Kernel`]: the `extism_*` imports and host calls a guest sees during a call
//! - [`GuestLoader`] / [`GuestModule`]: the seam to whatever executes guest code
//! - [`InstancePool`]: bounded per-key pools of instances
//! - [`wasm`]: an Extism adapter running real WASM guests (feature `extism`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hostcall_core::prelude::*;
//! use hostcall_manifest::{Manifest, ManifestResolver, WasmSource};
//! use hostcall_runtime::{GuestLoader, PluginInstance, RuntimeOptions};
//!
//! # fn example(loader: Arc<dyn GuestLoader>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = HostFunctionRegistry::new();
//! registry.define(HostFunction::new("hello_world").typed(|_: String| "Hello from Python!".to_string()))?;
//! let scope = Arc::new(registry.freeze());
//!
//! let manifest = Manifest::new([WasmSource::file("plugin.wasm")]);
//! let resolved = Arc::new(ManifestResolver::new().resolve_manifest(&manifest)?);
//!
//! let mut plugin = PluginInstance::new(loader, resolved, scope, &RuntimeOptions::default())?;
//! let output = plugin.call("greet", "world")?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
pub mod prelude;
#[cfg(feature = "extism")]
pub mod wasm;

mod error;
mod guest;
mod instance;
mod kernel;
mod options;
mod pool;

pub use error::{CallError, CallErrorKind, GuestTrap, PoolError, RuntimeError, RuntimeResult};
pub use guest::{GuestLoader, GuestModule};
pub use instance::PluginInstance;
pub use kernel::{GuestLogLevel, Kernel};
pub use options::RuntimeOptions;
pub use pool::{DEFAULT_ACQUIRE_TIMEOUT, InstancePool, PooledInstance};

/// Version of this crate.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

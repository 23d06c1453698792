//! Extism engine adapter.
//!
//! Runs real WASM guests on Extism while keeping the same host-call
//! semantics as [`PluginInstance`](crate::PluginInstance):
//!
//! ```text
//! ┌───────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │ ExtismPlugin  │────▶│ extism::Plugin │────▶│ WASM guest       │
//! └───────────────┘     └────────────────┘     └──────────────────┘
//!                               │ import call
//!                               ▼
//!                       ┌────────────────┐     ┌──────────────────┐
//!                       │ extism Function│────▶│ InvocationBridge │
//!                       │ (one per name) │     │ over ExtismMemory│
//!                       └────────────────┘     └──────────────────┘
//! ```
//!
//! Every parameter and result of a generated import is `PTR` (an `i64`
//! memory offset). Extism's own kernel provides the `extism_*` imports.

mod functions;
mod memory;
mod plugin;

pub use functions::to_extism_functions;
pub use memory::ExtismMemory;
pub use plugin::{ExtismPlugin, to_extism_manifest};

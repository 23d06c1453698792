//! Manifest format and module resolution for hostcall plugins.
//!
//! - [`Manifest`] / [`WasmSource`]: the JSON/TOML plugin manifest
//! - [`ContentHash`]: `sha256` / `blake3` content hashes, compared in constant time
//! - [`Transport`]: seam for fetching URL sources ([`HttpTransport`] behind the `http` feature)
//! - [`ManifestResolver`]: turns sources into verified [`ResolvedModule`]s
//!
//! A source that declares a hash must match it exactly; there is no retry
//! and no partially resolved manifest.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod hash;
pub mod manifest;
pub mod resolver;
pub mod transport;

pub use error::{ResolutionError, ResolutionResult, TransportError};
pub use hash::{ContentHash, HashAlgorithm};
pub use manifest::{Manifest, MemoryOptions, WasmData, WasmFile, WasmSource, WasmUrl};
pub use resolver::{MAIN_MODULE, ManifestResolver, ResolvedManifest, ResolvedModule};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{FetchRequest, MemoryTransport, Transport};

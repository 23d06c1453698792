//! Manifest resolution: turns module sources into verified bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::error::{ResolutionError, ResolutionResult};
use crate::hash::ContentHash;
use crate::manifest::{Manifest, MemoryOptions, WasmSource};
use crate::transport::{FetchRequest, Transport};

/// Name that marks the entry module of a multi-module manifest.
pub const MAIN_MODULE: &str = "main";

/// Verified bytes of one module.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    name: Option<String>,
    bytes: Vec<u8>,
    hash: Option<ContentHash>,
    origin: String,
}

impl ResolvedModule {
    /// Wrap raw module bytes that need no resolution.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            bytes: bytes.into(),
            hash: None,
            origin: "raw bytes".to_string(),
        }
    }

    /// Declared module name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Module bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the module bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The hash the bytes were verified against, if one was declared.
    #[must_use]
    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    /// Where the bytes came from.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .field("hash", &self.hash.as_ref().map(ToString::to_string))
            .field("origin", &self.origin)
            .finish()
    }
}

/// A manifest whose modules are all resolved and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    /// Modules in manifest order.
    pub modules: Vec<ResolvedModule>,
    /// Guest-readable configuration.
    pub config: BTreeMap<String, String>,
    /// Memory limits.
    pub memory: MemoryOptions,
    /// Hosts the guest may reach over HTTP.
    pub allowed_hosts: Option<Vec<String>>,
    /// Host paths mapped into the guest.
    pub allowed_paths: Option<BTreeMap<String, String>>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl ResolvedManifest {
    /// A single-module manifest with default settings.
    #[must_use]
    pub fn from_module(module: ResolvedModule) -> Self {
        Self {
            modules: vec![module],
            config: BTreeMap::new(),
            memory: MemoryOptions::default(),
            allowed_hosts: None,
            allowed_paths: None,
            timeout_ms: None,
        }
    }

    /// The entry module: the one named `main`, otherwise the last one.
    #[must_use]
    pub fn main_module(&self) -> Option<&ResolvedModule> {
        self.modules
            .iter()
            .find(|m| m.name() == Some(MAIN_MODULE))
            .or_else(|| self.modules.last())
    }
}

/// Resolves manifest sources into verified module bytes.
///
/// No automatic retry: a failed fetch or mismatched hash fails the whole
/// resolution.
#[derive(Clone, Default)]
pub struct ManifestResolver {
    require_hash: bool,
    base_dir: Option<PathBuf>,
    transport: Option<Arc<dyn Transport>>,
}

impl ManifestResolver {
    /// Create a resolver that accepts unhashed sources and has no transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject sources that declare no hash.
    #[must_use]
    pub fn with_require_hash(mut self, require: bool) -> Self {
        self.require_hash = require;
        self
    }

    /// Resolve relative file paths against `dir`.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Fetch URL sources through `transport`.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Fetch URL sources over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::TransportFailure`] if the HTTP client
    /// cannot be built.
    #[cfg(feature = "http")]
    pub fn with_http_transport(self) -> ResolutionResult<Self> {
        let transport =
            crate::transport::HttpTransport::new().map_err(|e| ResolutionError::TransportFailure {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(self.with_transport(Arc::new(transport)))
    }

    /// Whether unhashed sources are rejected.
    #[must_use]
    pub fn require_hash(&self) -> bool {
        self.require_hash
    }

    /// Resolve and verify one source.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolutionError`] if the hash is missing (when required)
    /// or malformed, the bytes cannot be obtained, or they do not match the
    /// declared hash.
    pub fn resolve(&self, source: &WasmSource) -> ResolutionResult<ResolvedModule> {
        let origin = source.describe();
        let declared = source.hash().map(ContentHash::parse).transpose()?;
        if declared.is_none() && self.require_hash {
            return Err(ResolutionError::HashRequired { module: origin });
        }

        let bytes = match source {
            WasmSource::Data(d) => d.data.clone(),
            WasmSource::File(f) => self.read_file(&f.path)?,
            WasmSource::Url(u) => {
                let url = Url::parse(&u.url).map_err(|e| ResolutionError::InvalidUrl {
                    url: u.url.clone(),
                    message: e.to_string(),
                })?;
                let method = u.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
                self.fetch(&FetchRequest {
                    url: &url,
                    method: &method,
                    headers: &u.headers,
                })?
            },
        };

        match &declared {
            Some(hash) => {
                // On mismatch the bytes are dropped here and never returned.
                hash.verify(&bytes)?;
                debug!(module = %origin, hash = %hash, "Module hash verified");
            },
            None => {
                warn!(
                    module = %origin,
                    "Module has no hash; integrity not verified"
                );
            },
        }

        Ok(ResolvedModule {
            name: source.name().map(str::to_string),
            bytes,
            hash: declared,
            origin,
        })
    }

    /// Resolve every source of a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::EmptyManifest`] for a manifest without
    /// sources, or the first error from [`resolve`](Self::resolve).
    pub fn resolve_manifest(&self, manifest: &Manifest) -> ResolutionResult<ResolvedManifest> {
        if manifest.wasm.is_empty() {
            return Err(ResolutionError::EmptyManifest);
        }
        let modules = manifest
            .wasm
            .iter()
            .map(|source| self.resolve(source))
            .collect::<ResolutionResult<Vec<_>>>()?;
        debug!(modules = modules.len(), "Resolved manifest");
        Ok(ResolvedManifest {
            modules,
            config: manifest.config.clone(),
            memory: manifest.memory,
            allowed_hosts: manifest.allowed_hosts.clone(),
            allowed_paths: manifest.allowed_paths.clone(),
            timeout_ms: manifest.timeout_ms,
        })
    }

    fn read_file(&self, path: &Path) -> ResolutionResult<Vec<u8>> {
        let full = match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };
        std::fs::read(&full).map_err(|source| ResolutionError::Io { path: full, source })
    }

    fn fetch(&self, request: &FetchRequest<'_>) -> ResolutionResult<Vec<u8>> {
        let Some(transport) = &self.transport else {
            return Err(ResolutionError::TransportFailure {
                url: request.url.to_string(),
                message: "no transport configured".to_string(),
            });
        };
        transport
            .fetch(request)
            .map_err(|e| ResolutionError::TransportFailure {
                url: request.url.to_string(),
                message: e.to_string(),
            })
    }
}

impl fmt::Debug for ManifestResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestResolver")
            .field("require_hash", &self.require_hash)
            .field("base_dir", &self.base_dir)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::transport::MemoryTransport;

    const MODULE: &[u8] = b"\0asm\x01\0\0\0";

    fn sha256(data: &[u8]) -> String {
        ContentHash::compute(HashAlgorithm::Sha256, data).hex()
    }

    #[test]
    fn test_inline_without_hash_resolves() {
        let module = ManifestResolver::new()
            .resolve(&WasmSource::data(MODULE))
            .unwrap();
        assert_eq!(module.bytes(), MODULE);
        assert!(module.hash().is_none());
    }

    #[test]
    fn test_inline_with_matching_hash() {
        let source = WasmSource::data(MODULE).with_hash(sha256(MODULE));
        let module = ManifestResolver::new().resolve(&source).unwrap();
        assert_eq!(module.hash().unwrap().algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_hash_mismatch() {
        let source = WasmSource::data(MODULE).with_hash(sha256(b"other"));
        let err = ManifestResolver::new().resolve(&source).unwrap_err();
        assert!(matches!(err, ResolutionError::HashMismatch { .. }));
    }

    #[test]
    fn test_require_hash_rejects_before_fetching() {
        let transport = Arc::new(MemoryTransport::new().with_body("https://x.test/m.wasm", MODULE));
        let resolver = ManifestResolver::new()
            .with_require_hash(true)
            .with_transport(transport.clone());
        let err = resolver
            .resolve(&WasmSource::url("https://x.test/m.wasm"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::HashRequired { .. }));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_url_without_transport_fails() {
        let err = ManifestResolver::new()
            .resolve(&WasmSource::url("https://x.test/m.wasm"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::TransportFailure { .. }));
    }

    #[test]
    fn test_url_fetch_and_verify() {
        let transport = Arc::new(MemoryTransport::new().with_body("https://x.test/m.wasm", MODULE));
        let resolver = ManifestResolver::new().with_transport(transport.clone());
        let source =
            WasmSource::url("https://x.test/m.wasm").with_hash(format!("blake3:{}", blake3::hash(MODULE).to_hex()));
        let module = resolver.resolve(&source).unwrap();
        assert_eq!(module.bytes(), MODULE);
        assert_eq!(transport.requests(), ["https://x.test/m.wasm"]);

        let err = resolver
            .resolve(&WasmSource::url("https://x.test/missing.wasm"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::TransportFailure { .. }));
    }

    #[test]
    fn test_invalid_url() {
        let err = ManifestResolver::new()
            .resolve(&WasmSource::url("not a url"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidUrl { .. }));
    }

    #[test]
    fn test_file_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.wasm"), MODULE).unwrap();
        let resolver = ManifestResolver::new().with_base_dir(dir.path());
        let module = resolver.resolve(&WasmSource::file("plugin.wasm")).unwrap();
        assert_eq!(module.bytes(), MODULE);

        let err = resolver.resolve(&WasmSource::file("absent.wasm")).unwrap_err();
        assert!(matches!(err, ResolutionError::Io { .. }));
    }

    #[test]
    fn test_empty_manifest() {
        let err = ManifestResolver::new()
            .resolve_manifest(&Manifest::new(Vec::<WasmSource>::new()))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyManifest));
    }

    #[test]
    fn test_main_module_selection() {
        let manifest = Manifest::new([
            WasmSource::data(b"a".to_vec()).with_name("main"),
            WasmSource::data(b"b".to_vec()).with_name("helper"),
        ])
        .with_config_key("k", "v");
        let resolved = ManifestResolver::new().resolve_manifest(&manifest).unwrap();
        assert_eq!(resolved.main_module().unwrap().bytes(), b"a");
        assert_eq!(resolved.config.get("k").map(String::as_str), Some("v"));

        let unnamed = Manifest::new([WasmSource::data(b"a".to_vec()), WasmSource::data(b"b".to_vec())]);
        let resolved = ManifestResolver::new().resolve_manifest(&unnamed).unwrap();
        assert_eq!(resolved.main_module().unwrap().bytes(), b"b");
    }
}

//! Manifest format.
//!
//! A manifest lists the WASM modules that make up a plugin plus the
//! settings the runtime applies when instantiating it.
//!
//! # Example (`plugin.json`)
//!
//! ```json
//! {
//!   "wasm": [
//!     { "path": "plugin.wasm", "hash": "sha256:2cf24dba..." },
//!     { "url": "https://example.com/helper.wasm", "name": "helper" }
//!   ],
//!   "config": { "greeting": "hi" },
//!   "memory": { "max_pages": 16 },
//!   "allowed_hosts": ["api.example.com"],
//!   "timeout_ms": 5000
//! }
//! ```
//!
//! Inline modules carry their bytes base64-encoded under `data` (alias
//! `bytes`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, ResolutionResult};

/// A plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Module sources; the last one (or the one named `main`) is the entry module.
    pub wasm: Vec<WasmSource>,
    /// Key/value configuration readable by the guest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Memory limits.
    #[serde(default, skip_serializing_if = "MemoryOptions::is_empty")]
    pub memory: MemoryOptions,
    /// Hosts the guest may reach over HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    /// Host paths mapped into the guest, host path to guest path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<BTreeMap<String, String>>,
    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Manifest {
    /// Create a manifest from module sources.
    #[must_use]
    pub fn new(wasm: impl IntoIterator<Item = WasmSource>) -> Self {
        Self {
            wasm: wasm.into_iter().collect(),
            config: BTreeMap::new(),
            memory: MemoryOptions::default(),
            allowed_hosts: None,
            allowed_paths: None,
            timeout_ms: None,
        }
    }

    /// Add a configuration key.
    #[must_use]
    pub fn with_config_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set the memory limit in 64 KiB pages.
    #[must_use]
    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.memory.max_pages = Some(pages);
        self
    }

    /// Allow the guest to reach `host`.
    #[must_use]
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts
            .get_or_insert_with(Vec::new)
            .push(host.into());
        self
    }

    /// Map a host path into the guest.
    #[must_use]
    pub fn with_allowed_path(mut self, host: impl Into<String>, guest: impl Into<String>) -> Self {
        self.allowed_paths
            .get_or_insert_with(BTreeMap::new)
            .insert(host.into(), guest.into());
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parse a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Parse`] on malformed input.
    pub fn from_json(text: &str) -> ResolutionResult<Self> {
        serde_json::from_str(text).map_err(|e| ResolutionError::Parse(e.to_string()))
    }

    /// Parse a TOML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Parse`] on malformed input.
    pub fn from_toml(text: &str) -> ResolutionResult<Self> {
        toml::from_str(text).map_err(|e| ResolutionError::Parse(e.to_string()))
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Parse`] if serialization fails.
    pub fn to_json(&self) -> ResolutionResult<String> {
        serde_json::to_string(self).map_err(|e| ResolutionError::Parse(e.to_string()))
    }
}

/// Memory limits of a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOptions {
    /// Maximum guest memory in 64 KiB pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    /// Maximum total size of plugin vars in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_var_bytes: Option<u64>,
}

impl MemoryOptions {
    fn is_empty(&self) -> bool {
        self.max_pages.is_none() && self.max_var_bytes.is_none()
    }
}

/// One module source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WasmSource {
    /// Module bytes embedded in the manifest.
    Data(WasmData),
    /// Module file on the local filesystem.
    File(WasmFile),
    /// Module fetched from a URL.
    Url(WasmUrl),
}

/// Inline module bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasmData {
    /// Module bytes, base64 in serialized form.
    #[serde(alias = "bytes", with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Declared content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Module name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A local module file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasmFile {
    /// File path, relative paths resolve against the resolver's base directory.
    pub path: PathBuf,
    /// Declared content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Module name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A remote module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasmUrl {
    /// Module URL.
    pub url: String,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// HTTP method, `GET` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Declared content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Module name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WasmSource {
    /// Inline module bytes.
    #[must_use]
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(WasmData {
            data: bytes.into(),
            hash: None,
            name: None,
        })
    }

    /// Local module file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(WasmFile {
            path: path.into(),
            hash: None,
            name: None,
        })
    }

    /// Remote module.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(WasmUrl {
            url: url.into(),
            headers: BTreeMap::new(),
            method: None,
            hash: None,
            name: None,
        })
    }

    /// Declare a content hash.
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        let hash = Some(hash.into());
        match &mut self {
            Self::Data(d) => d.hash = hash,
            Self::File(f) => f.hash = hash,
            Self::Url(u) => u.hash = hash,
        }
        self
    }

    /// Name the module.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match &mut self {
            Self::Data(d) => d.name = name,
            Self::File(f) => f.name = name,
            Self::Url(u) => u.name = name,
        }
        self
    }

    /// Declared content hash.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Data(d) => d.hash.as_deref(),
            Self::File(f) => f.hash.as_deref(),
            Self::Url(u) => u.hash.as_deref(),
        }
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Data(d) => d.name.as_deref(),
            Self::File(f) => f.name.as_deref(),
            Self::Url(u) => u.name.as_deref(),
        }
    }

    /// Short description used in logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Data(d) => match &d.name {
                Some(name) => format!("inline module {name}"),
                None => format!("inline module ({} bytes)", d.data.len()),
            },
            Self::File(f) => f.path.display().to_string(),
            Self::Url(u) => u.url.clone(),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 module data: {e}")))
    }
}

//! Configuration types for the hostcall runtime.
//!
//! These types mirror the runtime's domain types without depending on
//! them; conversion happens in `hostcall-runtime`. Every struct implements
//! [`Default`] so that a bare `[section]` header produces a working
//! configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instance behaviour and limits.
    pub runtime: RuntimeSection,
    /// Manifest resolution policy.
    pub manifest: ManifestSection,
    /// Instance pool sizing.
    pub pool: PoolSection,
    /// Logging level, format and directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// RuntimeSection
// ---------------------------------------------------------------------------

/// What a failed host call does to its instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicySetting {
    /// Trap only the current call.
    #[default]
    TerminateCall,
    /// Trap the call and poison the instance.
    PoisonInstance,
}

/// Instance behaviour and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Host failure policy.
    pub failure_policy: FailurePolicySetting,
    /// Maximum guest memory per instance in bytes.
    pub max_memory_bytes: u64,
    /// Enable WASI preview 1 for guests.
    pub wasi: bool,
    /// Per-call timeout in milliseconds; absent means no timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicySetting::default(),
            max_memory_bytes: 67_108_864,
            wasi: false,
            timeout_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ManifestSection
// ---------------------------------------------------------------------------

/// Manifest resolution policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSection {
    /// Reject module sources that declare no content hash.
    pub require_hash: bool,
}

// ---------------------------------------------------------------------------
// PoolSection
// ---------------------------------------------------------------------------

/// Instance pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Maximum live instances per pool key.
    pub max_instances: usize,
    /// How long `get` waits for a free instance.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_instances: 4,
            acquire_timeout_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["hostcall_core=debug"]`).
    pub directives: Vec<String>,
    /// Log destination: `"stdout"`, `"stderr"` or a file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            file: None,
        }
    }
}

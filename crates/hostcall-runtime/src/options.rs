//! Per-instance runtime options.

use std::time::Duration;

use hostcall_core::{DEFAULT_MAX_MEMORY_BYTES, FailurePolicy, PAGE_SIZE};
use hostcall_manifest::MemoryOptions;

/// Options shared by every instance built from one loader or pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// What a failed host call does to its instance.
    pub failure_policy: FailurePolicy,
    /// Hard cap on guest memory in bytes.
    pub max_memory_bytes: u64,
    /// Cap on the total size of instance vars; `None` is unlimited.
    pub max_var_bytes: Option<u64>,
    /// Enable WASI preview 1 (engine adapters only).
    pub wasi: bool,
    /// Per-call timeout passed to the engine; `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_var_bytes: None,
            wasi: false,
            timeout: None,
        }
    }
}

impl RuntimeOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the guest memory cap in bytes.
    #[must_use]
    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the total var size cap.
    #[must_use]
    pub fn with_max_var_bytes(mut self, bytes: u64) -> Self {
        self.max_var_bytes = Some(bytes);
        self
    }

    /// Enable or disable WASI.
    #[must_use]
    pub fn with_wasi(mut self, wasi: bool) -> Self {
        self.wasi = wasi;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Narrow these options by a manifest's own limits.
    ///
    /// The manifest may only tighten limits: the smaller memory cap and the
    /// smaller timeout win.
    #[must_use]
    pub fn restricted_by(&self, memory: &MemoryOptions, timeout_ms: Option<u64>) -> Self {
        let mut options = self.clone();
        if let Some(pages) = memory.max_pages {
            let bytes = u64::from(pages).saturating_mul(PAGE_SIZE);
            options.max_memory_bytes = options.max_memory_bytes.min(bytes);
        }
        if let Some(limit) = memory.max_var_bytes {
            options.max_var_bytes = Some(options.max_var_bytes.map_or(limit, |own| own.min(limit)));
        }
        if let Some(ms) = timeout_ms {
            let manifest_timeout = Duration::from_millis(ms);
            options.timeout = Some(
                options
                    .timeout
                    .map_or(manifest_timeout, |own| own.min(manifest_timeout)),
            );
        }
        options
    }

    /// Memory cap expressed in whole 64 KiB pages.
    #[must_use]
    pub fn max_pages(&self) -> u32 {
        let pages = self.max_memory_bytes.checked_div(PAGE_SIZE).unwrap_or_default();
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

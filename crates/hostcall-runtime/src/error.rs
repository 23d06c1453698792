//! Runtime error types.

use std::fmt;

use hostcall_core::{InvocationError, InvocationErrorKind, MemoryError};
use thiserror::Error;

/// Errors raised while building or managing plugin instances.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Manifest resolution failed.
    #[error("Manifest resolution failed: {0}")]
    Resolution(#[from] hostcall_manifest::ResolutionError),

    /// The guest loader could not instantiate the modules.
    #[error("Failed to instantiate guest: {0}")]
    Instantiation(String),

    /// Runtime options are inconsistent.
    #[error("Invalid runtime options: {0}")]
    InvalidOptions(String),

    /// Logging could not be configured.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] hostcall_telemetry::TelemetryError),

    /// The WASM engine reported an error.
    #[error("WASM error: {0}")]
    WasmError(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

// ---------------------------------------------------------------------------
// Guest traps
// ---------------------------------------------------------------------------

/// Why a guest call stopped abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestTrap {
    /// A kernel memory operation failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A host function call failed.
    #[error(transparent)]
    HostCall(#[from] InvocationError),

    /// The guest aborted on its own.
    #[error("guest aborted: {0}")]
    Abort(String),
}

impl GuestTrap {
    /// Abort with `message`.
    #[must_use]
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort(message.into())
    }
}

// ---------------------------------------------------------------------------
// Call errors
// ---------------------------------------------------------------------------

/// Kind tag of a failed plugin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// A host function returned an error or panicked.
    HostFunctionFailed,
    /// A host function argument failed to decode.
    ArgumentDecodeFailed,
    /// A host function result failed to encode.
    ResultEncodeFailed,
    /// A guest memory access was out of bounds.
    MemoryOutOfBounds,
    /// The guest called an unregistered host function.
    NotFound,
    /// The guest passed the wrong number of arguments.
    ArityMismatch,
    /// The guest itself failed: missing export, error set, non-zero exit.
    Guest,
    /// The instance was poisoned by an earlier host failure.
    Poisoned,
}

impl CallErrorKind {
    /// Stable string name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostFunctionFailed => "host_function_failed",
            Self::ArgumentDecodeFailed => "argument_decode_failed",
            Self::ResultEncodeFailed => "result_encode_failed",
            Self::MemoryOutOfBounds => "memory_out_of_bounds",
            Self::NotFound => "not_found",
            Self::ArityMismatch => "arity_mismatch",
            Self::Guest => "guest",
            Self::Poisoned => "poisoned",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<InvocationErrorKind> for CallErrorKind {
    fn from(kind: InvocationErrorKind) -> Self {
        match kind {
            InvocationErrorKind::NotFound => Self::NotFound,
            InvocationErrorKind::ArityMismatch => Self::ArityMismatch,
            InvocationErrorKind::ArgumentDecodeFailed => Self::ArgumentDecodeFailed,
            InvocationErrorKind::HostFunctionFailed => Self::HostFunctionFailed,
            InvocationErrorKind::ResultEncodeFailed => Self::ResultEncodeFailed,
            InvocationErrorKind::MemoryOutOfBounds => Self::MemoryOutOfBounds,
            InvocationErrorKind::Poisoned => Self::Poisoned,
        }
    }
}

/// A failed call as seen by the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    /// What failed.
    pub kind: CallErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl CallError {
    /// Create a call error.
    #[must_use]
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A guest-side failure.
    #[must_use]
    pub fn guest(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Guest, message)
    }
}

impl From<&InvocationError> for CallError {
    fn from(e: &InvocationError) -> Self {
        Self::new(e.kind().into(), e.to_string())
    }
}

impl From<GuestTrap> for CallError {
    fn from(trap: GuestTrap) -> Self {
        match trap {
            GuestTrap::HostCall(e) => Self::from(&e),
            GuestTrap::Memory(e) => Self::new(CallErrorKind::MemoryOutOfBounds, e.to_string()),
            GuestTrap::Abort(message) => Self::guest(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool errors
// ---------------------------------------------------------------------------

/// Errors from [`InstancePool`](crate::InstancePool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// No factory is registered under the key.
    #[error("no plugin registered under key '{key}'")]
    UnknownKey {
        /// Requested key.
        key: String,
    },

    /// No instance became free before the timeout.
    #[error("timed out after {timeout_ms}ms waiting for an instance of '{key}'")]
    Timeout {
        /// Requested key.
        key: String,
        /// How long the caller waited.
        timeout_ms: u128,
    },

    /// The pool was shut down while waiting.
    #[error("instance pool closed")]
    Closed,

    /// Building a new instance failed.
    #[error("failed to create instance for '{key}': {source}")]
    Build {
        /// Requested key.
        key: String,
        /// Underlying failure.
        #[source]
        source: RuntimeError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_maps_to_call_error_kind() {
        let trap = GuestTrap::HostCall(InvocationError::NotFound {
            name: "missing".into(),
        });
        let err = CallError::from(trap);
        assert_eq!(err.kind, CallErrorKind::NotFound);
        assert!(err.message.contains("missing"));

        let trap = GuestTrap::Memory(MemoryError::UnknownBlock { offset: 12 });
        assert_eq!(CallError::from(trap).kind, CallErrorKind::MemoryOutOfBounds);

        let err = CallError::from(GuestTrap::abort("bad input"));
        assert_eq!(err.kind, CallErrorKind::Guest);
        assert_eq!(err.to_string(), "guest: bad input");
    }

    #[test]
    fn test_kind_names_match_invocation_kinds() {
        for kind in [
            InvocationErrorKind::NotFound,
            InvocationErrorKind::ArgumentDecodeFailed,
            InvocationErrorKind::HostFunctionFailed,
            InvocationErrorKind::Poisoned,
        ] {
            assert_eq!(CallErrorKind::from(kind).as_str(), kind.as_str());
        }
    }
}

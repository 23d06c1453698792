//! Error types for the codec, signature inference, registry, guest memory
//! and invocation bridge.

use std::fmt;

use crate::codec::WireType;

/// Failure to turn raw guest bytes into a host [`Value`](crate::Value).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not valid UTF-8.
    #[error("invalid UTF-8 after {valid_up_to} valid bytes")]
    InvalidUtf8 {
        /// Length of the longest valid UTF-8 prefix.
        valid_up_to: usize,
    },

    /// The text is not well-formed JSON.
    #[error("malformed JSON at line {line}, column {column}: {message}")]
    MalformedJson {
        /// 1-based line of the parse failure (0 when unknown).
        line: usize,
        /// 1-based column of the parse failure (0 when unknown).
        column: usize,
        /// Parser message.
        message: String,
    },

    /// A fixed-width numeric payload had the wrong size.
    #[error("expected {expected} bytes for {wire}, got {actual}")]
    InvalidLength {
        /// Wire type being decoded.
        wire: WireType,
        /// Required width in bytes.
        expected: usize,
        /// Width actually supplied.
        actual: usize,
    },

    /// The decoded value could not be converted to the handler's parameter type.
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// A user-supplied codec rejected the payload.
    #[error("codec rejected input: {0}")]
    Codec(String),
}

/// Failure to turn a host [`Value`](crate::Value) into raw guest bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The value does not fit the target wire type.
    #[error("value {value} is out of range for {wire}")]
    OutOfRange {
        /// Target wire type.
        wire: WireType,
        /// Rendering of the offending value.
        value: String,
    },

    /// There is no conversion path from the value to the wire type.
    #[error("cannot encode {found} as {wire}")]
    TypeMismatch {
        /// Target wire type.
        wire: WireType,
        /// Variant name of the value.
        found: &'static str,
    },

    /// Raw bytes destined for a UTF-8 string slot were not valid UTF-8.
    #[error("invalid UTF-8 after {valid_up_to} valid bytes")]
    InvalidUtf8 {
        /// Length of the longest valid UTF-8 prefix.
        valid_up_to: usize,
    },

    /// JSON serialization failed.
    #[error("JSON serialization failed: {0}")]
    Json(String),

    /// The handler declared a return value but produced none.
    #[error("host function returned no value for a declared return slot")]
    MissingValue,

    /// The handler's return value could not be converted to a [`Value`](crate::Value).
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// A user-supplied codec rejected the value.
    #[error("codec rejected value: {0}")]
    Codec(String),
}

/// Failure converting between a [`Value`](crate::Value) and a concrete host type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// The value variant does not map onto the requested type.
    #[error("expected {expected}, found {found}")]
    Mismatch {
        /// Requested host type.
        expected: &'static str,
        /// Variant name of the value.
        found: &'static str,
    },

    /// A numeric value does not fit the requested type.
    #[error("value {value} out of range for {target}")]
    OutOfRange {
        /// Requested host type.
        target: &'static str,
        /// Rendering of the offending value.
        value: String,
    },

    /// Text bytes were not valid UTF-8.
    #[error("invalid UTF-8 in text value")]
    InvalidUtf8,

    /// `serde_json` conversion to or from the host type failed.
    #[error("JSON conversion failed: {0}")]
    Json(String),

    /// Fewer arguments were supplied than the handler takes.
    #[error("argument missing")]
    Missing,
}

/// Which slot of a host function signature an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Positional parameter.
    Param(usize),
    /// The return value.
    Return,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(index) => write!(f, "parameter {index}"),
            Self::Return => f.write_str("return value"),
        }
    }
}

/// Errors raised while deriving a host function signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The function name is empty or contains forbidden characters.
    #[error("invalid host function name {0:?}")]
    InvalidName(String),

    /// No handler was attached before `build()`.
    #[error("host function {0} has no handler")]
    MissingHandler(String),

    /// The slot's type has no default wire type and no explicit tag.
    #[error("{slot} of {function}: type {type_name} has no derivable wire type; add an explicit tag")]
    NoWireType {
        /// Function being built.
        function: String,
        /// Offending slot.
        slot: Slot,
        /// Host type name.
        type_name: &'static str,
    },

    /// The explicit tag is not supported by the slot's host type.
    #[error("{slot} of {function}: wire type {wire} is incompatible with type {type_name}")]
    IncompatibleTag {
        /// Function being built.
        function: String,
        /// Offending slot.
        slot: Slot,
        /// Host type name.
        type_name: &'static str,
        /// Requested wire type.
        wire: WireType,
    },

    /// Explicitly declared parameters disagree with the typed handler's arity.
    #[error("{function} declares {declared} parameters but its handler takes {handler}")]
    ParamCountMismatch {
        /// Function being built.
        function: String,
        /// Parameters declared with `param`.
        declared: usize,
        /// Parameters taken by the typed handler.
        handler: usize,
    },

    /// A tag or codec was attached to a slot that does not exist.
    #[error("{slot} of {function} does not exist (function takes {arity} parameters)")]
    UnknownSlot {
        /// Function being built.
        function: String,
        /// Offending slot.
        slot: Slot,
        /// Number of declared parameters.
        arity: usize,
    },
}

/// Errors from the host function registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A function with this name is already registered in the scope.
    #[error("host function already registered: {0}")]
    DuplicateName(String),

    /// No function with this name is registered in the scope.
    #[error("host function not found: {0}")]
    NotFound(String),

    /// The builder passed to `define` failed signature inference.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Errors from guest linear memory access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The region extends past the end of guest memory.
    #[error("region [{offset}, +{len}) exceeds memory size {size}")]
    OutOfBounds {
        /// Region start.
        offset: u64,
        /// Region length.
        len: u64,
        /// Current memory size in bytes.
        size: u64,
    },

    /// The offset does not start an allocated block.
    #[error("no allocated block at offset {offset}")]
    UnknownBlock {
        /// Requested offset.
        offset: u64,
    },

    /// The allocation would grow memory past its configured maximum.
    #[error("allocation of {requested} bytes exceeds memory limit of {limit} bytes")]
    LimitExceeded {
        /// Requested size in bytes.
        requested: u64,
        /// Configured maximum memory size.
        limit: u64,
    },

    /// The backing runtime reported a memory failure.
    #[error("memory backend error: {0}")]
    Backend(String),
}

/// Kind tag of an [`InvocationError`], exposed on the embedder error surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationErrorKind {
    /// The function name is not registered in the instance scope.
    NotFound,
    /// The guest passed the wrong number of arguments.
    ArityMismatch,
    /// An argument failed to decode.
    ArgumentDecodeFailed,
    /// The host function returned an error or panicked.
    HostFunctionFailed,
    /// The result failed to encode.
    ResultEncodeFailed,
    /// A guest memory access was out of bounds.
    MemoryOutOfBounds,
    /// The instance was poisoned by an earlier failure.
    Poisoned,
}

impl InvocationErrorKind {
    /// Stable string name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ArityMismatch => "arity_mismatch",
            Self::ArgumentDecodeFailed => "argument_decode_failed",
            Self::HostFunctionFailed => "host_function_failed",
            Self::ResultEncodeFailed => "result_encode_failed",
            Self::MemoryOutOfBounds => "memory_out_of_bounds",
            Self::Poisoned => "poisoned",
        }
    }
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed guest-to-host call.
///
/// Host-internal error types never cross the bridge; every failure is
/// flattened into one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The function is not registered in the instance scope.
    #[error("host function not found: {name}")]
    NotFound {
        /// Requested name.
        name: String,
    },

    /// The guest passed the wrong number of argument handles.
    #[error("host function {function} takes {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Called function.
        function: String,
        /// Declared parameter count.
        expected: usize,
        /// Handles actually passed.
        actual: usize,
    },

    /// An argument failed to decode.
    #[error("failed to decode argument {index} of {function}: {source}")]
    ArgumentDecodeFailed {
        /// Called function.
        function: String,
        /// Zero-based argument index.
        index: usize,
        /// Underlying decode failure.
        source: DecodeError,
    },

    /// The host function returned an error or panicked.
    #[error("host function {function} failed: {message}")]
    HostFunctionFailed {
        /// Called function.
        function: String,
        /// Error message from the host implementation.
        message: String,
    },

    /// The result could not be encoded for the guest.
    #[error("failed to encode result of {function}: {source}")]
    ResultEncodeFailed {
        /// Called function.
        function: String,
        /// Underlying encode failure.
        source: EncodeError,
    },

    /// A guest memory access was out of bounds or allocation failed.
    #[error("guest memory access failed in {function}: {source}")]
    MemoryOutOfBounds {
        /// Called function.
        function: String,
        /// Underlying memory failure.
        source: MemoryError,
    },

    /// An earlier failure poisoned the instance.
    #[error("instance poisoned by earlier failure: {message}")]
    Poisoned {
        /// Message of the failure that poisoned the instance.
        message: String,
    },
}

impl InvocationError {
    /// The kind tag of this error.
    #[must_use]
    pub fn kind(&self) -> InvocationErrorKind {
        match self {
            Self::NotFound { .. } => InvocationErrorKind::NotFound,
            Self::ArityMismatch { .. } => InvocationErrorKind::ArityMismatch,
            Self::ArgumentDecodeFailed { .. } => InvocationErrorKind::ArgumentDecodeFailed,
            Self::HostFunctionFailed { .. } => InvocationErrorKind::HostFunctionFailed,
            Self::ResultEncodeFailed { .. } => InvocationErrorKind::ResultEncodeFailed,
            Self::MemoryOutOfBounds { .. } => InvocationErrorKind::MemoryOutOfBounds,
            Self::Poisoned { .. } => InvocationErrorKind::Poisoned,
        }
    }
}

/// Error returned by host function implementations.
///
/// Any `std::error::Error` converts into it with `?`, so handlers can
/// propagate their own error types; only the message reaches the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    message: String,
}

impl HostError {
    /// Create an error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E> From<E> for HostError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self::msg(e)
    }
}

/// Result type for host function handlers.
pub type HostResult<T> = Result<T, HostError>;

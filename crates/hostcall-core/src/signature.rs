//! Host function signature inference.
//!
//! [`HostFunction`] is a builder that derives the wire format of every
//! parameter and return slot from [`HostType`] metadata, optionally
//! overridden per slot with an explicit [`WireType`] tag or a custom
//! [`Codec`]. [`HostFunction::build`] validates the result and produces an
//! immutable [`HostFunctionDescriptor`].
//!
//! ```
//! use hostcall_core::HostFunction;
//!
//! let descriptor = HostFunction::new("hello_world")
//!     .typed(|name: String| format!("Hello, {name}!"))
//!     .build()
//!     .unwrap();
//! assert_eq!(descriptor.arity(), 1);
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::codec::{self, Codec, Value, WireType};
use crate::error::{
    ConversionError, DecodeError, EncodeError, HostError, HostResult, SignatureError, Slot,
};
use crate::types::{HostType, Json, TypeInfo};

/// Import namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "extism:host/user";

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Per-call information handed to context-aware handlers.
#[derive(Clone, Default)]
pub struct CallContext {
    function: String,
    plugin: Option<String>,
    host_context: Option<Arc<dyn Any + Send + Sync>>,
}

impl CallContext {
    /// Create a context for calls made by `plugin`.
    #[must_use]
    pub fn new(plugin: Option<String>) -> Self {
        Self {
            function: String::new(),
            plugin,
            host_context: None,
        }
    }

    /// Attach an embedder-supplied value readable by handlers.
    #[must_use]
    pub fn with_host_context(mut self, value: Arc<dyn Any + Send + Sync>) -> Self {
        self.host_context = Some(value);
        self
    }

    /// Replace or clear the host context.
    pub fn set_host_context(&mut self, value: Option<Arc<dyn Any + Send + Sync>>) {
        self.host_context = value;
    }

    /// Name of the host function being called.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Identifier of the calling plugin instance, if known.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// The host context, if one of type `T` was attached.
    #[must_use]
    pub fn host_context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.host_context.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) fn set_function(&mut self, name: &str) {
        name.clone_into(&mut self.function);
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("function", &self.function)
            .field("plugin", &self.plugin)
            .field("has_host_context", &self.host_context.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Failure raised inside a type-erased handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// An argument value could not be converted to the handler's type.
    Argument {
        /// Zero-based argument index.
        index: usize,
        /// Conversion failure.
        error: ConversionError,
    },
    /// The host implementation returned an error or panicked.
    Host(String),
    /// The returned value could not be converted for encoding.
    Result(ConversionError),
}

/// Type-erased handler stored in a descriptor.
pub type DynHandler =
    dyn Fn(&mut CallContext, Vec<Value>) -> Result<Option<Value>, CallFailure> + Send + Sync;

/// A type that can be returned from a typed handler.
pub trait HostReturn: Send + 'static {
    /// Wire metadata of the return slot, `None` for unit.
    fn return_info() -> Option<TypeInfo>;

    /// Convert into the value written back to the guest.
    ///
    /// # Errors
    ///
    /// Returns [`CallFailure::Host`] for error results and
    /// [`CallFailure::Result`] when conversion fails.
    fn into_return(self) -> Result<Option<Value>, CallFailure>;
}

impl HostReturn for () {
    fn return_info() -> Option<TypeInfo> {
        None
    }

    fn into_return(self) -> Result<Option<Value>, CallFailure> {
        Ok(None)
    }
}

macro_rules! impl_host_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HostReturn for $ty {
                fn return_info() -> Option<TypeInfo> {
                    Some(<$ty as HostType>::type_info())
                }

                fn into_return(self) -> Result<Option<Value>, CallFailure> {
                    self.into_value().map(Some).map_err(CallFailure::Result)
                }
            }
        )*
    };
}

impl_host_return!(
    String,
    Vec<u8>,
    serde_json::Value,
    Value,
    i32,
    i64,
    u32,
    u64,
    f32,
    f64
);

impl<T> HostReturn for Json<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    fn return_info() -> Option<TypeInfo> {
        Some(<Self as HostType>::type_info())
    }

    fn into_return(self) -> Result<Option<Value>, CallFailure> {
        self.into_value().map(Some).map_err(CallFailure::Result)
    }
}

impl<T, E> HostReturn for Result<T, E>
where
    T: HostReturn,
    E: fmt::Display + Send + 'static,
{
    fn return_info() -> Option<TypeInfo> {
        T::return_info()
    }

    fn into_return(self) -> Result<Option<Value>, CallFailure> {
        match self {
            Ok(v) => v.into_return(),
            Err(e) => Err(CallFailure::Host(e.to_string())),
        }
    }
}

/// A statically typed handler taking host types as arguments.
///
/// Implemented for closures of up to four [`HostType`] arguments returning a
/// [`HostReturn`].
pub trait TypedHandler<Args>: Send + Sync + 'static {
    /// Metadata of each parameter, in order.
    fn param_infos() -> Vec<TypeInfo>;
    /// Metadata of the return slot.
    fn return_info() -> Option<TypeInfo>;
    /// Erase the argument types.
    fn into_dyn(self) -> Arc<DynHandler>;
}

/// A statically typed handler that also receives the [`CallContext`].
pub trait ContextHandler<Args>: Send + Sync + 'static {
    /// Metadata of each parameter, in order.
    fn param_infos() -> Vec<TypeInfo>;
    /// Metadata of the return slot.
    fn return_info() -> Option<TypeInfo>;
    /// Erase the argument types.
    fn into_dyn(self) -> Arc<DynHandler>;
}

fn take_arg<T: HostType>(
    args: &mut std::vec::IntoIter<Value>,
    index: usize,
) -> Result<T, CallFailure> {
    let value = args.next().ok_or(CallFailure::Argument {
        index,
        error: ConversionError::Missing,
    })?;
    T::from_value(value).map_err(|error| CallFailure::Argument { index, error })
}

macro_rules! impl_handlers {
    ($($ty:ident $var:ident $idx:literal),*) => {
        impl<F, R, $($ty,)*> TypedHandler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: HostReturn,
            $($ty: HostType,)*
        {
            fn param_infos() -> Vec<TypeInfo> {
                vec![$(<$ty as HostType>::type_info()),*]
            }

            fn return_info() -> Option<TypeInfo> {
                R::return_info()
            }

            fn into_dyn(self) -> Arc<DynHandler> {
                let handler = self;
                Arc::new(move |_ctx: &mut CallContext, args: Vec<Value>| {
                    #[allow(unused_mut, unused_variables)]
                    let mut args = args.into_iter();
                    $(let $var = take_arg::<$ty>(&mut args, $idx)?;)*
                    handler($($var),*).into_return()
                })
            }
        }

        impl<F, R, $($ty,)*> ContextHandler<($($ty,)*)> for F
        where
            F: Fn(&mut CallContext, $($ty),*) -> R + Send + Sync + 'static,
            R: HostReturn,
            $($ty: HostType,)*
        {
            fn param_infos() -> Vec<TypeInfo> {
                vec![$(<$ty as HostType>::type_info()),*]
            }

            fn return_info() -> Option<TypeInfo> {
                R::return_info()
            }

            fn into_dyn(self) -> Arc<DynHandler> {
                let handler = self;
                Arc::new(move |ctx: &mut CallContext, args: Vec<Value>| {
                    #[allow(unused_mut, unused_variables)]
                    let mut args = args.into_iter();
                    $(let $var = take_arg::<$ty>(&mut args, $idx)?;)*
                    handler(ctx, $($var),*).into_return()
                })
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A1 a1 0);
impl_handlers!(A1 a1 0, A2 a2 1);
impl_handlers!(A1 a1 0, A2 a2 1, A3 a3 2);
impl_handlers!(A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3);

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Resolved wire format of one slot.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    wire: WireType,
    type_name: &'static str,
    codec: Option<Codec>,
}

impl ParamSpec {
    /// Wire type of the slot. Always `RawBytes` when a codec is attached.
    #[must_use]
    pub fn wire(&self) -> WireType {
        self.wire
    }

    /// Host type name of the slot.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether a custom codec replaces the built-in one.
    #[must_use]
    pub fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    /// Decode raw guest bytes for this slot.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`DecodeError`].
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        match &self.codec {
            Some(codec) => codec.decode(raw),
            None => codec::decode(self.wire, raw),
        }
    }

    /// Encode a host value for this slot.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`EncodeError`].
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        match &self.codec {
            Some(codec) => codec.encode(value),
            None => codec::encode(value, self.wire),
        }
    }
}

/// A fully resolved host function, ready for registration.
#[derive(Clone)]
pub struct HostFunctionDescriptor {
    name: String,
    namespace: String,
    params: Vec<ParamSpec>,
    returns: Option<ParamSpec>,
    handler: Arc<DynHandler>,
}

impl HostFunctionDescriptor {
    /// Function name, unique within a registry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Import namespace the guest links against.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Parameter specs in call order.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Return spec, `None` for unit functions.
    #[must_use]
    pub fn returns(&self) -> Option<&ParamSpec> {
        self.returns.as_ref()
    }

    /// Number of parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Run the handler. Panics inside the handler are caught and reported
    /// as [`CallFailure::Host`].
    ///
    /// # Errors
    ///
    /// Returns the handler's [`CallFailure`].
    pub fn call(
        &self,
        ctx: &mut CallContext,
        args: Vec<Value>,
    ) -> Result<Option<Value>, CallFailure> {
        match catch_unwind(AssertUnwindSafe(|| (self.handler)(ctx, args))) {
            Ok(result) => result,
            Err(payload) => Err(CallFailure::Host(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("host function panicked: {s}")
    } else {
        "host function panicked".to_string()
    }
}

impl fmt::Debug for HostFunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunctionDescriptor")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct Inferred {
    params: Vec<TypeInfo>,
    returns: Option<TypeInfo>,
}

/// Builder for a [`HostFunctionDescriptor`].
pub struct HostFunction {
    name: String,
    namespace: String,
    typed: Option<Inferred>,
    declared_params: Vec<TypeInfo>,
    declared_return: Option<TypeInfo>,
    handler: Option<Arc<DynHandler>>,
    param_tags: BTreeMap<usize, WireType>,
    return_tag: Option<WireType>,
    param_codecs: BTreeMap<usize, Codec>,
    return_codec: Option<Codec>,
}

impl HostFunction {
    /// Start a builder for a function named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            typed: None,
            declared_params: Vec::new(),
            declared_return: None,
            handler: None,
            param_tags: BTreeMap::new(),
            return_tag: None,
            param_codecs: BTreeMap::new(),
            return_codec: None,
        }
    }

    /// Override the import namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Use a statically typed handler; its argument and return types declare
    /// the slots.
    #[must_use]
    pub fn typed<Args, H>(mut self, handler: H) -> Self
    where
        H: TypedHandler<Args>,
    {
        self.typed = Some(Inferred {
            params: H::param_infos(),
            returns: H::return_info(),
        });
        self.handler = Some(handler.into_dyn());
        self
    }

    /// Use a statically typed handler that receives the [`CallContext`] first.
    #[must_use]
    pub fn typed_with_context<Args, H>(mut self, handler: H) -> Self
    where
        H: ContextHandler<Args>,
    {
        self.typed = Some(Inferred {
            params: H::param_infos(),
            returns: H::return_info(),
        });
        self.handler = Some(handler.into_dyn());
        self
    }

    /// Declare the next parameter slot as type `T`.
    #[must_use]
    pub fn param<T: HostType>(mut self) -> Self {
        self.declared_params.push(T::type_info());
        self
    }

    /// Declare the return slot as type `T`.
    #[must_use]
    pub fn returns<T: HostType>(mut self) -> Self {
        self.declared_return = Some(T::type_info());
        self
    }

    /// Use a dynamic handler over decoded [`Value`]s. Slots come from
    /// [`param`](Self::param) and [`returns`](Self::returns).
    #[must_use]
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&mut CallContext, Vec<Value>) -> HostResult<Option<Value>> + Send + Sync + 'static,
    {
        self.typed = None;
        self.handler = Some(Arc::new(move |ctx: &mut CallContext, args: Vec<Value>| {
            handler(ctx, args).map_err(|e: HostError| CallFailure::Host(e.message().to_string()))
        }));
        self
    }

    /// Tag parameter `index` with an explicit wire type.
    #[must_use]
    pub fn tag_param(mut self, index: usize, wire: WireType) -> Self {
        self.param_tags.insert(index, wire);
        self
    }

    /// Tag the return slot with an explicit wire type.
    #[must_use]
    pub fn tag_return(mut self, wire: WireType) -> Self {
        self.return_tag = Some(wire);
        self
    }

    /// Attach a custom codec to parameter `index`.
    #[must_use]
    pub fn param_codec(mut self, index: usize, codec: Codec) -> Self {
        self.param_codecs.insert(index, codec);
        self
    }

    /// Attach a custom codec to the return slot.
    #[must_use]
    pub fn return_codec(mut self, codec: Codec) -> Self {
        self.return_codec = Some(codec);
        self
    }

    /// Validate the builder and produce a descriptor.
    ///
    /// # Errors
    ///
    /// Returns a [`SignatureError`] when the name is invalid, no handler was
    /// set, a slot has no derivable wire type, a tag is incompatible with
    /// its type, or a tag or codec names a slot that does not exist.
    pub fn build(self) -> Result<HostFunctionDescriptor, SignatureError> {
        if !is_valid_name(&self.name) {
            return Err(SignatureError::InvalidName(self.name));
        }
        let Some(handler) = self.handler else {
            return Err(SignatureError::MissingHandler(self.name));
        };

        let (param_infos, return_info) = match self.typed {
            Some(inferred) if self.declared_params.is_empty() => (
                inferred.params,
                self.declared_return.or(inferred.returns),
            ),
            Some(inferred) => {
                if inferred.params.len() != self.declared_params.len() {
                    return Err(SignatureError::ParamCountMismatch {
                        function: self.name,
                        declared: self.declared_params.len(),
                        handler: inferred.params.len(),
                    });
                }
                (
                    self.declared_params,
                    self.declared_return.or(inferred.returns),
                )
            },
            None => (self.declared_params, self.declared_return),
        };
        let arity = param_infos.len();

        let unknown = |slot: Slot| SignatureError::UnknownSlot {
            function: self.name.clone(),
            slot,
            arity,
        };
        if let Some(&index) = self
            .param_tags
            .keys()
            .chain(self.param_codecs.keys())
            .find(|&&i| i >= arity)
        {
            return Err(unknown(Slot::Param(index)));
        }
        if return_info.is_none() && (self.return_tag.is_some() || self.return_codec.is_some()) {
            return Err(unknown(Slot::Return));
        }

        let mut param_codecs = self.param_codecs;
        let params = param_infos
            .iter()
            .enumerate()
            .map(|(index, info)| {
                resolve_slot(
                    &self.name,
                    Slot::Param(index),
                    info,
                    self.param_tags.get(&index).copied(),
                    param_codecs.remove(&index),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let returns = return_info
            .map(|info| {
                resolve_slot(
                    &self.name,
                    Slot::Return,
                    &info,
                    self.return_tag,
                    self.return_codec,
                )
            })
            .transpose()?;

        Ok(HostFunctionDescriptor {
            name: self.name,
            namespace: self.namespace,
            params,
            returns,
            handler,
        })
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

fn resolve_slot(
    function: &str,
    slot: Slot,
    info: &TypeInfo,
    tag: Option<WireType>,
    codec: Option<Codec>,
) -> Result<ParamSpec, SignatureError> {
    if codec.is_some() {
        return Ok(ParamSpec {
            wire: WireType::RawBytes,
            type_name: info.name,
            codec,
        });
    }
    let wire = match tag {
        Some(wire) if info.accepts(wire) => wire,
        Some(wire) => {
            return Err(SignatureError::IncompatibleTag {
                function: function.to_string(),
                slot,
                type_name: info.name,
                wire,
            });
        },
        None => info.default_wire.ok_or_else(|| SignatureError::NoWireType {
            function: function.to_string(),
            slot,
            type_name: info.name,
        })?,
    };
    Ok(ParamSpec {
        wire,
        type_name: info.name,
        codec: None,
    })
}

/// Names must be non-empty identifiers usable as WASM import names.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

//! Host types and the wire metadata they carry.
//!
//! A [`HostType`] knows its default [`WireType`], the set of wire types it
//! can be tagged with, and how to convert to and from a dynamic [`Value`].
//! Signature inference reads only this metadata.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{F32_EXACT_INT, F64_EXACT_INT, Value, WireType};
use crate::error::ConversionError;

/// Static wire metadata of a host type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Human-readable type name used in errors and descriptors.
    pub name: &'static str,
    /// Wire type used when the slot carries no explicit tag.
    pub default_wire: Option<WireType>,
    /// Wire types an explicit tag may select.
    pub accepts: &'static [WireType],
}

impl TypeInfo {
    /// Whether `wire` is a valid tag for this type.
    #[must_use]
    pub fn accepts(&self, wire: WireType) -> bool {
        self.accepts.contains(&wire)
    }
}

/// A type that can appear as a host function parameter or return value.
pub trait HostType: Sized + Send + 'static {
    /// Wire metadata for this type.
    fn type_info() -> TypeInfo;

    /// Convert a decoded value into this type.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] when the value has no mapping onto the type.
    fn from_value(value: Value) -> Result<Self, ConversionError>;

    /// Convert this type into a value ready for encoding.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] when the type cannot be represented.
    fn into_value(self) -> Result<Value, ConversionError>;
}

/// Float view of `value`, admitting integers up to `bound` in magnitude.
#[allow(clippy::cast_precision_loss)] // magnitude checked against the exact-integer bound
fn float_or_exact_integer(
    value: &Value,
    target: &'static str,
    bound: u128,
) -> Result<f64, ConversionError> {
    if let Some(f) = value.as_float() {
        return Ok(f);
    }
    match value.as_integer() {
        Some(i) if i.unsigned_abs() <= bound => Ok(i as f64),
        Some(i) => Err(ConversionError::OutOfRange {
            target,
            value: i.to_string(),
        }),
        None => Err(mismatch(target, value)),
    }
}

fn mismatch(expected: &'static str, found: &Value) -> ConversionError {
    ConversionError::Mismatch {
        expected,
        found: found.type_name(),
    }
}

impl HostType for String {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "String",
            default_wire: Some(WireType::Utf8String),
            accepts: &[WireType::Utf8String, WireType::RawBytes, WireType::Json],
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(s) | Value::Json(serde_json::Value::String(s)) => Ok(s),
            Value::Bytes(b) => String::from_utf8(b).map_err(|_| ConversionError::InvalidUtf8),
            Value::Json(j) => Ok(j.to_string()),
            other => Err(mismatch("String", &other)),
        }
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(Value::String(self))
    }
}

impl HostType for Vec<u8> {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "Vec<u8>",
            default_wire: Some(WireType::RawBytes),
            accepts: &[WireType::RawBytes, WireType::Utf8String],
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(Value::Bytes(self))
    }
}

impl HostType for serde_json::Value {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "serde_json::Value",
            default_wire: Some(WireType::Json),
            accepts: &[WireType::Json],
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Json(j) => Ok(j),
            other => Err(mismatch("serde_json::Value", &other)),
        }
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(Value::Json(self))
    }
}

/// Dynamic values carry every wire type but have no default, so a slot of
/// this type always needs an explicit tag.
impl HostType for Value {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "Value",
            default_wire: None,
            accepts: &WireType::ALL,
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(self)
    }
}

/// Wrapper marking a serde type that crosses the boundary as JSON.
///
/// ```
/// use hostcall_core::{HostType, Json, WireType};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Point { x: i32, y: i32 }
///
/// assert_eq!(Json::<Point>::type_info().default_wire, Some(WireType::Json));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> HostType for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: std::any::type_name::<T>(),
            default_wire: Some(WireType::Json),
            accepts: &[WireType::Json, WireType::Utf8String],
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        let parsed = match value {
            Value::Json(j) => serde_json::from_value(j),
            Value::String(s) => serde_json::from_str(&s),
            other => return Err(mismatch("Json", &other)),
        };
        parsed
            .map(Json)
            .map_err(|e| ConversionError::Json(e.to_string()))
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        serde_json::to_value(self.0)
            .map(Value::Json)
            .map_err(|e| ConversionError::Json(e.to_string()))
    }
}

macro_rules! impl_integer {
    ($($ty:ty => $variant:ident, $accepts:expr);* $(;)?) => {
        $(
            impl HostType for $ty {
                fn type_info() -> TypeInfo {
                    TypeInfo {
                        name: stringify!($ty),
                        default_wire: Some(WireType::$variant),
                        accepts: $accepts,
                    }
                }

                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    let Some(wide) = value.as_integer() else {
                        return Err(mismatch(stringify!($ty), &value));
                    };
                    <$ty>::try_from(wide).map_err(|_| ConversionError::OutOfRange {
                        target: stringify!($ty),
                        value: wide.to_string(),
                    })
                }

                fn into_value(self) -> Result<Value, ConversionError> {
                    Ok(Value::$variant(self))
                }
            }
        )*
    };
}

impl_integer!(
    i32 => I32, &[WireType::I32, WireType::I64, WireType::Json];
    i64 => I64, &[WireType::I64, WireType::Json];
    u32 => U32, &[WireType::U32, WireType::U64, WireType::I64, WireType::Json];
    u64 => U64, &[WireType::U64, WireType::Json];
);

impl HostType for f64 {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "f64",
            default_wire: Some(WireType::F64),
            accepts: &[WireType::F64, WireType::Json],
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        float_or_exact_integer(&value, "f64", F64_EXACT_INT)
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(Value::F64(self))
    }
}

impl HostType for f32 {
    fn type_info() -> TypeInfo {
        TypeInfo {
            name: "f32",
            default_wire: Some(WireType::F32),
            accepts: &[WireType::F32, WireType::F64, WireType::Json],
        }
    }

    #[allow(clippy::cast_possible_truncation)] // range checked first
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        if let Value::F32(v) = value {
            return Ok(v);
        }
        let f = float_or_exact_integer(&value, "f32", F32_EXACT_INT)?;
        if f.is_finite() && f.abs() > f64::from(f32::MAX) {
            return Err(ConversionError::OutOfRange {
                target: "f32",
                value: f.to_string(),
            });
        }
        Ok(f as f32)
    }

    fn into_value(self) -> Result<Value, ConversionError> {
        Ok(Value::F32(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Greeting {
        to: String,
        times: u8,
    }

    #[test]
    fn default_wire_types() {
        assert_eq!(String::type_info().default_wire, Some(WireType::Utf8String));
        assert_eq!(Vec::<u8>::type_info().default_wire, Some(WireType::RawBytes));
        assert_eq!(i64::type_info().default_wire, Some(WireType::I64));
        assert_eq!(f32::type_info().default_wire, Some(WireType::F32));
        assert_eq!(
            serde_json::Value::type_info().default_wire,
            Some(WireType::Json)
        );
        assert_eq!(Value::type_info().default_wire, None);
    }

    #[test]
    fn bytes_have_no_json_path() {
        assert!(!Vec::<u8>::type_info().accepts(WireType::Json));
        assert!(String::type_info().accepts(WireType::RawBytes));
    }

    #[test]
    fn string_from_bytes_validates_utf8() {
        assert_eq!(
            String::from_value(Value::Bytes(b"ok".to_vec())).unwrap(),
            "ok"
        );
        assert_eq!(
            String::from_value(Value::Bytes(vec![0xff])).unwrap_err(),
            ConversionError::InvalidUtf8
        );
    }

    #[test]
    fn integer_narrowing_is_checked() {
        assert_eq!(i32::from_value(Value::I64(-5)).unwrap(), -5);
        let err = u32::from_value(Value::I64(-1)).unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { target: "u32", .. }));
        let err = i64::from_value(Value::String("3".into())).unwrap_err();
        assert!(matches!(err, ConversionError::Mismatch { expected: "i64", .. }));
    }

    #[test]
    fn json_wrapper_converts_through_serde() {
        let value = Json(Greeting {
            to: "world".into(),
            times: 2,
        })
        .into_value()
        .unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"to": "world", "times": 2})));

        let back = Json::<Greeting>::from_value(Value::String(r#"{"to":"x","times":1}"#.into()))
            .unwrap()
            .into_inner();
        assert_eq!(
            back,
            Greeting {
                to: "x".into(),
                times: 1
            }
        );

        let err = Json::<Greeting>::from_value(Value::Json(serde_json::json!([1]))).unwrap_err();
        assert!(matches!(err, ConversionError::Json(_)));
    }
}

//! Value codec: conversion between host [`Value`]s and the flat byte
//! representation stored in guest memory.
//!
//! Every value crossing the guest/host boundary lives in a guest memory
//! block. The [`WireType`] of a slot decides how those bytes are read:
//!
//! | Wire type | Guest bytes |
//! |-----------|-------------|
//! | `RawBytes` | copied as-is |
//! | `Utf8String` | validated UTF-8 |
//! | `Json` | UTF-8 JSON text |
//! | `I32`..`F64` | fixed-width little-endian |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

/// Memory representation of a value crossing the guest/host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    /// Opaque bytes.
    RawBytes,
    /// UTF-8 text.
    Utf8String,
    /// JSON document encoded as UTF-8 text.
    Json,
    /// Little-endian `i32`.
    I32,
    /// Little-endian `i64`.
    I64,
    /// Little-endian `u32`.
    U32,
    /// Little-endian `u64`.
    U64,
    /// Little-endian IEEE-754 `f32`.
    F32,
    /// Little-endian IEEE-754 `f64`.
    F64,
}

impl WireType {
    /// Every wire type, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::RawBytes,
        Self::Utf8String,
        Self::Json,
        Self::I32,
        Self::I64,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    /// Byte width of fixed-width numeric kinds, `None` for variable-length kinds.
    #[must_use]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::RawBytes | Self::Utf8String | Self::Json => None,
        }
    }

    /// Whether this is one of the integer or float kinds.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.fixed_width().is_some()
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawBytes => "raw_bytes",
            Self::Utf8String => "utf8_string",
            Self::Json => "json",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("unknown wire type: {s}"))
    }
}

/// A dynamically typed host value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    String(String),
    /// Structured JSON value.
    Json(serde_json::Value),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Value {
    /// Variant name, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Json(_) => "json",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
        }
    }

    /// The integer carried by this value, widened to `i128`.
    ///
    /// JSON numbers count when they are integral.
    #[must_use]
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Self::I32(v) => Some(i128::from(*v)),
            Self::I64(v) => Some(i128::from(*v)),
            Self::U32(v) => Some(i128::from(*v)),
            Self::U64(v) => Some(i128::from(*v)),
            Self::Json(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(i128::from)
                .or_else(|| n.as_u64().map(i128::from)),
            _ => None,
        }
    }

    /// The float carried by this value, widened to `f64`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Json(serde_json::Value::Number(n)) if !n.is_i64() && !n.is_u64() => n.as_f64(),
            _ => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_value_from!(
    Vec<u8> => Bytes,
    String => String,
    serde_json::Value => Json,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode raw guest bytes as `wire`.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the bytes are not valid for the wire type.
pub fn decode(wire: WireType, raw: &[u8]) -> Result<Value, DecodeError> {
    match wire {
        WireType::RawBytes => Ok(Value::Bytes(raw.to_vec())),
        WireType::Utf8String => decode_utf8(raw).map(|s| Value::String(s.to_owned())),
        WireType::Json => {
            let text = decode_utf8(raw)?;
            serde_json::from_str(text)
                .map(Value::Json)
                .map_err(|e| DecodeError::MalformedJson {
                    line: e.line(),
                    column: e.column(),
                    message: e.to_string(),
                })
        },
        WireType::I32 => fixed::<4>(wire, raw).map(|b| Value::I32(i32::from_le_bytes(b))),
        WireType::I64 => fixed::<8>(wire, raw).map(|b| Value::I64(i64::from_le_bytes(b))),
        WireType::U32 => fixed::<4>(wire, raw).map(|b| Value::U32(u32::from_le_bytes(b))),
        WireType::U64 => fixed::<8>(wire, raw).map(|b| Value::U64(u64::from_le_bytes(b))),
        WireType::F32 => fixed::<4>(wire, raw).map(|b| Value::F32(f32::from_le_bytes(b))),
        WireType::F64 => fixed::<8>(wire, raw).map(|b| Value::F64(f64::from_le_bytes(b))),
    }
}

fn decode_utf8(raw: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(raw).map_err(|e| DecodeError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })
}

fn fixed<const N: usize>(wire: WireType, raw: &[u8]) -> Result<[u8; N], DecodeError> {
    <[u8; N]>::try_from(raw).map_err(|_| DecodeError::InvalidLength {
        wire,
        expected: N,
        actual: raw.len(),
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Largest integer magnitude an `f64` represents exactly.
pub(crate) const F64_EXACT_INT: u128 = 9_007_199_254_740_992;
/// Largest integer magnitude an `f32` represents exactly.
pub(crate) const F32_EXACT_INT: u128 = 16_777_216;

/// Encode `value` as `wire`.
///
/// Lossless cross conversions are allowed (a string into a raw-bytes slot,
/// an `i32` into an `i64` slot, a JSON number into a numeric slot); lossy
/// ones fail.
///
/// # Errors
///
/// Returns [`EncodeError::OutOfRange`] when a number does not fit and
/// [`EncodeError::TypeMismatch`] when there is no conversion path.
pub fn encode(value: &Value, wire: WireType) -> Result<Vec<u8>, EncodeError> {
    match wire {
        WireType::RawBytes => encode_raw(value),
        WireType::Utf8String => encode_text(value),
        WireType::Json => {
            let json = to_json(value)?;
            serde_json::to_vec(&json).map_err(|e| EncodeError::Json(e.to_string()))
        },
        WireType::I32 => integer::<i32>(value, wire).map(|v| v.to_le_bytes().to_vec()),
        WireType::I64 => integer::<i64>(value, wire).map(|v| v.to_le_bytes().to_vec()),
        WireType::U32 => integer::<u32>(value, wire).map(|v| v.to_le_bytes().to_vec()),
        WireType::U64 => integer::<u64>(value, wire).map(|v| v.to_le_bytes().to_vec()),
        WireType::F32 => float32(value).map(|v| v.to_le_bytes().to_vec()),
        WireType::F64 => float64(value).map(|v| v.to_le_bytes().to_vec()),
    }
}

fn encode_raw(value: &Value) -> Result<Vec<u8>, EncodeError> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Json(j) => serde_json::to_vec(j).map_err(|e| EncodeError::Json(e.to_string())),
        other => Err(mismatch(other, WireType::RawBytes)),
    }
}

fn encode_text(value: &Value) -> Result<Vec<u8>, EncodeError> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(_) => Ok(b.clone()),
            Err(e) => Err(EncodeError::InvalidUtf8 {
                valid_up_to: e.valid_up_to(),
            }),
        },
        Value::Json(serde_json::Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Value::Json(j) => Ok(j.to_string().into_bytes()),
        other => Err(mismatch(other, WireType::Utf8String)),
    }
}

fn to_json(value: &Value) -> Result<serde_json::Value, EncodeError> {
    let number = |n: Option<serde_json::Number>| {
        n.map(serde_json::Value::Number)
            .ok_or_else(|| EncodeError::OutOfRange {
                wire: WireType::Json,
                value: format!("{value:?}"),
            })
    };
    match value {
        Value::Json(j) => Ok(j.clone()),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::I32(v) => Ok(serde_json::Value::from(*v)),
        Value::I64(v) => Ok(serde_json::Value::from(*v)),
        Value::U32(v) => Ok(serde_json::Value::from(*v)),
        Value::U64(v) => Ok(serde_json::Value::from(*v)),
        Value::F32(v) => number(serde_json::Number::from_f64(f64::from(*v))),
        Value::F64(v) => number(serde_json::Number::from_f64(*v)),
        Value::Bytes(_) => Err(mismatch(value, WireType::Json)),
    }
}

fn integer<T>(value: &Value, wire: WireType) -> Result<T, EncodeError>
where
    T: TryFrom<i128>,
{
    let Some(wide) = value.as_integer() else {
        return Err(mismatch(value, wire));
    };
    T::try_from(wide).map_err(|_| EncodeError::OutOfRange {
        wire,
        value: wide.to_string(),
    })
}

#[allow(clippy::cast_precision_loss)] // magnitude checked against the exact-integer bound
fn float64(value: &Value) -> Result<f64, EncodeError> {
    if let Some(f) = value.as_float() {
        return Ok(f);
    }
    match value.as_integer() {
        Some(i) if i.unsigned_abs() <= F64_EXACT_INT => Ok(i as f64),
        Some(i) => Err(EncodeError::OutOfRange {
            wire: WireType::F64,
            value: i.to_string(),
        }),
        None => Err(mismatch(value, WireType::F64)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)] // range checked first
fn float32(value: &Value) -> Result<f32, EncodeError> {
    if let Value::F32(v) = value {
        return Ok(*v);
    }
    if let Some(f) = value.as_float() {
        if f.is_finite() && f.abs() > f64::from(f32::MAX) {
            return Err(EncodeError::OutOfRange {
                wire: WireType::F32,
                value: f.to_string(),
            });
        }
        return Ok(f as f32);
    }
    match value.as_integer() {
        Some(i) if i.unsigned_abs() <= F32_EXACT_INT => Ok(i as f32),
        Some(i) => Err(EncodeError::OutOfRange {
            wire: WireType::F32,
            value: i.to_string(),
        }),
        None => Err(mismatch(value, WireType::F32)),
    }
}

fn mismatch(value: &Value, wire: WireType) -> EncodeError {
    EncodeError::TypeMismatch {
        wire,
        found: value.type_name(),
    }
}

// ---------------------------------------------------------------------------
// Custom codecs
// ---------------------------------------------------------------------------

type DecodeFn = dyn Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync;
type EncodeFn = dyn Fn(&Value) -> Result<Vec<u8>, EncodeError> + Send + Sync;

/// A user-supplied transform that replaces the built-in codec for one slot.
///
/// A codec can carry a decoder, an encoder, or both. The missing direction
/// falls back to raw bytes.
///
/// ```
/// use hostcall_core::{Codec, Value};
///
/// let shout = Codec::decoder(|raw| {
///     Ok(Value::String(String::from_utf8_lossy(raw).to_uppercase()))
/// });
/// assert_eq!(shout.decode(b"hi").unwrap(), Value::String("HI".into()));
/// ```
#[derive(Clone, Default)]
pub struct Codec {
    decode: Option<Arc<DecodeFn>>,
    encode: Option<Arc<EncodeFn>>,
}

impl Codec {
    /// A codec with only a decoder.
    pub fn decoder<D>(decode: D) -> Self
    where
        D: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Self {
            decode: Some(Arc::new(decode)),
            encode: None,
        }
    }

    /// A codec with only an encoder.
    pub fn encoder<E>(encode: E) -> Self
    where
        E: Fn(&Value) -> Result<Vec<u8>, EncodeError> + Send + Sync + 'static,
    {
        Self {
            decode: None,
            encode: Some(Arc::new(encode)),
        }
    }

    /// A codec with both directions.
    pub fn new<D, E>(decode: D, encode: E) -> Self
    where
        D: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
        E: Fn(&Value) -> Result<Vec<u8>, EncodeError> + Send + Sync + 'static,
    {
        Self {
            decode: Some(Arc::new(decode)),
            encode: Some(Arc::new(encode)),
        }
    }

    /// Decode raw guest bytes.
    ///
    /// # Errors
    ///
    /// Propagates the decoder's error.
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        match &self.decode {
            Some(f) => f(raw),
            None => decode(WireType::RawBytes, raw),
        }
    }

    /// Encode a host value.
    ///
    /// # Errors
    ///
    /// Propagates the encoder's error.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        match &self.encode {
            Some(f) => f(value),
            None => encode(value, WireType::RawBytes),
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("has_decoder", &self.decode.is_some())
            .field("has_encoder", &self.encode.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value, wire: WireType) {
        let bytes = encode(&value, wire).unwrap();
        assert_eq!(decode(wire, &bytes).unwrap(), value, "wire {wire}");
    }

    #[test]
    fn roundtrip_within_domain() {
        roundtrip(Value::Bytes(vec![0, 159, 146, 150]), WireType::RawBytes);
        roundtrip(Value::String("🌎hello🌎".into()), WireType::Utf8String);
        roundtrip(
            Value::Json(serde_json::json!({"count": 3, "tags": ["a", null]})),
            WireType::Json,
        );
        roundtrip(Value::I32(i32::MIN), WireType::I32);
        roundtrip(Value::I64(i64::MAX), WireType::I64);
        roundtrip(Value::U32(u32::MAX), WireType::U32);
        roundtrip(Value::U64(u64::MAX), WireType::U64);
        roundtrip(Value::F32(-1.5), WireType::F32);
        roundtrip(Value::F64(std::f64::consts::PI), WireType::F64);
    }

    #[test]
    fn numeric_encoding_is_little_endian() {
        assert_eq!(encode(&Value::I32(1), WireType::I32).unwrap(), [1, 0, 0, 0]);
        assert_eq!(
            encode(&Value::U64(0x0102), WireType::U64).unwrap(),
            [2, 1, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn invalid_utf8_reports_prefix() {
        let err = decode(WireType::Utf8String, b"ok\xff").unwrap_err();
        assert_eq!(err, DecodeError::InvalidUtf8 { valid_up_to: 2 });
        // JSON goes through the UTF-8 step first.
        let err = decode(WireType::Json, b"\xc3").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8 { .. }));
    }

    #[test]
    fn malformed_json_carries_position() {
        let err = decode(WireType::Json, b"{\n  \"a\": }").unwrap_err();
        match err {
            DecodeError::MalformedJson { line, column, .. } => {
                assert_eq!(line, 2);
                assert!(column > 0);
            },
            other => panic!("expected MalformedJson, got {other:?}"),
        }
    }

    #[test]
    fn wrong_width_is_rejected() {
        let err = decode(WireType::I64, &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLength {
                wire: WireType::I64,
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn narrowing_out_of_range_fails() {
        let err = encode(&Value::I64(2_147_483_648), WireType::I32).unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { wire: WireType::I32, .. }));

        let err = encode(&Value::I32(-1), WireType::U64).unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { .. }));

        let err = encode(&Value::F64(1e300), WireType::F32).unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { wire: WireType::F32, .. }));
    }

    #[test]
    fn widening_and_json_numbers_encode() {
        assert_eq!(
            encode(&Value::I32(7), WireType::I64).unwrap(),
            7i64.to_le_bytes()
        );
        assert_eq!(
            encode(&Value::Json(serde_json::json!(9)), WireType::U32).unwrap(),
            9u32.to_le_bytes()
        );
        assert_eq!(
            encode(&Value::U32(3), WireType::F64).unwrap(),
            3f64.to_le_bytes()
        );
    }

    #[test]
    fn type_mismatch_has_no_conversion_path() {
        let err = encode(&Value::Bytes(vec![1]), WireType::Json).unwrap_err();
        assert_eq!(
            err,
            EncodeError::TypeMismatch {
                wire: WireType::Json,
                found: "bytes"
            }
        );
        let err = encode(&Value::String("1".into()), WireType::I32).unwrap_err();
        assert!(matches!(err, EncodeError::TypeMismatch { .. }));
    }

    #[test]
    fn text_slot_accepts_strings_and_json() {
        assert_eq!(
            encode(&Value::Json(serde_json::json!("plain")), WireType::Utf8String).unwrap(),
            b"plain"
        );
        assert_eq!(
            encode(&Value::Json(serde_json::json!({"a": 1})), WireType::Utf8String).unwrap(),
            br#"{"a":1}"#
        );
        let err = encode(&Value::Bytes(vec![0xff]), WireType::Utf8String).unwrap_err();
        assert_eq!(err, EncodeError::InvalidUtf8 { valid_up_to: 0 });
    }

    #[test]
    fn non_finite_float_has_no_json_form() {
        let err = encode(&Value::F64(f64::NAN), WireType::Json).unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { wire: WireType::Json, .. }));
    }

    #[test]
    fn wire_type_names_parse_back() {
        for wire in WireType::ALL {
            assert_eq!(wire.as_str().parse::<WireType>().unwrap(), wire);
        }
        assert!("float128".parse::<WireType>().is_err());
    }

    #[test]
    fn codec_falls_back_to_raw_bytes() {
        let encoder_only = Codec::encoder(|v| match v {
            Value::String(s) => Ok(s.replace('e', "a").into_bytes()),
            other => Err(EncodeError::Codec(format!("unexpected {}", other.type_name()))),
        });
        assert_eq!(encoder_only.decode(b"xyz").unwrap(), Value::Bytes(b"xyz".to_vec()));
        assert_eq!(
            encoder_only.encode(&Value::String("hello".into())).unwrap(),
            b"hallo"
        );
    }
}

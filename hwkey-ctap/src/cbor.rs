//! CBOR value model and codec for CTAP2 payloads
//!
//! [`CborValue`] is a single recursive enum covering every major type CTAP2
//! exchanges. Encoding goes through cbor4ii's `Encode` machinery and always
//! produces the CTAP2 canonical form:
//!
//! - integers and lengths use the shortest header
//! - floats use the narrowest of half/single/double that is exact
//! - map keys are sorted by encoded length, then bytewise
//!
//! Decoding goes through `cbor4ii::core::Value` and is then lifted into
//! [`CborValue`], recovering bignums (tags 2 and 3) and the raw negative
//! integer argument.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#ctap2-canonical-cbor-encoding-form>

use cbor4ii::core::{
    Value,
    dec::{self, Decode},
    enc::{self, Encode},
    error::Never,
    types,
    utils::BufWriter,
};
use half::f16;

/// Deepest nesting accepted on decode
const MAX_DEPTH: usize = 32;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// CBOR codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CborError {
    #[error("malformed CBOR: {0}")]
    Malformed(String),

    #[error("{0} trailing bytes after CBOR item")]
    TrailingBytes(usize),

    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    #[error("missing field {0}")]
    MissingField(String),

    #[error("field {field}: expected {expected}")]
    UnexpectedType {
        field: String,
        expected: &'static str,
    },
}

/// Result type for CBOR operations
pub type Result<T> = core::result::Result<T, CborError>;

/// A decoded or to-be-encoded CBOR data item
#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    /// Major type 0
    Unsigned(u64),
    /// Major type 1, holding the raw argument `n` of the value `-1 - n`
    Negative(u64),
    /// Tag 2 or 3 with a big-endian magnitude, for integers outside 64 bits
    ///
    /// The value is `magnitude` when positive and `-1 - magnitude` when negative.
    BigNum { negative: bool, magnitude: Vec<u8> },
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(Vec<(CborValue, CborValue)>),
    /// Any other tag
    ///
    /// Tags 2 and 3 around a byte string always decode as [`CborValue::BigNum`],
    /// so a `Tag(2, Bytes(..))` built by hand does not survive a round trip.
    Tag(u64, Box<CborValue>),
    Float(f64),
    Bool(bool),
    Null,
}

impl CborValue {
    /// Build the integer item for any `i128`, falling back to a bignum
    /// outside the range CBOR integers can carry directly
    pub fn from_i128(value: i128) -> Self {
        if value >= 0 {
            match u64::try_from(value) {
                Ok(v) => Self::Unsigned(v),
                Err(_) => Self::BigNum {
                    negative: false,
                    magnitude: strip_leading_zeros(&(value as u128).to_be_bytes()).to_vec(),
                },
            }
        } else {
            let argument = (-1 - value) as u128;
            match u64::try_from(argument) {
                Ok(n) => Self::Negative(n),
                Err(_) => Self::BigNum {
                    negative: true,
                    magnitude: strip_leading_zeros(&argument.to_be_bytes()).to_vec(),
                },
            }
        }
    }

    /// Integer value, if it fits in an `i128`
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Unsigned(v) => Some(i128::from(*v)),
            Self::Negative(n) => Some(-1 - i128::from(*n)),
            Self::BigNum {
                negative,
                magnitude,
            } => {
                let digits = strip_leading_zeros(magnitude);
                if digits.len() > 16 {
                    return None;
                }
                let mut buf = [0u8; 16];
                buf[16 - digits.len()..].copy_from_slice(digits);
                let m = i128::try_from(u128::from_be_bytes(buf)).ok()?;
                Some(if *negative { -1 - m } else { m })
            }
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CborValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(CborValue, CborValue)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Look up a map entry by integer key
    pub fn get_int(&self, key: i64) -> Option<&CborValue> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_i64() == Some(key))
            .map(|(_, v)| v)
    }

    /// Look up a map entry by text key
    pub fn get_text(&self, key: &str) -> Option<&CborValue> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }
}

impl Encode for CborValue {
    fn encode<W: enc::Write>(&self, writer: &mut W) -> core::result::Result<(), enc::Error<W::Error>> {
        match self {
            Self::Unsigned(v) => v.encode(writer),
            Self::Negative(n) => types::Negative(*n).encode(writer),
            Self::BigNum {
                negative,
                magnitude,
            } => {
                let tag = if *negative {
                    TAG_NEGATIVE_BIGNUM
                } else {
                    TAG_POSITIVE_BIGNUM
                };
                types::Tag(tag, types::Bytes(strip_leading_zeros(magnitude))).encode(writer)
            }
            Self::Bytes(b) => types::Bytes(b.as_slice()).encode(writer),
            Self::Text(t) => t.as_str().encode(writer),
            Self::Array(items) => {
                types::Array::<()>::bounded(items.len(), writer)?;
                for item in items {
                    item.encode(writer)?;
                }
                Ok(())
            }
            Self::Map(entries) => encode_canonical_map(entries, writer),
            Self::Tag(tag, inner) => types::Tag(*tag, &**inner).encode(writer),
            Self::Float(v) => encode_float(*v, writer),
            Self::Bool(b) => b.encode(writer),
            Self::Null => types::Null.encode(writer),
        }
    }
}

fn encode_canonical_map<W: enc::Write>(
    entries: &[(CborValue, CborValue)],
    writer: &mut W,
) -> core::result::Result<(), enc::Error<W::Error>> {
    let mut keyed: Vec<(Vec<u8>, &CborValue)> = entries
        .iter()
        .map(|(key, value)| (key_bytes(key), value))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    types::Map::<()>::bounded(keyed.len(), writer)?;
    for (key, value) in keyed {
        writer.push(&key)?;
        value.encode(writer)?;
    }
    Ok(())
}

fn encode_float<W: enc::Write>(
    value: f64,
    writer: &mut W,
) -> core::result::Result<(), enc::Error<W::Error>> {
    if value.is_nan() {
        return types::F16(f16::NAN.to_bits()).encode(writer);
    }

    let half = f16::from_f64(value);
    if half.to_f64() == value {
        return types::F16(half.to_bits()).encode(writer);
    }

    let single = value as f32;
    if f64::from(single) == value {
        return single.encode(writer);
    }

    value.encode(writer)
}

/// Growable buffer that cannot fail, used to compute map key order
#[derive(Default)]
struct KeyWriter(Vec<u8>);

impl enc::Write for KeyWriter {
    type Error = Never;

    fn push(&mut self, input: &[u8]) -> core::result::Result<(), Self::Error> {
        self.0.extend_from_slice(input);
        Ok(())
    }
}

fn key_bytes(key: &CborValue) -> Vec<u8> {
    let mut writer = KeyWriter::default();
    // KeyWriter::Error is uninhabited
    let _ = key.encode(&mut writer);
    writer.0
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Slice reader that reports how much input the decoder consumed
struct TrackingReader<'de> {
    buf: &'de [u8],
    pos: usize,
    depth: usize,
}

impl<'de> TrackingReader<'de> {
    fn new(buf: &'de [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }
}

impl<'de> dec::Read<'de> for TrackingReader<'de> {
    type Error = Never;

    fn fill<'short>(
        &'short mut self,
        _want: usize,
    ) -> core::result::Result<dec::Reference<'de, 'short>, Self::Error> {
        let buf: &'de [u8] = self.buf;
        Ok(dec::Reference::Long(buf.get(self.pos..).unwrap_or(&[])))
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    fn step_in(&mut self) -> bool {
        if self.depth >= MAX_DEPTH {
            return false;
        }
        self.depth += 1;
        true
    }

    fn step_out(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

impl TryFrom<Value> for CborValue {
    type Error = CborError;

    fn try_from(value: Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Integer(v) => Self::from_i128(v),
            Value::Float(v) => Self::Float(v),
            Value::Bytes(b) => Self::Bytes(b),
            Value::Text(t) => Self::Text(t),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((Self::try_from(k)?, Self::try_from(v)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Tag(tag, inner) => match (tag, *inner) {
                (TAG_POSITIVE_BIGNUM, Value::Bytes(magnitude)) => Self::BigNum {
                    negative: false,
                    magnitude,
                },
                (TAG_NEGATIVE_BIGNUM, Value::Bytes(magnitude)) => Self::BigNum {
                    negative: true,
                    magnitude,
                },
                (tag, inner) => Self::Tag(tag, Box::new(Self::try_from(inner)?)),
            },
            _ => return Err(CborError::Malformed("unsupported data item".into())),
        })
    }
}

/// Encode a value in canonical form
///
/// # Examples
///
/// ```
/// use hwkey_ctap::cbor::{self, CborValue};
///
/// assert_eq!(cbor::encode(&CborValue::from(-1i64)).unwrap(), vec![0x20]);
/// assert_eq!(cbor::encode(&CborValue::Float(1.5)).unwrap(), vec![0xf9, 0x3e, 0x00]);
/// ```
pub fn encode(value: &CborValue) -> Result<Vec<u8>> {
    let mut writer = BufWriter::new(Vec::new());
    value
        .encode(&mut writer)
        .map_err(|e| CborError::Encode(e.to_string()))?;
    Ok(writer.into_inner())
}

/// Decode exactly one item; trailing bytes are an error
pub fn decode(data: &[u8]) -> Result<CborValue> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(CborError::TrailingBytes(data.len() - consumed));
    }
    Ok(value)
}

/// Decode the first item in `data`
///
/// # Returns
///
/// The item and the number of bytes it occupied.
pub fn decode_prefix(data: &[u8]) -> Result<(CborValue, usize)> {
    let mut reader = TrackingReader::new(data);
    let value = Value::decode(&mut reader).map_err(|e| CborError::Malformed(e.to_string()))?;
    let value = CborValue::try_from(value)?;
    Ok((value, reader.pos))
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for CborValue {
            fn from(v: $t) -> Self {
                Self::Unsigned(u64::from(v))
            }
        })*
    };
}

macro_rules! from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for CborValue {
            fn from(v: $t) -> Self {
                Self::from_i128(i128::from(v))
            }
        })*
    };
}

from_unsigned!(u8, u16, u32, u64);
from_signed!(i8, i16, i32, i64, i128);

impl From<bool> for CborValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for CborValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CborValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for CborValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&[u8]> for CborValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for CborValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<CborValue>> for CborValue {
    fn from(v: Vec<CborValue>) -> Self {
        Self::Array(v)
    }
}

/// Build a CBOR map entry by entry
///
/// Entries may be inserted in any order; encoding sorts them canonically.
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(CborValue, CborValue)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key and value
    pub fn insert(mut self, key: impl Into<CborValue>, value: impl Into<CborValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Insert only when `value` is `Some`
    pub fn insert_opt<V: Into<CborValue>>(self, key: impl Into<CborValue>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.insert(key, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> CborValue {
        CborValue::Map(self.entries)
    }

    /// Build and encode in one step
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        encode(&self.build())
    }
}

/// Typed access to a map with integer keys
///
/// Errors name the field that was missing or mistyped.
pub struct MapParser<'a> {
    entries: &'a [(CborValue, CborValue)],
}

impl<'a> MapParser<'a> {
    /// Wrap a decoded value, which must be a map
    pub fn new(value: &'a CborValue) -> Result<Self> {
        let entries = value.as_map().ok_or_else(|| CborError::UnexpectedType {
            field: "top level".into(),
            expected: "map",
        })?;
        Ok(Self { entries })
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.get_opt(key).is_some()
    }

    pub fn get_opt(&self, key: i64) -> Option<&'a CborValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_i64() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn get(&self, key: i64) -> Result<&'a CborValue> {
        self.get_opt(key)
            .ok_or_else(|| CborError::MissingField(key.to_string()))
    }

    pub fn bytes(&self, key: i64) -> Result<&'a [u8]> {
        expect(key, self.get(key)?.as_bytes(), "byte string")
    }

    pub fn bytes_opt(&self, key: i64) -> Result<Option<&'a [u8]>> {
        self.get_opt(key)
            .map(|v| expect(key, v.as_bytes(), "byte string"))
            .transpose()
    }

    pub fn text(&self, key: i64) -> Result<&'a str> {
        expect(key, self.get(key)?.as_text(), "text string")
    }

    pub fn unsigned(&self, key: i64) -> Result<u64> {
        expect(key, self.get(key)?.as_u64(), "unsigned integer")
    }

    pub fn unsigned_opt(&self, key: i64) -> Result<Option<u64>> {
        self.get_opt(key)
            .map(|v| expect(key, v.as_u64(), "unsigned integer"))
            .transpose()
    }

    pub fn array_opt(&self, key: i64) -> Result<Option<&'a [CborValue]>> {
        self.get_opt(key)
            .map(|v| expect(key, v.as_array(), "array"))
            .transpose()
    }
}

fn expect<T>(key: i64, value: Option<T>, expected: &'static str) -> Result<T> {
    value.ok_or_else(|| CborError::UnexpectedType {
        field: key.to_string(),
        expected,
    })
}

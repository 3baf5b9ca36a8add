//! Typed comparison values.
//!
//! A query value is kept as text until the type of the attribute it is
//! compared against is known; it is then decoded into a `TypedValue` of that
//! type. Index keys and attribute buffers use the same representation:
//! little-endian integers and floats, and strings without a trailing NUL.

use std::cmp::Ordering;

use memchr::memchr;

use crate::types::{AttrType, MAX_INDEX_KEY_LENGTH};

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float(f32),
    Double(f64),
    /// Bounded to `MAX_INDEX_KEY_LENGTH` bytes.
    String(String),
}

impl TypedValue {
    /// Decodes query text as a value of `ty`.
    ///
    /// Numbers decode the way the C library's `strtol` family does: leading
    /// sign, `0x` and `0` radix prefixes, saturation on overflow, and any
    /// trailing garbage ignored. Returns `None` when `ty` has no comparable
    /// representation.
    pub fn parse(text: &str, ty: AttrType) -> Option<Self> {
        Some(match ty.comparable()? {
            AttrType::String => Self::String(bounded_str(text).to_string()),
            AttrType::Int32 => Self::Int32(parse_signed(text) as i32),
            AttrType::Uint32 => Self::Uint32(parse_unsigned(text) as u32),
            AttrType::Int64 => Self::Int64(parse_signed(text)),
            AttrType::Uint64 => Self::Uint64(parse_unsigned(text)),
            AttrType::Float => Self::Float(parse_float(text) as f32),
            AttrType::Double => Self::Double(parse_float(text)),
            _ => return None,
        })
    }

    /// Decodes a stored key or attribute buffer of type `ty`.
    ///
    /// Fixed-size types need at least their key size in bytes; strings end at
    /// the first NUL.
    pub fn from_key(ty: AttrType, bytes: &[u8]) -> Option<Self> {
        Some(match ty.comparable()? {
            AttrType::String => {
                let end = memchr(0, bytes)
                    .unwrap_or(bytes.len())
                    .min(MAX_INDEX_KEY_LENGTH);
                Self::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            AttrType::Int32 => Self::Int32(i32::from_le_bytes(fixed(bytes)?)),
            AttrType::Uint32 => Self::Uint32(u32::from_le_bytes(fixed(bytes)?)),
            AttrType::Int64 => Self::Int64(i64::from_le_bytes(fixed(bytes)?)),
            AttrType::Uint64 => Self::Uint64(u64::from_le_bytes(fixed(bytes)?)),
            AttrType::Float => Self::Float(f32::from_le_bytes(fixed(bytes)?)),
            AttrType::Double => Self::Double(f64::from_le_bytes(fixed(bytes)?)),
            _ => return None,
        })
    }

    /// Encodes the value the way an index stores it.
    pub fn to_key(&self) -> Vec<u8> {
        match self {
            Self::Int32(value) => value.to_le_bytes().to_vec(),
            Self::Uint32(value) => value.to_le_bytes().to_vec(),
            Self::Int64(value) => value.to_le_bytes().to_vec(),
            Self::Uint64(value) => value.to_le_bytes().to_vec(),
            Self::Float(value) => value.to_le_bytes().to_vec(),
            Self::Double(value) => value.to_le_bytes().to_vec(),
            Self::String(value) => value.as_bytes().to_vec(),
        }
    }

    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Int32(_) => AttrType::Int32,
            Self::Uint32(_) => AttrType::Uint32,
            Self::Int64(_) => AttrType::Int64,
            Self::Uint64(_) => AttrType::Uint64,
            Self::Float(_) => AttrType::Float,
            Self::Double(_) => AttrType::Double,
            Self::String(_) => AttrType::String,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(value) => Some(i64::from(*value)),
            Self::Uint32(value) => Some(i64::from(*value)),
            Self::Int64(value) => Some(*value),
            Self::Uint64(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Three-way comparison of two values of the same type.
    ///
    /// Strings compare byte-wise, then by length. A NaN compares greater than
    /// everything. Values of different types order by type.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::Uint32(a), Self::Uint32(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Uint64(a), Self::Uint64(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Greater),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Greater),
            (Self::String(a), Self::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Int32(_) => 0,
            Self::Uint32(_) => 1,
            Self::Int64(_) => 2,
            Self::Uint64(_) => 3,
            Self::Float(_) => 4,
            Self::Double(_) => 5,
            Self::String(_) => 6,
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

/// Truncates `text` to at most `MAX_INDEX_KEY_LENGTH` bytes on a char boundary.
pub(crate) fn bounded_str(text: &str) -> &str {
    if text.len() <= MAX_INDEX_KEY_LENGTH {
        return text;
    }
    let mut end = MAX_INDEX_KEY_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ---------------------------------------------------------------------------
// Numeric text decoding
// ---------------------------------------------------------------------------

struct IntegerPrefix {
    negative: bool,
    magnitude: u64,
    overflow: bool,
}

fn parse_integer_prefix(text: &str) -> IntegerPrefix {
    let bytes = text.trim_start().as_bytes();
    let mut index = 0usize;
    let negative = match bytes.first() {
        Some(b'-') => {
            index = 1;
            true
        }
        Some(b'+') => {
            index = 1;
            false
        }
        _ => false,
    };

    let radix = if bytes.get(index) == Some(&b'0')
        && matches!(bytes.get(index + 1), Some(b'x' | b'X'))
        && bytes
            .get(index + 2)
            .is_some_and(|byte| byte.is_ascii_hexdigit())
    {
        index += 2;
        16
    } else if bytes.get(index) == Some(&b'0') {
        8
    } else {
        10
    };

    let mut magnitude = 0u64;
    let mut overflow = false;
    while let Some(digit) = bytes
        .get(index)
        .and_then(|byte| char::from(*byte).to_digit(radix))
    {
        match magnitude
            .checked_mul(u64::from(radix))
            .and_then(|value| value.checked_add(u64::from(digit)))
        {
            Some(value) => magnitude = value,
            None => overflow = true,
        }
        index += 1;
    }

    IntegerPrefix {
        negative,
        magnitude,
        overflow,
    }
}

fn parse_signed(text: &str) -> i64 {
    let prefix = parse_integer_prefix(text);
    if prefix.negative {
        if prefix.overflow || prefix.magnitude > i64::MAX as u64 + 1 {
            i64::MIN
        } else {
            (prefix.magnitude as i64).wrapping_neg()
        }
    } else if prefix.overflow || prefix.magnitude > i64::MAX as u64 {
        i64::MAX
    } else {
        prefix.magnitude as i64
    }
}

fn parse_unsigned(text: &str) -> u64 {
    let prefix = parse_integer_prefix(text);
    if prefix.overflow {
        u64::MAX
    } else if prefix.negative {
        prefix.magnitude.wrapping_neg()
    } else {
        prefix.magnitude
    }
}

/// Parses the longest decimal floating point prefix of `text`; 0 if none.
fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let is_digit = |index: usize| bytes.get(index).is_some_and(|byte| byte.is_ascii_digit());

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let integer_start = end;
    while is_digit(end) {
        end += 1;
    }
    let mut digits = end - integer_start;

    if bytes.get(end) == Some(&b'.') {
        let mut fraction_end = end + 1;
        while is_digit(fraction_end) {
            fraction_end += 1;
        }
        digits += fraction_end - end - 1;
        if digits > 0 {
            end = fraction_end;
        }
    }
    if digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_start = exponent;
        while is_digit(exponent) {
            exponent += 1;
        }
        if exponent > exponent_start {
            end = exponent;
        }
    }

    text[..end].parse().unwrap_or(0.0)
}

//! Order-preserving fixed-width byte encodings.
//!
//! Every encoded value compares as an unsigned big-endian integer in the same
//! order as the domain value it came from. Signed integers flip the sign bit;
//! floating point values go through the usual sortable-bits transform first.

use serde::{Deserialize, Serialize};

pub const LONG_BYTES: usize = 8;
pub const INT_BYTES: usize = 4;

pub fn long_to_sortable_bytes(value: i64) -> [u8; LONG_BYTES] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn sortable_bytes_to_long(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; LONG_BYTES];
    buf.copy_from_slice(&bytes[..LONG_BYTES]);
    (u64::from_be_bytes(buf) ^ (1 << 63)) as i64
}

pub fn int_to_sortable_bytes(value: i32) -> [u8; INT_BYTES] {
    ((value as u32) ^ (1 << 31)).to_be_bytes()
}

pub fn sortable_bytes_to_int(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; INT_BYTES];
    buf.copy_from_slice(&bytes[..INT_BYTES]);
    (u32::from_be_bytes(buf) ^ (1 << 31)) as i32
}

pub fn unsigned_long_to_sortable_bytes(value: u64) -> [u8; LONG_BYTES] {
    value.to_be_bytes()
}

pub fn sortable_bytes_to_unsigned_long(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; LONG_BYTES];
    buf.copy_from_slice(&bytes[..LONG_BYTES]);
    u64::from_be_bytes(buf)
}

pub fn double_to_sortable_long(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((bits >> 63) & i64::MAX)
}

pub fn sortable_long_to_double(sortable: i64) -> f64 {
    f64::from_bits((sortable ^ ((sortable >> 63) & i64::MAX)) as u64)
}

pub fn float_to_sortable_int(value: f32) -> i32 {
    let bits = value.to_bits() as i32;
    bits ^ ((bits >> 31) & i32::MAX)
}

pub fn sortable_int_to_float(sortable: i32) -> f32 {
    f32::from_bits((sortable ^ ((sortable >> 31) & i32::MAX)) as u32)
}

/// Point encoding of a numeric or date field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericType {
    Byte,
    Short,
    Integer,
    Long,
    UnsignedLong,
    Float,
    Double,
    /// Milliseconds since the epoch, encoded like `Long`.
    Date,
}

impl NumericType {
    pub fn bytes_len(&self) -> usize {
        match self {
            NumericType::Byte | NumericType::Short | NumericType::Integer | NumericType::Float => {
                INT_BYTES
            }
            NumericType::Long
            | NumericType::UnsignedLong
            | NumericType::Double
            | NumericType::Date => LONG_BYTES,
        }
    }

    /// Encode a range bound.
    ///
    /// Integral types round the bound up, so `value >= bound` and
    /// `value < bound` keep their meaning after encoding. Out of range bounds
    /// saturate to the type limits.
    pub fn encode_point(&self, bound: f64) -> Vec<u8> {
        match self {
            NumericType::Byte => {
                int_to_sortable_bytes(saturate_i32(bound, i8::MIN, i8::MAX)).to_vec()
            }
            NumericType::Short => {
                int_to_sortable_bytes(saturate_i32(bound, i16::MIN, i16::MAX)).to_vec()
            }
            NumericType::Integer => {
                int_to_sortable_bytes(saturate_i32(bound, i32::MIN, i32::MAX)).to_vec()
            }
            NumericType::Long | NumericType::Date => {
                long_to_sortable_bytes(bound.ceil() as i64).to_vec()
            }
            NumericType::UnsignedLong => {
                unsigned_long_to_sortable_bytes(bound.ceil() as u64).to_vec()
            }
            NumericType::Float => {
                int_to_sortable_bytes(float_to_sortable_int(bound as f32)).to_vec()
            }
            NumericType::Double => {
                long_to_sortable_bytes(double_to_sortable_long(bound)).to_vec()
            }
        }
    }

    /// Encode an exact integral value, used for date millis and fixture data.
    pub fn encode_long(&self, value: i64) -> Vec<u8> {
        match self {
            NumericType::Byte | NumericType::Short | NumericType::Integer => {
                int_to_sortable_bytes(value.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                    .to_vec()
            }
            NumericType::Long | NumericType::Date => long_to_sortable_bytes(value).to_vec(),
            NumericType::UnsignedLong => {
                unsigned_long_to_sortable_bytes(value.max(0) as u64).to_vec()
            }
            NumericType::Float => {
                int_to_sortable_bytes(float_to_sortable_int(value as f32)).to_vec()
            }
            NumericType::Double => {
                long_to_sortable_bytes(double_to_sortable_long(value as f64)).to_vec()
            }
        }
    }

    /// Decode an encoded point back into its domain value.
    pub fn decode_to_f64(&self, bytes: &[u8]) -> f64 {
        match self {
            NumericType::Byte | NumericType::Short | NumericType::Integer => {
                sortable_bytes_to_int(bytes) as f64
            }
            NumericType::Long | NumericType::Date => sortable_bytes_to_long(bytes) as f64,
            NumericType::UnsignedLong => sortable_bytes_to_unsigned_long(bytes) as f64,
            NumericType::Float => sortable_int_to_float(sortable_bytes_to_int(bytes)) as f64,
            NumericType::Double => sortable_long_to_double(sortable_bytes_to_long(bytes)),
        }
    }

    /// Decode an encoded point as a long. Only exact for integral types and dates.
    pub fn decode_to_long(&self, bytes: &[u8]) -> i64 {
        match self {
            NumericType::Long | NumericType::Date => sortable_bytes_to_long(bytes),
            NumericType::Byte | NumericType::Short | NumericType::Integer => {
                sortable_bytes_to_int(bytes) as i64
            }
            other => other.decode_to_f64(bytes) as i64,
        }
    }
}

fn saturate_i32<T: Into<i32>>(bound: f64, min: T, max: T) -> i32 {
    let (min, max) = (min.into() as f64, max.into() as f64);
    // `as` saturates on overflow and maps NaN to zero
    bound.ceil().clamp(min, max + 1.0).min(i32::MAX as f64) as i32
}

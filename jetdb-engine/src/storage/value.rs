//! Column values and their decoding from raw row bytes
//!
//! A [`Value`] is tagged by column type. Every variant except `Boolean`
//! carries an `Option`, `None` meaning SQL NULL; booleans live in the null
//! bitmap and therefore are never null.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::error::{JetError, JetResult};
use crate::schema::{Column, ColumnInfo, ColumnType};
use crate::storage::lval::LongValue;
use crate::storage::text::TextEncoding;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Convert an OLE automation date (days since 1899-12-30) to a timestamp
///
/// Rounds to the millisecond. For negative values the fractional part still
/// counts forward from midnight, so -1.25 is 1899-12-29 06:00.
pub fn ole_date(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() || days >= 2_958_466.0 || days <= -657_435.0 {
        return None;
    }

    let mut millis = (days * MILLIS_PER_DAY as f64 + if days >= 0.0 { 0.5 } else { -0.5 }) as i64;
    if millis < 0 {
        millis -= (millis % MILLIS_PER_DAY) * 2;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(chrono::Duration::milliseconds(millis))
}

/// Money value stored as a 64-bit integer scaled by 10 000
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency(pub i64);

impl Currency {
    pub const SCALE: i64 = 10_000;

    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{}{}.{:04}", sign, abs / scale, abs % scale)
    }
}

/// Exact decimal: a 96/128-bit mantissa and a decimal scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    pub negative: bool,
    pub mantissa: u128,
    pub scale: u8,
}

impl Numeric {
    /// Stored size of a numeric value
    pub const SIZE: usize = 17;

    /// Decode the sign byte and four little-endian words, most significant first
    pub fn from_bytes(bytes: &[u8], scale: u8) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut mantissa: u128 = 0;
        for word in 0..4 {
            let start = 1 + word * 4;
            mantissa = (mantissa << 32) | LittleEndian::read_u32(&bytes[start..start + 4]) as u128;
        }
        Some(Numeric {
            negative: bytes[0] & 0x80 != 0,
            mantissa,
            scale,
        })
    }

    pub fn to_f64(&self) -> f64 {
        let value = self.mantissa as f64 / 10f64.powi(self.scale as i32);
        if self.negative {
            -value
        } else {
            value
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.to_string();
        let scale = self.scale as usize;
        let sign = if self.negative && self.mantissa != 0 { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{}{}", sign, digits);
        }
        let padded = format!("{:0>width$}", digits, width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{}{}.{}", sign, int, frac)
    }
}

/// A decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(Option<u8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Currency(Option<Currency>),
    Single(Option<f32>),
    Double(Option<f64>),
    DateTime(Option<NaiveDateTime>),
    Binary(Option<Bytes>),
    Text(Option<String>),
    Ole(Option<LongValue>),
    Memo(Option<LongValue>),
    Guid(Option<Uuid>),
    Numeric(Option<Numeric>),
    Complex(Option<i32>),
    /// A column type this reader does not interpret
    Unknown { type_code: u8, raw: Option<Bytes> },
}

impl Value {
    /// Whether the value is SQL NULL
    pub fn is_null(&self) -> bool {
        match self {
            Value::Boolean(_) => false,
            Value::Byte(v) => v.is_none(),
            Value::Int16(v) => v.is_none(),
            Value::Int32(v) => v.is_none(),
            Value::Currency(v) => v.is_none(),
            Value::Single(v) => v.is_none(),
            Value::Double(v) => v.is_none(),
            Value::DateTime(v) => v.is_none(),
            Value::Binary(v) => v.is_none(),
            Value::Text(v) => v.is_none(),
            Value::Ole(v) | Value::Memo(v) => v.is_none(),
            Value::Guid(v) => v.is_none(),
            Value::Numeric(v) => v.is_none(),
            Value::Complex(v) => v.is_none(),
            Value::Unknown { raw, .. } => raw.is_none(),
        }
    }

    /// Column type this value was decoded as
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Byte(_) => ColumnType::Byte,
            Value::Int16(_) => ColumnType::Int16,
            Value::Int32(_) => ColumnType::Int32,
            Value::Currency(_) => ColumnType::Currency,
            Value::Single(_) => ColumnType::Single,
            Value::Double(_) => ColumnType::Double,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::Binary(_) => ColumnType::Binary,
            Value::Text(_) => ColumnType::Text,
            Value::Ole(_) => ColumnType::Ole,
            Value::Memo(_) => ColumnType::Memo,
            Value::Guid(_) => ColumnType::Guid,
            Value::Numeric(_) => ColumnType::Numeric,
            Value::Complex(_) => ColumnType::Complex,
            Value::Unknown { type_code, .. } => ColumnType::Unknown(*type_code),
        }
    }

    fn cast_error(&self, requested: &'static str) -> JetError {
        JetError::InvalidCast {
            column_type: self.column_type(),
            requested,
        }
    }

    pub fn as_bool(&self) -> JetResult<bool> {
        match self {
            Value::Boolean(v) => Ok(*v),
            _ => Err(self.cast_error("bool")),
        }
    }

    /// Integer value of a Byte, Int16 or Int32 column
    pub fn as_i32(&self) -> JetResult<Option<i32>> {
        match self {
            Value::Byte(v) => Ok(v.map(i32::from)),
            Value::Int16(v) => Ok(v.map(i32::from)),
            Value::Int32(v) => Ok(*v),
            _ => Err(self.cast_error("i32")),
        }
    }

    /// Floating point value of any numeric column
    pub fn as_f64(&self) -> JetResult<Option<f64>> {
        match self {
            Value::Byte(v) => Ok(v.map(f64::from)),
            Value::Int16(v) => Ok(v.map(f64::from)),
            Value::Int32(v) => Ok(v.map(f64::from)),
            Value::Single(v) => Ok(v.map(f64::from)),
            Value::Double(v) => Ok(*v),
            Value::Currency(v) => Ok(v.map(|c| c.to_f64())),
            Value::Numeric(v) => Ok(v.map(|n| n.to_f64())),
            _ => Err(self.cast_error("f64")),
        }
    }

    pub fn as_str(&self) -> JetResult<Option<&str>> {
        match self {
            Value::Text(v) => Ok(v.as_deref()),
            _ => Err(self.cast_error("string")),
        }
    }

    pub fn as_datetime(&self) -> JetResult<Option<NaiveDateTime>> {
        match self {
            Value::DateTime(v) => Ok(*v),
            _ => Err(self.cast_error("date/time")),
        }
    }

    pub fn as_guid(&self) -> JetResult<Option<Uuid>> {
        match self {
            Value::Guid(v) => Ok(*v),
            _ => Err(self.cast_error("guid")),
        }
    }

    pub fn as_bytes(&self) -> JetResult<Option<&Bytes>> {
        match self {
            Value::Binary(v) => Ok(v.as_ref()),
            Value::Unknown { raw, .. } => Ok(raw.as_ref()),
            _ => Err(self.cast_error("bytes")),
        }
    }

    /// Long-value pointer of a Memo or OLE column
    pub fn as_long_value(&self) -> JetResult<Option<&LongValue>> {
        match self {
            Value::Memo(v) | Value::Ole(v) => Ok(v.as_ref()),
            _ => Err(self.cast_error("long value")),
        }
    }

    /// Like [`Value::as_i32`] but NULL is an error
    pub fn require_i32(&self) -> JetResult<i32> {
        self.as_i32()?.ok_or(JetError::NullValue("i32"))
    }

    /// Like [`Value::as_str`] but NULL is an error
    pub fn require_str(&self) -> JetResult<&str> {
        self.as_str()?.ok_or(JetError::NullValue("string"))
    }
}

impl fmt::Display for Value {
    /// NULL renders as an empty string
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Byte(Some(v)) => write!(f, "{}", v),
            Value::Int16(Some(v)) => write!(f, "{}", v),
            Value::Int32(Some(v)) => write!(f, "{}", v),
            Value::Currency(Some(v)) => write!(f, "{}", v),
            Value::Single(Some(v)) => write!(f, "{}", v),
            Value::Double(Some(v)) => write!(f, "{}", v),
            Value::DateTime(Some(v)) => write!(f, "{}", v),
            Value::Binary(Some(v)) => write_hex(f, v),
            Value::Text(Some(v)) => f.write_str(v),
            Value::Ole(Some(v)) | Value::Memo(Some(v)) => {
                write!(f, "<long value, {} bytes>", v.len())
            }
            Value::Guid(Some(v)) => write!(f, "{{{}}}", v),
            Value::Numeric(Some(v)) => write!(f, "{}", v),
            Value::Complex(Some(v)) => write!(f, "{}", v),
            Value::Unknown { raw: Some(v), .. } => write_hex(f, v),
            _ => Ok(()),
        }
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("0x")?;
    for b in bytes {
        write!(f, "{:02X}", b)?;
    }
    Ok(())
}

/// Raw bytes of one column as cut out of a row
#[derive(Debug, Clone)]
pub struct RawField {
    /// Column slice; `None` when the column is absent from the row
    pub bytes: Option<Bytes>,
    /// Null-bitmap state (for booleans, this is the value)
    pub is_null: bool,
}

fn take<const N: usize>(bytes: &[u8], page: u32, column: &Column) -> JetResult<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            JetError::invalid_data(
                page,
                format!(
                    "column '{}' holds {} bytes, {} needed for {:?}",
                    column.name,
                    bytes.len(),
                    N,
                    column.column_type
                ),
            )
        })
}

/// Decode one field of a row on `page` according to its column
pub fn decode(
    column: &Column,
    field: RawField,
    default_encoding: TextEncoding,
    page: u32,
) -> JetResult<Value> {
    let is_null = field.is_null;
    let bytes = match field.bytes {
        Some(bytes) if !is_null => Some(bytes),
        _ => None,
    };

    let value = match column.column_type {
        ColumnType::Boolean => Value::Boolean(!is_null),
        ColumnType::Byte => Value::Byte(match bytes {
            Some(b) => Some(take::<1>(&b, page, column)?[0]),
            None => None,
        }),
        ColumnType::Int16 => Value::Int16(match bytes {
            Some(b) => Some(i16::from_le_bytes(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::Int32 => Value::Int32(match bytes {
            Some(b) => Some(i32::from_le_bytes(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::Currency => Value::Currency(match bytes {
            Some(b) => Some(Currency(i64::from_le_bytes(take(&b, page, column)?))),
            None => None,
        }),
        ColumnType::Single => Value::Single(match bytes {
            Some(b) => Some(f32::from_le_bytes(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::Double => Value::Double(match bytes {
            Some(b) => Some(f64::from_le_bytes(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::DateTime => Value::DateTime(match bytes {
            Some(b) => {
                let days = f64::from_le_bytes(take(&b, page, column)?);
                Some(ole_date(days).ok_or_else(|| {
                    JetError::invalid_data(page, format!("date value {} is out of range", days))
                })?)
            }
            None => None,
        }),
        ColumnType::Binary => Value::Binary(bytes),
        ColumnType::Text => {
            let encoding = match &column.info {
                ColumnInfo::Text { encoding, .. } => *encoding,
                _ => default_encoding,
            };
            Value::Text(bytes.map(|b| encoding.decode(&b)))
        }
        ColumnType::Memo => {
            let encoding = match &column.info {
                ColumnInfo::Text { encoding, .. } => *encoding,
                _ => default_encoding,
            };
            Value::Memo(match bytes {
                Some(b) => Some(LongValue::new(b, Some(encoding), page)?),
                None => None,
            })
        }
        ColumnType::Ole => Value::Ole(match bytes {
            Some(b) => Some(LongValue::new(b, None, page)?),
            None => None,
        }),
        ColumnType::Guid => Value::Guid(match bytes {
            Some(b) => Some(Uuid::from_bytes_le(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::Numeric => {
            let scale = match column.info {
                ColumnInfo::Decimal { scale, .. } => scale,
                _ => 0,
            };
            Value::Numeric(match bytes {
                Some(b) => Some(Numeric::from_bytes(&b, scale).ok_or_else(|| {
                    JetError::invalid_data(
                        page,
                        format!("numeric column '{}' is truncated", column.name),
                    )
                })?),
                None => None,
            })
        }
        ColumnType::Complex => Value::Complex(match bytes {
            Some(b) => Some(i32::from_le_bytes(take(&b, page, column)?)),
            None => None,
        }),
        ColumnType::Unknown(type_code) => Value::Unknown {
            type_code,
            raw: bytes,
        },
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnFlags;

    fn column(column_type: ColumnType) -> Column {
        Column {
            name: "Field".into(),
            column_type,
            number: 0,
            number_incl_deleted: 0,
            offset_variable: 0,
            offset_fixed: 0,
            length: 0,
            flags: ColumnFlags::NULLABLE,
            info: ColumnInfo::Decimal {
                precision: 0,
                scale: 0,
            },
        }
    }

    fn present(bytes: &[u8]) -> RawField {
        RawField {
            bytes: Some(Bytes::copy_from_slice(bytes)),
            is_null: false,
        }
    }

    fn decode_as(column_type: ColumnType, bytes: &[u8]) -> Value {
        decode(
            &column(column_type),
            present(bytes),
            TextEncoding::compressed(1252),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_ole_dates() {
        assert_eq!(ole_date(0.0).unwrap().to_string(), "1899-12-30 00:00:00");
        assert_eq!(
            ole_date(36526.25).unwrap().to_string(),
            "2000-01-01 06:00:00"
        );
        assert_eq!(
            ole_date(-1.25).unwrap().to_string(),
            "1899-12-29 06:00:00"
        );
        assert!(ole_date(f64::NAN).is_none());
        assert!(ole_date(3e6).is_none());
    }

    #[test]
    fn test_fixed_width_values() {
        assert_eq!(decode_as(ColumnType::Byte, &[0xFE]), Value::Byte(Some(254)));
        assert_eq!(
            decode_as(ColumnType::Int16, &[0xFE, 0xFF]),
            Value::Int16(Some(-2))
        );
        assert_eq!(
            decode_as(ColumnType::Int32, &1_000_000i32.to_le_bytes()),
            Value::Int32(Some(1_000_000))
        );
        assert_eq!(
            decode_as(ColumnType::Double, &2.5f64.to_le_bytes()),
            Value::Double(Some(2.5))
        );
        assert_eq!(
            decode_as(ColumnType::Single, &0.5f32.to_le_bytes()),
            Value::Single(Some(0.5))
        );
    }

    #[test]
    fn test_currency_scaling() {
        let value = decode_as(ColumnType::Currency, &1_826_000i64.to_le_bytes());
        assert_eq!(value, Value::Currency(Some(Currency(1_826_000))));
        assert_eq!(value.to_string(), "182.6000");
        assert_eq!(Currency(-5).to_string(), "-0.0005");
        assert_eq!(value.as_f64().unwrap(), Some(182.6));
    }

    #[test]
    fn test_guid_byte_order() {
        let bytes = [
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        let value = decode_as(ColumnType::Guid, &bytes);
        assert_eq!(
            value.as_guid().unwrap().unwrap().to_string(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
    }

    #[test]
    fn test_numeric() {
        // -12345.678 with scale 3
        let mut bytes = [0u8; 17];
        bytes[0] = 0x80;
        bytes[13..17].copy_from_slice(&12_345_678u32.to_le_bytes());
        let numeric = Numeric::from_bytes(&bytes, 3).unwrap();
        assert!(numeric.negative);
        assert_eq!(numeric.mantissa, 12_345_678);
        assert_eq!(numeric.to_string(), "-12345.678");

        // Most significant word comes first
        let mut bytes = [0u8; 17];
        bytes[9..13].copy_from_slice(&1u32.to_le_bytes());
        let numeric = Numeric::from_bytes(&bytes, 2).unwrap();
        assert_eq!(numeric.mantissa, 1u128 << 32);
        assert_eq!(Numeric { negative: false, mantissa: 5, scale: 2 }.to_string(), "0.05");
    }

    #[test]
    fn test_null_and_boolean() {
        let null = RawField {
            bytes: Some(Bytes::from_static(&[1, 2, 3, 4])),
            is_null: true,
        };
        let value = decode(
            &column(ColumnType::Int32),
            null.clone(),
            TextEncoding::Utf16,
            1,
        )
        .unwrap();
        assert_eq!(value, Value::Int32(None));
        assert!(value.is_null());
        assert!(matches!(value.require_i32(), Err(JetError::NullValue(_))));

        let flag = decode(&column(ColumnType::Boolean), null, TextEncoding::Utf16, 1).unwrap();
        assert_eq!(flag, Value::Boolean(false));
        assert!(!flag.is_null());
        let flag = decode(
            &column(ColumnType::Boolean),
            RawField { bytes: None, is_null: false },
            TextEncoding::Utf16,
            1,
        )
        .unwrap();
        assert_eq!(flag, Value::Boolean(true));
    }

    #[test]
    fn test_truncated_value_is_invalid_data() {
        let err = decode(
            &column(ColumnType::Double),
            present(&[0, 1, 2]),
            TextEncoding::Utf16,
            17,
        )
        .unwrap_err();
        assert!(matches!(err, JetError::InvalidData { page: 17, .. }));
    }

    #[test]
    fn test_invalid_cast() {
        let value = Value::Text(Some("abc".into()));
        assert_eq!(value.require_str().unwrap(), "abc");
        assert!(matches!(
            value.as_i32(),
            Err(JetError::InvalidCast {
                column_type: ColumnType::Text,
                ..
            })
        ));
    }

    #[test]
    fn test_text_uses_column_encoding() {
        let mut col = column(ColumnType::Text);
        col.info = ColumnInfo::Text {
            collation: 0x0409,
            codepage: 1251,
            encoding: TextEncoding::for_codepage(1251),
        };
        let value = decode(&col, present(&[0xC4, 0xE0]), TextEncoding::Utf16, 1).unwrap();
        assert_eq!(value.as_str().unwrap(), Some("Да"));
    }
}

//! MySQL type system and value decoding.
//!
//! This module provides:
//! - MySQL field type constants
//! - Column definitions for both the 4.1 and the pre-4.1 layouts
//! - Decoding of text-protocol and binary-protocol row values
//!
//! # MySQL Type System
//!
//! MySQL uses field type codes in result sets and binary protocol.
//! The encoding differs between text protocol (all strings) and
//! binary protocol (type-specific binary encoding).

#![allow(clippy::cast_possible_truncation)]

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use wirebase_core::value::MICROS_PER_DAY;
use wirebase_core::{Error, Result, Value};

use crate::charset::{self, TextCodec};
use crate::protocol::PacketBuffer;

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE) - internal use
    NewDate = 0x0E,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// TIMESTAMP2 (MYSQL_TYPE_TIMESTAMP2) - MySQL 5.6+
    Timestamp2 = 0x11,
    /// DATETIME2 (MYSQL_TYPE_DATETIME2) - MySQL 5.6+
    DateTime2 = 0x12,
    /// TIME2 (MYSQL_TYPE_TIME2) - MySQL 5.6+
    Time2 = 0x13,
    /// JSON (MYSQL_TYPE_JSON) - MySQL 5.7.8+
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::String, // Unknown types treated as string
        }
    }

    /// Check if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    #[must_use]
    pub const fn is_decimal(self) -> bool {
        matches!(self, FieldType::Decimal | FieldType::NewDecimal)
    }

    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            FieldType::VarChar
                | FieldType::VarString
                | FieldType::String
                | FieldType::Enum
                | FieldType::Set
        )
    }

    /// Check if this is a binary/blob type.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    /// Get the type name as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column definition from a result set.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Catalog name ("def"; empty for pre-4.1 servers)
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Collation id of the column's values
    pub charset: u16,
    /// Column length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
    /// How string values of this column are decoded
    pub codec: TextCodec,
}

impl ColumnDef {
    /// A minimal definition, mostly useful for building results by hand.
    pub fn new(name: impl Into<String>, column_type: FieldType) -> Self {
        let name = name.into();
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            charset: charset::UTF8MB4_GENERAL_CI,
            column_length: 0,
            column_type,
            flags: 0,
            decimals: 0,
            codec: TextCodec::Utf8,
        }
    }

    /// Builder-style flag setter.
    #[must_use]
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Builder-style collation setter; the codec follows the collation.
    #[must_use]
    pub fn with_charset(mut self, collation: u16) -> Self {
        self.charset = collation;
        self.codec = TextCodec::for_collation(collation);
        self
    }

    /// Parse a 4.1 column definition packet.
    ///
    /// `metadata` decodes the name fields (the session's result charset).
    pub fn parse_41(buf: &mut PacketBuffer, metadata: TextCodec) -> Result<Self> {
        let text = |buf: &mut PacketBuffer| -> Result<String> {
            Ok(metadata.decode(buf.read_lenenc_bytes()?).into_owned())
        };
        let catalog = text(buf)?;
        let schema = text(buf)?;
        let table = text(buf)?;
        let org_table = text(buf)?;
        let name = text(buf)?;
        let org_name = text(buf)?;
        // Length of the fixed-size block, always 0x0c
        let _ = buf.read_length()?;
        let charset = buf.read_u16()?;
        let column_length = buf.read_u32()?;
        let column_type = FieldType::from_u8(buf.read_u8()?);
        let flags = buf.read_u16()?;
        let decimals = buf.read_u8()?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
            codec: TextCodec::for_collation(charset),
        })
    }

    /// Parse a pre-4.1 column definition packet.
    ///
    /// Old servers send table, name, a 3-byte length, a 1-byte type and a
    /// flags/decimals block whose width depends on `CLIENT_LONG_FLAG`.
    /// Values use the connection collation, passed as `connection_charset`.
    pub fn parse_320(buf: &mut PacketBuffer, connection_charset: u16) -> Result<Self> {
        let codec = TextCodec::for_collation(connection_charset);
        let table = codec.decode(buf.read_lenenc_bytes()?).into_owned();
        let name = codec.decode(buf.read_lenenc_bytes()?).into_owned();

        let length_width = buf.read_length()?;
        let column_length = match length_width {
            3 => buf.read_u24()?,
            n => {
                let bytes = buf.read_bytes(n as usize)?;
                bytes.iter().rev().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
            }
        };

        let type_width = buf.read_length()?;
        let column_type = FieldType::from_u8(buf.read_u8()?);
        if type_width > 1 {
            buf.skip(type_width as usize - 1)?;
        }

        let flags_width = buf.read_length()?;
        let (flags, decimals) = if flags_width >= 3 {
            (buf.read_u16()?, buf.read_u8()?)
        } else {
            (u16::from(buf.read_u8()?), buf.read_u8()?)
        };

        let charset = if flags & column_flags::BINARY != 0 && column_type.is_blob() {
            charset::BINARY
        } else {
            connection_charset
        };

        Ok(Self {
            catalog: String::new(),
            schema: String::new(),
            org_table: table.clone(),
            table,
            org_name: name.clone(),
            name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
            codec: TextCodec::for_collation(charset),
        })
    }

    /// Check if the column is NOT NULL.
    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    /// Check if the column is a primary key.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Check if the column is unsigned.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is auto-increment.
    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Check if the column is binary.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.flags & column_flags::BINARY != 0
    }

    /// Check if the column is a BLOB type.
    #[must_use]
    pub const fn is_blob(&self) -> bool {
        self.flags & column_flags::BLOB != 0
    }

    /// Values carry raw bytes rather than text in a charset.
    #[must_use]
    pub const fn has_binary_charset(&self) -> bool {
        self.charset == charset::BINARY
    }
}

/// Decode a text protocol value.
///
/// In text protocol, all values are transmitted as strings.
/// This function parses the string based on the column type. Text that
/// does not parse for its declared type is returned as [`Value::Text`].
pub fn decode_text_value(col: &ColumnDef, data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data);
    let as_text = || Value::Text(text.clone().into_owned());
    let unsigned = col.is_unsigned();

    match col.column_type {
        FieldType::Tiny if unsigned => {
            text.parse::<u8>().map_or_else(|_| as_text(), |v| Value::SmallInt(i16::from(v)))
        }
        FieldType::Tiny => text.parse::<i8>().map_or_else(|_| as_text(), Value::TinyInt),
        FieldType::Short if unsigned => {
            text.parse::<u16>().map_or_else(|_| as_text(), |v| Value::Int(i32::from(v)))
        }
        FieldType::Short | FieldType::Year => {
            text.parse::<i16>().map_or_else(|_| as_text(), Value::SmallInt)
        }
        FieldType::Long if unsigned => {
            text.parse::<u32>().map_or_else(|_| as_text(), |v| Value::BigInt(i64::from(v)))
        }
        FieldType::Long | FieldType::Int24 => {
            text.parse::<i32>().map_or_else(|_| as_text(), Value::Int)
        }
        FieldType::LongLong if unsigned => {
            text.parse::<u64>().map_or_else(|_| as_text(), Value::UnsignedBigInt)
        }
        FieldType::LongLong => text.parse::<i64>().map_or_else(|_| as_text(), Value::BigInt),

        FieldType::Float => text.parse::<f32>().map_or_else(|_| as_text(), Value::Float),
        FieldType::Double => text.parse::<f64>().map_or_else(|_| as_text(), Value::Double),

        // Decimal (keep as text to preserve precision)
        FieldType::Decimal | FieldType::NewDecimal => Value::Decimal(text.to_string()),

        FieldType::Date | FieldType::NewDate => {
            parse_date(&text).map_or_else(as_text, |d| Value::Date(days_since_epoch(d)))
        }
        FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => parse_datetime(&text)
            .map_or_else(as_text, |dt| Value::Timestamp(dt.and_utc().timestamp_micros())),
        FieldType::Time | FieldType::Time2 => parse_time(&text).map_or_else(as_text, Value::Time),

        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),

        FieldType::Json => serde_json::from_str(&text).map_or_else(|_| as_text(), Value::Json),

        FieldType::Null => Value::Null,

        // Strings and blobs: bytes for the binary charset, text otherwise
        _ if col.has_binary_charset() => Value::Bytes(data.to_vec()),
        _ => Value::Text(col.codec.decode(data).into_owned()),
    }
}

/// Decode a binary protocol row (`0x00` header, null bitmap, values).
pub fn decode_binary_row(columns: &[ColumnDef], buf: &mut PacketBuffer) -> Result<Vec<Value>> {
    let header = buf.read_u8()?;
    if header != 0x00 {
        return Err(Error::protocol(format!(
            "binary row starts with 0x{header:02X}, expected 0x00"
        )));
    }
    // Result-row bitmaps are offset by two bits
    let bitmap = buf.read_bytes((columns.len() + 9) / 8)?.to_vec();
    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
        } else {
            values.push(decode_binary_value(col, buf)?);
        }
    }
    Ok(values)
}

/// Decode one binary protocol value, consuming exactly its bytes.
pub fn decode_binary_value(col: &ColumnDef, buf: &mut PacketBuffer) -> Result<Value> {
    let unsigned = col.is_unsigned();
    Ok(match col.column_type {
        FieldType::Tiny if unsigned => Value::SmallInt(i16::from(buf.read_u8()?)),
        FieldType::Tiny => Value::TinyInt(buf.read_u8()? as i8),
        FieldType::Short if unsigned => Value::Int(i32::from(buf.read_u16()?)),
        FieldType::Short | FieldType::Year => Value::SmallInt(buf.read_u16()? as i16),
        FieldType::Long | FieldType::Int24 if unsigned => {
            Value::BigInt(i64::from(buf.read_u32()?))
        }
        FieldType::Long | FieldType::Int24 => Value::Int(buf.read_u32()? as i32),
        FieldType::LongLong if unsigned => Value::UnsignedBigInt(buf.read_u64()?),
        FieldType::LongLong => Value::BigInt(buf.read_u64()? as i64),
        FieldType::Float => Value::Float(f32::from_bits(buf.read_u32()?)),
        FieldType::Double => Value::Double(f64::from_bits(buf.read_u64()?)),
        FieldType::Null => Value::Null,

        FieldType::Date | FieldType::NewDate => {
            let len = buf.read_u8()?;
            let parts = read_date_parts(buf, len)?;
            match parts.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)) {
                Some(date) => Value::Date(days_since_epoch(date)),
                None => Value::Text("0000-00-00".to_string()),
            }
        }
        FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => {
            let len = buf.read_u8()?;
            let date = read_date_parts(buf, len)?;
            let (h, mi, s) = if len >= 7 {
                (buf.read_u8()?, buf.read_u8()?, buf.read_u8()?)
            } else {
                (0, 0, 0)
            };
            let micros = if len >= 11 { buf.read_u32()? } else { 0 };
            let dt = date
                .and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
                .and_then(|d| {
                    d.and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), micros)
                });
            match dt {
                Some(dt) => Value::Timestamp(dt.and_utc().timestamp_micros()),
                None => Value::Text("0000-00-00 00:00:00".to_string()),
            }
        }
        FieldType::Time | FieldType::Time2 => {
            let len = buf.read_u8()?;
            if len == 0 {
                Value::Time(0)
            } else {
                let negative = buf.read_u8()? != 0;
                let days = i64::from(buf.read_u32()?);
                let h = i64::from(buf.read_u8()?);
                let m = i64::from(buf.read_u8()?);
                let s = i64::from(buf.read_u8()?);
                let micros = if len >= 12 { i64::from(buf.read_u32()?) } else { 0 };
                let total = days * MICROS_PER_DAY + ((h * 60 + m) * 60 + s) * 1_000_000 + micros;
                Value::Time(if negative { -total } else { total })
            }
        }

        // Everything else is length-encoded and shares the text rules
        _ => {
            let data = buf.read_lenenc_bytes()?.to_vec();
            decode_text_value(col, &data)
        }
    })
}

fn read_date_parts(buf: &mut PacketBuffer, len: u8) -> Result<Option<(i32, u32, u32)>> {
    if len < 4 {
        return Ok(None);
    }
    let year = i32::from(buf.read_u16()?);
    let month = u32::from(buf.read_u8()?);
    let day = u32::from(buf.read_u8()?);
    Ok(Some((year, month, day)))
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| parse_date(text).map(|d| d.and_time(NaiveTime::MIN)))
}

/// Parse `[-]H+:MM:SS[.ffffff]` into signed microseconds.
fn parse_time(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, fraction) = match body.split_once('.') {
        Some((c, f)) => (c, Some(f)),
        None => (body, None),
    };
    let mut parts = clock.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || m >= 60 || s >= 60 {
        return None;
    }
    let micros = match fraction {
        Some(f) if !f.is_empty() && f.len() <= 6 && f.bytes().all(|b| b.is_ascii_digit()) => {
            let padded = format!("{f:0<6}");
            padded.parse::<i64>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };
    let total = ((h * 60 + m) * 60 + s) * 1_000_000 + micros;
    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(ty: FieldType) -> ColumnDef {
        ColumnDef::new("c", ty)
    }

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0x03), FieldType::Long);
        assert_eq!(FieldType::from_u8(0x08), FieldType::LongLong);
        assert_eq!(FieldType::from_u8(0xFC), FieldType::Blob);
        assert_eq!(FieldType::from_u8(0xF5), FieldType::Json);
    }

    #[test]
    fn test_field_type_categories() {
        assert!(FieldType::Tiny.is_integer());
        assert!(FieldType::LongLong.is_integer());
        assert!(FieldType::Double.is_float());
        assert!(FieldType::NewDecimal.is_decimal());
        assert!(FieldType::VarChar.is_string());
        assert!(FieldType::TinyBlob.is_blob());
        assert!(FieldType::Timestamp.is_temporal());
    }

    #[test]
    fn test_decode_text_integers() {
        assert!(matches!(
            decode_text_value(&col(FieldType::Long), b"42"),
            Value::Int(42)
        ));
        assert!(matches!(
            decode_text_value(&col(FieldType::LongLong), b"-100"),
            Value::BigInt(-100)
        ));
        let unsigned = col(FieldType::LongLong).with_flags(column_flags::UNSIGNED);
        assert!(matches!(
            decode_text_value(&unsigned, b"18446744073709551615"),
            Value::UnsignedBigInt(u64::MAX)
        ));
        let utiny = col(FieldType::Tiny).with_flags(column_flags::UNSIGNED);
        assert!(matches!(decode_text_value(&utiny, b"255"), Value::SmallInt(255)));
    }

    #[test]
    fn test_decode_text_temporal() {
        let d = decode_text_value(&col(FieldType::Date), b"2024-02-29");
        assert_eq!(d.as_date(), NaiveDate::from_ymd_opt(2024, 2, 29));

        let dt = decode_text_value(&col(FieldType::DateTime), b"2024-02-29 13:14:15.5");
        assert_eq!(
            dt.temporal_literal().as_deref(),
            Some("2024-02-29 13:14:15.500000")
        );

        let t = decode_text_value(&col(FieldType::Time), b"-838:59:59");
        assert!(matches!(t, Value::Time(us) if us == -((838 * 3600 + 59 * 60 + 59) * 1_000_000)));

        // Zero dates do not map to a calendar date
        let zero = decode_text_value(&col(FieldType::Date), b"0000-00-00");
        assert!(matches!(zero, Value::Text(s) if s == "0000-00-00"));
    }

    #[test]
    fn test_decode_text_strings() {
        assert!(matches!(
            decode_text_value(&col(FieldType::VarChar), b"hello"),
            Value::Text(s) if s == "hello"
        ));
        let latin1 = col(FieldType::VarString).with_charset(crate::charset::LATIN1_SWEDISH_CI);
        assert!(matches!(
            decode_text_value(&latin1, &[0x63, 0x61, 0x66, 0xE9]),
            Value::Text(s) if s == "café"
        ));
        let blob = col(FieldType::Blob).with_charset(crate::charset::BINARY);
        assert!(matches!(
            decode_text_value(&blob, &[0, 1, 2]),
            Value::Bytes(b) if b == [0, 1, 2]
        ));
        assert!(matches!(
            decode_text_value(&col(FieldType::NewDecimal), b"12.50"),
            Value::Decimal(s) if s == "12.50"
        ));
    }

    #[test]
    fn test_decode_binary_values() {
        let mut buf = PacketBuffer::from_payload(vec![0xFF]);
        assert!(matches!(
            decode_binary_value(&col(FieldType::Tiny), &mut buf).unwrap(),
            Value::TinyInt(-1)
        ));

        let mut buf = PacketBuffer::from_payload(vec![0xFF]);
        let utiny = col(FieldType::Tiny).with_flags(column_flags::UNSIGNED);
        assert!(matches!(
            decode_binary_value(&utiny, &mut buf).unwrap(),
            Value::SmallInt(255)
        ));

        let mut buf = PacketBuffer::from_payload(3.5f64.to_le_bytes().to_vec());
        assert!(matches!(
            decode_binary_value(&col(FieldType::Double), &mut buf).unwrap(),
            Value::Double(f) if (f - 3.5).abs() < f64::EPSILON
        ));

        let mut buf = PacketBuffer::from_payload(vec![7, 0xE8, 0x07, 3, 9, 1, 2, 3]);
        let v = decode_binary_value(&col(FieldType::DateTime), &mut buf).unwrap();
        assert_eq!(v.temporal_literal().as_deref(), Some("2024-03-09 01:02:03"));

        let mut buf = PacketBuffer::from_payload(vec![8, 1, 1, 0, 0, 0, 0, 1, 1]);
        let v = decode_binary_value(&col(FieldType::Time), &mut buf).unwrap();
        assert!(matches!(v, Value::Time(us) if us == -(86_400 + 61) * 1_000_000));
    }

    #[test]
    fn test_decode_binary_row_bitmap() {
        let columns = vec![
            col(FieldType::Long),
            col(FieldType::VarString),
            col(FieldType::Long),
        ];
        // Column 1 is NULL: bit (1 + 2) set
        let mut buf = PacketBuffer::from_payload(vec![0x00, 0b0000_1000, 7, 0, 0, 0, 9, 0, 0, 0]);
        let row = decode_binary_row(&columns, &mut buf).unwrap();
        assert!(matches!(row[0], Value::Int(7)));
        assert!(row[1].is_null());
        assert!(matches!(row[2], Value::Int(9)));
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_parse_column_41() {
        let mut buf = PacketBuffer::new(64);
        for s in ["def", "shop", "p", "products", "id", "id"] {
            buf.write_lenenc_bytes(s.as_bytes()).unwrap();
        }
        buf.write_length(0x0c).unwrap();
        buf.write_u16(63).unwrap();
        buf.write_u32(20).unwrap();
        buf.write_u8(0x08).unwrap();
        buf.write_u16(column_flags::NOT_NULL | column_flags::UNSIGNED).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_zeros(2).unwrap();
        buf.rewind();

        let col = ColumnDef::parse_41(&mut buf, TextCodec::Utf8).unwrap();
        assert_eq!(col.name, "id");
        assert_eq!(col.table, "p");
        assert_eq!(col.org_table, "products");
        assert_eq!(col.column_type, FieldType::LongLong);
        assert!(col.is_unsigned());
        assert!(col.is_not_null());
        assert!(col.has_binary_charset());
    }

    #[test]
    fn test_parse_column_320() {
        let mut buf = PacketBuffer::new(32);
        buf.write_lenenc_bytes(b"t").unwrap();
        buf.write_lenenc_bytes(b"name").unwrap();
        buf.write_length(3).unwrap();
        buf.write_u24(255).unwrap();
        buf.write_length(1).unwrap();
        buf.write_u8(0xFD).unwrap();
        buf.write_length(3).unwrap();
        buf.write_u16(column_flags::NOT_NULL).unwrap();
        buf.write_u8(0).unwrap();
        buf.rewind();

        let col = ColumnDef::parse_320(&mut buf, crate::charset::LATIN1_SWEDISH_CI).unwrap();
        assert_eq!(col.name, "name");
        assert_eq!(col.table, "t");
        assert_eq!(col.column_length, 255);
        assert_eq!(col.column_type, FieldType::VarString);
        assert!(col.is_not_null());
        assert_eq!(col.codec, TextCodec::Latin1);
    }

    #[test]
    fn test_parse_time_forms() {
        assert_eq!(parse_time("01:02:03"), Some(3_723_000_000));
        assert_eq!(parse_time("00:00:00.25"), Some(250_000));
        assert_eq!(parse_time("12:61:00"), None);
        assert_eq!(parse_time("bogus"), None);
    }
}

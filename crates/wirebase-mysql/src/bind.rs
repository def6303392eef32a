//! Parameter binding and encoding.
//!
//! A [`Bindings`] holds one [`BindSlot`] per placeholder. Each slot carries
//! a [`BindValue`], an optional declared target type, an optional length
//! hint and an escape flag. Before a slot is written, [`encoding_for`]
//! decides how its value is rendered for the declared target; pairs the
//! table does not list are type errors.
//!
//! Text protocol: the statement's static segments are written with each
//! value in between, quoted and escaped per the session's
//! `NO_BACKSLASH_ESCAPES` mode. Binary protocol: see
//! [`crate::protocol::prepared`].

#![allow(clippy::cast_possible_truncation)]

use std::fmt;
use std::io::{self, Read};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use wirebase_core::error::{TypeError, UsageError, UsageErrorKind};
use wirebase_core::value::format_time_micros;
use wirebase_core::{Error, Result, Value};

use crate::charset::TextCodec;
use crate::protocol::PacketBuffer;
use crate::query::QueryInfo;
use crate::types::FieldType;

/// Chunk size used when draining streams.
const STREAM_CHUNK: usize = 8192;

/// A date, time-of-day/duration or date-time parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date(NaiveDate),
    /// Signed microseconds; may exceed one day.
    Time(i64),
    DateTime(NaiveDateTime),
}

impl Temporal {
    /// MySQL literal text without quotes.
    pub fn literal(&self) -> String {
        match self {
            Temporal::Date(d) => d.format("%Y-%m-%d").to_string(),
            Temporal::Time(us) => format_time_micros(*us),
            Temporal::DateTime(dt) => {
                if dt.nanosecond() == 0 {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
                }
            }
        }
    }
}

/// A parameter value.
pub enum BindValue {
    Null,
    Integer(i64),
    Unsigned(u64),
    Floating(f64),
    /// Exact numeric kept as text
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Drained while the statement is encoded
    Stream(Box<dyn Read + Send>),
    Temporal(Temporal),
    Json(serde_json::Value),
}

impl fmt::Debug for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Null => f.write_str("Null"),
            BindValue::Integer(v) => f.debug_tuple("Integer").field(v).finish(),
            BindValue::Unsigned(v) => f.debug_tuple("Unsigned").field(v).finish(),
            BindValue::Floating(v) => f.debug_tuple("Floating").field(v).finish(),
            BindValue::Decimal(v) => f.debug_tuple("Decimal").field(v).finish(),
            BindValue::Text(v) => f.debug_tuple("Text").field(v).finish(),
            BindValue::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            BindValue::Stream(_) => f.write_str("Stream(..)"),
            BindValue::Temporal(v) => f.debug_tuple("Temporal").field(v).finish(),
            BindValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

/// Payload-free tag of a [`BindValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Integer,
    Unsigned,
    Floating,
    Decimal,
    Text,
    Bytes,
    Stream,
    Temporal,
    Json,
}

impl ValueKind {
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "NULL",
            ValueKind::Integer => "integer",
            ValueKind::Unsigned => "unsigned integer",
            ValueKind::Floating => "floating point",
            ValueKind::Decimal => "decimal",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Stream => "stream",
            ValueKind::Temporal => "temporal",
            ValueKind::Json => "JSON",
        }
    }
}

impl BindValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            BindValue::Null => ValueKind::Null,
            BindValue::Integer(_) => ValueKind::Integer,
            BindValue::Unsigned(_) => ValueKind::Unsigned,
            BindValue::Floating(_) => ValueKind::Floating,
            BindValue::Decimal(_) => ValueKind::Decimal,
            BindValue::Text(_) => ValueKind::Text,
            BindValue::Bytes(_) => ValueKind::Bytes,
            BindValue::Stream(_) => ValueKind::Stream,
            BindValue::Temporal(_) => ValueKind::Temporal,
            BindValue::Json(_) => ValueKind::Json,
        }
    }

    /// Wrap a reader whose content is sent as the parameter value.
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        BindValue::Stream(Box::new(reader))
    }
}

impl From<Value> for BindValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Integer(i64::from(b)),
            Value::TinyInt(v) => BindValue::Integer(i64::from(v)),
            Value::SmallInt(v) => BindValue::Integer(i64::from(v)),
            Value::Int(v) => BindValue::Integer(i64::from(v)),
            Value::BigInt(v) => BindValue::Integer(v),
            Value::UnsignedBigInt(v) => BindValue::Unsigned(v),
            Value::Float(v) => BindValue::Floating(f64::from(v)),
            Value::Double(v) => BindValue::Floating(v),
            Value::Decimal(s) => BindValue::Decimal(s),
            Value::Text(s) => BindValue::Text(s),
            Value::Bytes(b) => BindValue::Bytes(b),
            Value::Json(j) => BindValue::Json(j),
            Value::Time(us) => BindValue::Temporal(Temporal::Time(us)),
            Value::Date(_) => value
                .as_date()
                .map_or(BindValue::Null, |d| BindValue::Temporal(Temporal::Date(d))),
            Value::Timestamp(_) => value
                .as_datetime()
                .map_or(BindValue::Null, |dt| BindValue::Temporal(Temporal::DateTime(dt))),
        }
    }
}

impl From<&Value> for BindValue {
    fn from(value: &Value) -> Self {
        BindValue::from(value.clone())
    }
}

macro_rules! bind_from {
    ($($ty:ty => |$v:ident| $e:expr),* $(,)?) => {
        $(
            impl From<$ty> for BindValue {
                fn from($v: $ty) -> Self {
                    $e
                }
            }
        )*
    };
}

bind_from! {
    bool => |v| BindValue::Integer(i64::from(v)),
    i32 => |v| BindValue::Integer(i64::from(v)),
    i64 => |v| BindValue::Integer(v),
    u32 => |v| BindValue::Unsigned(u64::from(v)),
    u64 => |v| BindValue::Unsigned(v),
    f64 => |v| BindValue::Floating(v),
    &str => |v| BindValue::Text(v.to_string()),
    String => |v| BindValue::Text(v),
    Vec<u8> => |v| BindValue::Bytes(v),
    NaiveDate => |v| BindValue::Temporal(Temporal::Date(v)),
    NaiveDateTime => |v| BindValue::Temporal(Temporal::DateTime(v)),
    serde_json::Value => |v| BindValue::Json(v),
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(BindValue::Null, Into::into)
    }
}

/// How a slot's value is rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Literal `NULL`
    Null,
    /// Signed decimal digits
    Integer,
    /// Unsigned decimal digits
    Unsigned,
    /// Float text with a normalized exponent
    Float,
    /// Exact numeric text
    Decimal,
    /// Quoted, escaped string
    Text,
    /// `X'..'` hex literal
    Bytes,
    /// Quoted date/time literal
    Temporal,
    /// Quoted, escaped JSON document
    Json,
}

/// The conversion table: how a value of `kind` is encoded for a declared
/// `target` type. `None` means the pair is not convertible.
pub fn encoding_for(target: Option<FieldType>, kind: ValueKind) -> Option<Encoding> {
    use ValueKind as K;

    if kind == K::Null {
        return Some(Encoding::Null);
    }
    let Some(target) = target else {
        return Some(match kind {
            K::Null => Encoding::Null,
            K::Integer => Encoding::Integer,
            K::Unsigned => Encoding::Unsigned,
            K::Floating => Encoding::Float,
            K::Decimal => Encoding::Decimal,
            K::Text => Encoding::Text,
            K::Bytes | K::Stream => Encoding::Bytes,
            K::Temporal => Encoding::Temporal,
            K::Json => Encoding::Json,
        });
    };

    match target {
        FieldType::Null => Some(Encoding::Null),
        t if t.is_integer() || t == FieldType::Bit => match kind {
            K::Integer | K::Floating | K::Decimal | K::Text => Some(Encoding::Integer),
            K::Unsigned => Some(Encoding::Unsigned),
            K::Bytes if t == FieldType::Bit => Some(Encoding::Bytes),
            _ => None,
        },
        t if t.is_float() => match kind {
            K::Integer | K::Unsigned | K::Floating | K::Decimal | K::Text => Some(Encoding::Float),
            _ => None,
        },
        t if t.is_decimal() => match kind {
            K::Integer => Some(Encoding::Integer),
            K::Unsigned => Some(Encoding::Unsigned),
            K::Floating | K::Decimal | K::Text => Some(Encoding::Decimal),
            _ => None,
        },
        t if t.is_string() => match kind {
            K::Json => Some(Encoding::Json),
            _ => Some(Encoding::Text),
        },
        t if t.is_blob() => match kind {
            K::Text | K::Bytes | K::Stream => Some(Encoding::Bytes),
            K::Json => Some(Encoding::Json),
            _ => Some(Encoding::Text),
        },
        t if t.is_temporal() || t == FieldType::Year => match kind {
            K::Temporal => Some(Encoding::Temporal),
            K::Text => Some(Encoding::Text),
            K::Integer if t == FieldType::Year => Some(Encoding::Integer),
            _ => None,
        },
        FieldType::Json => match kind {
            K::Json | K::Text | K::Stream => Some(Encoding::Json),
            K::Integer => Some(Encoding::Integer),
            K::Unsigned => Some(Encoding::Unsigned),
            K::Floating => Some(Encoding::Float),
            K::Decimal => Some(Encoding::Decimal),
            _ => None,
        },
        _ => Some(Encoding::Text),
    }
}

/// One parameter slot.
#[derive(Debug)]
pub struct BindSlot {
    value: BindValue,
    target: Option<FieldType>,
    length: Option<u64>,
    escape: bool,
}

impl BindSlot {
    pub fn new(value: impl Into<BindValue>) -> Self {
        Self {
            value: value.into(),
            target: None,
            length: None,
            escape: true,
        }
    }

    /// Declare the column type the value is meant for.
    pub fn with_target(mut self, target: FieldType) -> Self {
        self.target = Some(target);
        self
    }

    /// Limit how many bytes of a stream are sent.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Send text between quotes without escaping. The caller guarantees the
    /// content contains no quote or backslash that needs escaping.
    pub fn without_escaping(mut self) -> Self {
        self.escape = false;
        self
    }

    pub fn value(&self) -> &BindValue {
        &self.value
    }

    pub fn target(&self) -> Option<FieldType> {
        self.target
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn escape(&self) -> bool {
        self.escape
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, BindValue::Null)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.value, BindValue::Stream(_))
    }

    pub(crate) fn encoding(&self) -> Result<Encoding> {
        let kind = self.value.kind();
        encoding_for(self.target, kind).ok_or_else(|| {
            Error::Type(TypeError {
                expected: self.target.map_or("a bindable value", FieldType::name),
                actual: format!("{} value", kind.name()),
                column: None,
            })
        })
    }

    /// Read the stream value (respecting the length hint) in chunks.
    pub(crate) fn drain_stream(&mut self, mut sink: impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let limit = self.length;
        let BindValue::Stream(reader) = &mut self.value else {
            return Ok(());
        };
        let mut remaining = limit.unwrap_or(u64::MAX);
        let mut chunk = vec![0u8; STREAM_CHUNK];
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(STREAM_CHUNK, |r| r.min(STREAM_CHUNK));
            let n = match reader.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(stream_read_error(&e)),
            };
            if n == 0 {
                break;
            }
            sink(&chunk[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Write this value as a text-protocol SQL literal.
    pub(crate) fn write_text(&mut self, out: &mut PacketBuffer, ctx: TextContext) -> Result<()> {
        let encoding = self.encoding()?;
        let target = self.target;
        match encoding {
            Encoding::Null => out.write_bytes(b"NULL"),
            Encoding::Integer => {
                let v = self.as_i64(target)?;
                out.write_bytes(v.to_string().as_bytes())
            }
            Encoding::Unsigned => {
                let v = self.as_u64()?;
                out.write_bytes(v.to_string().as_bytes())
            }
            Encoding::Float => {
                let v = self.as_f64()?;
                out.write_bytes(format_float(v)?.as_bytes())
            }
            Encoding::Decimal => {
                let text = self.decimal_text()?;
                out.write_bytes(text.as_bytes())
            }
            Encoding::Temporal => {
                let BindValue::Temporal(t) = &self.value else {
                    return Err(self.mismatch("temporal"));
                };
                out.write_u8(b'\'')?;
                out.write_bytes(t.literal().as_bytes())?;
                out.write_u8(b'\'')
            }
            Encoding::Bytes => {
                out.write_bytes(b"X'")?;
                match &self.value {
                    BindValue::Bytes(b) => write_hex(out, b)?,
                    BindValue::Text(s) => write_hex(out, &ctx.codec.encode(s))?,
                    BindValue::Stream(_) => self.drain_stream(|chunk| write_hex(out, chunk))?,
                    _ => return Err(self.mismatch("bytes")),
                }
                out.write_u8(b'\'')
            }
            Encoding::Text | Encoding::Json => {
                let escape = self.escape;
                let nbe = ctx.no_backslash_escapes;
                out.write_u8(b'\'')?;
                if let BindValue::Stream(_) = self.value {
                    self.drain_stream(|chunk| write_escaped(out, chunk, escape, nbe))?;
                } else {
                    let text = self.display_text()?;
                    write_escaped(out, &ctx.codec.encode(&text), escape, nbe)?;
                }
                out.write_u8(b'\'')
            }
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::Type(TypeError {
            expected,
            actual: format!("{} value", self.value.kind().name()),
            column: None,
        })
    }

    fn as_i64(&self, target: Option<FieldType>) -> Result<i64> {
        let v = match &self.value {
            BindValue::Integer(v) => *v,
            BindValue::Unsigned(v) => i64::try_from(*v).map_err(|_| self.mismatch("i64"))?,
            BindValue::Floating(f) => {
                if !f.is_finite() || f.trunc() < i64::MIN as f64 || f.trunc() >= i64::MAX as f64 {
                    return Err(self.mismatch("integral number"));
                }
                f.trunc() as i64
            }
            BindValue::Decimal(s) | BindValue::Text(s) => parse_integral(s.trim())
                .ok_or_else(|| Error::Type(TypeError {
                    expected: "integral number",
                    actual: format!("'{s}'"),
                    column: None,
                }))?,
            _ => return Err(self.mismatch("integer")),
        };
        if let Some(t) = target {
            check_int_range(v, t)?;
        }
        Ok(v)
    }

    fn as_u64(&self) -> Result<u64> {
        match &self.value {
            BindValue::Unsigned(v) => Ok(*v),
            BindValue::Integer(v) => u64::try_from(*v).map_err(|_| self.mismatch("u64")),
            _ => Err(self.mismatch("unsigned integer")),
        }
    }

    fn as_f64(&self) -> Result<f64> {
        match &self.value {
            BindValue::Floating(v) => Ok(*v),
            BindValue::Integer(v) => Ok(*v as f64),
            BindValue::Unsigned(v) => Ok(*v as f64),
            BindValue::Decimal(s) | BindValue::Text(s) => {
                s.trim().parse::<f64>().map_err(|_| {
                    Error::Type(TypeError {
                        expected: "number",
                        actual: format!("'{s}'"),
                        column: None,
                    })
                })
            }
            _ => Err(self.mismatch("number")),
        }
    }

    fn decimal_text(&self) -> Result<String> {
        match &self.value {
            BindValue::Decimal(s) | BindValue::Text(s) => {
                let s = s.trim();
                if s.parse::<f64>().is_err() {
                    return Err(Error::Type(TypeError {
                        expected: "decimal number",
                        actual: format!("'{s}'"),
                        column: None,
                    }));
                }
                Ok(normalize_exponent(s))
            }
            BindValue::Floating(f) => format_float(*f),
            BindValue::Integer(v) => Ok(v.to_string()),
            BindValue::Unsigned(v) => Ok(v.to_string()),
            _ => Err(self.mismatch("decimal")),
        }
    }

    /// Text form of a non-stream value, before escaping.
    fn display_text(&self) -> Result<String> {
        Ok(match &self.value {
            BindValue::Null => "NULL".to_string(),
            BindValue::Integer(v) => v.to_string(),
            BindValue::Unsigned(v) => v.to_string(),
            BindValue::Floating(f) => format_float(*f)?,
            BindValue::Decimal(s) => normalize_exponent(s),
            BindValue::Text(s) => s.clone(),
            BindValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            BindValue::Temporal(t) => t.literal(),
            BindValue::Json(j) => j.to_string(),
            BindValue::Stream(_) => return Err(self.mismatch("non-stream value")),
        })
    }

    /// Field type and unsigned flag announced in a binary execute packet.
    pub(crate) fn binary_type(&self) -> (FieldType, bool) {
        match &self.value {
            BindValue::Null => (FieldType::Null, false),
            // Narrow targets accept the unsigned range too; values past the
            // signed maximum go out flagged unsigned.
            BindValue::Integer(v) => match self.target {
                Some(FieldType::Tiny) => (FieldType::Tiny, *v > i64::from(i8::MAX)),
                Some(FieldType::Short) => (FieldType::Short, *v > i64::from(i16::MAX)),
                Some(FieldType::Long | FieldType::Int24) => {
                    (FieldType::Long, *v > i64::from(i32::MAX))
                }
                _ => (FieldType::LongLong, false),
            },
            BindValue::Unsigned(_) => (FieldType::LongLong, true),
            BindValue::Floating(_) => match self.target {
                Some(FieldType::Float) => (FieldType::Float, false),
                _ => (FieldType::Double, false),
            },
            BindValue::Decimal(_) => (FieldType::NewDecimal, false),
            BindValue::Text(_) | BindValue::Json(_) => (FieldType::VarString, false),
            BindValue::Bytes(_) | BindValue::Stream(_) => (FieldType::Blob, false),
            BindValue::Temporal(Temporal::Date(_)) => (FieldType::Date, false),
            BindValue::Temporal(Temporal::Time(_)) => (FieldType::Time, false),
            BindValue::Temporal(Temporal::DateTime(_)) => match self.target {
                Some(FieldType::Timestamp) => (FieldType::Timestamp, false),
                _ => (FieldType::DateTime, false),
            },
        }
    }

    /// Write the binary-protocol value bytes. Null and stream values write
    /// nothing (nulls live in the bitmap, streams went ahead as long data).
    pub(crate) fn write_binary(&self, out: &mut PacketBuffer, codec: TextCodec) -> Result<()> {
        match &self.value {
            BindValue::Null | BindValue::Stream(_) => Ok(()),
            BindValue::Integer(v) => match self.binary_type().0 {
                FieldType::Tiny => {
                    check_int_range(*v, FieldType::Tiny)?;
                    out.write_u8(*v as u8)
                }
                FieldType::Short => {
                    check_int_range(*v, FieldType::Short)?;
                    out.write_u16(*v as u16)
                }
                FieldType::Long => {
                    check_int_range(*v, FieldType::Long)?;
                    out.write_u32(*v as u32)
                }
                _ => out.write_u64(*v as u64),
            },
            BindValue::Unsigned(v) => out.write_u64(*v),
            BindValue::Floating(f) => {
                if self.target == Some(FieldType::Float) {
                    out.write_bytes(&(*f as f32).to_le_bytes())
                } else {
                    out.write_bytes(&f.to_le_bytes())
                }
            }
            BindValue::Decimal(s) => out.write_lenenc_bytes(normalize_exponent(s).as_bytes()),
            BindValue::Text(s) => out.write_lenenc_bytes(&codec.encode(s)),
            BindValue::Json(j) => out.write_lenenc_bytes(j.to_string().as_bytes()),
            BindValue::Bytes(b) => out.write_lenenc_bytes(b),
            BindValue::Temporal(t) => write_binary_temporal(out, t),
        }
    }
}

/// Context for text-protocol encoding.
#[derive(Debug, Clone, Copy)]
pub struct TextContext {
    pub codec: TextCodec,
    pub no_backslash_escapes: bool,
}

/// Parameter slots of one statement execution.
#[derive(Debug, Default)]
pub struct Bindings {
    slots: Vec<Option<BindSlot>>,
}

impl Bindings {
    /// Empty bindings for `count` placeholders.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| None).collect(),
        }
    }

    /// Bind every value in order.
    pub fn from_values(values: &[Value]) -> Self {
        Self {
            slots: values.iter().map(|v| Some(BindSlot::new(v))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind a value to the 0-based placeholder `index`.
    pub fn set(&mut self, index: usize, value: impl Into<BindValue>) -> Result<()> {
        self.set_slot(index, BindSlot::new(value))
    }

    /// Bind a fully specified slot to the 0-based placeholder `index`.
    pub fn set_slot(&mut self, index: usize, slot: BindSlot) -> Result<()> {
        let count = self.slots.len();
        let entry = self.slots.get_mut(index).ok_or_else(|| {
            Error::Usage(UsageError {
                kind: UsageErrorKind::IndexOutOfRange,
                message: format!(
                    "Parameter index out of range ({} > number of parameters, which is {})",
                    index + 1,
                    count
                ),
            })
        })?;
        *entry = Some(slot);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&BindSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Unbind every slot, keeping the placeholder count.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Fail with the 1-based position of the first unset slot.
    pub fn check_all_set(&self) -> Result<()> {
        match self.slots.iter().position(Option::is_none) {
            Some(i) => Err(Error::parameter_not_set(i + 1)),
            None => Ok(()),
        }
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &BindSlot> {
        self.slots.iter().flatten()
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut BindSlot> {
        self.slots.iter_mut().flatten()
    }
}

/// Write a text-protocol statement: static segments with each bound value
/// in between. `rows` holds one [`Bindings`] per parameter set, so a
/// multi-row batch variant of `info` consumes several in order.
pub fn write_text_statement(
    info: &QueryInfo,
    rows: &mut [Bindings],
    out: &mut PacketBuffer,
    ctx: TextContext,
) -> Result<()> {
    let total: usize = rows.iter().map(Bindings::len).sum();
    if total != info.param_count() {
        return Err(Error::Usage(UsageError {
            kind: UsageErrorKind::InvalidArgument,
            message: format!(
                "statement has {} placeholders but {} parameters were supplied",
                info.param_count(),
                total
            ),
        }));
    }
    let mut offset = 0;
    for row in rows.iter() {
        if let Err(Error::Usage(mut e)) = row.check_all_set() {
            if let UsageErrorKind::ParameterNotSet(i) = e.kind {
                e.kind = UsageErrorKind::ParameterNotSet(offset + i);
                e.message = format!("No value specified for parameter {}", offset + i);
            }
            return Err(Error::Usage(e));
        }
        offset += row.len();
    }

    let mut index = 0;
    for row in rows.iter_mut() {
        for slot in row.slots_mut() {
            out.write_bytes(&ctx.codec.encode(info.segment(index)))?;
            slot.write_text(out, ctx)?;
            index += 1;
        }
    }
    out.write_bytes(&ctx.codec.encode(info.segment(index)))
}

/// Escape string bytes for a quoted literal.
///
/// With backslash escapes: NUL, LF, CR, `\`, `'`, `"` and ^Z are
/// backslash-escaped. Under `NO_BACKSLASH_ESCAPES` only `'` is doubled.
pub fn write_escaped(out: &mut PacketBuffer, bytes: &[u8], escape: bool, nbe: bool) -> Result<()> {
    if !escape {
        return out.write_bytes(bytes);
    }
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let replacement: &[u8] = if nbe {
            match b {
                b'\'' => b"''",
                _ => continue,
            }
        } else {
            match b {
                0 => b"\\0",
                b'\n' => b"\\n",
                b'\r' => b"\\r",
                b'\\' => b"\\\\",
                b'\'' => b"\\'",
                b'"' => b"\\\"",
                0x1A => b"\\Z",
                _ => continue,
            }
        };
        out.write_bytes(&bytes[start..i])?;
        out.write_bytes(replacement)?;
        start = i + 1;
    }
    out.write_bytes(&bytes[start..])
}

/// The caller's reader failed, not the link: the session stays usable.
fn stream_read_error(e: &io::Error) -> Error {
    Error::Usage(UsageError {
        kind: UsageErrorKind::StreamRead,
        message: format!("Could not read stream parameter: {e}"),
    })
}

fn write_hex(out: &mut PacketBuffer, bytes: &[u8]) -> Result<()> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.ensure_capacity(bytes.len() * 2)?;
    for &b in bytes {
        out.write_u8(HEX[usize::from(b >> 4)])?;
        out.write_u8(HEX[usize::from(b & 0x0F)])?;
    }
    Ok(())
}

/// Render a float for SQL text. Large and tiny magnitudes use scientific
/// notation with an explicit exponent sign (`1.5e+20`).
pub fn format_float(v: f64) -> Result<String> {
    if !v.is_finite() {
        return Err(Error::Usage(UsageError {
            kind: UsageErrorKind::InvalidArgument,
            message: format!("'{v}' is not a valid numeric value"),
        }));
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        Ok(normalize_exponent(&format!("{v:e}")))
    } else {
        Ok(format!("{v}"))
    }
}

/// Insert `+` after a sign-less exponent marker: `1E10` becomes `1E+10`.
pub fn normalize_exponent(s: &str) -> String {
    match s.find(['e', 'E']) {
        Some(p) if !matches!(s.as_bytes().get(p + 1), Some(b'+' | b'-')) => {
            format!("{}+{}", &s[..=p], &s[p + 1..])
        }
        _ => s.to_string(),
    }
}

fn parse_integral(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        let f = s.parse::<f64>().ok()?;
        (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18).then_some(f as i64)
    })
}

fn check_int_range(v: i64, target: FieldType) -> Result<()> {
    let (min, max) = match target {
        FieldType::Tiny => (i64::from(i8::MIN), i64::from(u8::MAX)),
        FieldType::Short | FieldType::Year => (i64::from(i16::MIN), i64::from(u16::MAX)),
        FieldType::Int24 => (-(1 << 23), (1 << 24) - 1),
        FieldType::Long => (i64::from(i32::MIN), i64::from(u32::MAX)),
        _ => return Ok(()),
    };
    if (min..=max).contains(&v) {
        Ok(())
    } else {
        Err(Error::Type(TypeError {
            expected: target.name(),
            actual: format!("value {v} out of range"),
            column: None,
        }))
    }
}

fn write_binary_temporal(out: &mut PacketBuffer, t: &Temporal) -> Result<()> {
    match t {
        Temporal::Date(d) => {
            out.write_u8(4)?;
            out.write_u16(u16::try_from(d.year()).unwrap_or(0))?;
            out.write_u8(d.month() as u8)?;
            out.write_u8(d.day() as u8)
        }
        Temporal::DateTime(dt) => {
            let micros = dt.nanosecond() / 1_000;
            out.write_u8(if micros == 0 { 7 } else { 11 })?;
            out.write_u16(u16::try_from(dt.year()).unwrap_or(0))?;
            out.write_u8(dt.month() as u8)?;
            out.write_u8(dt.day() as u8)?;
            out.write_u8(dt.hour() as u8)?;
            out.write_u8(dt.minute() as u8)?;
            out.write_u8(dt.second() as u8)?;
            if micros != 0 {
                out.write_u32(micros)?;
            }
            Ok(())
        }
        Temporal::Time(us) => {
            let negative = *us < 0;
            let abs = us.unsigned_abs();
            let micros = (abs % 1_000_000) as u32;
            let secs = abs / 1_000_000;
            let days = u32::try_from(secs / 86_400).unwrap_or(u32::MAX);
            out.write_u8(if micros == 0 { 8 } else { 12 })?;
            out.write_u8(u8::from(negative))?;
            out.write_u32(days)?;
            out.write_u8(((secs / 3600) % 24) as u8)?;
            out.write_u8(((secs / 60) % 60) as u8)?;
            out.write_u8((secs % 60) as u8)?;
            if micros != 0 {
                out.write_u32(micros)?;
            }
            Ok(())
        }
    }
}

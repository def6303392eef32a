//! MySQL prepared statement (binary protocol) implementation.
//!
//! This module implements COM_STMT_PREPARE, COM_STMT_EXECUTE,
//! COM_STMT_SEND_LONG_DATA, COM_STMT_RESET and COM_STMT_CLOSE payloads.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: Client sends COM_STMT_PREPARE with SQL
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any)
//!    - Server sends result column definitions (if any)
//!
//! 2. **Long data**: stream parameters are sent in chunks ahead of execute
//!    - No server response
//!
//! 3. **Execute**: Client sends COM_STMT_EXECUTE with statement ID + binary params
//!    - Server returns result set (binary protocol) or OK packet
//!
//! 4. **Close**: Client sends COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! # References
//!
//! - [COM_STMT_PREPARE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
//! - [COM_STMT_EXECUTE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_execute.html)
//! - [Binary Protocol Result Set](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html)

use wirebase_core::{Error, Result};

use super::{Command, PacketBuffer};
use crate::bind::Bindings;
use crate::charset::TextCodec;
use crate::types::ColumnDef;

/// Bytes preceding the data in a COM_STMT_SEND_LONG_DATA payload.
pub const LONG_DATA_HEADER_LEN: usize = 7;

/// Response from COM_STMT_PREPARE.
///
/// This is sent by the server after successfully preparing a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

impl StmtPrepareOk {
    /// Parse the `0x00`-prefixed prepare response.
    pub fn parse(buf: &mut PacketBuffer) -> Result<Self> {
        let status = buf.read_u8()?;
        if status != 0x00 {
            return Err(Error::protocol(format!(
                "prepare response starts with 0x{status:02X}, expected 0x00"
            )));
        }
        let statement_id = buf.read_u32()?;
        let num_columns = buf.read_u16()?;
        let num_params = buf.read_u16()?;
        // Filler
        buf.skip(1)?;
        let warnings = if buf.remaining() >= 2 {
            buf.read_u16()?
        } else {
            0
        };
        Ok(Self {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }
}

/// A prepared statement with its metadata.
///
/// Holds the server-assigned statement ID and column definitions
/// for both parameters and result columns. Statement ids are only valid on
/// the session that issued them; `generation` records which one.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-assigned statement ID
    pub statement_id: u32,
    /// SQL text, kept for logging and re-preparation
    pub sql: String,
    /// Parameter column definitions
    pub params: Vec<ColumnDef>,
    /// Result column definitions
    pub columns: Vec<ColumnDef>,
    pub(crate) generation: u64,
}

impl PreparedStatement {
    pub fn new(
        statement_id: u32,
        sql: String,
        params: Vec<ColumnDef>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        Self {
            statement_id,
            sql,
            params,
            columns,
            generation: 0,
        }
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Empty bindings sized for this statement.
    pub fn bindings(&self) -> Bindings {
        Bindings::new(self.param_count())
    }
}

/// Write a COM_STMT_PREPARE payload.
pub fn write_stmt_prepare(buf: &mut PacketBuffer, sql: &[u8]) -> Result<()> {
    buf.write_u8(Command::StmtPrepare as u8)?;
    buf.write_bytes(sql)
}

/// Write a COM_STMT_EXECUTE payload.
///
/// # Binary Protocol Parameter Encoding
///
/// - Command byte (0x17)
/// - Statement ID (4 bytes, little-endian)
/// - Flags (1 byte): 0x00 = no cursor
/// - Iteration count (4 bytes, always 1)
/// - NULL bitmap (if num_params > 0)
/// - New params bound flag (1 byte)
/// - Parameter types (type byte + 0x80 when unsigned) and values
///
/// Stream slots are typed as BLOB with no inline value; their content must
/// already have been sent with [`write_long_data_header`].
pub fn write_stmt_execute(
    buf: &mut PacketBuffer,
    statement_id: u32,
    bindings: &Bindings,
    codec: TextCodec,
) -> Result<()> {
    bindings.check_all_set()?;

    buf.write_u8(Command::StmtExecute as u8)?;
    buf.write_u32(statement_id)?;
    buf.write_u8(0x00)?;
    buf.write_u32(1)?;

    if bindings.is_empty() {
        return Ok(());
    }

    let mut null_bitmap = vec![0u8; bindings.len().div_ceil(8)];
    for (i, slot) in bindings.slots().enumerate() {
        if slot.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    buf.write_bytes(&null_bitmap)?;

    // New params bound flag: 1 = we're sending types
    buf.write_u8(1)?;
    for slot in bindings.slots() {
        let (field_type, unsigned) = slot.binary_type();
        buf.write_u8(field_type as u8)?;
        buf.write_u8(if unsigned { 0x80 } else { 0x00 })?;
    }

    for slot in bindings.slots() {
        slot.write_binary(buf, codec)?;
    }
    Ok(())
}

/// Write the header of a COM_STMT_SEND_LONG_DATA payload; the chunk
/// follows directly.
pub fn write_long_data_header(
    buf: &mut PacketBuffer,
    statement_id: u32,
    param_index: u16,
) -> Result<()> {
    buf.write_u8(Command::StmtSendLongData as u8)?;
    buf.write_u32(statement_id)?;
    buf.write_u16(param_index)
}

/// Write a COM_STMT_RESET payload (discards long data already sent).
pub fn write_stmt_reset(buf: &mut PacketBuffer, statement_id: u32) -> Result<()> {
    buf.write_u8(Command::StmtReset as u8)?;
    buf.write_u32(statement_id)
}

/// Write a COM_STMT_CLOSE payload.
pub fn write_stmt_close(buf: &mut PacketBuffer, statement_id: u32) -> Result<()> {
    buf.write_u8(Command::StmtClose as u8)?;
    buf.write_u32(statement_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::{BindSlot, BindValue};
    use crate::types::FieldType;

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let mut buf = PacketBuffer::from_payload(vec![
            0x00, // OK
            0x01, 0x00, 0x00, 0x00, // statement_id = 1
            0x02, 0x00, // num_columns = 2
            0x03, 0x00, // num_params = 3
            0x00, // filler
            0x00, 0x00, // warnings = 0
        ]);
        let ok = StmtPrepareOk::parse(&mut buf).unwrap();
        assert_eq!(ok.statement_id, 1);
        assert_eq!(ok.num_columns, 2);
        assert_eq!(ok.num_params, 3);
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn test_parse_stmt_prepare_ok_invalid() {
        let mut buf = PacketBuffer::from_payload(vec![0xFF, 0x00]);
        assert!(StmtPrepareOk::parse(&mut buf).is_err());

        let mut buf = PacketBuffer::from_payload(vec![0x00, 0x01]);
        assert!(StmtPrepareOk::parse(&mut buf).is_err());
    }

    #[test]
    fn test_write_stmt_prepare_and_close() {
        let mut buf = PacketBuffer::default();
        write_stmt_prepare(&mut buf, b"SELECT ?").unwrap();
        assert_eq!(buf.as_slice()[0], Command::StmtPrepare as u8);
        assert_eq!(&buf.as_slice()[1..], b"SELECT ?");

        let mut buf = PacketBuffer::default();
        write_stmt_close(&mut buf, 7).unwrap();
        assert_eq!(buf.as_slice(), &[0x19, 7, 0, 0, 0]);
    }

    #[test]
    fn test_execute_no_params() {
        let mut buf = PacketBuffer::default();
        write_stmt_execute(&mut buf, 1, &Bindings::new(0), TextCodec::Utf8).unwrap();
        assert_eq!(buf.as_slice(), &[0x17, 1, 0, 0, 0, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn test_execute_with_params() {
        let mut bindings = Bindings::new(3);
        bindings.set(0, 42i64).unwrap();
        bindings.set(1, BindValue::Null).unwrap();
        bindings.set(2, "hi").unwrap();
        let mut buf = PacketBuffer::default();
        write_stmt_execute(&mut buf, 5, &bindings, TextCodec::Utf8).unwrap();

        let bytes = buf.as_slice();
        assert_eq!(&bytes[..10], &[0x17, 5, 0, 0, 0, 0, 1, 0, 0, 0]);
        // NULL bitmap: param 1
        assert_eq!(bytes[10], 0b010);
        assert_eq!(bytes[11], 1);
        assert_eq!(
            &bytes[12..18],
            &[
                FieldType::LongLong as u8,
                0,
                FieldType::Null as u8,
                0,
                FieldType::VarString as u8,
                0
            ]
        );
        assert_eq!(&bytes[18..26], &42i64.to_le_bytes());
        assert_eq!(&bytes[26..], &[2, b'h', b'i']);
    }

    #[test]
    fn test_execute_unsigned_and_stream() {
        let mut bindings = Bindings::new(2);
        bindings.set(0, u64::MAX).unwrap();
        bindings
            .set_slot(1, BindSlot::new(BindValue::stream(&b"data"[..])))
            .unwrap();
        let mut buf = PacketBuffer::default();
        write_stmt_execute(&mut buf, 1, &bindings, TextCodec::Utf8).unwrap();
        let bytes = buf.as_slice();
        assert_eq!(&bytes[12..16], &[FieldType::LongLong as u8, 0x80, FieldType::Blob as u8, 0]);
        // Stream content is not inlined
        assert_eq!(bytes.len(), 16 + 8);
    }

    #[test]
    fn test_execute_narrow_targets_above_signed_range() {
        let mut bindings = Bindings::new(3);
        bindings
            .set_slot(0, BindSlot::new(200i64).with_target(FieldType::Tiny))
            .unwrap();
        bindings
            .set_slot(1, BindSlot::new(40_000i64).with_target(FieldType::Short))
            .unwrap();
        bindings
            .set_slot(2, BindSlot::new(3_000_000_000i64).with_target(FieldType::Long))
            .unwrap();
        let mut buf = PacketBuffer::default();
        write_stmt_execute(&mut buf, 1, &bindings, TextCodec::Utf8).unwrap();

        let bytes = buf.as_slice();
        // 10-byte header, 1-byte NULL bitmap, bound flag
        assert_eq!(bytes[10], 0);
        assert_eq!(bytes[11], 1);
        assert_eq!(
            &bytes[12..18],
            &[
                FieldType::Tiny as u8,
                0x80,
                FieldType::Short as u8,
                0x80,
                FieldType::Long as u8,
                0x80
            ]
        );
        assert_eq!(bytes[18], 200);
        assert_eq!(&bytes[19..21], &40_000u16.to_le_bytes());
        assert_eq!(&bytes[21..25], &3_000_000_000u32.to_le_bytes());
        assert_eq!(bytes.len(), 25);
    }

    #[test]
    fn test_execute_negative_narrow_target_is_signed() {
        let mut bindings = Bindings::new(1);
        bindings
            .set_slot(0, BindSlot::new(-56i64).with_target(FieldType::Tiny))
            .unwrap();
        let mut buf = PacketBuffer::default();
        write_stmt_execute(&mut buf, 1, &bindings, TextCodec::Utf8).unwrap();
        assert_eq!(&buf.as_slice()[12..], &[FieldType::Tiny as u8, 0x00, 0xC8]);
    }

    #[test]
    fn test_execute_requires_all_params() {
        let mut bindings = Bindings::new(2);
        bindings.set(0, 1i64).unwrap();
        let mut buf = PacketBuffer::default();
        let err = write_stmt_execute(&mut buf, 1, &bindings, TextCodec::Utf8).unwrap_err();
        assert!(err.to_string().contains("parameter 2"));
    }

    #[test]
    fn test_long_data_header() {
        let mut buf = PacketBuffer::default();
        write_long_data_header(&mut buf, 3, 1).unwrap();
        assert_eq!(buf.len(), LONG_DATA_HEADER_LEN);
        assert_eq!(buf.as_slice(), &[0x18, 3, 0, 0, 0, 1, 0]);
    }
}

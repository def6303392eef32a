//! Growable packet buffer with a read/write cursor.
//!
//! A [`PacketBuffer`] owns a byte region, a cursor and a logical length.
//! Reads never move the cursor past the logical length; writes past the
//! current capacity grow the region unless the optional ceiling would be
//! exceeded, which yields a capacity error.
//!
//! The two length-encoded integer readers differ only in how they treat
//! the `0xFB` prefix: [`PacketBuffer::read_field_length`] reports it as
//! SQL NULL, [`PacketBuffer::read_length`] reads it as zero.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};

use wirebase_core::error::{CapacityError, ProtocolError};
use wirebase_core::{Error, Result};

use super::{MAX_PACKET_SIZE, PacketHeader};

/// Prefix byte marking a NULL column value in a row.
pub const NULL_MARKER: u8 = 0xFB;

/// Owned byte cursor used for both outgoing and incoming packets.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
    pos: usize,
    len: usize,
    max_size: Option<usize>,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PacketBuffer {
    /// Create an empty buffer with the given initial capacity and no ceiling.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            pos: 0,
            len: 0,
            max_size: None,
        }
    }

    /// Create an empty buffer that refuses to grow beyond `max_size` bytes.
    pub fn with_max_size(capacity: usize, max_size: usize) -> Self {
        Self {
            data: vec![0; capacity.min(max_size)],
            pos: 0,
            len: 0,
            max_size: Some(max_size),
        }
    }

    /// Wrap an existing payload for reading, cursor at the start.
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        let data = payload.into();
        let len = data.len();
        Self {
            data,
            pos: 0,
            len,
            max_size: None,
        }
    }

    /// Change the growth ceiling (e.g. after `max_allowed_packet` is known).
    pub fn set_max_size(&mut self, max_size: Option<usize>) {
        self.max_size = max_size;
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Reset cursor and logical length, keeping the allocation.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    /// Move the cursor back to the start of the logical content.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the logical end.
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Allocated size of the backing region.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The logical content.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy of the logical content.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    // === Capacity ===

    /// Make room for `additional` bytes after the cursor.
    ///
    /// Growth is the larger of 25% of the current size and what is needed,
    /// clamped to the ceiling. Fails only when the needed size itself is
    /// above the ceiling.
    pub fn ensure_capacity(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .pos
            .checked_add(additional)
            .ok_or_else(|| capacity_error(usize::MAX, self.max_size.unwrap_or(usize::MAX)))?;
        if needed <= self.data.len() {
            return Ok(());
        }
        if let Some(max) = self.max_size {
            if needed > max {
                return Err(capacity_error(needed, max));
            }
        }
        let grown = self.data.len() + self.data.len() / 4;
        let mut new_size = grown.max(needed);
        if let Some(max) = self.max_size {
            new_size = new_size.min(max);
        }
        tracing::trace!(from = self.data.len(), to = new_size, "growing packet buffer");
        self.data.resize(new_size, 0);
        Ok(())
    }

    // === Reading ===

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(underflow(n, self.pos, self.remaining()));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.pos < self.len {
            Some(self.data[self.pos])
        } else {
            None
        }
    }

    /// Advance the cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a length-encoded integer whose `0xFB` prefix means SQL NULL.
    ///
    /// Used for row values and column definitions.
    pub fn read_field_length(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(Some(u64::from(first))),
            NULL_MARKER => Ok(None),
            0xFC => self.read_u16().map(|v| Some(u64::from(v))),
            0xFD => self.read_u24().map(|v| Some(u64::from(v))),
            0xFE => self.read_u64().map(Some),
            0xFF => Err(Error::protocol(format!(
                "invalid length-encoded integer prefix 0xFF at position {}",
                self.pos - 1
            ))),
        }
    }

    /// Read a length-encoded integer whose `0xFB` prefix reads as zero.
    ///
    /// Used for counts in OK packets and handshake-era fields.
    pub fn read_length(&mut self) -> Result<u64> {
        Ok(self.read_field_length()?.unwrap_or(0))
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        self.take(n)
    }

    /// Read up to (not including) the next NUL and consume the NUL.
    ///
    /// A missing terminator reads to the end of the buffer.
    pub fn read_null_terminated(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        let end = self.data[start..self.len]
            .iter()
            .position(|&b| b == 0)
            .map_or(self.len, |i| start + i);
        self.pos = if end < self.len { end + 1 } else { end };
        Ok(&self.data[start..end])
    }

    /// Read a length-prefixed byte string (`0xFB` reads as empty).
    pub fn read_lenenc_bytes(&mut self) -> Result<&[u8]> {
        let n = self.read_length()?;
        self.take(to_usize(n)?)
    }

    /// Read a length-prefixed column value; `None` for SQL NULL.
    pub fn read_field_bytes(&mut self) -> Result<Option<&[u8]>> {
        match self.read_field_length()? {
            Some(n) => self.take(to_usize(n)?).map(Some),
            None => Ok(None),
        }
    }

    /// Consume everything after the cursor.
    pub fn read_rest(&mut self) -> &[u8] {
        let start = self.pos;
        self.pos = self.len;
        &self.data[start..self.len]
    }

    // === Writing ===

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        let end = self.pos + bytes.len();
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        self.len = self.len.max(end);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.put(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_u24(&mut self, v: u32) -> Result<()> {
        self.put(&v.to_le_bytes()[..3])
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.put(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.put(&v.to_le_bytes())
    }

    /// Write a length-encoded integer.
    ///
    /// - below 251: 1 byte
    /// - 0xFC + 2 bytes: below 2^16
    /// - 0xFD + 3 bytes: below 2^24
    /// - 0xFE + 8 bytes: otherwise
    pub fn write_length(&mut self, v: u64) -> Result<()> {
        if v < 251 {
            self.write_u8(v as u8)
        } else if v < 0x1_0000 {
            self.write_u8(0xFC)?;
            self.write_u16(v as u16)
        } else if v < 0x100_0000 {
            self.write_u8(0xFD)?;
            self.write_u24(v as u32)
        } else {
            self.write_u8(0xFE)?;
            self.write_u64(v)
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put(bytes)
    }

    /// Write bytes followed by a NUL terminator.
    pub fn write_null_terminated(&mut self, bytes: &[u8]) -> Result<()> {
        self.put(bytes)?;
        self.write_u8(0)
    }

    /// Write a length prefix followed by the bytes.
    pub fn write_lenenc_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_length(bytes.len() as u64)?;
        self.put(bytes)
    }

    pub fn write_zeros(&mut self, n: usize) -> Result<()> {
        self.ensure_capacity(n)?;
        let end = self.pos + n;
        self.data[self.pos..end].fill(0);
        self.pos = end;
        self.len = self.len.max(end);
        Ok(())
    }

    /// Overwrite one already-written byte without moving the cursor.
    pub fn set_byte_at(&mut self, offset: usize, v: u8) -> Result<()> {
        if offset >= self.len {
            return Err(underflow(1, offset, 0));
        }
        self.data[offset] = v;
        Ok(())
    }

    // === Transport ===

    /// Start an outgoing packet: clear and reserve the 4-byte header.
    pub fn start_packet(&mut self) -> Result<()> {
        self.clear();
        self.write_zeros(PacketHeader::SIZE)
    }

    /// Payload of a packet started with [`PacketBuffer::start_packet`].
    pub fn packet_payload(&self) -> &[u8] {
        &self.data[PacketHeader::SIZE.min(self.len)..self.len]
    }

    /// Frame the payload written after [`PacketBuffer::start_packet`] and
    /// write it out, splitting at 2^24-1 bytes. Returns the next sequence id.
    pub fn write_packets<W: Write>(&mut self, out: &mut W, sequence_id: u8) -> Result<u8> {
        let payload_len = self.len.saturating_sub(PacketHeader::SIZE);
        if payload_len < MAX_PACKET_SIZE {
            let header = PacketHeader {
                payload_length: payload_len as u32,
                sequence_id,
            };
            self.data[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
            tracing::trace!(len = payload_len, seq = sequence_id, "writing packet");
            out.write_all(&self.data[..self.len])?;
            return Ok(sequence_id.wrapping_add(1));
        }

        let mut seq = sequence_id;
        let mut offset = PacketHeader::SIZE;
        loop {
            let chunk = (self.len - offset).min(MAX_PACKET_SIZE);
            let header = PacketHeader {
                payload_length: chunk as u32,
                sequence_id: seq,
            };
            tracing::trace!(len = chunk, seq, "writing packet fragment");
            out.write_all(&header.to_bytes())?;
            out.write_all(&self.data[offset..offset + chunk])?;
            offset += chunk;
            seq = seq.wrapping_add(1);
            // A final full-size fragment is terminated by an empty one.
            if chunk < MAX_PACKET_SIZE {
                break;
            }
        }
        Ok(seq)
    }

    /// Append exactly `n` bytes read from `input` at the logical end,
    /// reusing storage. The cursor is left unchanged.
    pub fn fill_from<R: Read>(&mut self, input: &mut R, n: usize) -> Result<()> {
        let saved = self.pos;
        self.pos = self.len;
        let grown = self.ensure_capacity(n);
        self.pos = saved;
        grown?;
        let start = self.len;
        input.read_exact(&mut self.data[start..start + n])?;
        self.len += n;
        Ok(())
    }
}

fn to_usize(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| Error::protocol(format!("length {n} does not fit in memory")))
}

fn underflow(wanted: usize, pos: usize, available: usize) -> Error {
    Error::Protocol(ProtocolError {
        message: format!(
            "packet too short: needed {wanted} bytes at position {pos}, {available} available"
        ),
        raw_data: None,
    })
}

fn capacity_error(requested: usize, limit: usize) -> Error {
    Error::Capacity(CapacityError { requested, limit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirebase_core::ErrorClass;

    #[test]
    fn fixed_width_little_endian() {
        let mut buf = PacketBuffer::new(4);
        buf.write_u16(0x1234).unwrap();
        buf.write_u24(0x0012_3456).unwrap();
        buf.write_u32(0x1234_5678).unwrap();
        buf.write_u64(0x0807_0605_0403_0201).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[
                0x34, 0x12, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 1, 2, 3, 4, 5, 6, 7, 8
            ]
        );
        buf.rewind();
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u24().unwrap(), 0x0012_3456);
        assert_eq!(buf.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(buf.read_u64().unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn length_encoding_boundaries() {
        let cases: [(u64, usize); 6] = [
            (250, 1),
            (251, 3),
            (65_535, 3),
            (65_536, 4),
            (16_777_215, 4),
            (16_777_216, 9),
        ];
        for (value, width) in cases {
            let mut buf = PacketBuffer::default();
            buf.write_length(value).unwrap();
            assert_eq!(buf.len(), width, "width of {value}");
            buf.rewind();
            assert_eq!(buf.read_length().unwrap(), value);
        }
    }

    #[test]
    fn fb_prefix_has_two_meanings() {
        let mut buf = PacketBuffer::from_payload(vec![0xFB, 0xFB]);
        assert_eq!(buf.read_field_length().unwrap(), None);
        assert_eq!(buf.read_length().unwrap(), 0);
    }

    #[test]
    fn short_reads_are_protocol_errors() {
        let mut buf = PacketBuffer::from_payload(vec![0x01, 0x02]);
        let err = buf.read_u32().unwrap_err();
        assert_eq!(err.class(), ErrorClass::ProtocolViolation);
        // Cursor did not move on failure.
        assert_eq!(buf.read_u16().unwrap(), 0x0201);

        let mut buf = PacketBuffer::from_payload(vec![0xFF]);
        assert!(buf.read_field_length().is_err());
    }

    #[test]
    fn strings() {
        let mut buf = PacketBuffer::default();
        buf.write_null_terminated(b"root").unwrap();
        buf.write_lenenc_bytes(b"hello").unwrap();
        buf.write_u8(NULL_MARKER).unwrap();
        buf.rewind();
        assert_eq!(buf.read_null_terminated().unwrap(), b"root");
        assert_eq!(buf.read_lenenc_bytes().unwrap(), b"hello");
        assert_eq!(buf.read_field_bytes().unwrap(), None);

        let mut unterminated = PacketBuffer::from_payload(b"abc".to_vec());
        assert_eq!(unterminated.read_null_terminated().unwrap(), b"abc");
        assert_eq!(unterminated.remaining(), 0);
    }

    #[test]
    fn growth_preserves_content() {
        let mut buf = PacketBuffer::new(2);
        let data: Vec<u8> = (0..=255).collect();
        buf.write_bytes(&data).unwrap();
        assert!(buf.capacity() >= 256);
        assert_eq!(buf.as_slice(), data.as_slice());

        let mut buf = PacketBuffer::new(100);
        buf.write_zeros(100).unwrap();
        buf.ensure_capacity(1).unwrap();
        assert_eq!(buf.capacity(), 125);
    }

    #[test]
    fn ceiling_is_enforced() {
        let mut buf = PacketBuffer::with_max_size(8, 9);
        buf.write_bytes(&[7; 8]).unwrap();
        buf.write_u8(7).unwrap();
        // 25% growth would be 10; it clamps to the ceiling instead of failing.
        assert_eq!(buf.capacity(), 9);
        let err = buf.write_u8(0).unwrap_err();
        assert_eq!(err.class(), ErrorClass::CapacityExceeded);
        assert_eq!(buf.as_slice(), &[7; 9]);
    }

    #[test]
    fn frames_small_packet() {
        let mut buf = PacketBuffer::default();
        buf.start_packet().unwrap();
        buf.write_u8(0x03).unwrap();
        buf.write_bytes(b"SELECT 1").unwrap();
        let mut out = Vec::new();
        let next = buf.write_packets(&mut out, 0).unwrap();
        assert_eq!(next, 1);
        assert_eq!(&out[..4], &[0x09, 0x00, 0x00, 0x00]);
        assert_eq!(&out[4..], b"\x03SELECT 1");
        assert_eq!(buf.packet_payload(), b"\x03SELECT 1");
    }

    #[test]
    fn splits_oversized_payload() {
        let mut buf = PacketBuffer::default();
        buf.start_packet().unwrap();
        buf.write_zeros(MAX_PACKET_SIZE).unwrap();
        let mut out = Vec::new();
        let next = buf.write_packets(&mut out, 5).unwrap();
        // One full fragment plus the empty terminator.
        assert_eq!(next, 7);
        assert_eq!(out.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&out[..4], &[0xFF, 0xFF, 0xFF, 5]);
        assert_eq!(&out[MAX_PACKET_SIZE + 4..], &[0, 0, 0, 6]);
    }

    #[test]
    fn fill_from_appends() {
        let mut buf = PacketBuffer::new(1);
        let mut src: &[u8] = b"abcdef";
        buf.fill_from(&mut src, 3).unwrap();
        buf.fill_from(&mut src, 3).unwrap();
        assert_eq!(buf.as_slice(), b"abcdef");
        assert_eq!(buf.position(), 0);
        assert!(buf.fill_from(&mut src, 1).is_err());
    }
}

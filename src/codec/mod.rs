//! MQTT v5.0 packet codec
//!
//! Encodes and decodes the packets exchanged between the bridge and its
//! broker. Both directions are implemented for every packet type so the
//! in-process test peer can speak the same codec as the session.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::Encoder;

use bytes::{BufMut, BytesMut};

use crate::protocol::{DecodeError, EncodeError};

/// Largest value a Variable Byte Integer can carry
pub const MAX_VAR_INT: u32 = 268_435_455;

/// Default inbound packet size limit
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Bytes needed to encode `value` as a Variable Byte Integer
pub fn var_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Cursor over a packet body
///
/// Every read either consumes exactly the field it returns or fails with
/// [`DecodeError::InsufficientData`] without a partial result.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Consume everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::InsufficientData)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::InsufficientData)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reader over the next `n` bytes, which are consumed here
    pub fn sub(&mut self, n: usize) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader::new(self.take(n)?))
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Variable Byte Integer, at most four bytes
    pub fn var_int(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let mut value = 0u32;
        for shift in [0, 7, 14, 21] {
            let byte = match self.u8() {
                Ok(byte) => byte,
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            };
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        self.pos = start;
        Err(DecodeError::InvalidRemainingLength)
    }

    /// Length-prefixed binary data
    pub fn binary(&mut self) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.u16()? as usize;
        self.take(len).inspect_err(|_| self.pos = start)
    }

    /// Length-prefixed UTF-8 string without null characters
    pub fn string(&mut self) -> Result<&'a str, DecodeError> {
        let s = std::str::from_utf8(self.binary()?).map_err(|_| DecodeError::InvalidUtf8)?;
        if s.contains('\0') {
            return Err(DecodeError::MalformedPacket("string contains null character"));
        }
        Ok(s)
    }
}

/// MQTT field encodings on top of [`BufMut`]
pub trait WireWrite {
    fn put_var_int(&mut self, value: u32) -> Result<(), EncodeError>;

    /// Length-prefixed binary data
    fn put_binary(&mut self, data: &[u8]) -> Result<(), EncodeError>;

    /// Length-prefixed UTF-8 string
    fn put_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.put_binary(s.as_bytes())
    }
}

impl WireWrite for BytesMut {
    fn put_var_int(&mut self, mut value: u32) -> Result<(), EncodeError> {
        if value > MAX_VAR_INT {
            return Err(EncodeError::PacketTooLarge);
        }
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.put_u8(byte);
                return Ok(());
            }
            self.put_u8(byte | 0x80);
        }
    }

    fn put_binary(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let len = u16::try_from(data.len()).map_err(|_| EncodeError::StringTooLong)?;
        self.put_u16(len);
        self.put_slice(data);
        Ok(())
    }
}

//! Length-prefixed frame encoding and incremental decoding.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌──────────────────┬──────────────────┬──────────────────────────┐
//! │ total_length u16 │ protocol_id u16  │ payload (total_length-4) │
//! └──────────────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! All integers are little-endian. Strings are a `u16` byte count followed by
//! UTF-16LE code units; lists are a `u16` element count followed by the
//! encoded elements. `total_length` is written after the payload, so it is
//! always the exact serialized size of the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the `total_length` + `protocol_id` prefix.
pub const HEADER_SIZE: usize = 4;

/// Largest frame the `u16` length prefix can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("declared frame length {declared} is shorter than the header")]
    InvalidLength { declared: usize },

    #[error("declared frame length {declared} exceeds buffer capacity {capacity}")]
    Oversized { declared: usize, capacity: usize },

    #[error("string payload is not valid UTF-16")]
    InvalidUtf16,

    #[error("encoded frame does not fit a u16 length prefix")]
    Overflow,

    #[error("unknown protocol id {0}")]
    UnknownProtocol(u16),

    #[error("{extra} unread bytes after the message fields")]
    TrailingBytes { extra: usize },
}

/// Decoded `total_length` / `protocol_id` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_length: u16,
    pub protocol_id: u16,
}

impl FrameHeader {
    /// Reads the header at the front of `buf`, if enough bytes are present.
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            total_length: u16::from_le_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }
}

/// Serializes one frame. The length prefix is patched in by [`finish`].
///
/// [`finish`]: FrameWriter::finish
pub struct FrameWriter {
    buf: BytesMut,
    overflowed: bool,
}

impl FrameWriter {
    pub fn new(protocol_id: u16) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16_le(0);
        buf.put_u16_le(protocol_id);
        Self {
            buf,
            overflowed: false,
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Writes a `u16` byte count followed by the UTF-16LE encoding of `value`.
    pub fn write_str(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        let byte_len = units.len() * 2;
        self.write_len(byte_len);
        for unit in units {
            self.buf.put_u16_le(unit);
        }
    }

    /// Writes a `u16` element count followed by each encoded element.
    pub fn write_list<T: Encode>(&mut self, items: &[T]) {
        self.write_len(items.len());
        for item in items {
            item.encode(self);
        }
    }

    fn write_len(&mut self, len: usize) {
        match u16::try_from(len) {
            Ok(len) => self.buf.put_u16_le(len),
            Err(_) => {
                self.overflowed = true;
                self.buf.put_u16_le(u16::MAX);
            }
        }
    }

    /// Stamps the final size into the header and freezes the frame.
    pub fn finish(mut self) -> Result<Bytes, FrameError> {
        if self.overflowed {
            return Err(FrameError::Overflow);
        }
        let total = u16::try_from(self.buf.len()).map_err(|_| FrameError::Overflow)?;
        self.buf[0..2].copy_from_slice(&total.to_le_bytes());
        Ok(self.buf.freeze())
    }
}

/// Cursor over a single frame's payload.
pub struct FrameReader<'a> {
    header: FrameHeader,
    payload: &'a [u8],
}

impl<'a> FrameReader<'a> {
    /// Validates the header of a complete frame and positions after it.
    pub fn new(frame: &'a [u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::peek(frame).ok_or_else(|| FrameError::Truncated {
            needed: HEADER_SIZE - frame.len(),
        })?;
        let total = usize::from(header.total_length);
        if total < HEADER_SIZE {
            return Err(FrameError::InvalidLength { declared: total });
        }
        if frame.len() < total {
            return Err(FrameError::Truncated {
                needed: total - frame.len(),
            });
        }
        Ok(Self {
            header,
            payload: &frame[HEADER_SIZE..total],
        })
    }

    pub fn header(&self) -> FrameHeader {
        self.header
    }

    pub fn remaining(&self) -> usize {
        self.payload.remaining()
    }

    /// Fails if any payload bytes were left unread.
    pub fn finish(self) -> Result<(), FrameError> {
        match self.payload.remaining() {
            0 => Ok(()),
            extra => Err(FrameError::TrailingBytes { extra }),
        }
    }

    fn need(&self, size: usize) -> Result<(), FrameError> {
        let remaining = self.payload.remaining();
        if remaining < size {
            return Err(FrameError::Truncated {
                needed: size - remaining,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        self.need(1)?;
        Ok(self.payload.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, FrameError> {
        self.need(2)?;
        Ok(self.payload.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        self.need(4)?;
        Ok(self.payload.get_u32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, FrameError> {
        self.need(4)?;
        Ok(self.payload.get_f32_le())
    }

    pub fn read_bool(&mut self) -> Result<bool, FrameError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, FrameError> {
        let byte_len = usize::from(self.read_u16()?);
        if byte_len % 2 != 0 {
            return Err(FrameError::InvalidUtf16);
        }
        self.need(byte_len)?;
        let units: Vec<u16> = (0..byte_len / 2).map(|_| self.payload.get_u16_le()).collect();
        String::from_utf16(&units).map_err(|_| FrameError::InvalidUtf16)
    }

    pub fn read_list<T: Decode>(&mut self) -> Result<Vec<T>, FrameError> {
        let count = usize::from(self.read_u16()?);
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }
}

/// Types that can be appended to a frame body.
pub trait Encode {
    fn encode(&self, writer: &mut FrameWriter);
}

/// Types that can be read back from a frame body.
pub trait Decode: Sized {
    fn decode(reader: &mut FrameReader<'_>) -> Result<Self, FrameError>;
}

macro_rules! primitive_codec {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut FrameWriter) {
                writer.$write(*self);
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut FrameReader<'_>) -> Result<Self, FrameError> {
                reader.$read()
            }
        }
    };
}

primitive_codec!(u8, write_u8, read_u8);
primitive_codec!(u16, write_u16, read_u16);
primitive_codec!(u32, write_u32, read_u32);
primitive_codec!(f32, write_f32, read_f32);
primitive_codec!(bool, write_bool, read_bool);

impl Encode for String {
    fn encode(&self, writer: &mut FrameWriter) {
        writer.write_str(self);
    }
}

impl Decode for String {
    fn decode(reader: &mut FrameReader<'_>) -> Result<Self, FrameError> {
        reader.read_string()
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut FrameWriter) {
        writer.write_list(self);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut FrameReader<'_>) -> Result<Self, FrameError> {
        reader.read_list()
    }
}

/// Splits the buffered byte stream into complete frames.
///
/// Calls `on_frame` with each whole frame `[0, total_length)` in arrival
/// order and returns how many bytes were consumed. A trailing partial frame
/// is left untouched for the next read. A frame whose declared length is
/// shorter than its header or larger than `capacity` can never complete and
/// is reported as an error.
pub fn decode_frames<F>(buf: &[u8], capacity: usize, mut on_frame: F) -> Result<usize, FrameError>
where
    F: FnMut(&[u8]),
{
    let mut processed = 0;

    while let Some(header) = FrameHeader::peek(&buf[processed..]) {
        let total = usize::from(header.total_length);
        if total < HEADER_SIZE {
            return Err(FrameError::InvalidLength { declared: total });
        }
        if total > capacity {
            return Err(FrameError::Oversized {
                declared: total,
                capacity,
            });
        }

        let available = buf.len() - processed;
        if available < total {
            break;
        }

        on_frame(&buf[processed..processed + total]);
        processed += total;
    }

    Ok(processed)
}

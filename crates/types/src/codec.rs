// Path: crates/types/src/codec.rs

//! MessagePack-compatible wire codec.
//!
//! User values are packed as binary payloads (`bin8`/`bin16`/`bin32`
//! framing); the same primitives carry the length-discriminated compact node
//! forms and the snapshot chunk streams. Only the markers the store emits
//! are accepted back — anything else is a [`CodecError::InvalidMarker`].

use crate::error::CodecError;

const FIXARRAY: u8 = 0x90;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const ARRAY16: u8 = 0xdc;
const ARRAY32: u8 = 0xdd;

/// Packs a user value for storage inside a leaf. Byte equality of packed
/// values is what proof verification compares.
pub fn pack(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 5);
    write_bin(&mut out, value);
    out
}

/// Reverses [`pack`], rejecting anything but a single binary payload.
pub fn unpack(packed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut rd = Reader::new(packed);
    let value = rd.read_bin()?.to_vec();
    rd.finish()?;
    Ok(value)
}

pub fn write_bin(out: &mut Vec<u8>, bytes: &[u8]) {
    match bytes.len() {
        n if n <= u8::MAX as usize => {
            out.push(BIN8);
            out.push(n as u8);
        }
        n if n <= u16::MAX as usize => {
            out.push(BIN16);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(BIN32);
            out.extend_from_slice(&(n as u32).to_be_bytes());
        }
    }
    out.extend_from_slice(bytes);
}

pub fn write_uint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0x7f => out.push(n as u8),
        0x80..=0xff => {
            out.push(UINT8);
            out.push(n as u8);
        }
        0x100..=0xffff => {
            out.push(UINT16);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(UINT32);
            out.extend_from_slice(&(n as u32).to_be_bytes());
        }
        _ => {
            out.push(UINT64);
            out.extend_from_slice(&n.to_be_bytes());
        }
    }
}

pub fn write_array_header(out: &mut Vec<u8>, len: usize) {
    match len {
        0..=15 => out.push(FIXARRAY | len as u8),
        16..=0xffff => {
            out.push(ARRAY16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(ARRAY32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

/// Cursor over a packed byte stream.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Byte offset of the cursor, used to slice out the span of one value.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fails unless the whole input has been consumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::LengthOverflow)?;
        if end > self.buf.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bin(&mut self) -> Result<&'a [u8], CodecError> {
        let marker = self.take_byte()?;
        let len = match marker {
            BIN8 => self.take_byte()? as usize,
            BIN16 => u16::from_be_bytes(self.take(2)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as usize,
            BIN32 => u32::from_be_bytes(self.take(4)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as usize,
            other => return Err(CodecError::InvalidMarker(other)),
        };
        self.take(len)
    }

    pub fn read_uint(&mut self) -> Result<u64, CodecError> {
        let marker = self.take_byte()?;
        match marker {
            0..=0x7f => Ok(marker as u64),
            UINT8 => Ok(self.take_byte()? as u64),
            UINT16 => Ok(u16::from_be_bytes(self.take(2)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as u64),
            UINT32 => Ok(u32::from_be_bytes(self.take(4)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as u64),
            UINT64 => Ok(u64::from_be_bytes(self.take(8)?.try_into().map_err(|_| CodecError::UnexpectedEof)?)),
            other => Err(CodecError::InvalidMarker(other)),
        }
    }

    pub fn read_array_header(&mut self) -> Result<usize, CodecError> {
        let marker = self.take_byte()?;
        match marker {
            m if m & 0xf0 == FIXARRAY => Ok((m & 0x0f) as usize),
            ARRAY16 => Ok(u16::from_be_bytes(self.take(2)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as usize),
            ARRAY32 => Ok(u32::from_be_bytes(self.take(4)?.try_into().map_err(|_| CodecError::UnexpectedEof)?) as usize),
            other => Err(CodecError::InvalidMarker(other)),
        }
    }
}

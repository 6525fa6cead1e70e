//! The shared request/response buffer and its cursor pair.
//!
//! A [`Frame`] lends a single mutable byte buffer to a chain of layers for
//! the duration of one operation. Layers never retain a pointer into the
//! buffer between calls (see spec §5); they only remember integer offsets
//! in their own state and re-derive slices from the `Frame` they are
//! handed each time.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::LayerError;

/// A mutable byte buffer plus the `payload_start`/`payload_end` cursor pair
/// that every layer operation reads and narrows.
///
/// The buffer is little-endian on the wire for every multi-byte field;
/// all `get_*`/`put_*` helpers here encode that assumption.
pub struct Frame<'a> {
    buffer: &'a mut [u8],
    payload_start: usize,
    payload_end: usize,
}

impl<'a> Frame<'a> {
    /// Wrap a buffer with the cursors spanning its full capacity.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let capacity = buffer.len();
        Frame {
            buffer,
            payload_start: 0,
            payload_end: capacity,
        }
    }

    /// Wrap a buffer with explicit initial cursors, e.g. to resume a
    /// `PARTIAL` decode at the offsets the caller was told to keep.
    pub fn with_cursors(buffer: &'a mut [u8], payload_start: usize, payload_end: usize) -> Self {
        Frame {
            buffer,
            payload_start,
            payload_end,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn payload_start(&self) -> usize {
        self.payload_start
    }

    pub fn payload_end(&self) -> usize {
        self.payload_end
    }

    pub fn payload_len(&self) -> usize {
        self.payload_end.saturating_sub(self.payload_start)
    }

    pub fn set_payload_start(&mut self, value: usize) {
        self.payload_start = value;
    }

    pub fn set_payload_end(&mut self, value: usize) {
        self.payload_end = value;
    }

    /// Lower `payload_start` by `amount`, revealing a header a layer
    /// reserved earlier. Used by `build_layer` implementations.
    pub fn lower_payload_start_to(&mut self, offset: usize) {
        self.payload_start = offset;
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), LayerError> {
        let end = offset.checked_add(len).ok_or_else(|| {
            LayerError::OutOfBounds(format!(
                "offset {offset} + {len} overflows for a buffer of {} bytes",
                self.buffer.len()
            ))
        })?;
        if end > self.buffer.len() {
            return Err(LayerError::OutOfBounds(format!(
                "offset {offset} + {len} exceeds buffer capacity {}",
                self.buffer.len()
            )));
        }
        Ok(())
    }

    /// Read a single byte at `*cursor`, advancing it by one.
    pub fn get_u8(&self, cursor: &mut usize) -> Result<u8, LayerError> {
        self.check_bounds(*cursor, 1)?;
        let value = self.buffer[*cursor];
        *cursor += 1;
        Ok(value)
    }

    /// Read a little-endian `u16` at `*cursor`, advancing it by two.
    pub fn get_u16_le(&self, cursor: &mut usize) -> Result<u16, LayerError> {
        self.check_bounds(*cursor, 2)?;
        let value = LittleEndian::read_u16(&self.buffer[*cursor..*cursor + 2]);
        *cursor += 2;
        Ok(value)
    }

    /// Read a little-endian `u32` at `*cursor`, advancing it by four.
    pub fn get_u32_le(&self, cursor: &mut usize) -> Result<u32, LayerError> {
        self.check_bounds(*cursor, 4)?;
        let value = LittleEndian::read_u32(&self.buffer[*cursor..*cursor + 4]);
        *cursor += 4;
        Ok(value)
    }

    /// Peek a byte without advancing the cursor. Used to read a service
    /// code before deciding which response parser to dispatch to.
    pub fn peek_u8(&self, offset: usize) -> Result<u8, LayerError> {
        self.check_bounds(offset, 1)?;
        Ok(self.buffer[offset])
    }

    /// Write a single byte at `*cursor`, advancing it by one.
    pub fn put_u8(&mut self, cursor: &mut usize, value: u8) -> Result<(), LayerError> {
        self.check_bounds(*cursor, 1)?;
        self.buffer[*cursor] = value;
        *cursor += 1;
        Ok(())
    }

    /// Write a little-endian `u16` at `*cursor`, advancing it by two.
    pub fn put_u16_le(&mut self, cursor: &mut usize, value: u16) -> Result<(), LayerError> {
        self.check_bounds(*cursor, 2)?;
        LittleEndian::write_u16(&mut self.buffer[*cursor..*cursor + 2], value);
        *cursor += 2;
        Ok(())
    }

    /// Write a little-endian `u32` at `*cursor`, advancing it by four.
    pub fn put_u32_le(&mut self, cursor: &mut usize, value: u32) -> Result<(), LayerError> {
        self.check_bounds(*cursor, 4)?;
        LittleEndian::write_u32(&mut self.buffer[*cursor..*cursor + 4], value);
        *cursor += 4;
        Ok(())
    }

    /// Write raw bytes at `*cursor`, advancing it by their length.
    pub fn put_bytes(&mut self, cursor: &mut usize, bytes: &[u8]) -> Result<(), LayerError> {
        self.check_bounds(*cursor, bytes.len())?;
        self.buffer[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
        *cursor += bytes.len();
        Ok(())
    }

    /// Patch a little-endian `u16` already written at `offset`, without
    /// moving any cursor. Used to backfill CPF data-item lengths once the
    /// size of what follows is known.
    pub fn patch_u16_le(&mut self, offset: usize, value: u16) -> Result<(), LayerError> {
        self.check_bounds(offset, 2)?;
        LittleEndian::write_u16(&mut self.buffer[offset..offset + 2], value);
        Ok(())
    }
}

//! Wire codec - fixed-order, fixed-width field encoding for envelopes.
//!
//! Every payload describes its fields exactly once through [`WireFields`].
//! The same description drives both directions: [`WireWriter`] reads the
//! fields and appends them to a buffer, [`WireReader`] overwrites them from
//! a buffer. Field order therefore cannot drift between pack and unpack.
//!
//! # Format
//!
//! ```text
//! int32    : 4 bytes little-endian
//! float64  : 8 bytes little-endian IEEE-754
//! string   : int32 byte length, then UTF-8 bytes
//! vector3  : three float64 (x, y, z)
//! array    : int32 element count, then each element
//! ```
//!
//! There is no type tag or outer framing; the receiver must already know
//! which payload it is decoding.

use nalgebra::Vector3;
use thiserror::Error;

/// Errors raised while packing or unpacking a payload.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    /// Buffer ended before a field was complete
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string length or array count was negative
    #[error("Negative length prefix: {0}")]
    NegativeLength(i32),

    /// An array count cannot fit in the remaining bytes
    #[error("Element count {count} exceeds remaining {remaining} bytes")]
    CountTooLarge { count: usize, remaining: usize },

    /// String bytes were not valid UTF-8
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A string or array is too long for an int32 prefix
    #[error("Length {0} does not fit an int32 prefix")]
    TooLong(usize),

    /// Bytes left over after the last field
    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),
}

/// Visitor over a payload's fields, in wire order.
///
/// Implemented for writing and reading bytes, and for filling fields from
/// script arguments. Payloads never see which direction they are walked in.
pub trait FieldWalker {
    /// Error raised by this walker.
    type Error;

    /// Visits a 32-bit integer field.
    fn int32(&mut self, value: &mut i32) -> Result<(), Self::Error>;

    /// Visits a 64-bit float field.
    fn float64(&mut self, value: &mut f64) -> Result<(), Self::Error>;

    /// Visits a length-prefixed string field.
    fn string(&mut self, value: &mut String) -> Result<(), Self::Error>;

    /// Visits an array count. Writers emit `len` and return it; readers
    /// return the decoded count.
    fn count(&mut self, len: usize) -> Result<usize, Self::Error>;

    /// Visits a 3-vector as three consecutive float64 fields.
    fn vector3(&mut self, value: &mut Vector3<f64>) -> Result<(), Self::Error> {
        for component in value.iter_mut() {
            self.float64(component)?;
        }
        Ok(())
    }

    /// Visits a counted array of strings.
    fn strings(&mut self, values: &mut Vec<String>) -> Result<(), Self::Error> {
        let n = self.count(values.len())?;
        values.resize(n, String::new());
        for value in values.iter_mut() {
            self.string(value)?;
        }
        Ok(())
    }

    /// Visits a counted array of float64.
    fn floats(&mut self, values: &mut Vec<f64>) -> Result<(), Self::Error> {
        let n = self.count(values.len())?;
        values.resize(n, 0.0);
        for value in values.iter_mut() {
            self.float64(value)?;
        }
        Ok(())
    }
}

/// A value whose fields can be walked in wire order.
pub trait WireFields {
    /// Presents every field to `walker`, in the fixed wire order.
    fn describe_fields<W: FieldWalker>(&mut self, walker: &mut W) -> Result<(), W::Error>;
}

/// Appends fields to a byte buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer, returning the packed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn prefix(&mut self, len: usize) -> Result<(), WireError> {
        let len = i32::try_from(len).map_err(|_| WireError::TooLong(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

impl FieldWalker for WireWriter {
    type Error = WireError;

    fn int32(&mut self, value: &mut i32) -> Result<(), WireError> {
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn float64(&mut self, value: &mut f64) -> Result<(), WireError> {
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<(), WireError> {
        self.prefix(value.len())?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn count(&mut self, len: usize) -> Result<usize, WireError> {
        self.prefix(len)?;
        Ok(len)
    }
}

/// Reads fields back out of a byte buffer.
pub struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let slice = self.take_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = self.bytes;
        let slice = &bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn prefix(&mut self) -> Result<usize, WireError> {
        let raw = i32::from_le_bytes(self.take::<4>()?);
        usize::try_from(raw).map_err(|_| WireError::NegativeLength(raw))
    }
}

impl FieldWalker for WireReader<'_> {
    type Error = WireError;

    fn int32(&mut self, value: &mut i32) -> Result<(), WireError> {
        *value = i32::from_le_bytes(self.take::<4>()?);
        Ok(())
    }

    fn float64(&mut self, value: &mut f64) -> Result<(), WireError> {
        *value = f64::from_le_bytes(self.take::<8>()?);
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<(), WireError> {
        let len = self.prefix()?;
        let bytes = self.take_slice(len)?;
        *value = std::str::from_utf8(bytes)
            .map_err(|_| WireError::InvalidUtf8)?
            .to_owned();
        Ok(())
    }

    fn count(&mut self, _len: usize) -> Result<usize, WireError> {
        let count = self.prefix()?;
        // Every element occupies at least four bytes
        if count > self.remaining() / 4 {
            return Err(WireError::CountTooLarge {
                count,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

/// Packs a value into a fresh buffer.
pub fn encode<T: WireFields>(value: &mut T) -> Result<Vec<u8>, WireError> {
    let mut writer = WireWriter::new();
    value.describe_fields(&mut writer)?;
    Ok(writer.into_bytes())
}

/// Unpacks `bytes` into `value`, requiring the whole buffer to be consumed.
pub fn decode_into<T: WireFields>(value: &mut T, bytes: &[u8]) -> Result<(), WireError> {
    let mut reader = WireReader::new(bytes);
    value.describe_fields(&mut reader)?;
    reader.finish()
}

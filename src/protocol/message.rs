//! Message body buffer
//!
//! A `Message` is the unit handed to application protocols: a byte body
//! with a read/write cursor driving the sequential get/add operations.

use thiserror::Error;

use super::MAX_BODY_SIZE;

/// Errors raised by cursor operations on a message body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("write of {requested} bytes at offset {offset} exceeds the {max} byte body limit")]
    Overflow {
        offset: usize,
        requested: usize,
        max: usize,
    },

    #[error("read of {requested} bytes at offset {offset} exceeds body length {length}")]
    OutOfBounds {
        offset: usize,
        requested: usize,
        length: usize,
    },
}

pub type MessageResult<T> = Result<T, MessageError>;

/// A protocol message body.
///
/// Created empty for outbound frames and filled with `add_*` calls, or
/// created from a decoded body and drained with `get_*` calls. The cursor
/// never moves past the body length on reads; writes past [`MAX_BODY_SIZE`]
/// are rejected.
#[derive(Debug, Clone, Default)]
pub struct Message {
    body: Vec<u8>,
    offset: usize,
}

impl Message {
    /// Create an empty message for outbound use
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-received body, cursor at the start
    pub fn from_body(body: Vec<u8>) -> Self {
        Self { body, offset: 0 }
    }

    /// Number of body bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Bytes left between the cursor and the end of the body
    pub fn remaining(&self) -> usize {
        self.body.len().saturating_sub(self.offset)
    }

    /// The full body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Append bytes at the cursor
    pub fn add_bytes(&mut self, bytes: &[u8]) -> MessageResult<()> {
        if self.offset + bytes.len() > MAX_BODY_SIZE {
            return Err(MessageError::Overflow {
                offset: self.offset,
                requested: bytes.len(),
                max: MAX_BODY_SIZE,
            });
        }

        self.body.extend_from_slice(bytes);
        self.offset += bytes.len();
        Ok(())
    }

    /// Append a single byte at the cursor
    pub fn add_u8(&mut self, value: u8) -> MessageResult<()> {
        self.add_bytes(&[value])
    }

    /// Append the raw bytes of a string at the cursor
    pub fn add_str(&mut self, value: &str) -> MessageResult<()> {
        self.add_bytes(value.as_bytes())
    }

    /// Read one byte at the cursor and advance it
    pub fn get_u8(&mut self) -> MessageResult<u8> {
        self.check_read(1)?;

        let value = self.body[self.offset];
        self.offset += 1;
        Ok(value)
    }

    /// Read exactly `count` bytes at the cursor and advance it
    pub fn get_bytes(&mut self, count: usize) -> MessageResult<Vec<u8>> {
        self.check_read(count)?;

        let bytes = self.body[self.offset..self.offset + count].to_vec();
        self.offset += count;
        Ok(bytes)
    }

    /// Advance the cursor by `count` bytes without reading them
    pub fn skip_bytes(&mut self, count: usize) -> MessageResult<()> {
        self.check_read(count)?;

        self.offset += count;
        Ok(())
    }

    /// Adler-32 over exactly the body bytes
    pub fn compute_checksum(&self) -> u32 {
        adler2::adler32_slice(&self.body)
    }

    fn check_read(&self, requested: usize) -> MessageResult<()> {
        if self.offset + requested > self.body.len() {
            return Err(MessageError::OutOfBounds {
                offset: self.offset,
                requested,
                length: self.body.len(),
            });
        }

        Ok(())
    }
}

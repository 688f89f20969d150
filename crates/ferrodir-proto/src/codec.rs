//! Low-level field grammar shared by every message: one tag byte, then
//! NUL-terminated UTF-8 fields in a fixed order.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{ProtoError, Result};

/// Appends tag and NUL-terminated fields into a message buffer.
#[derive(Debug)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    /// Starts a message with its type tag.
    pub fn new(tag: u8) -> Self {
        let mut buf = Vec::with_capacity(128);
        buf.push(tag);
        Self { buf }
    }

    /// Writes a string field followed by the terminator byte.
    ///
    /// Field contents must not contain NUL; the terminator is how decoders
    /// find the field boundary.
    pub fn write_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Writes a number as a decimal string field.
    pub fn write_num(&mut self, n: impl Display) {
        self.write_str(&n.to_string());
    }

    /// Writes a boolean as a `true`/`false` string field.
    pub fn write_bool(&mut self, b: bool) {
        self.write_str(if b { "true" } else { "false" });
    }

    /// Writes a single raw byte (no terminator). Used for flag bytes.
    pub fn write_flag(&mut self, b: bool) {
        self.buf.push(u8::from(b));
    }

    /// Writes a single raw byte (no terminator).
    pub fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Appends raw bytes with no terminator. Only valid for the final field
    /// of a message (read-to-end decoding).
    pub fn write_tail(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Finishes the message.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Walks tag and NUL-terminated fields of a received message buffer.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Starts decoding, validating the type tag first.
    pub fn new(buf: &'a [u8], expected_tag: u8) -> Result<Self> {
        match buf.first() {
            None => Err(ProtoError::data_format("empty buffer")),
            Some(&tag) if tag != expected_tag => Err(ProtoError::UnexpectedTag {
                expected: expected_tag,
                got: tag,
            }),
            Some(_) => Ok(Self { buf, pos: 1 }),
        }
    }

    /// Reads the next NUL-terminated field as UTF-8 text.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| ProtoError::data_format("missing field terminator"))?;
        let field = std::str::from_utf8(&rest[..end])
            .map_err(|_| ProtoError::data_format("field is not valid UTF-8"))?;
        self.pos += end + 1;
        Ok(field)
    }

    /// Reads the next field and parses it.
    pub fn read_num<T>(&mut self) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let field = self.read_str()?;
        field
            .parse::<T>()
            .map_err(|e| ProtoError::data_format(format!("bad numeric field {field:?}: {e}")))
    }

    /// Reads a `true`/`false` string field.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_str()? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ProtoError::data_format(format!(
                "bad boolean field {other:?}"
            ))),
        }
    }

    /// Reads a single raw flag byte (1 means true).
    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_byte()? == 1)
    }

    /// Reads a single raw byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let b = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| ProtoError::data_format("buffer ended inside message"))?;
        self.pos += 1;
        Ok(b)
    }

    /// True once every byte has been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Consumes and returns everything left in the buffer. Used for the
    /// final field of messages that carry a server-state snapshot, whose
    /// encoding may itself contain NUL bytes.
    pub fn read_tail(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Returns the tag byte of an encoded message without consuming anything.
pub fn peek_tag(buf: &[u8]) -> Result<u8> {
    buf.first()
        .copied()
        .ok_or_else(|| ProtoError::data_format("empty buffer"))
}

//! Big-endian read cursor over an agent request body.
//!
//! Every integer an agent sends is a `u32` in network byte order and
//! every variable-length field is prefixed with its `u32` length.

use thiserror::Error;

/// Errors raised while decoding agent-supplied bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("request header is truncated at the {field} field")]
    TruncatedHeader { field: &'static str },

    #[error("registration carries an all-zero session key")]
    ZeroSessionKey,

    #[error("registration agent id {payload:#x} does not match header agent id {header:#x}")]
    AgentIdMismatch { header: u32, payload: u32 },
}

/// Consuming cursor over a byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parser {
    buffer: Vec<u8>,
    pos: usize,
}

impl Parser {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: bytes.into(),
            pos: 0,
        }
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The unread tail of the buffer.
    pub fn remaining(&self) -> &[u8] {
        self.buffer.get(self.pos..).unwrap_or_default()
    }

    /// Consume the cursor, returning the unread bytes.
    pub fn into_remaining(mut self) -> Vec<u8> {
        self.buffer.split_off(self.pos)
    }

    pub fn parse_raw(&mut self, n: usize) -> Result<&[u8], ParseError> {
        let remaining = self.len();
        if n > remaining {
            return Err(ParseError::UnexpectedEof {
                needed: n,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(self.buffer.get(start..self.pos).unwrap_or_default())
    }

    pub fn parse_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.parse_raw(N)?);
        Ok(out)
    }

    pub fn parse_u32(&mut self) -> Result<u32, ParseError> {
        self.parse_array::<4>().map(u32::from_be_bytes)
    }

    /// Length-prefixed byte field.
    pub fn parse_bytes(&mut self) -> Result<Vec<u8>, ParseError> {
        let len = self.parse_u32()? as usize;
        self.parse_raw(len).map(<[u8]>::to_vec)
    }

    /// Length-prefixed string field. Agents send C strings, so trailing NULs
    /// are dropped and invalid UTF-8 is replaced rather than rejected.
    pub fn parse_string(&mut self) -> Result<String, ParseError> {
        let bytes = self.parse_bytes()?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string())
    }
}

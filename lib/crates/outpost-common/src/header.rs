//! Fixed request header every agent family prefixes its body with.

use crate::parser::{ParseError, Parser};

/// `size | magic value | agent id`, followed by the family-specific data.
/// `size` counts every byte after the size field itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHeader {
    pub size: u32,
    pub magic_value: u32,
    pub agent_id: u32,
    /// Cursor over everything after the header.
    pub data: Parser,
}

impl AgentHeader {
    /// Parse the header from a raw request body.
    ///
    /// Each header field is only read while more than one field's worth of
    /// bytes remains, so a body made of nothing but a header is rejected.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut parser = Parser::new(body);

        let size = read_field(&mut parser, "size")?;
        let magic_value = read_field(&mut parser, "magic value")?;
        let agent_id = read_field(&mut parser, "agent id")?;

        Ok(Self {
            size,
            magic_value,
            agent_id,
            data: Parser::new(parser.into_remaining()),
        })
    }
}

fn read_field(parser: &mut Parser, field: &'static str) -> Result<u32, ParseError> {
    if parser.len() <= 4 {
        return Err(ParseError::TruncatedHeader { field });
    }
    parser.parse_u32()
}

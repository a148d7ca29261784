pub mod crypt;
pub mod header;
pub mod packer;
pub mod parser;
pub mod protocol;
pub mod registration;
pub mod types;

pub use crypt::SessionKeys;
pub use header::AgentHeader;
pub use packer::{DemonJob, Packer, build_payload_message, encode_request};
pub use parser::{ParseError, Parser};
pub use registration::{AgentRegistration, OsVersion, ProcessArch};
pub use types::*;

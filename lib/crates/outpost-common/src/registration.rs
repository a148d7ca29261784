//! Decoding of the first-party registration (`DEMON_INIT`) payload.
//!
//! Layout after the command word, all integers big-endian:
//!
//! ```text
//! request id | AES key (32) | AES IV (16) | encrypted {
//!     agent id | hostname | username | domain | internal ip | process path |
//!     pid | ppid | process arch | elevated | os major | os minor | os build |
//!     os arch | sleep delay | sleep jitter
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::crypt::{AES_IV_LEN, AES_KEY_LEN, SessionKeys};
use crate::parser::{ParseError, Parser};

/// Process or OS architecture as reported by the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessArch {
    X86,
    X64,
    Ia64,
    Unknown,
}

impl From<u32> for ProcessArch {
    fn from(raw: u32) -> Self {
        match raw {
            1 => Self::X86,
            2 => Self::X64,
            3 => Self::Ia64,
            _ => Self::Unknown,
        }
    }
}

impl From<ProcessArch> for u32 {
    fn from(arch: ProcessArch) -> Self {
        match arch {
            ProcessArch::X86 => 1,
            ProcessArch::X64 => 2,
            ProcessArch::Ia64 => 3,
            ProcessArch::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Everything a first-party agent tells the listener about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistration {
    pub request_id: u32,
    pub keys: SessionKeys,
    pub agent_id: u32,
    pub hostname: String,
    pub username: String,
    pub domain: String,
    pub internal_ip: String,
    pub process_path: String,
    pub pid: u32,
    pub ppid: u32,
    pub process_arch: ProcessArch,
    pub elevated: bool,
    pub os_version: OsVersion,
    pub os_arch: ProcessArch,
    pub sleep_delay: u32,
    pub sleep_jitter: u32,
}

impl AgentRegistration {
    /// Decode a registration from the data cursor that follows the command.
    ///
    /// `header_agent_id` is the id from the request header; the encrypted
    /// block must repeat it.
    pub fn parse(header_agent_id: u32, data: &mut Parser) -> Result<Self, ParseError> {
        let request_id = data.parse_u32()?;
        let key = data.parse_array::<AES_KEY_LEN>()?;
        let iv = data.parse_array::<AES_IV_LEN>()?;
        let keys = SessionKeys::new(key, iv);
        if keys.is_zero() {
            return Err(ParseError::ZeroSessionKey);
        }

        let mut block = Parser::new(keys.xcrypt(data.remaining()));
        let agent_id = block.parse_u32()?;
        if agent_id != header_agent_id {
            return Err(ParseError::AgentIdMismatch {
                header: header_agent_id,
                payload: agent_id,
            });
        }

        Ok(Self {
            request_id,
            keys,
            agent_id,
            hostname: block.parse_string()?,
            username: block.parse_string()?,
            domain: block.parse_string()?,
            internal_ip: block.parse_string()?,
            process_path: block.parse_string()?,
            pid: block.parse_u32()?,
            ppid: block.parse_u32()?,
            process_arch: block.parse_u32()?.into(),
            elevated: block.parse_u32()? != 0,
            os_version: OsVersion {
                major: block.parse_u32()?,
                minor: block.parse_u32()?,
                build: block.parse_u32()?,
            },
            os_arch: block.parse_u32()?.into(),
            sleep_delay: block.parse_u32()?,
            sleep_jitter: block.parse_u32()?,
        })
    }

    /// Encode the registration the way an agent sends it (without the
    /// command word). Used by service agents and tests.
    pub fn encode(&self) -> Vec<u8> {
        fn put_str(out: &mut Vec<u8>, value: &str) {
            let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(value.as_bytes());
        }

        let mut block = Vec::new();
        block.extend_from_slice(&self.agent_id.to_be_bytes());
        for field in [
            &self.hostname,
            &self.username,
            &self.domain,
            &self.internal_ip,
            &self.process_path,
        ] {
            put_str(&mut block, field);
        }
        for value in [
            self.pid,
            self.ppid,
            self.process_arch.into(),
            u32::from(self.elevated),
            self.os_version.major,
            self.os_version.minor,
            self.os_version.build,
            self.os_arch.into(),
            self.sleep_delay,
            self.sleep_jitter,
        ] {
            block.extend_from_slice(&value.to_be_bytes());
        }
        self.keys.apply(&mut block);

        let mut out = self.request_id.to_be_bytes().to_vec();
        out.extend_from_slice(&self.keys.key);
        out.extend_from_slice(&self.keys.iv);
        out.extend_from_slice(&block);
        out
    }

    /// File name part of the process path, accepting either separator.
    pub fn process_name(&self) -> &str {
        self.process_path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.process_path)
    }
}

//! Shared fixtures for unit tests.

use outpost_common::crypt::{AES_IV_LEN, AES_KEY_LEN};
use outpost_common::{AgentRegistration, OsVersion, ProcessArch, SessionKeys};

pub fn registration(agent_id: u32) -> AgentRegistration {
    AgentRegistration {
        request_id: 1,
        keys: SessionKeys::new([0x11; AES_KEY_LEN], [0x22; AES_IV_LEN]),
        agent_id,
        hostname: "WS01".to_string(),
        username: "alice".to_string(),
        domain: "CORP".to_string(),
        internal_ip: "10.0.0.5".to_string(),
        process_path: "C:\\Windows\\System32\\rundll32.exe".to_string(),
        pid: 4242,
        ppid: 600,
        process_arch: ProcessArch::X64,
        elevated: false,
        os_version: OsVersion {
            major: 10,
            minor: 0,
            build: 19045,
        },
        os_arch: ProcessArch::X64,
        sleep_delay: 2,
        sleep_jitter: 0,
    }
}

/// Registration payload as it follows the `DEMON_INIT` command.
pub fn registration_body(agent_id: u32) -> Vec<u8> {
    registration(agent_id).encode()
}

//! Protocol constants shared by the listener and first-party agents.
//!
//! The numeric values are part of the wire contract with deployed agents
//! and must never change.

/// Magic value carried by every first-party agent request.
pub const DEMON_MAGIC_VALUE: u32 = 0xDEAD_BEEF;

/// Agent asks for its queued jobs.
pub const COMMAND_GET_JOB: u32 = 1;

/// Job entry meaning "nothing queued". Always carries an empty payload.
pub const COMMAND_NOJOB: u32 = 10;

/// Agent registration (first check-in).
pub const DEMON_INIT: u32 = 99;

/// Job tunnelling traffic to or from a pivoted agent.
pub const COMMAND_PIVOT: u32 = 2520;

/// Pivot sub-command relaying an SMB agent's traffic. Its volume is never
/// reported as callback size.
pub const DEMON_PIVOT_SMB_COMMAND: u8 = 12;

/// Listener protocol names as reported to observers.
pub mod listener_protocol {
    pub const HTTP: &str = "Http";
    pub const HTTPS: &str = "Https";
}

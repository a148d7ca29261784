use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registration::{OsVersion, ProcessArch};

/// Listener description handed to observers when a listener starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerInfo {
    pub name: String,
    /// `Http` or `Https`.
    pub protocol: String,
    pub hosts: Vec<String>,
    pub host_bind: String,
    pub port: u16,
    pub uris: Vec<String>,
    pub secure: bool,
    pub headers: Vec<String>,
}

/// Snapshot of a registered agent.
///
/// This is the enrichment context third-party handlers receive for an agent
/// id that also has a first-party registration, and the payload of the
/// new-agent event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentContext {
    pub agent_id: u32,
    pub magic_value: u32,
    pub listener: String,
    pub external_ip: String,
    pub internal_ip: String,
    pub hostname: String,
    pub username: String,
    pub domain: String,
    pub process_name: String,
    pub process_path: String,
    pub pid: u32,
    pub ppid: u32,
    pub process_arch: ProcessArch,
    pub elevated: bool,
    pub os_version: OsVersion,
    pub os_arch: ProcessArch,
    pub sleep_delay: u32,
    pub sleep_jitter: u32,
    pub first_callback: DateTime<Utc>,
    pub last_callback: DateTime<Utc>,
}

/// Something observers of the teamserver should learn about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ListenerStarted {
        listener: ListenerInfo,
    },
    ListenerError {
        name: String,
        error: String,
    },
    NewAgent {
        agent: Box<AgentContext>,
    },
    /// An agent sent a command other than a job poll.
    AgentCallback {
        agent_id: u32,
        command: u32,
        length: usize,
    },
    /// Bytes delivered to an agent in one job frame.
    CallbackSize {
        agent_id: u32,
        bytes: usize,
    },
    AgentLastSeen {
        agent_id: u32,
        seconds: i64,
    },
}

/// A timestamped event as stored in the event log and broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventPackage {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventPackage {
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

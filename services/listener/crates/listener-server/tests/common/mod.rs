//! Shared fixtures for listener integration tests.

#![allow(dead_code)] // not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use outpost_common::crypt::{AES_IV_LEN, AES_KEY_LEN};
use outpost_common::protocol::DEMON_MAGIC_VALUE;
use outpost_common::{
    AgentRegistration, Event, EventPackage, OsVersion, ProcessArch, SessionKeys, encode_request,
};
use outpost_listener::{HttpListener, ListenerConfig, Teamserver};
use tokio::sync::broadcast;

pub fn config(name: &str) -> ListenerConfig {
    ListenerConfig {
        name: name.to_string(),
        hosts: vec!["127.0.0.1".to_string()],
        host_bind: None,
        port: Some(0),
        uris: vec!["/submit.php".to_string()],
        secure: false,
        headers: vec!["Server: nginx".to_string()],
    }
}

pub fn keys() -> SessionKeys {
    SessionKeys::new([0x5A; AES_KEY_LEN], [0xA5; AES_IV_LEN])
}

pub fn registration(agent_id: u32) -> AgentRegistration {
    AgentRegistration {
        request_id: 3,
        keys: keys(),
        agent_id,
        hostname: "DESKTOP-01".to_string(),
        username: "bob".to_string(),
        domain: "WORKGROUP".to_string(),
        internal_ip: "192.168.1.20".to_string(),
        process_path: "C:\\Users\\bob\\agent.exe".to_string(),
        pid: 1337,
        ppid: 4,
        process_arch: ProcessArch::X64,
        elevated: false,
        os_version: OsVersion {
            major: 10,
            minor: 0,
            build: 22631,
        },
        os_arch: ProcessArch::X64,
        sleep_delay: 2,
        sleep_jitter: 10,
    }
}

pub fn init_request(agent_id: u32) -> Vec<u8> {
    encode_request(
        DEMON_MAGIC_VALUE,
        agent_id,
        outpost_common::protocol::DEMON_INIT,
        &registration(agent_id).encode(),
    )
}

pub fn get_job_request(agent_id: u32) -> Vec<u8> {
    encode_request(
        DEMON_MAGIC_VALUE,
        agent_id,
        outpost_common::protocol::COMMAND_GET_JOB,
        &[0; 4],
    )
}

pub fn listener(config: ListenerConfig, root: &std::path::Path) -> (Arc<Teamserver>, HttpListener) {
    let teamserver = Arc::new(Teamserver::new());
    let listener = HttpListener::new(config, teamserver.clone(), root).unwrap();
    (teamserver, listener)
}

/// Wait up to five seconds for the first event matching `pred`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<EventPackage>,
    pred: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(package) if pred(&package.event) => return Some(package.event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

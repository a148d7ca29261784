//! In-process registry and event bus implementing [`AgentRoutines`].
//!
//! Agents, listeners and service agents live in `RwLock`ed maps. Events
//! are kept in a bounded log for replay and pushed to observers over a
//! `tokio::sync::broadcast` channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;

use outpost_common::{EventPackage, ListenerInfo};

use crate::agent::Agent;
use crate::error::RegistryError;
use crate::ports::{AgentRoutines, ServiceAgent};

/// Events kept for replay; older ones are dropped first.
pub const EVENT_LOG_CAPACITY: usize = 1000;

const BROADCAST_CAPACITY: usize = 256;

pub struct Teamserver {
    agents: RwLock<HashMap<u32, Arc<Agent>>>,
    listeners: RwLock<HashMap<String, ListenerInfo>>,
    service_agents: RwLock<HashMap<u32, Arc<dyn ServiceAgent>>>,
    events: Mutex<VecDeque<EventPackage>>,
    broadcast: broadcast::Sender<EventPackage>,
}

impl std::fmt::Debug for Teamserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teamserver")
            .field("agents", &self.agents().len())
            .field("listeners", &self.listeners().len())
            .finish_non_exhaustive()
    }
}

impl Default for Teamserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Teamserver {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            agents: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            service_agents: RwLock::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            broadcast,
        }
    }

    /// Receive every event broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventPackage> {
        self.broadcast.subscribe()
    }

    /// Events appended so far, oldest first.
    pub fn events(&self) -> Vec<EventPackage> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn listeners(&self) -> Vec<ListenerInfo> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Route requests carrying `magic_value` to a third-party handler.
    pub fn register_service_agent(&self, magic_value: u32, agent: Arc<dyn ServiceAgent>) {
        self.service_agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(magic_value, agent);
        tracing::info!(magic_value = %format_args!("{magic_value:#x}"), "registered service agent");
    }

    pub fn remove_agent(&self, agent_id: u32) -> Option<Arc<Agent>> {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&agent_id)
    }
}

impl AgentRoutines for Teamserver {
    fn agent_exists(&self, agent_id: u32) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&agent_id)
    }

    fn agent_instance(&self, agent_id: u32) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent_id)
            .cloned()
    }

    fn append_agent(&self, agent: Arc<Agent>) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if agents.contains_key(&agent.id()) {
            return Err(RegistryError::DuplicateAgent(agent.id()));
        }
        tracing::info!(
            agent_id = %format_args!("{:08x}", agent.id()),
            listener = %agent.origin().listener,
            external_ip = %agent.origin().external_ip,
            "new agent registered",
        );
        agents.insert(agent.id(), agent);
        Ok(())
    }

    fn append_listener(&self, info: ListenerInfo) -> Result<EventPackage, RegistryError> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.contains_key(&info.name) {
            return Err(RegistryError::DuplicateListener(info.name));
        }
        listeners.insert(info.name.clone(), info.clone());
        Ok(EventPackage::new(outpost_common::Event::ListenerStarted {
            listener: info,
        }))
    }

    fn remove_listener(&self, name: &str) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn event_append(&self, package: &EventPackage) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == EVENT_LOG_CAPACITY {
            events.pop_front();
        }
        events.push_back(package.clone());
    }

    fn event_broadcast(&self, package: &EventPackage) {
        // no receivers is not an error: nobody is watching yet
        let _ = self.broadcast.send(package.clone());
    }

    fn service_agent_exists(&self, magic_value: u32) -> bool {
        self.service_agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&magic_value)
    }

    fn service_agent(&self, magic_value: u32) -> Option<Arc<dyn ServiceAgent>> {
        self.service_agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&magic_value)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOrigin;
    use crate::test_support::registration;
    use outpost_common::Event;
    use outpost_common::protocol::DEMON_MAGIC_VALUE;

    fn listener(name: &str) -> ListenerInfo {
        ListenerInfo {
            name: name.to_string(),
            protocol: "Http".to_string(),
            hosts: vec!["127.0.0.1".to_string()],
            host_bind: "127.0.0.1".to_string(),
            port: 8080,
            uris: vec!["/".to_string()],
            secure: false,
            headers: Vec::new(),
        }
    }

    fn agent(id: u32) -> Arc<Agent> {
        Arc::new(Agent::new(
            registration(id),
            AgentOrigin {
                external_ip: "192.0.2.1".to_string(),
                magic_value: DEMON_MAGIC_VALUE,
                listener: "http".to_string(),
            },
        ))
    }

    #[test]
    fn listener_names_are_unique() {
        let teamserver = Teamserver::new();
        teamserver.append_listener(listener("http")).unwrap();
        assert_eq!(
            teamserver.append_listener(listener("http")),
            Err(RegistryError::DuplicateListener("http".to_string()))
        );
        teamserver.remove_listener("http");
        assert!(teamserver.append_listener(listener("http")).is_ok());
    }

    #[test]
    fn agent_ids_are_not_reused_while_registered() {
        let teamserver = Teamserver::new();
        teamserver.append_agent(agent(7)).unwrap();
        assert_eq!(
            teamserver.append_agent(agent(7)),
            Err(RegistryError::DuplicateAgent(7))
        );
        assert!(teamserver.agent_exists(7));
        assert!(teamserver.remove_agent(7).is_some());
        assert!(!teamserver.agent_exists(7));
    }

    #[test]
    fn event_log_is_bounded() {
        let teamserver = Teamserver::new();
        for agent_id in 0..(EVENT_LOG_CAPACITY as u32 + 5) {
            teamserver.event_append(&EventPackage::new(Event::AgentLastSeen {
                agent_id,
                seconds: 0,
            }));
        }
        let events = teamserver.events();
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert_eq!(
            events[0].event,
            Event::AgentLastSeen {
                agent_id: 5,
                seconds: 0
            }
        );
    }

    #[tokio::test]
    async fn listener_error_is_logged_and_broadcast() {
        let teamserver = Teamserver::new();
        let mut rx = teamserver.subscribe();
        teamserver.event_listener_error("http", "address in use");

        let expected = Event::ListenerError {
            name: "http".to_string(),
            error: "address in use".to_string(),
        };
        assert_eq!(rx.recv().await.unwrap().event, expected);
        assert_eq!(teamserver.events()[0].event, expected);
    }
}

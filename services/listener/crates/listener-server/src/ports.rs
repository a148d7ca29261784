//! Capability interfaces the listener depends on.
//!
//! The agent registry, job queues, event bus and third-party agent
//! handlers live outside the listener. They are injected as trait objects
//! at construction and must tolerate concurrent calls from every in-flight
//! request; the listener never locks around them.

use std::sync::Arc;

use outpost_common::{AgentContext, AgentHeader, Event, EventPackage, ListenerInfo, Parser};

use crate::agent::Agent;
use crate::error::RegistryError;

// ── Registry and event bus ────────────────────────────────────────────────────

pub trait AgentRoutines: Send + Sync {
    fn agent_exists(&self, agent_id: u32) -> bool;

    fn agent_instance(&self, agent_id: u32) -> Option<Arc<Agent>>;

    /// Register a new agent. Fails if the id is already registered.
    fn append_agent(&self, agent: Arc<Agent>) -> Result<(), RegistryError>;

    /// Register a started listener and return the event announcing it.
    fn append_listener(&self, info: ListenerInfo) -> Result<EventPackage, RegistryError>;

    fn remove_listener(&self, name: &str);

    fn event_new_agent(&self, agent: &Agent) -> EventPackage {
        EventPackage::new(Event::NewAgent {
            agent: Box::new(agent.context()),
        })
    }

    /// Store an event for later replay to observers that connect afterwards.
    fn event_append(&self, package: &EventPackage);

    /// Push an event to every connected observer.
    fn event_broadcast(&self, package: &EventPackage);

    /// Record and broadcast a runtime listener failure.
    fn event_listener_error(&self, name: &str, error: &str) {
        let package = EventPackage::new(Event::ListenerError {
            name: name.to_string(),
            error: error.to_string(),
        });
        self.event_append(&package);
        self.event_broadcast(&package);
    }

    fn service_agent_exists(&self, magic_value: u32) -> bool;

    fn service_agent(&self, magic_value: u32) -> Option<Arc<dyn ServiceAgent>>;

    /// Bytes delivered to an agent in one job frame.
    fn callback_size(&self, agent: &Agent, bytes: usize) {
        self.event_broadcast(&EventPackage::new(Event::CallbackSize {
            agent_id: agent.id(),
            bytes,
        }));
    }

    /// Handle any command other than a job poll.
    ///
    /// Command semantics belong to the agent family; the default records
    /// the callback and surfaces it to observers.
    fn task_dispatch(&self, agent: &Agent, command: u32, data: &Parser) {
        agent.update_last_callback();
        tracing::debug!(
            agent_id = %format_args!("{:08x}", agent.id()),
            command,
            length = data.len(),
            "agent callback",
        );

        let package = EventPackage::new(Event::AgentCallback {
            agent_id: agent.id(),
            command,
            length: data.len(),
        });
        self.event_append(&package);
        self.event_broadcast(&package);
    }

    fn agent_last_seen(&self, agent: &Agent) {
        self.event_broadcast(&EventPackage::new(Event::AgentLastSeen {
            agent_id: agent.id(),
            seconds: agent.seconds_since_callback(),
        }));
    }
}

// ── Third-party agents ────────────────────────────────────────────────────────

/// Response builder for an agent family identified by its magic value.
pub trait ServiceAgent: Send + Sync {
    /// Build the raw response body for one request.
    ///
    /// `context` is the first-party registration sharing the request's agent
    /// id, when one exists. The returned bytes are written verbatim.
    fn send_response(&self, context: Option<&AgentContext>, header: &AgentHeader) -> Vec<u8>;
}

//! HTTP(S) listener for outpost agents.
//!
//! A listener accepts agent check-ins over POST to any path, classifies
//! each request by the magic value in its binary header, and answers
//! first-party agents (registration, job polls, callbacks) or forwards the
//! request to a registered third-party agent family.

pub mod agent;
pub mod certs;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod ports;
pub mod teamserver;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, AgentOrigin};
pub use config::{ListenerConfig, ResponseHeaders};
pub use dispatcher::{Dispatcher, Reply};
pub use error::{CertError, ConfigError, RegistryError, StartError, StopError};
pub use listener::{HttpListener, StopOutcome};
pub use ports::{AgentRoutines, ServiceAgent};
pub use teamserver::Teamserver;

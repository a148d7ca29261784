//! Listener supervisor: validation, TLS provisioning, start and stop.
//!
//! `start` registers the listener and schedules its serve loop without
//! waiting on it. A later bind or serve failure only reaches observers
//! through a listener-error event; it clears `active` and unregisters the
//! listener so a later `start` can retry. `stop` shuts the
//! server down gracefully, cancels the background tasks the listener owns
//! and waits for them at most [`SHUTDOWN_GRACE_PERIOD`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use outpost_common::ListenerInfo;
use outpost_common::protocol::listener_protocol;

use crate::certs::{self, TlsMaterial};
use crate::config::{ListenerConfig, ResponseHeaders};
use crate::dispatcher::{self, Dispatcher};
use crate::error::{ConfigError, StartError, StopError};
use crate::ports::AgentRoutines;

/// How long `stop` waits for in-flight requests and owned tasks.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How a successful `stop` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every connection and owned task finished within the grace period.
    Graceful,
    /// The grace period ran out; unfinished requests were abandoned.
    TimedOut,
}

/// Everything owned by one serving run.
struct ServeRuntime {
    handle: Handle<SocketAddr>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    serve: JoinHandle<()>,
    /// Fires when the serve loop has exited, for any reason.
    stopped: CancellationToken,
}

struct BindTarget {
    host: String,
    port: u16,
    tls: Option<TlsMaterial>,
}

pub struct HttpListener {
    config: ListenerConfig,
    headers: ResponseHeaders,
    routines: Arc<dyn AgentRoutines>,
    listeners_root: PathBuf,
    active: Arc<AtomicBool>,
    tls: Mutex<Option<TlsMaterial>>,
    runtime: Mutex<Option<ServeRuntime>>,
}

impl std::fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpListener")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl HttpListener {
    /// Configure a listener. Response headers are validated here so a
    /// malformed one fails before anything starts.
    ///
    /// `listeners_root` is where per-listener TLS directories are created.
    pub fn new(
        config: ListenerConfig,
        routines: Arc<dyn AgentRoutines>,
        listeners_root: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let headers = ResponseHeaders::parse(&config.headers)?;
        Ok(Self {
            config,
            headers,
            routines,
            listeners_root: listeners_root.into(),
            active: Arc::new(AtomicBool::new(false)),
            tls: Mutex::new(None),
            runtime: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// TLS material generated by the last secure start.
    pub fn tls(&self) -> Option<TlsMaterial> {
        self.tls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Address the serve loop is bound to, once it is. `None` if binding
    /// failed or the listener is not running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let (handle, stopped) = {
            let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
            let runtime = runtime.as_ref()?;
            (runtime.handle.clone(), runtime.stopped.clone())
        };

        tokio::select! {
            addr = handle.listening() => addr,
            () = stopped.cancelled() => None,
        }
    }

    /// Validate, provision TLS if secure, register, and schedule the serve
    /// loop. Returns once the loop is scheduled, not when it is bound.
    ///
    /// On error nothing has been registered and nothing is bound.
    pub async fn start(&self) -> Result<(), StartError> {
        tracing::debug!(config = ?self.config, "setting up HTTP listener");

        let (host, port) = self.validate().inspect_err(|e| {
            tracing::error!(error = %e, "invalid listener configuration");
        })?;

        if self.is_active() {
            return Err(StartError::AlreadyActive(self.config.name.clone()));
        }

        let tls = if self.config.secure {
            Some(self.provision_tls().await?)
        } else {
            None
        };

        let package = self
            .routines
            .append_listener(self.info(&host, port))
            .inspect_err(|e| {
                tracing::error!(listener = %self.config.name, error = %e, "failed to register listener");
            })?;
        self.routines.event_append(&package);
        self.routines.event_broadcast(&package);

        let handle = Handle::new();
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        let tasks = TaskTracker::new();

        let dispatcher = Arc::new(Dispatcher::new(
            self.config.name.clone(),
            self.headers.clone(),
            Arc::clone(&self.routines),
            tasks.clone(),
            shutdown.clone(),
        ));

        self.active.store(true, Ordering::SeqCst);
        let serve = tasks.spawn(run_server(
            self.config.name.clone(),
            BindTarget {
                host,
                port,
                tls: tls.clone(),
            },
            dispatcher::router(dispatcher),
            handle.clone(),
            Arc::clone(&self.active),
            Arc::clone(&self.routines),
            stopped.clone(),
        ));

        tracing::info!(
            listener = %self.config.name,
            url = %format!("{}://{}:{}", self.scheme(), self.config.hosts.join(","), port),
            "started listener",
        );

        *self.tls.lock().unwrap_or_else(PoisonError::into_inner) = tls;
        *self.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(ServeRuntime {
            handle,
            shutdown,
            tasks,
            serve,
            stopped,
        });
        Ok(())
    }

    /// Shut down gracefully, waiting at most [`SHUTDOWN_GRACE_PERIOD`].
    ///
    /// A shutdown that outlives the grace period is reported as
    /// [`StopOutcome::TimedOut`], not as an error.
    pub async fn stop(&self) -> Result<StopOutcome, StopError> {
        let ServeRuntime {
            handle,
            shutdown,
            tasks,
            serve,
            stopped: _,
        } = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StopError::NotRunning)?;

        // the grace period is enforced below, not by the server
        handle.graceful_shutdown(None);
        shutdown.cancel();
        tasks.close();

        let joined = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
            let serve = serve.await;
            tasks.wait().await;
            serve
        })
        .await;

        self.active.store(false, Ordering::SeqCst);
        self.routines.remove_listener(&self.config.name);

        match joined {
            Ok(Ok(())) => {
                tracing::info!(listener = %self.config.name, "listener stopped");
                Ok(StopOutcome::Graceful)
            }
            Ok(Err(e)) => {
                tracing::error!(listener = %self.config.name, error = %e, "serve task failed");
                Err(StopError::Join(e))
            }
            Err(_) => {
                handle.shutdown();
                tracing::warn!(
                    listener = %self.config.name,
                    "shutdown exceeded grace period of {} seconds",
                    SHUTDOWN_GRACE_PERIOD.as_secs(),
                );
                Ok(StopOutcome::TimedOut)
            }
        }
    }

    /// Required fields, checked in order: name, hosts, port, uris.
    fn validate(&self) -> Result<(String, u16), StartError> {
        if self.config.name.is_empty() {
            return Err(StartError::MissingName);
        }
        let host = self
            .config
            .bind_host()
            .filter(|_| self.config.has_hosts())
            .ok_or(StartError::MissingHosts)?;
        let port = self.config.port.ok_or(StartError::MissingPort)?;
        if self.config.uris.is_empty() {
            return Err(StartError::MissingUris);
        }
        Ok((host.to_string(), port))
    }

    async fn provision_tls(&self) -> Result<TlsMaterial, StartError> {
        let root = self.listeners_root.clone();
        let name = self.config.name.clone();
        let hosts = self.config.hosts.clone();

        let material = tokio::task::spawn_blocking(move || certs::provision_tls(&root, &name, &hosts))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "certificate provisioning task failed");
                None
            });

        material.ok_or_else(|| {
            tracing::error!(listener = %self.config.name, "failed to generate server TLS certificates");
            StartError::Tls(self.config.name.clone())
        })
    }

    fn scheme(&self) -> &'static str {
        if self.config.secure { "https" } else { "http" }
    }

    fn info(&self, host_bind: &str, port: u16) -> ListenerInfo {
        ListenerInfo {
            name: self.config.name.clone(),
            protocol: if self.config.secure {
                listener_protocol::HTTPS
            } else {
                listener_protocol::HTTP
            }
            .to_string(),
            hosts: self.config.hosts.clone(),
            host_bind: host_bind.to_string(),
            port,
            uris: self.config.uris.clone(),
            secure: self.config.secure,
            headers: self.headers.to_strings(),
        }
    }
}

async fn run_server(
    name: String,
    target: BindTarget,
    app: Router,
    handle: Handle<SocketAddr>,
    active: Arc<AtomicBool>,
    routines: Arc<dyn AgentRoutines>,
    stopped: CancellationToken,
) {
    let result = bind_and_serve(&target, app, handle).await;
    active.store(false, Ordering::SeqCst);

    match result {
        Ok(()) => {
            stopped.cancel();
            tracing::debug!(listener = %name, "serve loop exited");
        }
        Err(e) => {
            // a failed listener frees its name so it can be started again
            routines.remove_listener(&name);
            stopped.cancel();
            let error = format!("{e:#}");
            tracing::error!(listener = %name, error = %error, "couldn't start listener handler");
            routines.event_listener_error(&name, &error);
        }
    }
}

async fn bind_and_serve(
    target: &BindTarget,
    app: Router,
    handle: Handle<SocketAddr>,
) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .with_context(|| format!("failed to resolve {}", target.host))?
        .next()
        .with_context(|| format!("no address for {}", target.host))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    if let Some(tls) = &target.tls {
        // another crate may have installed a provider first; either works
        let _ = rustls::crypto::ring::default_provider().install_default();

        let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .context("failed to load TLS certificates")?;

        axum_server::bind_rustls(addr, config)
            .handle(handle)
            .serve(service)
            .await
            .context("HTTPS server error")?;
    } else {
        axum_server::bind(addr)
            .handle(handle)
            .serve(service)
            .await
            .context("HTTP server error")?;
    }

    Ok(())
}

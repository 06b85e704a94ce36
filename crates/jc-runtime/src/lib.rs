//! # JarvisCore Runtime
//!
//! Composition root for the helper services.
//!
//! ## Startup Sequence
//!
//! 1. Load gateway and auth configuration from the environment
//! 2. Load the API key registry (zero keys is fatal)
//! 3. Start limiter cleanup and registry flush tickers
//! 4. Start the event hub and metrics producer (gateway mode)
//! 5. Bind listeners and serve
//!
//! ## Shutdown Sequence
//!
//! 1. Stop accepting connections
//! 2. Shut the hub down, closing every client mailbox
//! 3. Give in-flight requests up to [`SHUTDOWN_GRACE`] to finish
//! 4. Stop background tickers and flush the key registry

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use jc_auth::{AuthConfig, AuthContext, AuthService};
use jc_gateway::{GatewayConfig, GatewayService, SystemMetricsProducer};
use jc_hub::EventHub;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Time allowed for in-flight requests after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Which services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Gateway,
    Auth,
    All,
}

impl Mode {
    fn runs_gateway(self) -> bool {
        matches!(self, Mode::Gateway | Mode::All)
    }

    fn runs_auth(self) -> bool {
        matches!(self, Mode::Auth | Mode::All)
    }
}

/// Addresses the running services are bound to.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundAddrs {
    pub gateway: Option<SocketAddr>,
    pub auth: Option<SocketAddr>,
}

/// The process runtime.
pub struct Runtime {
    mode: Mode,
    gateway_config: GatewayConfig,
    auth_config: AuthConfig,
    auth: AuthContext,
    hub: Option<EventHub>,
    /// Tickers and the hub task; aborted at shutdown.
    background: Vec<JoinHandle<()>>,
    servers: Vec<(&'static str, JoinHandle<std::io::Result<()>>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runtime {
    /// Build shared auth state. Fails when no API keys can be loaded.
    pub fn new(mode: Mode, gateway_config: GatewayConfig, auth_config: AuthConfig) -> Result<Self> {
        let auth = AuthContext::from_config(&auth_config).context("Failed to load API keys")?;
        info!(mode = ?mode, keys = auth.registry.len(), "Runtime configured");

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            mode,
            gateway_config,
            auth_config,
            auth,
            hub: None,
            background: Vec::new(),
            servers: Vec::new(),
            shutdown_tx,
        })
    }

    /// Load both configurations from the environment.
    pub fn from_env(mode: Mode) -> Result<Self> {
        let gateway = GatewayConfig::from_env().context("Invalid gateway configuration")?;
        let auth = AuthConfig::from_env().context("Invalid auth configuration")?;
        Self::new(mode, gateway, auth)
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn hub(&self) -> Option<&EventHub> {
        self.hub.as_ref()
    }

    /// Bind listeners and spawn every service for this mode.
    pub async fn start(&mut self) -> Result<BoundAddrs> {
        let mut addrs = BoundAddrs::default();

        self.background.extend(
            self.auth
                .spawn_maintenance(&self.auth_config.rate_limit, &self.auth_config.keys),
        );

        if self.mode.runs_gateway() {
            let (hub, hub_task) = EventHub::spawn(self.gateway_config.hub.clone());
            self.background.push(hub_task);

            if self.gateway_config.producer.enabled {
                let producer = SystemMetricsProducer::new(hub.clone(), &self.gateway_config.producer);
                self.background.push(producer.spawn());
            }

            let listener = TcpListener::bind(self.gateway_config.listen_addr)
                .await
                .with_context(|| format!("Failed to bind gateway on {}", self.gateway_config.listen_addr))?;
            addrs.gateway = Some(listener.local_addr()?);

            let service = GatewayService::new(self.gateway_config.clone(), hub.clone(), self.auth.clone())
                .context("Failed to build gateway")?;
            let server = tokio::spawn(service.serve(listener, self.shutdown_signal()));
            self.servers.push(("gateway", server));
            self.hub = Some(hub);
        }

        if self.mode.runs_auth() {
            let listener = TcpListener::bind(self.auth_config.listen_addr)
                .await
                .with_context(|| format!("Failed to bind auth service on {}", self.auth_config.listen_addr))?;
            addrs.auth = Some(listener.local_addr()?);

            let service = AuthService::new(self.auth_config.clone(), self.auth.clone());
            let server = tokio::spawn(service.serve(listener, self.shutdown_signal()));
            self.servers.push(("auth", server));
        }

        info!(gateway = ?addrs.gateway, auth = ?addrs.auth, "Services started");
        Ok(addrs)
    }

    fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    /// Stop everything, then flush the key registry.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        if let Some(hub) = &self.hub {
            hub.shutdown().await;
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for (name, mut server) in self.servers {
            match tokio::time::timeout_at(deadline, &mut server).await {
                Ok(Ok(Ok(()))) => info!(service = name, "Server stopped"),
                Ok(Ok(Err(e))) => error!(service = name, error = %e, "Server failed"),
                Ok(Err(e)) => error!(service = name, error = %e, "Server task panicked"),
                Err(_) => {
                    warn!(service = name, "Grace period elapsed, aborting server");
                    server.abort();
                }
            }
        }

        for task in self.background {
            task.abort();
        }

        let registry = self.auth.registry;
        let flushed = tokio::task::spawn_blocking(move || registry.flush())
            .await
            .context("Registry flush task failed")?
            .context("Failed to flush API keys")?;
        if flushed {
            info!("API keys flushed to disk");
        }
        Ok(())
    }
}

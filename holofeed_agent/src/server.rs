//! Server lifecycle: bind, run the HTTP and broadcast loops, stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::acceptor;
use crate::broadcast::BroadcastScheduler;
use crate::config::AgentConfig;
use crate::error::ServerError;
use crate::registry::ClientRegistry;
use crate::sampler::{MetricSampler, SnapshotSource};

pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: watch::Sender<bool>,
    http: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    grace: Duration,
}

impl Server {
    /// Binds and starts both loops with the host sampler built from `config`.
    pub async fn start(config: &AgentConfig) -> Result<Self, ServerError> {
        Self::start_with(config, MetricSampler::from_config(config)).await
    }

    /// Binds and starts both loops with a caller-supplied snapshot source. Nothing is
    /// spawned when binding fails.
    pub async fn start_with<S: SnapshotSource>(
        config: &AgentConfig,
        source: S,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let registry = Arc::new(ClientRegistry::new(config.write_timeout));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let app = acceptor::router(Arc::clone(&registry), &config.stream_path);
        let stop_serving = shutdown_signal(shutdown_rx.clone());
        let http = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(stop_serving);
            if let Err(e) = serve.await {
                warn!("http server failed: {e}");
            }
        });
        let scheduler = BroadcastScheduler::new(
            source,
            Arc::clone(&registry),
            config.interval,
            shutdown_rx,
        );

        info!(
            %local_addr,
            path = %config.stream_path,
            interval_ms = config.interval.as_millis() as u64,
            "metrics stream server started"
        );
        Ok(Self {
            local_addr,
            registry,
            shutdown,
            http,
            scheduler: tokio::spawn(scheduler.run()),
            grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Signals both loops and ends every subscriber stream, then waits for the HTTP
    /// server to drain its connections and drop the listener. Connections still open
    /// after the shutdown grace period are aborted.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let closed = self.registry.close_all();
        if let Err(e) = self.scheduler.await {
            warn!("broadcast loop ended abnormally: {e}");
        }
        let mut http = self.http;
        match timeout(self.grace, &mut http).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("http server ended abnormally: {e}"),
            Err(_) => {
                warn!(grace = ?self.grace, "connections still open; aborting");
                http.abort();
            }
        }
        info!(clients = closed, "metrics stream server stopped");
    }
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

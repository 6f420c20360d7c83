use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn, Instrument};

use crate::config::Config;
use crate::http::connection::{Connection, ConnectionContext};
use crate::server::pool::{BoxFuture, HandlerPool, JobHandler, ObjectPool, PoolFull, PoolStats};
use crate::webapp::WebApp;

/// Sets the flag the acceptor checks between accept timeouts.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The connection acceptor and the handler pool it feeds.
pub struct Server {
    listener: TcpListener,
    app: Arc<WebApp>,
    pool: HandlerPool<(TcpStream, SocketAddr)>,
    accept_timeout: Duration,
    drain_timeout: Duration,
    purge_interval: Duration,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the listen address and starts the handler pool.
    pub async fn bind(config: &Config, app: Arc<WebApp>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.server.listen_addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        let ctx = Arc::new(ConnectionContext {
            app: Arc::clone(&app),
            settings: (&config.server).into(),
            requests: ObjectPool::new("request", config.pool.max_requests),
            responses: ObjectPool::new("response", config.pool.max_responses),
        });
        let handler: JobHandler<(TcpStream, SocketAddr)> =
            Arc::new(move |(stream, peer): (TcpStream, SocketAddr)| -> BoxFuture<()> {
                let ctx = Arc::clone(&ctx);
                Box::pin(
                    async move {
                        let mut conn = Connection::new(stream, peer, ctx);
                        if let Err(e) = conn.run().await {
                            warn!(error = %e, "connection error");
                        }
                        debug!("connection closed");
                    }
                    .instrument(tracing::debug_span!("connection", %peer)),
                )
            });

        Ok(Self {
            listener,
            app,
            pool: HandlerPool::new((&config.pool).into(), handler),
            accept_timeout: config.server.accept_timeout(),
            drain_timeout: config.server.read_timeout(),
            purge_interval: Duration::from_secs(config.sessions.purge_interval_secs.max(1)),
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Accepts connections until the shutdown handle is triggered, then
    /// waits for busy handlers to finish.
    pub async fn run(self) -> anyhow::Result<()> {
        let sweeper = tokio::spawn(sweep_sessions(
            Arc::clone(&self.app),
            self.purge_interval,
            self.shutdown.clone(),
        ));

        self.accept_loop().instrument(tracing::info_span!("acceptor")).await;

        sweeper.abort();
        if !self.pool.wait_idle(self.drain_timeout).await {
            warn!(busy = self.pool.stats().busy, "handlers still busy at shutdown");
        }
        info!("Server stopped");
        Ok(())
    }

    async fn accept_loop(&self) {
        while !self.shutdown.is_triggered() {
            let accepted =
                match tokio::time::timeout(self.accept_timeout, self.listener.accept()).await {
                    Err(_) => continue,
                    Ok(accepted) => accepted,
                };
            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    if let Err(PoolFull((stream, peer))) = self.pool.assign((stream, peer)) {
                        warn!(%peer, "handler pool exhausted, closing connection");
                        drop(stream);
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        debug!("shutdown flag observed");
    }
}

async fn sweep_sessions(app: Arc<WebApp>, every: Duration, shutdown: ShutdownHandle) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    while !shutdown.is_triggered() {
        ticker.tick().await;
        let purged = app.sessions().purge_expired();
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }
    }
}

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use vessel::config::Config;
use vessel::dispatch::{
    DispatchType, Exchange, Filter, FilterChain, FilterMapping, Handler, Unit, UrlPattern,
};
use vessel::server::Server;
use vessel::{ServletError, WebApp};

struct Hello;

impl Unit for Hello {}

#[async_trait]
impl Handler for Hello {
    async fn service(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let name = ex.request.parameter("name").unwrap_or("world").to_string();
        ex.response.set_content_type("text/plain; charset=utf-8");
        ex.response.write_str(&format!("Hello, {name}\n")).await
    }
}

/// Counts visits in the caller's session.
struct Visits;

impl Unit for Visits {}

#[async_trait]
impl Handler for Visits {
    async fn service(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let count = match ex.session(true)? {
            Some(session) => {
                let count = session.attribute_as::<u64>("visits").map_or(1, |n| *n + 1);
                session.set_attribute("visits", count);
                count
            }
            None => 0,
        };
        ex.response.set_content_type("text/plain; charset=utf-8");
        ex.response.write_str(&format!("visits: {count}\n")).await
    }
}

struct Timing;

impl Unit for Timing {}

#[async_trait]
impl Filter for Timing {
    async fn do_filter(
        &self,
        ex: &mut Exchange<'_>,
        chain: FilterChain<'_>,
    ) -> Result<(), ServletError> {
        let started = Instant::now();
        let result = chain.proceed(ex).await;
        tracing::info!(
            uri = ex.request.request_uri(),
            status = ex.response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "served"
        );
        result
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let app = WebApp::builder(&cfg.server.mount_prefix)
        .handler("hello", || Hello)
        .handler("visits", || Visits)
        .filter("timing", || Timing)
        .route("/hello", "hello")
        .route("/visits", "visits")
        .default_handler("hello")
        .filter_mapping(
            FilterMapping::for_path(UrlPattern::Prefix(String::new()), "timing")
                .on(&[DispatchType::Request]),
        )
        .session_timeout(cfg.sessions.timeout_secs)
        .build()?;
    let app = Arc::new(app);
    app.start().await;

    let server = Server::bind(&cfg, Arc::clone(&app)).await?;
    let shutdown = server.shutdown_handle();
    let mut running = tokio::spawn(server.run());

    tokio::select! {
        res = &mut running => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
            running.await??;
        }
    }

    app.destroy();
    Ok(())
}

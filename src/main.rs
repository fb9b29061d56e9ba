//! Review sentiment service: binary entrypoint.
//! Loads config and lexicon, installs tracing + Prometheus, and serves the Axum router.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use review_sentiment_core::{api, metrics::Metrics, PipelineConfig, ReviewPipeline};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// `LOG_FORMAT=json` switches to structured JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("review_sentiment_core=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load().context("loading pipeline config")?;
    // A corrupt lexicon file is fatal here, before any traffic is served.
    let pipeline = ReviewPipeline::from_config(config).context("loading lexicon")?;

    let state = api::AppState::new(pipeline);

    // Start the one-time classifier load now; requests arriving meanwhile wait on the same load.
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        if let Err(e) = pipeline.neural().ensure_loaded().await {
            info!(target: "neural", reason = e.reason(), "starting without neural classifier");
        }
    });

    let mut app = api::router(state);
    match Metrics::init() {
        Ok(m) => app = app.merge(m.router()),
        Err(e) => warn!(error = %e, "prometheus recorder not installed, /metrics disabled"),
    }

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "review sentiment service listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}

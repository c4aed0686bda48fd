//! Backend process entry point: connects to the event fabric, runs the
//! SSE/WebSocket fan-out task, and serves the REST surface. Grounded on
//! the teacher's `main.rs` (`tokio::spawn` per listener, top-level
//! `anyhow::Result<()>`).

use anyhow::Result;
use roadwatch::backend::{rest::build_router, BackendState};
use roadwatch::broker::backend::BackendBroker;
use roadwatch::config::AppConfig;
use roadwatch::telemetry::init_telemetry;

const CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("backend");

    let app_config = AppConfig::load(CONFIG_PATH)?;

    let (broker, broker_events) = BackendBroker::connect(&app_config.transport.broker_url, "roadwatch-backend");
    let state = BackendState::new(broker);

    tokio::spawn(roadwatch::backend::sse::run_fanout(broker_events, state.clone()));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", app_config.transport.web_port)).await?;
    tracing::info!(port = app_config.transport.web_port, "backend listening");
    axum::serve(listener, router).await?;

    Ok(())
}

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize telemetry for one of the two binaries (`edge`/`backend`).
pub fn init_telemetry(process_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,roadwatch=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!(process = process_name, "telemetry initialized");
}

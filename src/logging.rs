use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Stderr keeps stdout free for JSON. RUST_LOG wins over `level`.
pub fn init_logging(level: &str) -> Result<(), TryInitError> {
    let default_filter = format!("retire_sim={level},tower_http=warn");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init()?;

    tracing::debug!(filter = %default_filter, "logging initialized");
    Ok(())
}

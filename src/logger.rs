use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Environment variable holding the log filter, e.g. `mergewatch=debug`.
pub const LOG_VAR: &str = "MERGEWATCH_LOG";

pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
        .init();
    tracing::debug!("initialized logging infra");
}

/// Span wrapping one poll cycle, so every line it logs carries the same id.
pub fn cycle_span() -> tracing::Span {
    tracing::info_span!("poll_cycle", cycle_id = %Uuid::new_v4())
}

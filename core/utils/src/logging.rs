use tracing_subscriber::EnvFilter;

/// Wire the process-wide logging facility once, from configuration, at
/// startup. Never mutated thereafter; this is the only process-wide mutable
/// state the node carries (see design notes on global state).
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

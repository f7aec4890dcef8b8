use tracing_subscriber::{EnvFilter, fmt};

/// Install the global fmt subscriber at `level` (`error`..`trace`, or any
/// `EnvFilter` directive). `RUST_LOG`, when set, wins over `level`.
///
/// Calling it again once a subscriber is installed does nothing.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

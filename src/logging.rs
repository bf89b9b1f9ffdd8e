//! `tracing-subscriber` setup.

/// Install a line-oriented subscriber writing to stderr. `debug` selects
/// `DEBUG` verbosity for this crate (and `INFO` for dependencies); without
/// it, everything runs at `INFO`. `RUST_LOG` always overrides both.
pub fn init(debug: bool) {
    let default_directive = if debug { "xbee868_monitor=debug,info" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr. `RUST_LOG` wins over the `-v` count.
pub fn init(verbosity: u8) -> miette::Result<()> {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| miette::miette!("could not install the log subscriber: {e}"))
}

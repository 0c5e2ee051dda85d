use tracing_subscriber::EnvFilter;

use crate::Error;

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "warn,pressgate_core=info";

/// Log to stderr so stdout carries only command output.
pub fn init() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

//! Log subscriber setup.

use anyhow::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Installs the global log subscriber, writing to stderr.
///
/// The filter defaults to `info` and can be overridden through `RUST_LOG`.
pub(crate) fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(Error::msg)
}

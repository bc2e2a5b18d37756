//! Shared plumbing for the command-line binaries: backend selection,
//! image I/O and prediction rendering.

pub mod backend;
pub mod images;
pub mod palette;

/// Installs the global log subscriber, honoring `RUST_LOG`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

//! Tracing (logging)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise tracing (logging)
///
/// The filter is taken from the `RUST_LOG` environment variable when set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "exptdb=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

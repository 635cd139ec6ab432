//! HTTP API for BOQ price matching.

pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, SharedState};

/// Installs the global subscriber and routes `log` records into it.
///
/// `RUST_LOG` sets the filter (default `info`); `LOG_FORMAT=json` switches
/// to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let installed = if json {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json()),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(fmt::layer()),
        )
    };

    if installed.is_ok() {
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log bridge already installed: {}", e);
        }
    }
}

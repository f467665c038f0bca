//! Global tracing-subscriber initialization.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Settings for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Include the event's target (module path) in output.
    pub show_target: bool,
    /// Enable ANSI colors on the console.
    pub enable_console_colors: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            show_target: false,
            enable_console_colors: true,
        }
    }
}

static TELEMETRY_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber (singleton, called once).
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to
/// `config.log_filter`. Safe to call multiple times; subsequent calls
/// are no-ops.
pub fn init_telemetry(config: &TelemetryConfig) {
    TELEMETRY_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_ansi(config.enable_console_colors);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    });
}

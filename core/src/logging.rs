//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Environment variable holding per-target log levels.
pub const LOG_ENV: &str = "QC_LOG";

/// Install the global subscriber.
///
/// Reads `QC_LOG` (e.g. `QC_LOG=qc_calibration::calibration=debug`) and
/// falls back to the configured filter when it is unset or invalid. Only the
/// first call has any effect.
pub fn init_tracing(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(&config.filter));

        let json = config.json.then(|| fmt::layer().json().with_target(true));
        let text = (!config.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
        });

        // Another subscriber may already be installed by the host.
        let _ = tracing_subscriber::registry()
            .with(json)
            .with(text)
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&LoggingConfig {
            json: true,
            ..config
        });
        tracing::info!("tracing initialized");
    }
}

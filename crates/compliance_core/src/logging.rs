use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_level` when set.
///
/// Calling this twice returns an error instead of panicking so embedders (tests, CLI) can
/// ignore it.
pub fn init(default_level: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| {
            AppError::new("CONFIG_LOG_LEVEL_INVALID", "Invalid log level")
                .with_details(format!("level={default_level}; err={e}"))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| {
            AppError::new("CONFIG_LOG_INIT_FAILED", "Failed to install log subscriber")
                .with_details(e.to_string())
        })
}

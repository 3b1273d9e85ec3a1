//! Logging system setup.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global `tracing` subscriber. `RUST_LOG` takes precedence
/// over the configured level.
pub fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    info!("Logging initialized with level: {}", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_fails_cleanly() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json_format: false,
        };

        // Only one global subscriber can exist; whichever call comes second
        // must report an error rather than panic.
        let first = setup_logging(&settings);
        let second = setup_logging(&settings);
        assert!(first.is_err() || second.is_err());
    }
}

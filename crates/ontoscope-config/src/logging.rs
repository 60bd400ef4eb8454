// ── Tracing setup ──
//
// Installs a global `tracing` subscriber for binaries that embed the
// cache. `RUST_LOG` wins over the configured level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{ConfigError, LogFormat, LoggingSettings};

/// Install the global subscriber. Fails if one is already installed or
/// the configured level is not a valid filter directive.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|err| ConfigError::Validation {
            field: "logging.level".into(),
            reason: err.to_string(),
        })?,
    };

    let json = settings.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_level() {
        let settings = LoggingSettings {
            level: "ontoscope_core=loud".into(),
            format: LogFormat::Text,
        };
        // Only reachable when RUST_LOG is unset.
        if std::env::var_os("RUST_LOG").is_none() {
            let err = init_tracing(&settings).unwrap_err();
            assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "logging.level"));
        }
    }
}

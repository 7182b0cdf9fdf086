//! Log subscriber setup for the binaries.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{AppError, AppResult};

/// Builds the filter: `RUST_LOG` when set, the config's directive otherwise.
///
/// # Errors
///
/// `AppError::Logging` if the config's directive does not parse.
pub fn filter(config: &LoggingConfig) -> AppResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter)
        .map_err(|e| AppError::Logging(format!("bad filter {:?}: {e}", config.filter)))
}

/// Installs the global `fmt` subscriber.
///
/// # Errors
///
/// A bad filter, or a subscriber already installed.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            filter: "raybridge=notalevel".to_string(),
        };
        assert!(matches!(filter(&config), Err(AppError::Logging(_))));
    }

    #[test]
    fn test_default_directive_parses() {
        assert!(filter(&LoggingConfig::default()).is_ok());
    }
}

//! Error types for the host application.

use std::path::PathBuf;

use raybridge_core::{ChannelError, SyncError};
use raybridge_rendering::RenderError;
use thiserror::Error;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for the binaries.
pub type AppResult<T> = Result<T, AppError>;

/// The configuration file cannot be used. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("cannot read {path}: {message}")]
    Read {
        /// Config file
        path: PathBuf,
        /// OS error text
        message: String,
    },

    /// The file is not valid TOML for `BridgeConfig`.
    #[error("cannot parse {path}: {message}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Parser error text
        message: String,
    },

    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Anything that ends a binary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Bad command line.
    #[error("{0}")]
    Usage(String),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Named objects could not be created or opened.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Channel failure on the producer side.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Consumer failure.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// A helper thread could not be started.
    #[error("cannot spawn {0} thread")]
    Spawn(&'static str),

    /// The logging subscriber could not be installed.
    #[error("logging: {0}")]
    Logging(String),
}

impl AppError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) | Self::Logging(_) => 3,
            Self::Sync(_) => 4,
            Self::Channel(_) | Self::Render(_) | Self::Spawn(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Usage("x".into()).exit_code(), 2);
        let config = ConfigError::Invalid {
            field: "channel.capacity",
            reason: "zero".into(),
        };
        assert_eq!(AppError::from(config).exit_code(), 3);
        assert_eq!(AppError::from(ChannelError::Shutdown).exit_code(), 1);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Parse {
            path: PathBuf::from("raybridge.toml"),
            message: "expected `=`".into(),
        };
        assert_eq!(error.to_string(), "cannot parse raybridge.toml: expected `=`");
    }
}

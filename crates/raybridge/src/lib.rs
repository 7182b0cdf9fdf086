//! # RAYBRIDGE
//!
//! Runs a modern ray-tracing consumer next to a legacy renderer that cannot
//! be modified beyond recording its draws.
//!
//! ## Binaries
//!
//! - `raybridge_host` - the consumer: drains records, builds acceleration
//!   structures, renders and presents
//! - `raybridge_probe` - a synthetic producer for bring-up
//!
//! ```bash
//! # host creates the names (default), probe opens them
//! raybridge_host --headless --frames 600 &
//! raybridge_probe --frames 600
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod connect;
pub mod error;
pub mod host;
pub mod logging;
pub mod probe;

pub use config::{BridgeConfig, OwnerSide, CONFIG_FILE_NAME};
pub use error::{AppError, AppResult, ConfigError, ConfigResult};
pub use host::{HostOptions, HostSummary};
pub use probe::{ProbeOptions, ProbeSummary};

/// Re-exported crates
pub use raybridge_core as core;
pub use raybridge_rendering as rendering;
pub use raybridge_shared as shared;

//! # Bridge Configuration
//!
//! Read once at startup from `raybridge.toml`. A missing file means
//! defaults; a file that cannot be parsed is fatal.
//!
//! ```toml
//! [channel]
//! namespace = "/dev/shm"
//! suffix = "x64"
//! capacity = 16777216
//! owner = "consumer"
//! open_timeout_ms = 10000
//!
//! [memory]
//! block_size = 67108864
//! alignment = 256
//!
//! [accel]
//! eviction_frames = 120
//! scratch_alignment = 256
//! sync_uploads = true
//!
//! [logging]
//! filter = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use raybridge_core::memory::{DEFAULT_ALIGNMENT, DEFAULT_BLOCK_SIZE};
use raybridge_core::{Namespace, Role, SubAllocatorConfig};
use raybridge_rendering::accel::{DEFAULT_EVICTION_FRAMES, DEFAULT_SCRATCH_ALIGNMENT};
use raybridge_rendering::bridge::DEFAULT_UPLOAD_QUEUE_DEPTH;
use raybridge_rendering::RenderBridgeConfig;
use raybridge_shared::DEFAULT_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "raybridge.toml";

/// Default wait for the peer to create the named objects.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

/// Smallest usable channel: one large mesh record plus `FrameEnd`.
pub const MIN_CHANNEL_CAPACITY: usize = 4096;

/// Which side creates the named objects.
///
/// The host creates them by default and the legacy renderer opens them
/// once it starts. `"producer"` reverses this for renderers that come up
/// before the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerSide {
    /// The legacy renderer creates, the host opens
    Producer,
    /// The host creates, the legacy renderer opens
    #[default]
    Consumer,
}

impl OwnerSide {
    /// As a channel role.
    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::Producer => Role::Producer,
            Self::Consumer => Role::Consumer,
        }
    }
}

/// `[channel]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Directory of the named objects; system default when unset
    pub namespace: Option<PathBuf>,
    /// Appended to every object name, e.g. `"x64"`
    pub suffix: Option<String>,
    /// Record area in bytes
    pub capacity: usize,
    /// Creator of the named objects
    pub owner: OwnerSide,
    /// How long the opening side waits for the owner; `0` fails at once
    pub open_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            suffix: None,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            owner: OwnerSide::Consumer,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }
}

/// `[memory]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Bytes per device heap
    pub block_size: u64,
    /// Minimum placement alignment
    pub alignment: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

/// `[accel]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccelConfig {
    /// Frames before an undrawn structure is evicted; `0` never evicts
    pub eviction_frames: u64,
    /// Build scratch alignment
    pub scratch_alignment: u64,
    /// Wait for uploads before building
    pub sync_uploads: bool,
    /// Writes queued for the upload thread
    pub upload_queue_depth: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            eviction_frames: DEFAULT_EVICTION_FRAMES,
            scratch_alignment: DEFAULT_SCRATCH_ALIGNMENT,
            sync_uploads: true,
            upload_queue_depth: DEFAULT_UPLOAD_QUEUE_DEPTH,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// The whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Named objects and channel
    pub channel: ChannelConfig,
    /// GPU memory pooling
    pub memory: MemoryConfig,
    /// Acceleration structures and uploads
    pub accel: AccelConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Loads `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read, parsed or validated.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        Self::parse(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` or `ConfigError::Invalid`.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE_NAME),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.channel.capacity < MIN_CHANNEL_CAPACITY {
            return Err(invalid(
                "channel.capacity",
                format!("{} is below {MIN_CHANNEL_CAPACITY}", self.channel.capacity),
            ));
        }
        if u32::try_from(self.channel.capacity).is_err() {
            return Err(invalid("channel.capacity", "must be below 4 GiB".to_string()));
        }
        power_of_two("memory.alignment", self.memory.alignment)?;
        power_of_two("accel.scratch_alignment", self.accel.scratch_alignment)?;
        if self.memory.block_size < self.memory.alignment {
            return Err(invalid(
                "memory.block_size",
                format!("{} is below the alignment", self.memory.block_size),
            ));
        }
        if self.accel.upload_queue_depth == 0 {
            return Err(invalid("accel.upload_queue_depth", "must be positive".to_string()));
        }
        Ok(())
    }

    /// Where the named objects live.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        let namespace = self
            .channel
            .namespace
            .as_ref()
            .map_or_else(Namespace::system_default, Namespace::new);
        match &self.channel.suffix {
            Some(suffix) => namespace.with_suffix(suffix.clone()),
            None => namespace,
        }
    }

    /// Wait for the owner to create the named objects.
    #[must_use]
    pub const fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.open_timeout_ms)
    }

    /// Consumer pipeline settings.
    #[must_use]
    pub fn render_config(&self) -> RenderBridgeConfig {
        let memory = SubAllocatorConfig::default()
            .with_block_size(self.memory.block_size)
            .with_alignment(self.memory.alignment);
        let mut config = RenderBridgeConfig::default()
            .with_eviction_frames(self.accel.eviction_frames)
            .with_scratch_alignment(self.accel.scratch_alignment)
            .with_sync_uploads(self.accel.sync_uploads)
            .with_memory(memory);
        config.upload_queue_depth = self.accel.upload_queue_depth;
        config
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn power_of_two(field: &'static str, value: u64) -> ConfigResult<()> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} is not a power of two")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(BridgeConfig::parse("").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_sample_file_parses() {
        let config = BridgeConfig::parse(include_str!("../raybridge.toml")).unwrap();
        assert_eq!(config.channel.suffix.as_deref(), Some("x64"));
        assert_eq!(config.memory, MemoryConfig::default());
        assert_eq!(config.accel, AccelConfig::default());
    }

    #[test]
    fn test_host_owns_names_by_default() {
        let config = BridgeConfig::parse("[channel]\nsuffix = \"x64\"\n").unwrap();
        assert_eq!(config.channel.owner, OwnerSide::Consumer);
        assert_eq!(config.channel.owner.role(), Role::Consumer);
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("raybridge_no_such_config.toml");
        assert_eq!(BridgeConfig::load(&path).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = BridgeConfig::parse(
            r#"
            [channel]
            suffix = "x64"
            owner = "producer"

            [accel]
            eviction_frames = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.channel.suffix.as_deref(), Some("x64"));
        assert_eq!(config.channel.owner.role(), Role::Producer);
        assert_eq!(config.channel.capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.accel.eviction_frames, 0);
        assert!(config.accel.sync_uploads);

        let render = config.render_config();
        assert_eq!(render.eviction_frames, 0);
        assert_eq!(render.memory.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let error = BridgeConfig::parse("[channel]\ncapacty = 4096\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values() {
        let error = BridgeConfig::parse("[channel]\ncapacity = 16\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { field: "channel.capacity", .. }));

        let error = BridgeConfig::parse("[memory]\nalignment = 300\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { field: "memory.alignment", .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let path = std::env::temp_dir().join(format!(
            "raybridge_bad_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[channel\n").unwrap();
        let error = BridgeConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(error, ConfigError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn test_namespace_suffix() {
        let config = BridgeConfig::parse(
            r#"
            [channel]
            namespace = "/tmp/raybridge"
            suffix = "x86"
            "#,
        )
        .unwrap();
        let namespace = config.namespace();
        assert_eq!(namespace.root(), Path::new("/tmp/raybridge"));
        assert!(namespace.object_name("Mutex").ends_with("x86"));
    }
}

//! Where named objects live.
//!
//! A named object is a file in the namespace directory. Both processes
//! must resolve the same directory and suffix to meet.

use std::path::{Path, PathBuf};

use raybridge_shared::{
    CHANNEL_NAME, CONSUMER_EVENT_NAME, MUTEX_NAME, PRESENT_EVENT_NAME, PRODUCER_EVENT_NAME,
};
use tracing::{debug, warn};

/// Preferred namespace root: a RAM-backed filesystem.
const SHM_ROOT: &str = "/dev/shm";

/// Directory and name suffix for the bridge's named objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    root: PathBuf,
    suffix: Option<String>,
}

impl Namespace {
    /// Creates a namespace rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffix: None,
        }
    }

    /// `/dev/shm` when present, the temp directory otherwise.
    #[must_use]
    pub fn system_default() -> Self {
        let shm = Path::new(SHM_ROOT);
        if shm.is_dir() {
            Self::new(shm)
        } else {
            Self::new(std::env::temp_dir())
        }
    }

    /// Appends `suffix` to every object name.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    /// Directory holding the objects.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full name of an object, suffix included.
    #[must_use]
    pub fn object_name(&self, name: &str) -> String {
        match &self.suffix {
            Some(suffix) => format!("{name}_{suffix}"),
            None => name.to_string(),
        }
    }

    /// Backing file of an object.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(self.object_name(name))
    }

    /// Unlinks leftovers of a bridge that did not exit cleanly.
    ///
    /// Returns the number of objects removed. Only the owner may call
    /// this, before creating its objects.
    pub fn remove_stale(&self) -> usize {
        let mut removed = 0;
        for name in [
            MUTEX_NAME,
            PRODUCER_EVENT_NAME,
            CONSUMER_EVENT_NAME,
            PRESENT_EVENT_NAME,
            CHANNEL_NAME,
        ] {
            let path = self.path_for(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    warn!(object = %self.object_name(name), "removed stale named object");
                    removed += 1;
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => debug!(path = %path.display(), %error, "could not remove"),
            }
        }
        removed
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::system_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_is_appended() {
        let namespace = Namespace::new("/tmp").with_suffix("x64");
        assert_eq!(namespace.object_name(MUTEX_NAME), "RaybridgeChannelMutex_x64");
        assert_eq!(
            namespace.path_for(CHANNEL_NAME),
            PathBuf::from("/tmp/RaybridgeChannel_x64")
        );
    }

    #[test]
    fn test_empty_suffix_is_ignored() {
        let namespace = Namespace::new("/tmp").with_suffix("");
        assert_eq!(namespace.object_name(CHANNEL_NAME), CHANNEL_NAME);
    }

    #[test]
    fn test_remove_stale() {
        let root = std::env::temp_dir().join(format!(
            "raybridge_ns_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let namespace = Namespace::new(&root);
        std::fs::write(namespace.path_for(MUTEX_NAME), b"stale").unwrap();

        assert_eq!(namespace.remove_stale(), 1);
        assert_eq!(namespace.remove_stale(), 0);
        let _ = std::fs::remove_dir_all(&root);
    }
}

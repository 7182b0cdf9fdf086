//! Establishing the named objects from either binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use raybridge_core::{BridgeLink, Role, SyncError};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::error::AppResult;

const OPEN_RETRY: Duration = Duration::from_millis(10);

/// Creates or opens the named objects for `role`, per `channel.owner`.
///
/// The owner unlinks leftovers first when `force` is set. The other side
/// retries for `channel.open_timeout_ms` while the owner has not finished
/// creating them.
///
/// # Errors
///
/// Any creation failure, or the owner not showing up in time.
pub fn establish(
    config: &BridgeConfig,
    role: Role,
    force: bool,
    shutdown: &AtomicBool,
) -> AppResult<BridgeLink> {
    let namespace = config.namespace();
    let owner = config.channel.owner.role();

    if role == owner {
        if force {
            let removed = namespace.remove_stale();
            if removed > 0 {
                info!(removed, "cleared stale named objects");
            }
        }
        return Ok(BridgeLink::create(&namespace, role, config.channel.capacity)?);
    }

    let deadline = Instant::now() + config.open_timeout();
    let mut attempts = 0u32;
    loop {
        match BridgeLink::open(&namespace, role) {
            Ok(link) => return Ok(link),
            Err(e @ (SyncError::NotFound { .. } | SyncError::NotReady { .. }))
                if Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) =>
            {
                attempts += 1;
                if attempts == 1 {
                    info!(peer = %owner, "waiting for the peer to create the bridge");
                }
                debug!(error = %e, attempts, "peer not ready");
                thread::sleep(OPEN_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OwnerSide;
    use crate::error::AppError;

    fn config(tag: &str, timeout_ms: u64) -> BridgeConfig {
        let root = std::env::temp_dir().join(format!(
            "raybridge_connect_{tag}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let mut config = BridgeConfig::default();
        config.channel.namespace = Some(root);
        config.channel.capacity = 4096;
        config.channel.open_timeout_ms = timeout_ms;
        config
    }

    #[test]
    fn test_open_without_owner_times_out() {
        let config = config("timeout", 30);
        let result = establish(&config, Role::Producer, false, &AtomicBool::new(false));
        assert!(matches!(result, Err(AppError::Sync(SyncError::NotFound { .. }))));
    }

    #[test]
    fn test_opener_waits_for_owner() {
        let mut config = config("wait", 5_000);
        config.channel.owner = OwnerSide::Consumer;

        let owner_config = config.clone();
        let owner = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            establish(&owner_config, Role::Consumer, false, &AtomicBool::new(false)).unwrap()
        });

        let link = establish(&config, Role::Producer, false, &AtomicBool::new(false)).unwrap();
        let owner_link = owner.join().unwrap();
        assert!(owner_link.is_owner());
        assert!(!link.is_owner());
        assert_eq!(link.capacity(), 4096);
    }

    #[test]
    fn test_force_replaces_leftovers() {
        let config = config("force", 0);
        let stale = establish(&config, Role::Consumer, false, &AtomicBool::new(false)).unwrap();
        std::mem::forget(stale);

        let again = establish(&config, Role::Consumer, false, &AtomicBool::new(false));
        assert!(matches!(again, Err(AppError::Sync(SyncError::AlreadyExists { .. }))));

        let forced = establish(&config, Role::Consumer, true, &AtomicBool::new(false));
        assert!(forced.is_ok());
    }
}

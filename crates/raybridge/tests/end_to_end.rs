//! # End-to-End Verification Tests
//!
//! The probe and the headless host run on two threads with separate
//! mappings of the named objects, as the two processes would.
//!
//! 1. **Round trip**: every submitted frame is rendered and presented
//! 2. **Caching**: the probe's cube is built once for the whole run
//! 3. **Setup**: opening before the owner created the names is fatal
//! 4. **Idle**: a host without a producer stops on its idle timeout

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use raybridge::core::SyncError;
use raybridge::{host, probe, AppError, BridgeConfig, HostOptions, OwnerSide, ProbeOptions};

fn temp_config(tag: &str) -> BridgeConfig {
    let root = std::env::temp_dir().join(format!(
        "raybridge_e2e_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&root).unwrap();
    let mut config = BridgeConfig::default();
    config.channel.namespace = Some(root);
    config.channel.capacity = 64 * 1024;
    config
}

fn headless(frames: Option<u64>) -> HostOptions {
    HostOptions {
        headless: true,
        frames,
        ..HostOptions::default()
    }
}

#[test]
fn verify_probe_frames_reach_the_host() {
    let config = temp_config("round_trip");
    const FRAMES: u64 = 8;

    let host_config = config.clone();
    let host_thread = thread::spawn(move || {
        host::run(
            &host_config,
            &headless(Some(FRAMES)),
            &Arc::new(AtomicBool::new(false)),
        )
    });

    let options = ProbeOptions {
        frames: FRAMES,
        instances: 3,
        force: false,
    };
    let probed = probe::run(&config, &options, &Arc::new(AtomicBool::new(false))).unwrap();
    let hosted = host_thread.join().unwrap().unwrap();

    assert_eq!(probed.frames, FRAMES);
    assert_eq!(probed.channel.frames, FRAMES);
    assert!(probed.max_round_trip >= probed.mean_round_trip);

    assert_eq!(hosted.frames, FRAMES);
    assert_eq!(hosted.last_frame.frame, FRAMES);
    assert_eq!(hosted.last_frame.instances_emitted, 3);
    assert_eq!(hosted.last_frame.instances_skipped, 0);
    assert_eq!(hosted.last_frame.blas_built, 0, "cube built in frame 1 only");
    assert_eq!(hosted.uploads.completed, 2);
}

#[test]
fn verify_producer_owned_names() {
    let mut config = temp_config("producer_owner");
    config.channel.owner = OwnerSide::Producer;

    let host_config = config.clone();
    let host_thread = thread::spawn(move || {
        host::run(
            &host_config,
            &headless(Some(2)),
            &Arc::new(AtomicBool::new(false)),
        )
    });

    let options = ProbeOptions {
        frames: 2,
        instances: 1,
        force: false,
    };
    let probed = probe::run(&config, &options, &Arc::new(AtomicBool::new(false))).unwrap();
    let hosted = host_thread.join().unwrap().unwrap();
    assert_eq!((probed.frames, hosted.frames), (2, 2));
}

#[test]
fn verify_open_before_create_is_fatal() {
    let mut config = temp_config("no_owner");
    config.channel.owner = OwnerSide::Producer;
    config.channel.open_timeout_ms = 0;

    let result = host::run(&config, &headless(None), &Arc::new(AtomicBool::new(false)));
    assert!(matches!(
        result,
        Err(AppError::Sync(SyncError::NotFound { .. }))
    ));
}

#[test]
fn verify_idle_host_stops() {
    let config = temp_config("idle");
    let options = HostOptions {
        idle_timeout: Some(Duration::from_millis(100)),
        ..headless(None)
    };

    let summary = host::run(&config, &options, &Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(summary.frames, 0);
}

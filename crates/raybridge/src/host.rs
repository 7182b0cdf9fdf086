//! # Host
//!
//! The consumer process: owns the device, drains the channel and renders
//! until told to stop.
//!
//! ```text
//! config ──► establish link ──► capability check ──► frame loop
//!                                                      │
//!              shutdown flag ◄── idle watchdog ◄───────┘ (feeds per frame)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use raybridge_core::{ChannelReceiver, ChannelStats, Role};
use raybridge_rendering::{
    HeadlessDevice, RaytracingDevice, RenderBridge, RenderBridgeStats, UploadStats,
};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::connect;
use crate::error::{AppError, AppResult};

/// Command-line options of `raybridge_host`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostOptions {
    /// Render with the CPU-only device
    pub headless: bool,
    /// Stop after this many frames
    pub frames: Option<u64>,
    /// Unlink leftover named objects before creating them
    pub force: bool,
    /// Stop when no frame arrives for this long
    pub idle_timeout: Option<Duration>,
}

/// What a host run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    /// Frames rendered and presented
    pub frames: u64,
    /// Statistics of the last frame
    pub last_frame: RenderBridgeStats,
    /// Upload counters
    pub uploads: UploadStats,
    /// Channel counters
    pub channel: ChannelStats,
}

/// Runs the consumer with the device selected by `options`.
///
/// # Errors
///
/// Any fatal setup, channel or frame failure.
pub fn run(
    config: &BridgeConfig,
    options: &HostOptions,
    shutdown: &Arc<AtomicBool>,
) -> AppResult<HostSummary> {
    if !options.headless {
        return Err(AppError::Usage(
            "no hardware ray-tracing backend in this build, pass --headless".to_string(),
        ));
    }
    run_with_device(Arc::new(HeadlessDevice::new()), config, options, shutdown)
}

/// Runs the consumer on `device`.
///
/// # Errors
///
/// As `run`.
pub fn run_with_device<D: RaytracingDevice + 'static>(
    device: Arc<D>,
    config: &BridgeConfig,
    options: &HostOptions,
    shutdown: &Arc<AtomicBool>,
) -> AppResult<HostSummary> {
    let mut bridge = RenderBridge::new(device, config.render_config())?;
    let link = connect::establish(config, Role::Consumer, options.force, shutdown)?;
    let mut receiver = ChannelReceiver::new(link).with_shutdown(Arc::clone(shutdown));

    let watchdog = options
        .idle_timeout
        .map(|timeout| Watchdog::spawn(timeout, Arc::clone(shutdown)))
        .transpose()?;

    info!(max_frames = ?options.frames, "host ready");
    let mut frames = 0;
    while options.frames.map_or(true, |max| frames < max) {
        if bridge.run(&mut receiver, Some(1))? == 0 {
            break;
        }
        frames += 1;
        if let Some(watchdog) = &watchdog {
            watchdog.feed();
        }
    }
    drop(watchdog);

    let summary = HostSummary {
        frames,
        last_frame: bridge.stats(),
        uploads: bridge.upload_stats(),
        channel: *receiver.stats(),
    };
    info!(
        frames,
        chunks = summary.channel.chunks,
        uploaded = summary.uploads.bytes,
        "host stopped"
    );
    Ok(summary)
}

/// Raises the shutdown flag when frames stop arriving.
struct Watchdog {
    last_frame: Arc<Mutex<Instant>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn spawn(timeout: Duration, shutdown: Arc<AtomicBool>) -> AppResult<Self> {
        let last_frame = Arc::new(Mutex::new(Instant::now()));
        let stop = Arc::new(AtomicBool::new(false));
        let tick = (timeout / 4).clamp(Duration::from_millis(1), Duration::from_millis(50));

        let (last, stopped) = (Arc::clone(&last_frame), Arc::clone(&stop));
        let handle = std::thread::Builder::new()
            .name("raybridge-watchdog".into())
            .spawn(move || {
                while !stopped.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    let idle = last.lock().elapsed();
                    if idle >= timeout {
                        warn!(?idle, "no frame from the producer, stopping");
                        shutdown.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            })
            .map_err(|_| AppError::Spawn("watchdog"))?;

        Ok(Self {
            last_frame,
            stop,
            handle: Some(handle),
        })
    }

    fn feed(&self) {
        *self.last_frame.lock() = Instant::now();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_backend_is_rejected() {
        let result = run(
            &BridgeConfig::default(),
            &HostOptions::default(),
            &Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(result, Err(AppError::Usage(_))));
    }

    #[test]
    fn test_watchdog_raises_flag_when_idle() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::spawn(Duration::from_millis(20), Arc::clone(&shutdown)).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(shutdown.load(Ordering::SeqCst));
        drop(watchdog);
    }

    #[test]
    fn test_fed_watchdog_stays_quiet() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::spawn(Duration::from_millis(500), Arc::clone(&shutdown)).unwrap();
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(20));
            watchdog.feed();
        }
        drop(watchdog);
        assert!(!shutdown.load(Ordering::SeqCst));
    }
}

//! # Upload Worker
//!
//! `WriteResource` payloads are copied to the device on a dedicated thread
//! so the render thread never waits on a large upload unless it has to.
//!
//! ```text
//! render thread ──jobs (bounded)──► upload thread ──► device.write_resource
//!       ▲                                 │
//!       └──────────── completions ────────┘
//! ```
//!
//! A resource with writes still in flight is not resident: acceleration
//! structures that read it wait for `collect` to see the completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use raybridge_core::RawResource;
use tracing::{debug, error};

use crate::device::RaytracingDevice;
use crate::error::{RenderError, RenderResult};

/// Upload counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Writes queued
    pub submitted: u64,
    /// Writes finished
    pub completed: u64,
    /// Bytes written
    pub bytes: u64,
}

struct UploadJob {
    id: u64,
    resource: RawResource,
    offset: u64,
    data: Vec<u8>,
}

struct UploadDone {
    id: u64,
    bytes: usize,
    result: RenderResult<()>,
}

/// Owns the upload thread.
#[derive(Debug)]
pub struct UploadWorker {
    jobs: Option<Sender<UploadJob>>,
    done: Receiver<UploadDone>,
    pending: HashMap<u64, u32>,
    handle: Option<JoinHandle<()>>,
    stats: UploadStats,
}

impl UploadWorker {
    /// Starts the upload thread. At most `queue_depth` writes wait in the queue.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` if the thread cannot be spawned.
    pub fn spawn<D>(device: Arc<D>, queue_depth: usize) -> RenderResult<Self>
    where
        D: RaytracingDevice + 'static,
    {
        let (job_tx, job_rx) = bounded::<UploadJob>(queue_depth.max(1));
        let (done_tx, done_rx) = unbounded::<UploadDone>();

        let handle = std::thread::Builder::new()
            .name("raybridge-upload".into())
            .spawn(move || {
                debug!("upload worker started");
                while let Ok(job) = job_rx.recv() {
                    let result = device.write_resource(job.resource, job.offset, &job.data);
                    let done = UploadDone {
                        id: job.id,
                        bytes: job.data.len(),
                        result,
                    };
                    if done_tx.send(done).is_err() {
                        break;
                    }
                }
                debug!("upload worker stopped");
            })
            .map_err(|e| RenderError::Device(format!("cannot spawn upload worker: {e}")))?;

        Ok(Self {
            jobs: Some(job_tx),
            done: done_rx,
            pending: HashMap::new(),
            handle: Some(handle),
            stats: UploadStats::default(),
        })
    }

    /// Queues a write of `data` to resource `id` at `offset`.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// `RenderError::UploadWorkerGone` if the thread has stopped.
    pub fn submit(
        &mut self,
        id: u64,
        resource: RawResource,
        offset: u64,
        data: Vec<u8>,
    ) -> RenderResult<()> {
        let jobs = self.jobs.as_ref().ok_or(RenderError::UploadWorkerGone)?;
        jobs.send(UploadJob {
            id,
            resource,
            offset,
            data,
        })
        .map_err(|_| RenderError::UploadWorkerGone)?;

        *self.pending.entry(id).or_insert(0) += 1;
        self.stats.submitted += 1;
        Ok(())
    }

    /// Applies every completion received so far; returns how many.
    ///
    /// # Errors
    ///
    /// The first failed write.
    pub fn collect(&mut self) -> RenderResult<usize> {
        let mut collected = 0;
        while let Ok(done) = self.done.try_recv() {
            self.complete(done)?;
            collected += 1;
        }
        Ok(collected)
    }

    /// Blocks until every queued write has finished.
    ///
    /// # Errors
    ///
    /// The first failed write, or `RenderError::UploadWorkerGone`.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        while !self.pending.is_empty() {
            let done = self.done.recv().map_err(|_| RenderError::UploadWorkerGone)?;
            self.complete(done)?;
        }
        Ok(())
    }

    /// Blocks until every queued write to `id` has finished.
    ///
    /// # Errors
    ///
    /// As `wait_idle`.
    pub fn flush_resource(&mut self, id: u64) -> RenderResult<()> {
        while self.is_pending(id) {
            let done = self.done.recv().map_err(|_| RenderError::UploadWorkerGone)?;
            self.complete(done)?;
        }
        Ok(())
    }

    /// True if writes to `id` are in flight.
    #[must_use]
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Resources with writes in flight.
    #[must_use]
    pub fn pending_resources(&self) -> usize {
        self.pending.len()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Stops accepting writes and joins the thread. Queued writes still run.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("upload worker panicked");
            }
        }
    }

    fn complete(&mut self, done: UploadDone) -> RenderResult<()> {
        if let Some(count) = self.pending.get_mut(&done.id) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&done.id);
            }
        }
        self.stats.completed += 1;
        self.stats.bytes += done.bytes as u64;
        done.result
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use raybridge_core::{GpuMemory, ResourceDesc};

    fn worker() -> (Arc<HeadlessDevice>, UploadWorker) {
        let device = Arc::new(HeadlessDevice::new());
        let worker = UploadWorker::spawn(Arc::clone(&device), 4).unwrap();
        (device, worker)
    }

    #[test]
    fn test_writes_land_in_order() {
        let (device, mut worker) = worker();
        let buffer = device.create_committed(&ResourceDesc::buffer(4)).unwrap();

        worker.submit(1, buffer, 0, vec![1, 1, 1, 1]).unwrap();
        worker.submit(1, buffer, 2, vec![2, 2]).unwrap();
        assert!(worker.is_pending(1));

        worker.wait_idle().unwrap();
        assert!(!worker.is_pending(1));
        assert_eq!(device.resource_data(buffer).unwrap(), vec![1, 1, 2, 2]);
        assert_eq!(
            worker.stats(),
            UploadStats {
                submitted: 2,
                completed: 2,
                bytes: 6
            }
        );
    }

    #[test]
    fn test_flush_single_resource() {
        let (device, mut worker) = worker();
        let a = device.create_committed(&ResourceDesc::buffer(64)).unwrap();
        let b = device.create_committed(&ResourceDesc::buffer(64)).unwrap();

        for _ in 0..8 {
            worker.submit(1, a, 0, vec![7; 64]).unwrap();
        }
        worker.submit(2, b, 0, vec![9; 64]).unwrap();

        worker.flush_resource(2).unwrap();
        assert!(!worker.is_pending(2));
        assert_eq!(device.resource_data(b).unwrap(), vec![9; 64]);
    }

    #[test]
    fn test_failed_write_is_reported() {
        let (device, mut worker) = worker();
        let buffer = device.create_committed(&ResourceDesc::buffer(4)).unwrap();

        worker.submit(1, buffer, 2, vec![0; 4]).unwrap();
        assert!(matches!(worker.wait_idle(), Err(RenderError::Device(_))));
        assert_eq!(worker.pending_resources(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_writes() {
        let (device, mut worker) = worker();
        let buffer = device.create_committed(&ResourceDesc::buffer(4)).unwrap();

        worker.shutdown();
        assert_eq!(
            worker.submit(1, buffer, 0, vec![0; 4]),
            Err(RenderError::UploadWorkerGone)
        );
    }
}

//! Pool of worker threads

use tracing::info;

use crate::error::{Result, TrackError};
use crate::track::Track;

use super::worker::{TrackTicket, Worker, WorkerHandle};

/// Fixed set of workers; new tracks go to the least loaded one
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let workers = (0..threads)
            .map(|i| Worker::spawn(&format!("trackflow-worker-{}", i)))
            .collect::<Result<Vec<_>>>()?;
        info!(threads, "worker pool started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn handles(&self) -> Vec<WorkerHandle> {
        self.workers.iter().map(Worker::handle).collect()
    }

    /// Hand a track to the least loaded worker
    pub fn submit(&self, track: Track) -> Result<TrackTicket> {
        let worker = self
            .workers
            .iter()
            .map(Worker::handle)
            .min_by_key(WorkerHandle::load)
            .ok_or(TrackError::WorkerClosed)?;
        worker.submit(track)
    }

    /// Stop every track and join all workers
    pub fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown();
        }
        info!("worker pool stopped");
    }
}

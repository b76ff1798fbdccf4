//! The dataset writer sink.
//!
//! Disk I/O must never block the pipeline thread, so the sink side only
//! pushes onto a queue; a dedicated worker drains it into the dataset
//! group, preserving order. A full queue drops the sample and counts it
//! rather than stall the pump.

use crate::dataset::DatasetGroup;
use crate::plugin::SampleSink;
use crate::sync::{BoundedQueue, CancelToken};
use crate::types::EyeSample;
use crate::worker::{Worker, WorkerHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Queue depth between the pipeline thread and the disk worker.
const WRITER_QUEUE_CAPACITY: usize = 4096;

/// The pipeline-facing half: a sink that enqueues.
pub struct WriterSink {
    queue: BoundedQueue<EyeSample>,
    dropped: AtomicU64,
}

impl WriterSink {
    /// Samples dropped because the disk worker fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SampleSink for WriterSink {
    fn consume(&self, sample: &EyeSample) {
        if !self.queue.try_push(*sample) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct DrainWorker {
    queue: BoundedQueue<EyeSample>,
    group: DatasetGroup,
}

impl Worker for DrainWorker {
    fn run_once(&mut self, stop: &CancelToken) -> crate::error::Result<()> {
        if let Some(sample) = self.queue.wait_and_pop(stop) {
            self.group.append(&sample)?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        // Flush the residue so every sample consumed before the stop
        // reaches disk.
        while let Some(sample) = self.queue.try_pop() {
            if let Err(e) = self.group.append(&sample) {
                tracing::error!("dataset append failed during flush: {e}");
                break;
            }
        }
        if let Err(e) = self.group.flush() {
            tracing::error!("dataset flush failed: {e}");
        }
        tracing::debug!("writer for group \"{}\" flushed", self.group.name());
    }
}

/// A running writer: sink handle plus its drain worker.
pub struct DataWriter {
    sink: Arc<WriterSink>,
    worker: WorkerHandle,
}

impl DataWriter {
    /// Spawn a writer bound to `group`.
    pub fn spawn(group: DatasetGroup) -> Self {
        let queue = BoundedQueue::new(WRITER_QUEUE_CAPACITY);
        let sink = Arc::new(WriterSink {
            queue: queue.clone(),
            dropped: AtomicU64::new(0),
        });
        let worker = WorkerHandle::spawn("data-writer", DrainWorker { queue, group });
        Self { sink, worker }
    }

    /// The sink to install into the pipeline.
    pub fn sink(&self) -> Arc<WriterSink> {
        Arc::clone(&self.sink)
    }

    /// Stop the drain worker, flushing everything queued so far.
    pub fn stop(self) {
        self.worker.stop();
    }
}

//! Bounded sample FIFO between a capture callback and the segmenter.
//!
//! The producer side lives inside the audio backend's stream callback and
//! must never block; when the channel is full the chunk is dropped with a
//! warning. The consumer exposes a `rehash` watermark that turns on when the
//! unconsumed backlog grows within one second of the capacity, telling the
//! segmenter to compact its per-segment state.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::warn;
use std::time::Duration;

use crate::audio::Sample;

pub struct SampleFifo {
    sender: Sender<Vec<Sample>>,
    receiver: Receiver<Vec<Sample>>,
    capacity_chunks: usize,
    watermark_chunks: usize,
}

#[derive(Clone)]
pub struct SampleProducer {
    sender: Sender<Vec<Sample>>,
}

impl SampleFifo {
    /// Capacity and watermark are given in samples and converted to chunk
    /// counts assuming the producer pushes `chunk_size`-sample buffers.
    pub fn new(capacity_samples: usize, watermark_samples: usize, chunk_size: usize) -> Self {
        let capacity_chunks = (capacity_samples / chunk_size).max(4);
        let watermark_chunks = (watermark_samples / chunk_size).max(1).min(capacity_chunks - 1);
        let (sender, receiver) = bounded(capacity_chunks);
        SampleFifo {
            sender,
            receiver,
            capacity_chunks,
            watermark_chunks,
        }
    }

    pub fn producer(&self) -> SampleProducer {
        SampleProducer {
            sender: self.sender.clone(),
        }
    }

    /// Pop the next chunk, waiting up to `timeout`. `None` on timeout.
    pub fn pop(&self, timeout: Duration) -> Option<Vec<Sample>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<Vec<Sample>> {
        self.receiver.try_recv().ok()
    }

    /// True when the backlog is close enough to capacity that the segmenter
    /// should compact its state before the producer starts dropping.
    pub fn rehash(&self) -> bool {
        self.receiver.len() + self.watermark_chunks >= self.capacity_chunks
    }

    pub fn backlog_chunks(&self) -> usize {
        self.receiver.len()
    }
}

impl SampleProducer {
    /// Push from the capture callback. Never blocks; drops on overflow.
    pub fn push(&self, chunk: Vec<Sample>) {
        match self.sender.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                warn!("🗑️ capture FIFO full, dropping {} samples", chunk.len());
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

//! Per-run capture session state.
//!
//! Replaces the process-global state of older capture tools: all counters
//! and stop flags live in one value threaded through the loop, and signal
//! handlers only touch atomics that the loop observes at safe points.

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct StopFlags {
    /// Checked at segment boundaries.
    pause_requested: Arc<AtomicBool>,
    /// Checked mid-capture; abandons the current segment.
    terminate_requested: Arc<AtomicBool>,
}

impl StopFlags {
    pub fn new() -> Self {
        StopFlags {
            pause_requested: Arc::new(AtomicBool::new(false)),
            terminate_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_terminate(&self) {
        self.terminate_requested.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }

    /// Shared handle for components that poll termination themselves
    /// (the segmenter checks it between chunks).
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate_requested)
    }
}

impl Default for StopFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and flags for one capture run.
pub struct AdinSession {
    pub flags: StopFlags,
    /// Samples delivered across all segments since start.
    pub total_speechlen: u64,
    /// Absolute sample position where the last segment triggered up.
    pub trigger_sample: u64,
    /// Segments that actually contained samples.
    pub segments_emitted: u32,
    pub sample_rate: u32,
}

impl AdinSession {
    pub fn new(sample_rate: u32) -> Self {
        AdinSession {
            flags: StopFlags::new(),
            total_speechlen: 0,
            trigger_sample: 0,
            segments_emitted: 0,
            sample_rate,
        }
    }

    /// Install SIGINT/SIGTERM handling that requests termination; the main
    /// loop closes files and sends session markers on its way out.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let flags = self.flags.clone();
        ctrlc::set_handler(move || {
            info!("🛑 [interrupt]");
            flags.request_terminate();
        })
    }

    /// Book-keeping after one delivered segment.
    pub fn record_segment(&mut self, start_sample: u64, samples: u64) {
        self.trigger_sample = start_sample;
        if samples > 0 {
            self.total_speechlen += samples;
            self.segments_emitted += 1;
        }
    }

    /// The `sent: N samples [start - end]` summary line.
    pub fn log_segment_summary(&self, samples: u64) {
        let fs = self.sample_rate as f64;
        let end = self.trigger_sample + samples;
        info!(
            "sent: {} samples ({:.2} sec.) [{:6} ({:5.2}s) - {:6} ({:5.2}s)]",
            samples,
            samples as f64 / fs,
            self.trigger_sample,
            self.trigger_sample as f64 / fs,
            end,
            end as f64 / fs,
        );
    }
}

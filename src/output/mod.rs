//! Segment delivery: files, stdout, adinnet fan-out, vecnet features.
//!
//! Every sink implements [`SegmentHandler`] so the segmenter can stream into
//! it directly; [`SegmentSink`] adds session lifecycle (connect/close) and
//! the resume-wait entry point for sinks with a control channel.

pub mod adinnet;
pub mod control;
pub mod file;
pub mod stdout;
pub mod vecnet;

use strum::Display;

use crate::audio::segmenter::{ControlFlow, SegmentHandler};
use crate::audio::AudioError;

/// Output selection, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SinkKind {
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "stdout")]
    Stdout,
    #[strum(serialize = "adinnet")]
    Adinnet,
    #[strum(serialize = "vecnet")]
    Vecnet,
    #[strum(serialize = "none")]
    None,
}

/// A segment destination with session lifecycle.
pub trait SegmentSink: SegmentHandler {
    /// Connect sockets / prepare outputs. Called once before capture.
    fn open_session(&mut self) -> Result<(), AudioError>;

    /// Flush and close everything; sends end-of-session markers.
    fn close_session(&mut self) -> Result<(), AudioError>;

    /// True when a pause command arrived and the loop should wait for
    /// resume after the current segment.
    fn pause_pending(&self) -> bool {
        false
    }

    /// Block until the resume predicate holds. Sinks without a control
    /// channel return immediately.
    fn wait_resume(&mut self) -> ControlFlow {
        ControlFlow::Continue
    }

    /// One-line description for the startup banner.
    fn describe(&self) -> String;
}

/// Sink for `--out none`: segments are detected and counted but discarded.
pub struct NullSink;

impl SegmentHandler for NullSink {
    fn on_segment_start(&mut self, _start_sample: u64) -> Result<(), AudioError> {
        Ok(())
    }

    fn on_samples(&mut self, _samples: &[i16]) -> Result<(), AudioError> {
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

impl SegmentSink for NullSink {
    fn open_session(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "none (no output)".to_string()
    }
}

//! Stdout sink: raw little-endian samples, no framing.

use std::io::Write;

use crate::audio::segmenter::SegmentHandler;
use crate::audio::{AudioError, Sample};
use crate::output::SegmentSink;

pub struct StdoutSink;

impl SegmentHandler for StdoutSink {
    fn on_segment_start(&mut self, _start_sample: u64) -> Result<(), AudioError> {
        Ok(())
    }

    fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for &s in samples {
            handle.write_all(&s.to_le_bytes())?;
        }
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), AudioError> {
        std::io::stdout().flush()?;
        Ok(())
    }
}

impl SegmentSink for StdoutSink {
    fn open_session(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AudioError> {
        std::io::stdout().flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        "standard output (raw)".to_string()
    }
}

//! vecnet sink: feature-vector streaming to N servers.
//!
//! The sink frames incoming samples into analysis windows, asks a
//! [`FeatureExtractor`] for one vector per window, and ships vectors with
//! the vecnet framing. The actual spectral analysis lives behind the trait;
//! this crate only guarantees the windowing arithmetic and the wire format.

use adinnet_protocol::vecnet::VecnetHeader;
use adinnet_protocol::AdinnetPeers;
use log::info;

use crate::audio::segmenter::{ControlFlow, SegmentHandler};
use crate::audio::{AudioError, Sample};
use crate::output::control::{ControlState, SyncMode};
use crate::output::SegmentSink;

/// Computes one feature vector per analysis window.
pub trait FeatureExtractor {
    /// Output vector dimension.
    fn veclen(&self) -> usize;
    /// Analysis window length in samples.
    fn frame_size(&self) -> usize;
    /// Window advance in samples.
    fn frame_shift(&self) -> usize;
    /// Compute the vector for one full window.
    fn extract(&mut self, window: &[Sample]) -> Vec<f32>;
    /// Forget cross-window state at a segment boundary.
    fn reset(&mut self);
}

/// A deliberately simple front-end for standalone use: log frame energy and
/// coarse band sums, padded to the requested dimension. Real deployments
/// plug in an MFCC front-end through the same trait.
pub struct EnergyFrontend {
    veclen: usize,
    frame_size: usize,
    frame_shift: usize,
}

impl EnergyFrontend {
    pub fn new(veclen: usize, frame_size: usize, frame_shift: usize) -> Self {
        EnergyFrontend {
            veclen,
            frame_size,
            frame_shift,
        }
    }
}

impl FeatureExtractor for EnergyFrontend {
    fn veclen(&self) -> usize {
        self.veclen
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn frame_shift(&self) -> usize {
        self.frame_shift
    }

    fn extract(&mut self, window: &[Sample]) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.veclen];
        if !vec.is_empty() {
            let energy: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
            vec[0] = ((energy / window.len().max(1) as f64) + 1.0).ln() as f32;
        }
        // coarse per-band mean magnitudes fill the remaining slots
        let bands = self.veclen.saturating_sub(1);
        if bands > 0 {
            let band_len = (window.len() / bands).max(1);
            for (b, slot) in vec[1..].iter_mut().enumerate() {
                let start = b * band_len;
                if start >= window.len() {
                    break;
                }
                let end = (start + band_len).min(window.len());
                let sum: f64 = window[start..end].iter().map(|&s| (s as f64).abs()).sum();
                *slot = (sum / (end - start) as f64 + 1.0).ln() as f32;
            }
        }
        vec
    }

    fn reset(&mut self) {}
}

pub struct VecnetSink {
    endpoints: Vec<(String, u16)>,
    peers: Option<AdinnetPeers>,
    control: ControlState,
    extractor: Box<dyn FeatureExtractor>,
    sample_rate: u32,
    window: Vec<Sample>,
    segment_vectors: u64,
    segment_samples: u64,
}

impl VecnetSink {
    pub fn new(
        endpoints: Vec<(String, u16)>,
        sync: SyncMode,
        extractor: Box<dyn FeatureExtractor>,
        sample_rate: u32,
    ) -> Self {
        let control = ControlState::new(endpoints.len(), sync);
        VecnetSink {
            endpoints,
            peers: None,
            control,
            extractor,
            sample_rate,
            window: Vec::new(),
            segment_vectors: 0,
            segment_samples: 0,
        }
    }

    pub fn segment_samples(&self) -> u64 {
        self.segment_samples
    }

    pub fn errored(&self) -> bool {
        self.control.errored()
    }

    fn header(&self) -> VecnetHeader {
        VecnetHeader {
            veclen: self.extractor.veclen() as i32,
            frame_shift_msec: (self.extractor.frame_shift() as i64 * 1000
                / self.sample_rate as i64) as i32,
            outprob: false,
        }
    }

    /// Slide the analysis window over buffered samples, emitting one vector
    /// per full window.
    fn drain_windows(&mut self) {
        let frame_size = self.extractor.frame_size();
        let frame_shift = self.extractor.frame_shift();
        while self.window.len() >= frame_size {
            let vector = self.extractor.extract(&self.window[..frame_size]);
            if let Some(peers) = self.peers.as_mut() {
                peers.broadcast_vector(&vector);
            }
            self.segment_vectors += 1;
            self.window.drain(..frame_shift);
        }
    }
}

impl SegmentHandler for VecnetSink {
    fn on_segment_start(&mut self, _start_sample: u64) -> Result<(), AudioError> {
        self.window.clear();
        self.extractor.reset();
        self.segment_vectors = 0;
        self.segment_samples = 0;
        Ok(())
    }

    fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
        self.segment_samples += samples.len() as u64;
        self.window.extend_from_slice(samples);
        self.drain_windows();
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), AudioError> {
        if self.segment_samples > 0 {
            if let Some(peers) = self.peers.as_mut() {
                peers.broadcast_vecnet_end_of_segment();
            }
            info!("📤 sent {} feature vectors", self.segment_vectors);
        }
        self.window.clear();
        Ok(())
    }

    fn poll_control(&mut self) -> ControlFlow {
        match self.peers.as_mut() {
            Some(peers) => self.control.poll(peers),
            None => ControlFlow::Continue,
        }
    }
}

impl SegmentSink for VecnetSink {
    fn open_session(&mut self) -> Result<(), AudioError> {
        if self.peers.is_none() {
            let mut peers = AdinnetPeers::connect(&self.endpoints)?;
            peers.broadcast_vecnet_header(self.header());
            self.peers = Some(peers);
        }
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AudioError> {
        if let Some(mut peers) = self.peers.take() {
            peers.broadcast_vecnet_end_of_session();
            info!("🔌 vecnet session closed");
        }
        Ok(())
    }

    fn pause_pending(&self) -> bool {
        self.control.pause_pending()
    }

    fn wait_resume(&mut self) -> ControlFlow {
        match self.peers.as_mut() {
            Some(peers) => self.control.wait_resume(peers),
            None => ControlFlow::Continue,
        }
    }

    fn describe(&self) -> String {
        let list: Vec<String> = self
            .endpoints
            .iter()
            .map(|(h, p)| format!("({}:{})", h, p))
            .collect();
        format!(
            "vecnet server(s): {} (veclen {})",
            list.join(" "),
            self.extractor.veclen()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_count_matches_shift_arithmetic() {
        // 1 s of audio, 25 ms windows, 10 ms shift at 16 kHz:
        // floor((16000 - 400) / 160) + 1 = 98 windows
        let mut sink = VecnetSink::new(
            Vec::new(),
            SyncMode::Strict,
            Box::new(EnergyFrontend::new(25, 400, 160)),
            16000,
        );
        sink.on_segment_start(0).unwrap();
        sink.on_samples(&vec![100i16; 16000]).unwrap();
        assert_eq!(sink.segment_vectors, (16000 - 400) / 160 + 1);
    }

    #[test]
    fn header_reports_shift_in_msec() {
        let sink = VecnetSink::new(
            Vec::new(),
            SyncMode::Strict,
            Box::new(EnergyFrontend::new(25, 400, 160)),
            16000,
        );
        let header = sink.header();
        assert_eq!(header.veclen, 25);
        assert_eq!(header.frame_shift_msec, 10);
        assert!(!header.outprob);
    }
}

//! adinnet sink: fan segments out to N servers over TCP, with the servers'
//! pause/resume/terminate commands polled between chunks.

use adinnet_protocol::AdinnetPeers;
use log::info;

use crate::audio::segmenter::{ControlFlow, SegmentHandler};
use crate::audio::{AudioError, Sample};
use crate::output::control::{ControlState, SyncMode};
use crate::output::SegmentSink;

pub struct AdinnetSink {
    endpoints: Vec<(String, u16)>,
    peers: Option<AdinnetPeers>,
    control: ControlState,
    segment_samples: u64,
}

impl AdinnetSink {
    pub fn new(endpoints: Vec<(String, u16)>, sync: SyncMode) -> Self {
        let control = ControlState::new(endpoints.len(), sync);
        AdinnetSink {
            endpoints,
            peers: None,
            control,
            segment_samples: 0,
        }
    }

    pub fn segment_samples(&self) -> u64 {
        self.segment_samples
    }

    pub fn errored(&self) -> bool {
        self.control.errored()
    }
}

impl SegmentHandler for AdinnetSink {
    fn on_segment_start(&mut self, _start_sample: u64) -> Result<(), AudioError> {
        self.segment_samples = 0;
        Ok(())
    }

    fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
        if let Some(peers) = self.peers.as_mut() {
            peers.broadcast_samples(samples);
        }
        self.segment_samples += samples.len() as u64;
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), AudioError> {
        if self.segment_samples > 0 {
            if let Some(peers) = self.peers.as_mut() {
                peers.broadcast_end_of_segment();
            }
        }
        Ok(())
    }

    fn poll_control(&mut self) -> ControlFlow {
        match self.peers.as_mut() {
            Some(peers) => self.control.poll(peers),
            None => ControlFlow::Continue,
        }
    }
}

impl SegmentSink for AdinnetSink {
    fn open_session(&mut self) -> Result<(), AudioError> {
        if self.peers.is_none() {
            self.peers = Some(AdinnetPeers::connect(&self.endpoints)?);
        }
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AudioError> {
        if let Some(mut peers) = self.peers.take() {
            peers.broadcast_end_of_session();
            info!("🔌 adinnet session closed");
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
        format!("adinnet server(s): {}", list.join(" "))
    }
}

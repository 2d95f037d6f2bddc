//! Inbound command handling for adinnet/vecnet outputs.
//!
//! Each connected server can send single-byte commands at any time: `'0'`
//! pause, `'1'` resume, `'2'` terminate. While capturing, commands are
//! drained with a zero-timeout poll between chunks; while paused, the client
//! blocks here until the resume predicate holds across all servers.

use adinnet_protocol::{AdinnetPeers, Command};
use log::{error, info, warn};

use crate::audio::segmenter::ControlFlow;

/// After this many consecutive unparseable bytes the connection is assumed
/// broken and the session is abandoned.
const UNKNOWN_COMMAND_LIMIT: u32 = 100;

/// Resume synchronization across N servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Every server must have sent the same number of resumes.
    Strict,
    /// Every server must have sent at least one resume.
    Loose,
}

pub struct ControlState {
    resume_count: Vec<u32>,
    unknown_counter: u32,
    sync: SyncMode,
    pause_pending: bool,
    errored: bool,
}

impl ControlState {
    pub fn new(server_count: usize, sync: SyncMode) -> Self {
        ControlState {
            resume_count: vec![0; server_count],
            unknown_counter: 0,
            sync,
            pause_pending: false,
            errored: false,
        }
    }

    pub fn pause_pending(&self) -> bool {
        self.pause_pending
    }

    pub fn clear_pause(&mut self) {
        self.pause_pending = false;
    }

    pub fn errored(&self) -> bool {
        self.errored
    }

    /// Zero-timeout poll while capturing.
    pub fn poll(&mut self, peers: &mut AdinnetPeers) -> ControlFlow {
        let events = match peers.poll_commands() {
            Ok(events) => events,
            Err(_) => {
                self.errored = true;
                return ControlFlow::Fatal;
            }
        };
        for event in events {
            match Command::try_from(event.byte) {
                Ok(Command::Pause) => {
                    info!("<#{}: PAUSE>", event.peer + 1);
                    self.pause_pending = true;
                    return ControlFlow::StopAfterSegment;
                }
                Ok(Command::Resume) => {
                    info!("<#{}: RESUME - already running, ignored>", event.peer + 1);
                }
                Ok(Command::Terminate) => {
                    info!("<#{}: TERMINATE>", event.peer + 1);
                    self.pause_pending = true;
                    return ControlFlow::StopNow;
                }
                Err(_) => {
                    if self.count_unknown(event.peer, event.byte) {
                        return ControlFlow::Fatal;
                    }
                }
            }
        }
        ControlFlow::Continue
    }

    /// Block until resume. Returns `Continue` on resume, `Fatal` on a
    /// control-channel failure.
    pub fn wait_resume(&mut self, peers: &mut AdinnetPeers) -> ControlFlow {
        info!("<<< waiting RESUME >>>");
        loop {
            if self.resume_ready() {
                self.resume_count.iter_mut().for_each(|c| *c = 0);
                self.pause_pending = false;
                info!(">> RESUME");
                return ControlFlow::Continue;
            }
            let events = match peers.wait_commands() {
                Ok(events) => events,
                Err(_) => {
                    self.errored = true;
                    return ControlFlow::Fatal;
                }
            };
            for event in events {
                match Command::try_from(event.byte) {
                    Ok(Command::Resume) => {
                        self.resume_count[event.peer] += 1;
                        match self.sync {
                            SyncMode::Loose => info!("<#{}: RESUME>", event.peer + 1),
                            SyncMode::Strict => info!(
                                "<#{}: RESUME @{}>",
                                event.peer + 1,
                                self.resume_count[event.peer]
                            ),
                        }
                    }
                    Ok(Command::Pause) | Ok(Command::Terminate) => {
                        // already paused; under loose sync a stray pause
                        // resets the half-collected resume counts
                        if self.sync == SyncMode::Loose {
                            info!("🔄 <#{}: PAUSE - already paused, reset sync>", event.peer + 1);
                            self.resume_count.iter_mut().for_each(|c| *c = 0);
                        } else {
                            info!("<#{}: PAUSE - already paused, ignored>", event.peer + 1);
                        }
                    }
                    Err(_) => {
                        if self.count_unknown(event.peer, event.byte) {
                            self.errored = true;
                            return ControlFlow::Fatal;
                        }
                    }
                }
            }
        }
    }

    fn resume_ready(&self) -> bool {
        if self.resume_count.is_empty() {
            return false;
        }
        match self.sync {
            SyncMode::Loose => self.resume_count.iter().all(|&c| c > 0),
            SyncMode::Strict => {
                let first = self.resume_count[0];
                first > 0 && self.resume_count.iter().all(|&c| c == first)
            }
        }
    }

    fn count_unknown(&mut self, peer: usize, byte: u8) -> bool {
        warn!("⚠️ unknown command from #{}: {}", peer + 1, byte);
        self.unknown_counter += 1;
        if self.unknown_counter > UNKNOWN_COMMAND_LIMIT {
            error!("❌ killed by a flood of unknown commands from server");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_counts(counts: &[u32], sync: SyncMode) -> ControlState {
        let mut s = ControlState::new(counts.len(), sync);
        s.resume_count.copy_from_slice(counts);
        s
    }

    #[test]
    fn strict_sync_requires_equal_counts() {
        assert!(!state_with_counts(&[1, 0, 1], SyncMode::Strict).resume_ready());
        assert!(!state_with_counts(&[2, 1, 1], SyncMode::Strict).resume_ready());
        assert!(state_with_counts(&[2, 2, 2], SyncMode::Strict).resume_ready());
        assert!(!state_with_counts(&[0, 0, 0], SyncMode::Strict).resume_ready());
    }

    #[test]
    fn loose_sync_requires_at_least_one_each() {
        assert!(!state_with_counts(&[1, 0, 1], SyncMode::Loose).resume_ready());
        assert!(state_with_counts(&[2, 1, 1], SyncMode::Loose).resume_ready());
        assert!(state_with_counts(&[1, 1, 1], SyncMode::Loose).resume_ready());
    }
}

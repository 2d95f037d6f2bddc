use crate::wire::{Command, Connection, ProtocolError};
use log::{debug, info, warn};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

/// A set of outbound connections to N adinnet (or vecnet) servers.
///
/// Data delivery is best-effort fan-out: a send failure on one server is
/// logged and the remaining servers still receive the data. Inbound command
/// bytes from every server are multiplexed by a zero-timeout poll.
pub struct AdinnetPeers {
    pub(crate) peers: Vec<Peer>,
}

pub(crate) struct Peer {
    pub(crate) connection: Connection,
    pub(crate) address: String,
    pub(crate) alive: bool,
}

/// One command received from one server.
#[derive(Debug, Clone, Copy)]
pub struct PeerEvent {
    /// Index of the sending server, in connect order.
    pub peer: usize,
    /// The raw byte; known commands decode via `Command::try_from`.
    pub byte: u8,
}

impl AdinnetPeers {
    /// Connect to every `(host, port)` pair, failing if any is unreachable.
    pub fn connect(endpoints: &[(String, u16)]) -> Result<Self, ProtocolError> {
        let mut peers = Vec::with_capacity(endpoints.len());
        for (i, (host, port)) in endpoints.iter().enumerate() {
            let address = format!("{}:{}", host, port);
            info!("📡 connecting to #{} ({})...", i + 1, address);
            let stream = TcpStream::connect(&address)?;
            stream.set_nodelay(true)?;
            peers.push(Peer {
                connection: Connection::new(stream)?,
                address,
                alive: true,
            });
        }
        info!("✅ connected to {} server(s)", peers.len());
        Ok(AdinnetPeers { peers })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn address(&self, peer: usize) -> &str {
        &self.peers[peer].address
    }

    /// Fan a run of samples out to every live server.
    pub fn broadcast_samples(&mut self, samples: &[i16]) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_samples(samples) {
                warn!("❌ failed to send data to {}: {}", peer.address, e);
            }
        }
    }

    /// Send the end-of-segment marker to every live server.
    pub fn broadcast_end_of_segment(&mut self) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_end_of_segment() {
                warn!("❌ failed to send end-of-segment to {}: {}", peer.address, e);
            }
        }
    }

    /// Send the end-of-session marker to every live server.
    pub fn broadcast_end_of_session(&mut self) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_end_of_session() {
                warn!("❌ failed to send end-of-session to {}: {}", peer.address, e);
            }
        }
    }

    /// Zero-timeout poll over every server socket.
    ///
    /// Returns all waiting command bytes. A read error closes that peer and
    /// is surfaced so the caller can mark the session as errored.
    pub fn poll_commands(&mut self) -> Result<Vec<PeerEvent>, ProtocolError> {
        let mut events = Vec::new();
        for (i, peer) in self.peers.iter_mut().enumerate() {
            if !peer.alive {
                continue;
            }
            loop {
                match peer.connection.try_read_byte() {
                    Ok(Some(byte)) => {
                        debug!("📥 command byte {} from #{}", byte, i + 1);
                        events.push(PeerEvent { peer: i, byte });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("❌ control read error from {}: {}", peer.address, e);
                        peer.alive = false;
                        return Err(e);
                    }
                }
            }
        }
        Ok(events)
    }

    /// Block until at least one command byte arrives from any server.
    ///
    /// There is no portable `select` over `TcpStream` in std, so this polls
    /// every socket in non-blocking mode with a short sleep between rounds,
    /// the same way the capture client waits on its audio socket.
    pub fn wait_commands(&mut self) -> Result<Vec<PeerEvent>, ProtocolError> {
        loop {
            let events = self.poll_commands()?;
            if !events.is_empty() {
                return Ok(events);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Decode an event, or `None` for unknown bytes.
    pub fn decode(event: PeerEvent) -> Option<Command> {
        Command::try_from(event.byte).ok()
    }
}

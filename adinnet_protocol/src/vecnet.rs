//! vecnet: feature-vector streaming over the adinnet socket set.
//!
//! After connecting, the client sends one 9-byte configuration header
//! `(veclen: i32, frame_shift_msec: i32, outprob_flag: u8)`. Each feature
//! vector follows as `(byte_len: i32, payload: f32[veclen])`. A bare `0_i32`
//! ends the segment; a bare `-1_i32` ends the session.

use crate::client::AdinnetPeers;
use crate::wire::{Connection, ProtocolError};
use log::warn;

/// The one-time stream configuration sent ahead of any vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecnetHeader {
    pub veclen: i32,
    pub frame_shift_msec: i32,
    /// Non-zero when the stream carries output probabilities instead of
    /// feature vectors.
    pub outprob: bool,
}

impl VecnetHeader {
    pub const WIRE_LEN: usize = 9;

    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.veclen.to_le_bytes());
        buf[4..8].copy_from_slice(&self.frame_shift_msec.to_le_bytes());
        buf[8] = u8::from(self.outprob);
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::WIRE_LEN]) -> Self {
        VecnetHeader {
            veclen: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            frame_shift_msec: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            outprob: buf[8] != 0,
        }
    }
}

/// Events the vecnet server sees after the header.
#[derive(Debug, Clone, PartialEq)]
pub enum VecnetMessage {
    Vector(Vec<f32>),
    EndOfSegment,
    EndOfSession,
}

impl Connection {
    /// Send the configuration header (client side, once per session).
    pub fn send_vecnet_header(&mut self, header: VecnetHeader) -> Result<(), ProtocolError> {
        self.write_raw(&header.to_bytes())
    }

    /// Send one feature vector frame.
    pub fn send_vector(&mut self, vector: &[f32]) -> Result<(), ProtocolError> {
        let byte_len = (vector.len() * 4) as i32;
        let mut payload = Vec::with_capacity(4 + vector.len() * 4);
        payload.extend_from_slice(&byte_len.to_le_bytes());
        for &v in vector {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.write_raw(&payload)
    }

    /// Send the `0_i32` segment terminator.
    pub fn send_vecnet_end_of_segment(&mut self) -> Result<(), ProtocolError> {
        self.write_raw(&0_i32.to_le_bytes())
    }

    /// Send the `-1_i32` session terminator.
    pub fn send_vecnet_end_of_session(&mut self) -> Result<(), ProtocolError> {
        self.write_raw(&(-1_i32).to_le_bytes())
    }

    /// Read the configuration header (server side, once per session).
    pub fn read_vecnet_header(&mut self) -> Result<VecnetHeader, ProtocolError> {
        let mut buf = [0u8; VecnetHeader::WIRE_LEN];
        self.read_raw(&mut buf)?;
        Ok(VecnetHeader::from_bytes(&buf))
    }

    /// Read the next vector or terminator (server side).
    pub fn read_vecnet_message(&mut self) -> Result<VecnetMessage, ProtocolError> {
        let mut header = [0u8; 4];
        self.read_raw(&mut header)?;
        let byte_len = i32::from_le_bytes(header);
        if byte_len == 0 {
            return Ok(VecnetMessage::EndOfSegment);
        }
        if byte_len < 0 {
            return Ok(VecnetMessage::EndOfSession);
        }
        if byte_len % 4 != 0 {
            return Err(ProtocolError::InvalidPayloadSize(byte_len as u32));
        }
        let mut payload = vec![0u8; byte_len as usize];
        self.read_raw(&mut payload)?;
        let vector = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(VecnetMessage::Vector(vector))
    }
}

impl AdinnetPeers {
    /// Send the vecnet header to every server.
    pub fn broadcast_vecnet_header(&mut self, header: VecnetHeader) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_vecnet_header(header) {
                warn!("❌ failed to send vecnet header to {}: {}", peer.address, e);
            }
        }
    }

    /// Fan one feature vector out to every server.
    pub fn broadcast_vector(&mut self, vector: &[f32]) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_vector(vector) {
                warn!("❌ failed to send vector to {}: {}", peer.address, e);
            }
        }
    }

    pub fn broadcast_vecnet_end_of_segment(&mut self) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_vecnet_end_of_segment() {
                warn!("❌ failed to send segment end to {}: {}", peer.address, e);
            }
        }
    }

    pub fn broadcast_vecnet_end_of_session(&mut self) {
        for peer in self.peers.iter_mut().filter(|p| p.alive) {
            if let Err(e) = peer.connection.send_vecnet_end_of_session() {
                warn!("❌ failed to send session end to {}: {}", peer.address, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn connected_pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server_stream, _) = listener.accept().unwrap();
        let client_stream = client.join().unwrap();
        (
            Connection::new(client_stream).unwrap(),
            Connection::new(server_stream).unwrap(),
        )
    }

    #[test]
    fn header_is_nine_bytes() {
        let header = VecnetHeader {
            veclen: 25,
            frame_shift_msec: 10,
            outprob: false,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(VecnetHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn vector_stream_round_trip() {
        let (mut client, mut server) = connected_pair();
        let header = VecnetHeader {
            veclen: 3,
            frame_shift_msec: 10,
            outprob: false,
        };
        client.send_vecnet_header(header).unwrap();
        client.send_vector(&[1.0, -2.5, 0.125]).unwrap();
        client.send_vecnet_end_of_segment().unwrap();
        client.send_vecnet_end_of_session().unwrap();

        assert_eq!(server.read_vecnet_header().unwrap(), header);
        assert_eq!(
            server.read_vecnet_message().unwrap(),
            VecnetMessage::Vector(vec![1.0, -2.5, 0.125])
        );
        assert_eq!(server.read_vecnet_message().unwrap(), VecnetMessage::EndOfSegment);
        assert_eq!(server.read_vecnet_message().unwrap(), VecnetMessage::EndOfSession);
    }
}

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid payload size: {0}")]
    InvalidPayloadSize(u32),

    #[error("Odd sample payload length: {0} bytes")]
    OddPayload(usize),

    #[error("Invalid command byte: {0}")]
    InvalidCommand(u8),

    #[error("Connection closed by peer")]
    Closed,
}

/// Sanity cap for a single frame: 16 MB is far beyond any real segment chunk.
const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

/// End-of-session marker byte, sent as a one-byte frame.
const EOS_SESSION_BYTE: u8 = 0xFF;

/// Control commands a server sends back to the capture client, as single
/// ASCII bytes outside the frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Pause = b'0',
    Resume = b'1',
    Terminate = b'2',
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'0' => Ok(Command::Pause),
            b'1' => Ok(Command::Resume),
            b'2' => Ok(Command::Terminate),
            other => Err(ProtocolError::InvalidCommand(other)),
        }
    }
}

/// A single data frame on the adinnet stream, client to server.
///
/// Every frame is a 4-byte little-endian length followed by that many bytes.
/// A zero-length frame marks the end of the current speech segment; a
/// one-byte `0xFF` frame marks the end of the whole session.
#[derive(Debug, Clone, PartialEq)]
pub enum AdinMessage {
    /// A run of 16-bit mono samples, in capture order.
    Samples(Vec<i16>),
    /// Segment boundary: the current utterance is complete.
    EndOfSegment,
    /// Session is over; the peer should stop reading.
    EndOfSession,
}

/// Bidirectional connection wrapper used on both ends of adinnet/vecnet.
///
/// Reads and writes go through buffered halves of one `TcpStream`; commands
/// are unbuffered single bytes read straight off the socket so a zero-timeout
/// poll does not sit behind buffered frame data.
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let reader_stream = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(reader_stream),
            writer: BufWriter::new(stream),
        })
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), ProtocolError> {
        self.reader.get_ref().set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Write one length-prefixed frame.
    fn write_frame(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let len = payload.len() as u32;
        self.writer.write_all(&len.to_le_bytes())?;
        if !payload.is_empty() {
            self.writer.write_all(payload)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Send a run of samples as one frame, converting to little-endian at
    /// the wire edge. The caller's buffer is never byte-swapped in place.
    pub fn send_samples(&mut self, samples: &[i16]) -> Result<(), ProtocolError> {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        self.write_frame(&payload)
    }

    /// Send the zero-length end-of-segment frame.
    pub fn send_end_of_segment(&mut self) -> Result<(), ProtocolError> {
        self.write_frame(&[])
    }

    /// Send the one-byte end-of-session frame.
    pub fn send_end_of_session(&mut self) -> Result<(), ProtocolError> {
        self.write_frame(&[EOS_SESSION_BYTE])
    }

    /// Read the next data frame (server side). Blocks until a full frame
    /// arrives or the peer closes the connection.
    pub fn read_message(&mut self) -> Result<AdinMessage, ProtocolError> {
        let mut header = [0u8; 4];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Closed);
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(header);
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::InvalidPayloadSize(len));
        }
        if len == 0 {
            return Ok(AdinMessage::EndOfSegment);
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;

        if payload.len() == 1 && payload[0] == EOS_SESSION_BYTE {
            return Ok(AdinMessage::EndOfSession);
        }
        if payload.len() % 2 != 0 {
            return Err(ProtocolError::OddPayload(payload.len()));
        }
        let samples = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(AdinMessage::Samples(samples))
    }

    /// Write raw bytes and flush. Used by the vecnet layer, whose header is
    /// not length-prefixed.
    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes, mapping a clean EOF to `Closed`.
    pub(crate) fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    /// Send a single command byte (server side).
    pub fn send_command(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.writer.write_all(&[command as u8])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Try to read one inbound byte without blocking (client side).
    ///
    /// Returns `Ok(None)` when no data is waiting. The byte is returned raw
    /// so the caller can count unknown commands rather than fail hard.
    pub fn try_read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        self.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = match self.reader.read(&mut byte) {
            Ok(0) => Err(ProtocolError::Closed),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        };
        self.set_nonblocking(false)?;
        result
    }
}

//! Input drivers behind one pull interface.
//!
//! Each driver turns its device into the same contract: `begin` opens the
//! next input stream, `read` fills a caller buffer or reports end-of-stream,
//! and `pause`/`resume`/`terminate` interrupt a capture in flight. File and
//! stdin drivers are synchronous; the microphone driver runs the platform
//! callback as a producer into a bounded FIFO.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig};
use log::{debug, info, warn};
use std::io::Read;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

use adinnet_protocol::{AdinMessage, Connection};

use crate::audio::fifo::{SampleFifo, SampleProducer};
use crate::audio::{AudioError, Sample};

/// Input source selection, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SourceKind {
    #[strum(serialize = "mic")]
    Mic,
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "stdin")]
    Stdin,
    #[strum(serialize = "adinnet")]
    Adinnet,
}

/// Result of one `read` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// `n` samples were written into the caller buffer.
    Read(usize),
    /// The current input stream ended normally.
    Eof,
    /// Nothing available right now (threaded drivers only).
    WouldBlock,
    /// Terminated on user or peer request.
    Terminated,
}

/// Uniform pull interface over all input devices.
///
/// Consumed on the main thread; threaded drivers hide their producer behind
/// the FIFO and stay single-consumer here.
pub trait AudioSource {
    /// Open the next input stream. Returns false when no further stream
    /// exists (e.g. the file list is exhausted).
    fn begin(&mut self) -> Result<bool, AudioError>;

    /// Pull up to `buf.len()` samples.
    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError>;

    /// Stop delivering samples but keep the device open.
    fn pause(&mut self);

    /// Resume after `pause`.
    fn resume(&mut self);

    /// Abandon the stream; a blocked `read` should return soon after.
    fn terminate(&mut self);

    /// Close the current input stream.
    fn end(&mut self);

    /// Human-readable name of the current stream, if any.
    fn current_name(&self) -> Option<String>;

    /// Whether the driver runs a producer thread (affects FIFO compaction).
    fn is_threaded(&self) -> bool {
        false
    }

    /// Threaded drivers report backlog pressure here.
    fn rehash_needed(&self) -> bool {
        false
    }
}

/* ------------------------------------------------------------------ */
/* file                                                                */
/* ------------------------------------------------------------------ */

/// Reads WAV or headerless raw PCM files, one stream per file.
pub struct FileSource {
    paths: Vec<PathBuf>,
    next: usize,
    sample_rate: u32,
    current: Option<FileStream>,
}

struct FileStream {
    name: String,
    samples: Vec<Sample>,
    pos: usize,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>, sample_rate: u32) -> Self {
        FileSource {
            paths,
            next: 0,
            sample_rate,
            current: None,
        }
    }

    fn load(&self, path: &PathBuf) -> Result<Vec<Sample>, AudioError> {
        let is_wav = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            crate::audio::wav::read_mono(path, self.sample_rate)
        } else {
            // headerless little-endian 16-bit
            let bytes = std::fs::read(path)?;
            Ok(bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect())
        }
    }
}

impl AudioSource for FileSource {
    fn begin(&mut self) -> Result<bool, AudioError> {
        if self.next >= self.paths.len() {
            return Ok(false);
        }
        let path = self.paths[self.next].clone();
        self.next += 1;
        let samples = self.load(&path)?;
        info!("input file: {} ({} samples)", path.display(), samples.len());
        self.current = Some(FileStream {
            name: path.display().to_string(),
            samples,
            pos: 0,
        });
        Ok(true)
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        let stream = match self.current.as_mut() {
            Some(s) => s,
            None => return Ok(SourceStatus::Eof),
        };
        if stream.pos >= stream.samples.len() {
            return Ok(SourceStatus::Eof);
        }
        let n = buf.len().min(stream.samples.len() - stream.pos);
        buf[..n].copy_from_slice(&stream.samples[stream.pos..stream.pos + n]);
        stream.pos += n;
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn terminate(&mut self) {
        self.current = None;
        self.next = self.paths.len();
    }

    fn end(&mut self) {
        self.current = None;
    }

    fn current_name(&self) -> Option<String> {
        self.current.as_ref().map(|s| s.name.clone())
    }
}

/* ------------------------------------------------------------------ */
/* stdin                                                               */
/* ------------------------------------------------------------------ */

/// Raw little-endian 16-bit samples on standard input, one stream total.
pub struct StdinSource {
    opened: bool,
    done: bool,
    carry: Option<u8>,
}

impl StdinSource {
    pub fn new() -> Self {
        StdinSource {
            opened: false,
            done: false,
            carry: None,
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for StdinSource {
    fn begin(&mut self) -> Result<bool, AudioError> {
        if self.opened {
            return Ok(false);
        }
        self.opened = true;
        Ok(true)
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        if self.done {
            return Ok(SourceStatus::Eof);
        }
        let mut bytes = vec![0u8; buf.len() * 2];
        let mut filled = 0usize;
        if let Some(b) = self.carry.take() {
            bytes[0] = b;
            filled = 1;
        }
        let stdin = std::io::stdin();
        let mut handle = stdin.lock();
        loop {
            match handle.read(&mut bytes[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => {
                    filled += n;
                    if filled >= 2 {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(SourceStatus::Eof);
        }
        if filled % 2 != 0 {
            self.carry = Some(bytes[filled - 1]);
            filled -= 1;
        }
        let n = filled / 2;
        for (i, b) in bytes[..filled].chunks_exact(2).enumerate() {
            buf[i] = i16::from_le_bytes([b[0], b[1]]);
        }
        if n == 0 {
            return Ok(SourceStatus::Eof);
        }
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn terminate(&mut self) {
        self.done = true;
    }
    fn end(&mut self) {}

    fn current_name(&self) -> Option<String> {
        Some("stdin".to_string())
    }
}

/* ------------------------------------------------------------------ */
/* adinnet server (inbound)                                            */
/* ------------------------------------------------------------------ */

/// Accepts one adinnet client on a listening port and serves its sample
/// frames as the input stream. A zero-length frame from the client ends the
/// current stream (segment); the session marker terminates input for good.
pub struct AdinnetSource {
    port: u16,
    listener: Option<TcpListener>,
    connection: Option<Connection>,
    peer: Option<String>,
    /// Samples received but not yet handed to the caller.
    pending: Vec<Sample>,
    session_over: bool,
    terminated: Arc<AtomicBool>,
}

impl AdinnetSource {
    pub fn new(port: u16) -> Self {
        AdinnetSource {
            port,
            listener: None,
            connection: None,
            peer: None,
            pending: Vec::new(),
            session_over: false,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    fn accept(&mut self) -> Result<(), AudioError> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(("0.0.0.0", self.port))?;
            info!("🎵 adinnet: listening on port {}", self.port);
            self.listener = Some(listener);
        }
        let (stream, addr) = match &self.listener {
            Some(listener) => listener.accept()?,
            None => return Err(AudioError::Device("listener missing".to_string())),
        };
        stream.set_nodelay(true).ok();
        info!("🔌 adinnet: client connected from {}", addr);
        self.peer = Some(addr.to_string());
        self.connection = Some(Connection::new(stream)?);
        Ok(())
    }
}

impl AudioSource for AdinnetSource {
    fn begin(&mut self) -> Result<bool, AudioError> {
        if self.session_over || self.terminated.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.connection.is_none() {
            self.accept()?;
        }
        Ok(true)
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(SourceStatus::Terminated);
        }
        if self.pending.is_empty() {
            let connection = match self.connection.as_mut() {
                Some(c) => c,
                None => return Ok(SourceStatus::Eof),
            };
            match connection.read_message() {
                Ok(AdinMessage::Samples(samples)) => {
                    self.pending = samples;
                }
                Ok(AdinMessage::EndOfSegment) => {
                    debug!("adinnet: end of segment from client");
                    return Ok(SourceStatus::Eof);
                }
                Ok(AdinMessage::EndOfSession) => {
                    info!("🔌 adinnet: end of session from client");
                    self.session_over = true;
                    self.connection = None;
                    return Ok(SourceStatus::Terminated);
                }
                Err(e) => {
                    warn!("❌ adinnet: connection lost: {}", e);
                    self.session_over = true;
                    self.connection = None;
                    return Ok(SourceStatus::Terminated);
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn end(&mut self) {
        self.pending.clear();
    }

    fn current_name(&self) -> Option<String> {
        self.peer.clone()
    }
}

/* ------------------------------------------------------------------ */
/* microphone                                                          */
/* ------------------------------------------------------------------ */

/// Microphone capture. The platform stream callback converts whatever the
/// device produces to mono i16 and pushes into the bounded FIFO; `read`
/// drains the consumer side.
pub struct MicSource {
    device_name: Option<String>,
    sample_rate: u32,
    chunk_size: usize,
    fifo: SampleFifo,
    stream: Option<Stream>,
    paused: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    name: Option<String>,
    /// Leftover samples from a popped chunk larger than the caller buffer.
    carry: Vec<Sample>,
}

/// Capture FIFO sized at ~10 s with a 1 s compaction watermark.
const MIC_FIFO_SECONDS: usize = 10;

impl MicSource {
    pub fn new(device_name: Option<String>, sample_rate: u32, chunk_size: usize) -> Self {
        let capacity = sample_rate as usize * MIC_FIFO_SECONDS;
        MicSource {
            device_name,
            sample_rate,
            chunk_size,
            fifo: SampleFifo::new(capacity, sample_rate as usize, chunk_size),
            stream: None,
            paused: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
            name: None,
            carry: Vec::new(),
        }
    }

    fn pick_device(&self) -> Result<Device, AudioError> {
        let host = cpal::default_host();
        if let Some(wanted) = &self.device_name {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::Device(format!("failed to enumerate input devices: {}", e)))?;
            for device in devices {
                let name = device
                    .name()
                    .map_err(|e| AudioError::Device(format!("failed to get device name: {}", e)))?;
                if name.contains(wanted) {
                    info!("found matching device: {}", name);
                    return Ok(device);
                }
            }
            Err(AudioError::Device(format!("device '{}' not found", wanted)))
        } else {
            host.default_input_device().ok_or(AudioError::NoDevice)
        }
    }

    fn pick_config(&self, device: &Device) -> Result<SupportedStreamConfig, AudioError> {
        let configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| AudioError::Device(format!("failed to get supported configs: {}", e)))?
            .collect();

        // exact mono match at the requested rate first
        for range in &configs {
            if range.channels() == 1
                && range.min_sample_rate().0 <= self.sample_rate
                && range.max_sample_rate().0 >= self.sample_rate
            {
                return Ok(range.with_sample_rate(cpal::SampleRate(self.sample_rate)));
            }
        }
        // any channel count at the requested rate; channel 0 is extracted
        for range in &configs {
            if range.min_sample_rate().0 <= self.sample_rate
                && range.max_sample_rate().0 >= self.sample_rate
            {
                let config = range.with_sample_rate(cpal::SampleRate(self.sample_rate));
                info!(
                    "no mono config at {} Hz, taking {} channels and extracting channel 0",
                    self.sample_rate,
                    config.channels()
                );
                return Ok(config);
            }
        }
        Err(AudioError::Device(format!(
            "no input configuration supports {} Hz",
            self.sample_rate
        )))
    }

    fn build_stream(
        &self,
        device: &Device,
        config: &SupportedStreamConfig,
        producer: SampleProducer,
    ) -> Result<Stream, AudioError> {
        let stream_config = config.config();
        let channels = stream_config.channels as usize;
        let err_fn = |err| log::error!("audio stream error: {}", err);

        let stream = match config.sample_format() {
            SampleFormat::I16 => {
                let paused = Arc::clone(&self.paused);
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            if paused.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono: Vec<i16> = data.iter().step_by(channels).copied().collect();
                            producer.push(mono);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| {
                        AudioError::Device(format!("failed to build i16 input stream: {}", e))
                    })?
            }
            SampleFormat::F32 => {
                let paused = Arc::clone(&self.paused);
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if paused.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono: Vec<i16> = data
                                .iter()
                                .step_by(channels)
                                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                                .collect();
                            producer.push(mono);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| {
                        AudioError::Device(format!("failed to build f32 input stream: {}", e))
                    })?
            }
            SampleFormat::U16 => {
                let paused = Arc::clone(&self.paused);
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[u16], _: &cpal::InputCallbackInfo| {
                            if paused.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono: Vec<i16> = data
                                .iter()
                                .step_by(channels)
                                .map(|&s| (s as i32 - 32768) as i16)
                                .collect();
                            producer.push(mono);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| {
                        AudioError::Device(format!("failed to build u16 input stream: {}", e))
                    })?
            }
            other => {
                return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
            }
        };
        Ok(stream)
    }
}

impl AudioSource for MicSource {
    fn begin(&mut self) -> Result<bool, AudioError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.stream.is_some() {
            // microphone is a single endless stream
            return Ok(true);
        }
        let device = self.pick_device()?;
        let name = device
            .name()
            .map_err(|e| AudioError::Device(format!("failed to get device name: {}", e)))?;
        info!("🎤 using input device: {}", name);
        let config = self.pick_config(&device)?;
        let producer = self.fifo.producer();
        let stream = self.build_stream(&device, &config, producer)?;
        stream
            .play()
            .map_err(|e| AudioError::Device(format!("failed to start audio stream: {}", e)))?;
        self.name = Some(name);
        self.stream = Some(stream);
        Ok(true)
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(SourceStatus::Terminated);
        }
        if self.carry.is_empty() {
            match self.fifo.pop(Duration::from_millis(100)) {
                Some(chunk) => self.carry = chunk,
                None => return Ok(SourceStatus::WouldBlock),
            }
        }
        let n = buf.len().min(self.carry.len());
        buf[..n].copy_from_slice(&self.carry[..n]);
        self.carry.drain(..n);
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn end(&mut self) {
        // stream keeps running; segments are cut by the segmenter
    }

    fn current_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn is_threaded(&self) -> bool {
        true
    }

    fn rehash_needed(&self) -> bool {
        self.fifo.rehash()
    }
}

/* ------------------------------------------------------------------ */
/* helpers for tests and offline use                                   */
/* ------------------------------------------------------------------ */

/// An in-memory source, used by tests and by offline decoding helpers.
pub struct MemorySource {
    streams: Vec<Vec<Sample>>,
    next: usize,
    pos: usize,
    active: bool,
    terminated: bool,
}

impl MemorySource {
    pub fn new(streams: Vec<Vec<Sample>>) -> Self {
        MemorySource {
            streams,
            next: 0,
            pos: 0,
            active: false,
            terminated: false,
        }
    }
}

impl AudioSource for MemorySource {
    fn begin(&mut self) -> Result<bool, AudioError> {
        if self.terminated || self.next >= self.streams.len() {
            return Ok(false);
        }
        self.pos = 0;
        self.active = true;
        Ok(true)
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        if self.terminated {
            return Ok(SourceStatus::Terminated);
        }
        if !self.active {
            return Ok(SourceStatus::Eof);
        }
        let stream = &self.streams[self.next];
        if self.pos >= stream.len() {
            return Ok(SourceStatus::Eof);
        }
        let n = buf.len().min(stream.len() - self.pos);
        buf[..n].copy_from_slice(&stream[self.pos..self.pos + n]);
        self.pos += n;
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn terminate(&mut self) {
        self.terminated = true;
    }

    fn end(&mut self) {
        if self.active {
            self.active = false;
            self.next += 1;
        }
    }

    fn current_name(&self) -> Option<String> {
        Some(format!("memory:{}", self.next))
    }
}

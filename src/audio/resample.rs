//! 48 kHz to 16 kHz down-sampling for the `--down48` input path.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::source::{AudioSource, SourceStatus};
use crate::audio::{AudioError, Sample};

const CHUNK_SIZE: usize = 1024;

/// Streaming mono down-sampler. Input samples accumulate until a full
/// resampler chunk is available; call `flush` at end of stream to drain the
/// zero-padded tail.
pub struct Downsampler {
    resampler: SincFixedIn<f32>,
    pending: Vec<f32>,
}

impl Downsampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, AudioError> {
        let ratio = output_rate as f64 / input_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 32,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, 1)
            .map_err(|e| AudioError::Resample(format!("failed to create resampler: {}", e)))?;
        Ok(Downsampler {
            resampler,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Standard 48 kHz microphone to 16 kHz model-rate conversion.
    pub fn for_48k_to_16k() -> Result<Self, AudioError> {
        Self::new(48000, 16000)
    }

    /// Feed input samples; returns whatever output is ready.
    pub fn feed(&mut self, input: &[Sample]) -> Result<Vec<Sample>, AudioError> {
        self.pending.extend(input.iter().map(|&s| s as f32 / 32768.0));

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            let out = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resample(format!("resampling error: {}", e)))?;
            append_as_i16(&mut output, &out[0]);
        }
        Ok(output)
    }

    /// Drain the remaining partial chunk by zero padding.
    pub fn flush(&mut self) -> Result<Vec<Sample>, AudioError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let mut chunk: Vec<f32> = self.pending.drain(..).collect();
        let valid = chunk.len();
        chunk.resize(CHUNK_SIZE, 0.0);
        let out = self
            .resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Resample(format!("resampling error: {}", e)))?;
        // keep only output corresponding to real input
        let keep = (out[0].len() * valid + CHUNK_SIZE - 1) / CHUNK_SIZE;
        let mut output = Vec::new();
        append_as_i16(&mut output, &out[0][..keep.min(out[0].len())]);
        Ok(output)
    }
}

/// Adapter that captures at 48 kHz and hands the segmenter down-sampled
/// audio at the model rate.
pub struct Down48Source {
    inner: Box<dyn AudioSource>,
    downsampler: Downsampler,
    pending: Vec<Sample>,
    read_buf: Vec<Sample>,
}

impl Down48Source {
    pub fn new(inner: Box<dyn AudioSource>, target_rate: u32) -> Result<Self, AudioError> {
        Ok(Down48Source {
            inner,
            downsampler: Downsampler::new(48000, target_rate)?,
            pending: Vec::new(),
            read_buf: vec![0; 4800],
        })
    }
}

impl AudioSource for Down48Source {
    fn begin(&mut self) -> Result<bool, AudioError> {
        self.pending.clear();
        self.inner.begin()
    }

    fn read(&mut self, buf: &mut [Sample]) -> Result<SourceStatus, AudioError> {
        while self.pending.is_empty() {
            match self.inner.read(&mut self.read_buf)? {
                SourceStatus::Read(n) => {
                    self.pending = self.downsampler.feed(&self.read_buf[..n])?;
                }
                SourceStatus::Eof => {
                    self.pending = self.downsampler.flush()?;
                    if self.pending.is_empty() {
                        return Ok(SourceStatus::Eof);
                    }
                }
                other => return Ok(other),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(SourceStatus::Read(n))
    }

    fn pause(&mut self) {
        self.inner.pause()
    }

    fn resume(&mut self) {
        self.inner.resume()
    }

    fn terminate(&mut self) {
        self.inner.terminate()
    }

    fn end(&mut self) {
        self.inner.end()
    }

    fn current_name(&self) -> Option<String> {
        self.inner.current_name()
    }

    fn is_threaded(&self) -> bool {
        self.inner.is_threaded()
    }

    fn rehash_needed(&self) -> bool {
        self.inner.rehash_needed()
    }
}

fn append_as_i16(output: &mut Vec<Sample>, samples: &[f32]) {
    output.reserve(samples.len());
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        output.push((clamped * 32767.0) as i16);
    }
}

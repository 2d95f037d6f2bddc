//! WAV read/write helpers. All audio in this crate is 16-bit mono PCM;
//! readers reject anything else rather than converting silently.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::audio::{AudioError, Sample};

pub fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Read a whole WAV file, checking it is 16-bit mono at the expected rate.
pub fn read_mono(path: &Path, expect_rate: u32) -> Result<Vec<Sample>, AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(AudioError::UnsupportedFormat(format!(
            "{}: expected 16-bit mono PCM, got {}-bit {} ch",
            path.display(),
            spec.bits_per_sample,
            spec.channels
        )));
    }
    if spec.sample_rate != expect_rate {
        return Err(AudioError::UnsupportedFormat(format!(
            "{}: sample rate {} does not match configured {}",
            path.display(),
            spec.sample_rate,
            expect_rate
        )));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(samples)
}

/// Open a WAV writer for segment output.
pub fn open_writer(path: &Path, sample_rate: u32) -> Result<WavWriter<BufWriter<File>>, AudioError> {
    Ok(WavWriter::create(path, mono_spec(sample_rate))?)
}

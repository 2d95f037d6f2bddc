//! Audio capture and speech detection.
//!
//! The capture path is: an [`source::AudioSource`] driver produces raw 16-bit
//! mono samples; [`preprocess::Preprocessor`] applies optional zero-strip,
//! DC removal, scaling and 48 kHz decimation; [`segmenter::Segmenter`] runs
//! the [`zerocross::ZeroCross`] detector over the stream and emits speech
//! segments with head and tail margins to a sink callback.

pub mod fifo;
pub mod preprocess;
pub mod resample;
pub mod segmenter;
pub mod source;
pub mod wav;
pub mod zerocross;

use thiserror::Error;

/// One 16-bit mono PCM sample.
pub type Sample = i16;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("No input device available")]
    NoDevice,

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Resampler error: {0}")]
    Resample(String),

    #[error("Input terminated by user")]
    Terminated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] adinnet_protocol::ProtocolError),
}

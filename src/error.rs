use crate::audio::AudioError;
use crate::decoder::DecodeError;
use crate::jconf::JconfError;
use adinnet_protocol::ProtocolError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LvcsrError>;

#[derive(Error, Debug)]
pub enum LvcsrError {
    #[error("Audio error: {0}")]
    Audio(AudioError),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("Decode error: {0}")]
    Decode(DecodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Jconf error: {0}")]
    Jconf(JconfError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

// Keep the submodule errors as plain conversions so `?` works across the
// component boundaries without wrapping at every call site.
impl From<AudioError> for LvcsrError {
    fn from(err: AudioError) -> Self {
        LvcsrError::Audio(err)
    }
}

impl From<ProtocolError> for LvcsrError {
    fn from(err: ProtocolError) -> Self {
        LvcsrError::Protocol(err)
    }
}

impl From<DecodeError> for LvcsrError {
    fn from(err: DecodeError) -> Self {
        LvcsrError::Decode(err)
    }
}

impl From<JconfError> for LvcsrError {
    fn from(err: JconfError) -> Self {
        LvcsrError::Jconf(err)
    }
}

//! Speech capture, segmentation and transport, plus a two-pass
//! large-vocabulary recognition search.
//!
//! The `audio` and `output` modules form the capture side: pull audio from a
//! microphone, file, socket or stdin, detect speech segments by level and
//! zero-cross rate, and deliver each segment to files, stdout, or adinnet /
//! vecnet servers with a cooperative pause/resume control protocol. The
//! `decoder` module is the recognition side: a shared-prefix tree lexicon, a
//! frame-synchronous beam search writing a word trellis, and a backward
//! best-first stack decoder with word-graph output.

pub mod audio;
pub mod cli;
pub mod decoder;
pub mod error;
pub mod jconf;
pub mod output;
pub mod session;

// Re-export key types for convenience
pub use error::{LvcsrError, Result};

//! File sink: one WAV or raw PCM file per segment.

use hound::WavWriter;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::audio::segmenter::SegmentHandler;
use crate::audio::{wav, AudioError, Sample};
use crate::output::SegmentSink;

enum Writer {
    Raw(BufWriter<File>),
    Wav(WavWriter<BufWriter<File>>),
}

pub struct FileSink {
    base: PathBuf,
    use_raw: bool,
    /// Number successive segments as `<base>.NNNN.<ext>`; off means a
    /// single output file.
    continuous: bool,
    sample_rate: u32,
    /// Current file numbering value.
    sid: u32,
    writer: Option<Writer>,
    current_path: Option<PathBuf>,
    segment_samples: u64,
    segment_start: u64,
}

impl FileSink {
    pub fn new(
        base: PathBuf,
        use_raw: bool,
        continuous: bool,
        sample_rate: u32,
        start_id: u32,
    ) -> Self {
        FileSink {
            base,
            use_raw,
            continuous,
            sample_rate,
            sid: start_id,
            writer: None,
            current_path: None,
            segment_samples: 0,
            segment_start: 0,
        }
    }

    /// Current numbering value (next segment's id in continuous mode).
    pub fn current_id(&self) -> u32 {
        self.sid
    }

    fn next_path(&self) -> PathBuf {
        let ext = if self.use_raw { "raw" } else { "wav" };
        if self.continuous {
            PathBuf::from(format!("{}.{:04}.{}", self.base.display(), self.sid, ext))
        } else if self.use_raw {
            self.base.clone()
        } else if self.base.extension().map(|e| e.eq_ignore_ascii_case("wav")).unwrap_or(false) {
            self.base.clone()
        } else {
            PathBuf::from(format!("{}.wav", self.base.display()))
        }
    }

    fn open(&mut self, path: &Path) -> Result<(), AudioError> {
        if path.exists() {
            info!("[{}] (override)", path.display());
        } else {
            info!("[{}]", path.display());
        }
        let writer = if self.use_raw {
            Writer::Raw(BufWriter::new(File::create(path)?))
        } else {
            Writer::Wav(wav::open_writer(path, self.sample_rate)?)
        };
        self.writer = Some(writer);
        self.current_path = Some(path.to_path_buf());
        Ok(())
    }
}

impl SegmentHandler for FileSink {
    fn on_segment_start(&mut self, start_sample: u64) -> Result<(), AudioError> {
        let path = self.next_path();
        self.open(&path)?;
        self.segment_samples = 0;
        self.segment_start = start_sample;
        Ok(())
    }

    fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
        match self.writer.as_mut() {
            Some(Writer::Raw(w)) => {
                for &s in samples {
                    w.write_all(&s.to_le_bytes())?;
                }
            }
            Some(Writer::Wav(w)) => {
                for &s in samples {
                    w.write_sample(s)?;
                }
            }
            None => {
                warn!("samples delivered with no open output file");
            }
        }
        self.segment_samples += samples.len() as u64;
        Ok(())
    }

    fn on_segment_end(&mut self) -> Result<(), AudioError> {
        match self.writer.take() {
            Some(Writer::Raw(mut w)) => w.flush()?,
            Some(Writer::Wav(w)) => w.finalize()?,
            None => return Ok(()),
        }
        let fs = self.sample_rate as f64;
        let end = self.segment_start + self.segment_samples;
        if let Some(path) = &self.current_path {
            info!(
                "{}: {} samples ({:.2} sec.) [{:6} ({:5.2}s) - {:6} ({:5.2}s)]",
                path.display(),
                self.segment_samples,
                self.segment_samples as f64 / fs,
                self.segment_start,
                self.segment_start as f64 / fs,
                end,
                end as f64 / fs,
            );
        }
        if self.continuous && self.segment_samples > 0 {
            self.sid += 1;
        }
        Ok(())
    }
}

impl SegmentSink for FileSink {
    fn open_session(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AudioError> {
        // close a file left open by an interrupted segment
        self.on_segment_end()
    }

    fn describe(&self) -> String {
        let ext = if self.use_raw { "raw" } else { "wav" };
        if self.continuous {
            format!(
                "file ({}.{:04}.{}, {}.{:04}.{}, ...)",
                self.base.display(),
                self.sid,
                ext,
                self.base.display(),
                self.sid + 1,
                ext
            )
        } else {
            format!("file ({})", self.next_path().display())
        }
    }
}

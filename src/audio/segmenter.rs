//! Speech segmentation over a pulled sample stream.
//!
//! The segmenter drives one input stream: it pulls fixed-size chunks from an
//! [`AudioSource`], feeds them through the [`ZeroCross`] detector, and cuts
//! speech segments with a head margin recovered from the detector's cycle
//! buffer and a tail margin of trailing silence. Each `run` call processes
//! input until one segment completes, the stream ends, or a control
//! command stops it, mirroring the cooperative loop the capture tool is
//! built on.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::preprocess::Preprocessor;
use crate::audio::source::{AudioSource, SourceStatus};
use crate::audio::zerocross::ZeroCross;
use crate::audio::{AudioError, Sample};

/// What the control channel wants the capture loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    /// Finish the current segment, then the caller should wait for resume.
    StopAfterSegment,
    /// Stop immediately, discarding any segment in progress.
    StopNow,
    /// Unrecoverable control-channel failure.
    Fatal,
}

/// Why a `run` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdinStatus {
    /// Stopped by a remote terminate/pause command.
    Terminated,
    /// Device or sink callback error; the current utterance is abandoned.
    Error,
    /// The input stream ended.
    EndOfStream,
    /// A segment completed; more input may follow on the same stream.
    Segmented,
}

/// Receives segmented speech and answers control polls. The first
/// `on_samples` after `on_segment_start` begins with the head margin;
/// delivery is in capture order and byte-exact.
pub trait SegmentHandler {
    fn on_segment_start(&mut self, start_sample: u64) -> Result<(), AudioError>;
    fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError>;
    fn on_segment_end(&mut self) -> Result<(), AudioError>;

    /// Polled between chunks for remote commands. Handlers without a
    /// control channel keep the default.
    fn poll_control(&mut self) -> ControlFlow {
        ControlFlow::Continue
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    /// Amplitude threshold (0..32767) for arming the zero-cross detector.
    pub level_thres: i32,
    /// Zero crossings per second needed to trigger.
    pub zc_thres: u32,
    pub head_margin_msec: u32,
    pub tail_margin_msec: u32,
    /// Samples pulled and evaluated per step.
    pub chunk_size: usize,
    /// Static DC offset added before detection.
    pub offset: i32,
    /// When false, the whole stream is forwarded as one segment.
    pub silence_cut: bool,
    /// Keep this much audio for re-trigger backoff after a pause (0 = off).
    pub rewind_msec: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            sample_rate: 16000,
            level_thres: 2000,
            zc_thres: 60,
            head_margin_msec: 300,
            tail_margin_msec: 400,
            chunk_size: 1000,
            offset: 0,
            silence_cut: true,
            rewind_msec: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Silence,
    Speech,
    TailSilence,
}

pub struct Segmenter {
    config: SegmenterConfig,
    zc: ZeroCross,
    state: State,
    /// Effective zero-cross count threshold over the cycle-buffer window.
    zc_window_thres: usize,
    /// Absolute sample position of the next sample to be read.
    total_in: u64,
    /// Samples delivered for the current segment.
    speechlen: u64,
    /// Start position of the current segment (head margin included).
    segment_start: u64,
    /// Silence length accumulated in the tail state, in samples.
    tail_silence: u64,
    /// Set when a resume just happened and buffered audio may be stale.
    after_resume: bool,
    stop_after_segment: bool,
    /// External terminate request, observed between chunks.
    terminate: Option<Arc<AtomicBool>>,
    read_buf: Vec<Sample>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let window = Self::window_samples(&config);
        let zc = ZeroCross::new(config.level_thres, window, config.offset);
        let zc_window_thres = Self::scaled_zc_thres(&config, window);
        Segmenter {
            config,
            zc,
            state: State::Silence,
            zc_window_thres,
            total_in: 0,
            speechlen: 0,
            segment_start: 0,
            tail_silence: 0,
            after_resume: false,
            stop_after_segment: false,
            terminate: None,
            read_buf: Vec::new(),
        }
    }

    /// Observe an external terminate flag (e.g. a signal handler) between
    /// chunks, abandoning the segment in progress when it turns on.
    pub fn set_terminate_flag(&mut self, flag: Arc<AtomicBool>) {
        self.terminate = Some(flag);
    }

    /// The cycle buffer covers the head margin, extended to the rewind
    /// window when re-trigger backoff is enabled.
    fn window_samples(config: &SegmenterConfig) -> usize {
        let head = (config.head_margin_msec as u64 * config.sample_rate as u64 / 1000) as usize;
        let rewind = (config.rewind_msec as u64 * config.sample_rate as u64 / 1000) as usize;
        head.max(rewind).max(1)
    }

    /// Zero-cross threshold is configured per second; scale it down to the
    /// cycle-buffer window the count actually covers.
    fn scaled_zc_thres(config: &SegmenterConfig, window: usize) -> usize {
        let per_window =
            config.zc_thres as u64 * window as u64 / config.sample_rate as u64;
        per_window.max(1) as usize
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Total samples consumed from the source so far.
    pub fn total_samples(&self) -> u64 {
        self.total_in
    }

    /// Samples delivered for the segment in progress (or just finished).
    pub fn speech_len(&self) -> u64 {
        self.speechlen
    }

    /// Segment start in absolute sample position.
    pub fn segment_start(&self) -> u64 {
        self.segment_start
    }

    /// Reset per-stream state; the detector window is re-armed.
    pub fn reset(&mut self) {
        let window = Self::window_samples(&self.config);
        self.zc.reset(self.config.level_thres, window, self.config.offset);
        self.state = State::Silence;
        self.total_in = 0;
        self.speechlen = 0;
        self.segment_start = 0;
        self.tail_silence = 0;
        self.after_resume = false;
        self.stop_after_segment = false;
    }

    /// Tell the segmenter a resume just happened, so buffered input may be
    /// stale or subject to rewind trimming.
    pub fn notify_resume(&mut self) {
        self.after_resume = true;
    }

    /// Process input until one segment completes or the stream stops.
    pub fn run<H: SegmentHandler + ?Sized>(
        &mut self,
        source: &mut dyn AudioSource,
        preprocessor: &mut Preprocessor,
        handler: &mut H,
    ) -> AdinStatus {
        self.speechlen = 0;
        self.stop_after_segment = false;
        let tail_margin_samples =
            self.config.tail_margin_msec as u64 * self.config.sample_rate as u64 / 1000;

        loop {
            if let Some(flag) = &self.terminate {
                if flag.load(Ordering::SeqCst) {
                    self.discard_current();
                    return AdinStatus::Terminated;
                }
            }
            match handler.poll_control() {
                ControlFlow::Continue => {}
                ControlFlow::StopAfterSegment => {
                    if self.state == State::Silence {
                        // nothing in flight; pause right away
                        return AdinStatus::Terminated;
                    }
                    self.stop_after_segment = true;
                }
                ControlFlow::StopNow => {
                    self.discard_current();
                    return AdinStatus::Terminated;
                }
                ControlFlow::Fatal => {
                    self.discard_current();
                    return AdinStatus::Error;
                }
            }

            if source.is_threaded() && source.rehash_needed() {
                warn!("⚠️ input backlog near capacity, capture may drop soon");
            }

            self.read_buf.resize(self.config.chunk_size, 0);
            let mut chunk = match source.read(&mut self.read_buf) {
                Ok(SourceStatus::Read(n)) => self.read_buf[..n].to_vec(),
                Ok(SourceStatus::WouldBlock) => continue,
                Ok(SourceStatus::Eof) => {
                    return self.finish_stream(handler);
                }
                Ok(SourceStatus::Terminated) => {
                    self.discard_current();
                    return AdinStatus::Terminated;
                }
                Err(e) => {
                    warn!("device read error: {}", e);
                    self.discard_current();
                    return AdinStatus::Error;
                }
            };

            preprocessor.process(&mut chunk);
            if chunk.is_empty() {
                continue;
            }

            if !self.config.silence_cut {
                // single-segment mode: forward everything
                if self.state == State::Silence {
                    self.state = State::Speech;
                    self.segment_start = self.total_in;
                    if let Err(e) = handler.on_segment_start(self.segment_start) {
                        warn!("segment start callback failed: {}", e);
                        return AdinStatus::Error;
                    }
                }
                self.total_in += chunk.len() as u64;
                if self.deliver(handler, &chunk).is_err() {
                    return AdinStatus::Error;
                }
                continue;
            }

            let (zc_count, level) = self.zc.push(&chunk);
            self.total_in += chunk.len() as u64;

            match self.state {
                State::Silence => {
                    if zc_count >= self.zc_window_thres {
                        if self.after_resume && level < self.config.level_thres {
                            // old speech kept across the pause, not spoken now
                            info!(
                                "🗑️ discarding {} stale buffered samples",
                                self.zc.valid_len()
                            );
                            let window = Self::window_samples(&self.config);
                            self.zc.reset(
                                self.config.level_thres,
                                window,
                                self.config.offset,
                            );
                            continue;
                        }
                        if self.trigger_up(handler).is_err() {
                            return AdinStatus::Error;
                        }
                    }
                }
                State::Speech => {
                    if self.deliver(handler, &chunk).is_err() {
                        return AdinStatus::Error;
                    }
                    if zc_count < self.zc_window_thres {
                        self.state = State::TailSilence;
                        self.tail_silence = chunk.len() as u64;
                    }
                }
                State::TailSilence => {
                    if self.deliver(handler, &chunk).is_err() {
                        return AdinStatus::Error;
                    }
                    if zc_count >= self.zc_window_thres {
                        // speech resumed inside the tail margin
                        self.state = State::Speech;
                        self.tail_silence = 0;
                    } else {
                        self.tail_silence += chunk.len() as u64;
                        if self.tail_silence >= tail_margin_samples {
                            if self.finish_segment(handler).is_err() {
                                return AdinStatus::Error;
                            }
                            return AdinStatus::Segmented;
                        }
                    }
                }
            }
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_after_segment
    }

    fn trigger_up<H: SegmentHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), AudioError> {
        let mut head = Vec::new();
        self.zc.copy_buffer(&mut head);

        // rewind trimming: buffered audio from before a pause is cut back
        // to the last rewind window
        if self.after_resume && self.config.rewind_msec > 0 {
            let w = (self.config.rewind_msec as u64 * self.config.sample_rate as u64 / 1000)
                as usize;
            if head.len() > w {
                info!("buffered samples={}, will process from {}", head.len(), head.len() - w);
                head.drain(..head.len() - w);
            }
        }
        self.after_resume = false;

        self.segment_start = self.total_in - head.len() as u64;
        debug!(
            "trigger up at sample {} (head margin {} samples)",
            self.total_in,
            head.len()
        );
        self.state = State::Speech;
        self.tail_silence = 0;
        handler.on_segment_start(self.segment_start)?;
        self.deliver(handler, &head)
    }

    fn deliver<H: SegmentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        samples: &[Sample],
    ) -> Result<(), AudioError> {
        handler.on_samples(samples)?;
        self.speechlen += samples.len() as u64;
        Ok(())
    }

    fn finish_segment<H: SegmentHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), AudioError> {
        debug!(
            "trigger down at sample {} ({} samples in segment)",
            self.total_in, self.speechlen
        );
        self.state = State::Silence;
        // the ring must not re-deliver tail audio as the next head margin
        let window = Self::window_samples(&self.config);
        self.zc.reset(self.config.level_thres, window, self.config.offset);
        handler.on_segment_end()
    }

    fn finish_stream<H: SegmentHandler + ?Sized>(&mut self, handler: &mut H) -> AdinStatus {
        if self.state != State::Silence {
            if self.finish_segment(handler).is_err() {
                return AdinStatus::Error;
            }
        }
        AdinStatus::EndOfStream
    }

    fn discard_current(&mut self) {
        if self.state != State::Silence {
            debug!("discarding segment in progress ({} samples)", self.speechlen);
        }
        self.state = State::Silence;
        let window = Self::window_samples(&self.config);
        self.zc.reset(self.config.level_thres, window, self.config.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::preprocess::{PreprocessConfig, Preprocessor};
    use crate::audio::source::MemorySource;

    struct Collector {
        segments: Vec<(u64, Vec<Sample>)>,
        open: bool,
    }

    impl Collector {
        fn new() -> Self {
            Collector {
                segments: Vec::new(),
                open: false,
            }
        }
    }

    impl SegmentHandler for Collector {
        fn on_segment_start(&mut self, start_sample: u64) -> Result<(), AudioError> {
            assert!(!self.open, "segment started twice");
            self.open = true;
            self.segments.push((start_sample, Vec::new()));
            Ok(())
        }

        fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
            assert!(self.open, "samples outside a segment");
            self.segments.last_mut().unwrap().1.extend_from_slice(samples);
            Ok(())
        }

        fn on_segment_end(&mut self) -> Result<(), AudioError> {
            assert!(self.open, "segment ended twice");
            self.open = false;
            Ok(())
        }
    }

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            sample_rate: 16000,
            level_thres: 2000,
            zc_thres: 60,
            head_margin_msec: 300,
            tail_margin_msec: 400,
            chunk_size: 160,
            offset: 0,
            silence_cut: true,
            rewind_msec: 0,
        }
    }

    fn square(amplitude: i16, half_period: usize, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| if (i / half_period) % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    fn no_preprocess() -> Preprocessor {
        Preprocessor::new(PreprocessConfig {
            strip_zero: false,
            zmean: false,
            level_coef: 1.0,
        })
    }

    #[test]
    fn pure_silence_emits_no_segment() {
        let mut seg = Segmenter::new(config());
        let mut source = MemorySource::new(vec![vec![0i16; 16000]]);
        let mut handler = Collector::new();
        let mut pre = no_preprocess();
        assert!(source.begin().unwrap());
        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::EndOfStream);
        assert!(handler.segments.is_empty());
    }

    #[test]
    fn nosegment_mode_forwards_everything_as_one_segment() {
        let mut cfg = config();
        cfg.silence_cut = false;
        let mut seg = Segmenter::new(cfg);
        let input = vec![0i16; 4800];
        let mut source = MemorySource::new(vec![input.clone()]);
        let mut handler = Collector::new();
        let mut pre = no_preprocess();
        assert!(source.begin().unwrap());
        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::EndOfStream);
        assert_eq!(handler.segments.len(), 1);
        assert_eq!(handler.segments[0].0, 0);
        assert_eq!(handler.segments[0].1, input);
    }

    #[test]
    fn speech_burst_yields_one_segment_with_margins() {
        let cfg = config();
        let fs = cfg.sample_rate as usize;
        // 1 s silence, 800 ms loud square wave, 1 s silence
        let mut input = vec![0i16; fs];
        input.extend(square(8000, 40, fs * 800 / 1000));
        input.extend(vec![0i16; fs]);

        let mut seg = Segmenter::new(cfg.clone());
        let mut source = MemorySource::new(vec![input.clone()]);
        let mut handler = Collector::new();
        let mut pre = no_preprocess();
        assert!(source.begin().unwrap());
        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::Segmented);
        assert_eq!(handler.segments.len(), 1);

        let (start, samples) = &handler.segments[0];
        // the segment is a contiguous span of the input at its start offset
        let span = &input[*start as usize..*start as usize + samples.len()];
        assert_eq!(span, &samples[..]);

        // head margin: the segment starts before the burst
        assert!(*start < fs as u64);
        // and not more than the head margin early
        let head_samples = (cfg.head_margin_msec as usize * fs / 1000) as u64;
        assert!(fs as u64 - *start <= head_samples + cfg.chunk_size as u64);

        // segment length is burst + head + tail margin, plus the decay time
        // for old zero crossings to leave the detector window (bounded by
        // the window length itself)
        let tail_samples = cfg.tail_margin_msec as usize * fs / 1000;
        let expect = fs * 800 / 1000 + head_samples as usize + tail_samples;
        let got = samples.len();
        assert!(
            got as i64 >= expect as i64 - 2 * cfg.chunk_size as i64,
            "expected at least about {} samples, got {}",
            expect,
            got
        );
        assert!(
            got <= expect + head_samples as usize + 2 * cfg.chunk_size,
            "expected at most about {} samples, got {}",
            expect + head_samples as usize,
            got
        );
    }

    #[test]
    fn two_bursts_yield_two_disjoint_segments() {
        let cfg = config();
        let fs = cfg.sample_rate as usize;
        let mut input = vec![0i16; fs / 2];
        input.extend(square(8000, 40, fs / 2));
        input.extend(vec![0i16; fs]);
        input.extend(square(8000, 40, fs / 2));
        input.extend(vec![0i16; fs]);

        let mut seg = Segmenter::new(cfg);
        let mut source = MemorySource::new(vec![input.clone()]);
        let mut handler = Collector::new();
        let mut pre = no_preprocess();
        assert!(source.begin().unwrap());

        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::Segmented);
        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::Segmented);

        assert_eq!(handler.segments.len(), 2);
        let (s0, seg0) = &handler.segments[0];
        let (s1, seg1) = &handler.segments[1];
        // no sample index appears in both segments
        assert!(s0 + seg0.len() as u64 <= *s1);
        // both are byte-exact spans of the input
        assert_eq!(&input[*s0 as usize..*s0 as usize + seg0.len()], &seg0[..]);
        assert_eq!(&input[*s1 as usize..*s1 as usize + seg1.len()], &seg1[..]);
    }

    #[test]
    fn stop_now_discards_segment_in_progress() {
        struct StopAfter {
            inner: Collector,
            countdown: usize,
        }
        impl SegmentHandler for StopAfter {
            fn on_segment_start(&mut self, start_sample: u64) -> Result<(), AudioError> {
                self.inner.on_segment_start(start_sample)
            }
            fn on_samples(&mut self, samples: &[Sample]) -> Result<(), AudioError> {
                self.inner.on_samples(samples)
            }
            fn on_segment_end(&mut self) -> Result<(), AudioError> {
                self.inner.on_segment_end()
            }
            fn poll_control(&mut self) -> ControlFlow {
                if self.countdown == 0 {
                    ControlFlow::StopNow
                } else {
                    self.countdown -= 1;
                    ControlFlow::Continue
                }
            }
        }

        let cfg = config();
        let fs = cfg.sample_rate as usize;
        let input = square(8000, 40, fs * 2);
        let mut seg = Segmenter::new(cfg);
        let mut source = MemorySource::new(vec![input]);
        let mut handler = StopAfter {
            inner: Collector::new(),
            countdown: 20,
        };
        let mut pre = no_preprocess();
        assert!(source.begin().unwrap());
        let status = seg.run(&mut source, &mut pre, &mut handler);
        assert_eq!(status, AdinStatus::Terminated);
    }
}

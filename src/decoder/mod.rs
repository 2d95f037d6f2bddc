//! Two-pass recognition search.
//!
//! The [`Recognizer`] facade runs the frame-synchronous beam search
//! ([`beam`]) over a built tree lexicon ([`lexicon`]), then the backward
//! best-first stack decoder ([`stack`]) on the resulting word trellis
//! ([`trellis`]), optionally producing a word graph ([`graph`]) and a
//! confusion network ([`confnet`]). Long inputs can be split at sustained
//! pauses ([`spseg`]) with the language context carried across segments.

pub mod beam;
pub mod config;
pub mod confnet;
pub mod dict;
pub mod graph;
pub mod hmm;
pub mod lexicon;
pub mod lm;
pub mod spseg;
pub mod stack;
pub mod trellis;

use log::{info, warn};
use strum::Display;
use thiserror::Error;

use crate::decoder::beam::BeamSearch;
use crate::decoder::config::SearchConfig;
use crate::decoder::confnet::ConfusionNetwork;
use crate::decoder::dict::{Dictionary, WordId};
use crate::decoder::graph::WordGraph;
use crate::decoder::hmm::{AcousticScorer, HmmSet};
use crate::decoder::lexicon::Lexicon;
use crate::decoder::lm::{CategoryMatrix, LanguageModel};
use crate::decoder::spseg::SpSegmenter;
use crate::decoder::stack::{Pass2Status, Sentence, StackDecoder};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Word '{0}' has an empty pronunciation")]
    EmptyPronunciation(String),

    #[error("Lexicon build failed; see log for details")]
    LexiconBuild,
}

/// Final status of one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RecogStatus {
    #[strum(serialize = "success")]
    Success,
    /// Search finished without a sentence (empty beam or exhausted stack).
    #[strum(serialize = "fail")]
    Fail,
    /// The only surviving words were silences.
    #[strum(serialize = "only-silence")]
    OnlySilence,
    #[strum(serialize = "rejected-short")]
    RejectedShort,
    #[strum(serialize = "rejected-long")]
    RejectedLong,
    #[strum(serialize = "cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct RecogResult {
    pub status: RecogStatus,
    /// Sentences in descending score order, at most `output_num`.
    pub sentences: Vec<Sentence>,
    /// Pass-1 best path (also the fallback result when pass 2 fails).
    pub pass1_seq: Vec<WordId>,
    pub pass1_score: f32,
    pub graph: Option<WordGraph>,
    pub confnet: Option<ConfusionNetwork>,
    /// Pass-2 expansion count.
    pub pops: usize,
}

/// One recognizer instance: immutable models plus per-utterance search
/// state. Multiple instances may share the same lexicon read-only.
pub struct Recognizer<'a> {
    pub lexicon: &'a Lexicon,
    pub dict: &'a Dictionary,
    pub hmms: &'a HmmSet,
    pub config: &'a SearchConfig,
    pub lm: Option<&'a dyn LanguageModel>,
    pub catmat: Option<&'a dyn CategoryMatrix>,
    /// Language context carried from the previous segment.
    context_word: Option<WordId>,
}

impl<'a> Recognizer<'a> {
    pub fn new(
        lexicon: &'a Lexicon,
        dict: &'a Dictionary,
        hmms: &'a HmmSet,
        config: &'a SearchConfig,
        lm: Option<&'a dyn LanguageModel>,
        catmat: Option<&'a dyn CategoryMatrix>,
    ) -> Self {
        Recognizer {
            lexicon,
            dict,
            hmms,
            config,
            lm,
            catmat,
            context_word: None,
        }
    }

    /// Decode one utterance of `frames` observation frames.
    pub fn recognize(
        &mut self,
        scorer: &dyn AcousticScorer,
        frames: usize,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> RecogResult {
        if let Some(status) = self.reject_by_length(frames) {
            return RecogResult {
                status,
                sentences: Vec::new(),
                pass1_seq: Vec::new(),
                pass1_score: f32::NEG_INFINITY,
                graph: None,
                confnet: None,
                pops: 0,
            };
        }

        // pass 1
        let mut beam = BeamSearch::new(
            self.lexicon,
            self.dict,
            self.hmms,
            self.config,
            self.lm,
            self.catmat,
        );
        beam.init(scorer);
        let start_t = if self.lexicon.multipath { 0 } else { 1 };
        for t in start_t..frames {
            beam.feed_frame(t, scorer);
        }
        let pass1 = beam.finalize(frames, scorer);

        if pass1.trellis.is_empty() {
            info!("input rejected: no trellis survivor");
            return RecogResult {
                status: RecogStatus::Fail,
                sentences: Vec::new(),
                pass1_seq: Vec::new(),
                pass1_score: pass1.best_score,
                graph: None,
                confnet: None,
                pops: 0,
            };
        }

        // pass 2
        let decoder = StackDecoder::new(
            self.dict,
            self.hmms,
            self.config,
            self.lm,
            self.catmat,
            &pass1.trellis,
            frames,
        )
        .with_context(self.context_word);
        let pass2 = decoder.decode(scorer, cancel);

        let mut status = match pass2.status {
            Pass2Status::Success => RecogStatus::Success,
            Pass2Status::Cancelled => RecogStatus::Cancelled,
            Pass2Status::Fail | Pass2Status::MaxHypo => RecogStatus::Fail,
        };
        let mut sentences = pass2.sentences;
        if sentences.is_empty() && status == RecogStatus::Fail && self.config.fallback_pass1 {
            if pass1.best_atom.is_some() {
                warn!("pass 2 failed, falling back to pass-1 result");
                sentences = vec![Sentence {
                    words: pass1.best_seq.clone(),
                    score: pass1.best_score,
                    cm: vec![0.0; pass1.best_seq.len()],
                    lscore: 0.0,
                }];
                status = RecogStatus::Success;
            }
        }

        if status == RecogStatus::Success {
            if let Some(best) = sentences.first() {
                if best.words.iter().all(|&w| self.is_silence(w)) {
                    status = RecogStatus::OnlySilence;
                }
                self.context_word = best
                    .words
                    .iter()
                    .rev()
                    .copied()
                    .find(|&w| !self.is_silence(w));
            }
        }

        let confnet = match (&pass2.graph, self.config.confnet) {
            (Some(graph), true) => Some(confnet::build(graph)),
            _ => None,
        };

        RecogResult {
            status,
            sentences,
            pass1_seq: pass1.best_seq,
            pass1_score: pass1.best_score,
            graph: pass2.graph,
            confnet,
            pops: pass2.pops,
        }
    }

    /// Decode a long input by splitting it at sustained pauses, carrying
    /// the last recognized word into each following segment.
    pub fn recognize_segmented(
        &mut self,
        scorer: &dyn AcousticScorer,
        frames: usize,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> Vec<RecogResult> {
        let min_pause = match self.config.spseg_frames {
            Some(n) => n,
            None => return vec![self.recognize(scorer, frames, cancel)],
        };

        // survey pass over the whole input to find pause runs
        let mut beam = BeamSearch::new(
            self.lexicon,
            self.dict,
            self.hmms,
            self.config,
            self.lm,
            self.catmat,
        );
        beam.init(scorer);
        let start_t = if self.lexicon.multipath { 0 } else { 1 };
        for t in start_t..frames {
            beam.feed_frame(t, scorer);
        }
        let frame_best = beam.frame_best.clone();

        let pause_words: Vec<WordId> = [self.dict.head_silwid, self.dict.tail_silwid, self.dict.sp_word]
            .into_iter()
            .flatten()
            .collect();
        let segmenter = SpSegmenter::new(pause_words, min_pause);
        let spans = segmenter.detect(&frame_best);
        if spans.len() <= 1 {
            return vec![self.recognize(scorer, frames, cancel)];
        }

        info!("decoding {} short-pause segments", spans.len());
        let mut results = Vec::new();
        for span in spans {
            let windowed = FrameWindowScorer {
                inner: scorer,
                offset: span.begin_frame,
            };
            let result =
                self.recognize(&windowed, span.end_frame - span.begin_frame, cancel);
            results.push(result);
        }
        results
    }

    fn reject_by_length(&self, frames: usize) -> Option<RecogStatus> {
        let msec = frames as u64 * self.config.frame_shift_msec as u64;
        if msec < self.config.reject_short_msec as u64 {
            info!("input rejected: too short ({} msec)", msec);
            return Some(RecogStatus::RejectedShort);
        }
        if let Some(long) = self.config.reject_long_msec {
            if msec > long as u64 {
                info!("input rejected: too long ({} msec)", msec);
                return Some(RecogStatus::RejectedLong);
            }
        }
        None
    }

    fn is_silence(&self, w: WordId) -> bool {
        self.dict.head_silwid == Some(w)
            || self.dict.tail_silwid == Some(w)
            || self.dict.sp_word == Some(w)
    }
}

/// Presents a sub-range of the input to the search as frames `0..len`.
struct FrameWindowScorer<'s> {
    inner: &'s dyn AcousticScorer,
    offset: usize,
}

impl AcousticScorer for FrameWindowScorer<'_> {
    fn state_logprob(&self, state: hmm::StateId, t: usize) -> f32 {
        self.inner.state_logprob(state, t + self.offset)
    }
}

//! Short-pause segmentation: split a long input into sentence segments at
//! sustained pauses, carrying the last recognized word into the next
//! segment as language context.

use log::debug;

use crate::decoder::beam::FrameBest;
use crate::decoder::dict::{WordId, WORD_INVALID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub begin_frame: usize,
    /// Exclusive end.
    pub end_frame: usize,
}

pub struct SpSegmenter {
    /// Words treated as pause (silences and the short-pause model word).
    pause_words: Vec<WordId>,
    /// A pause run at least this long splits the utterance.
    min_pause_frames: usize,
}

impl SpSegmenter {
    pub fn new(pause_words: Vec<WordId>, min_pause_frames: usize) -> Self {
        SpSegmenter {
            pause_words,
            min_pause_frames: min_pause_frames.max(1),
        }
    }

    fn is_pause(&self, w: WordId) -> bool {
        w == WORD_INVALID || self.pause_words.contains(&w)
    }

    /// Split the frame axis at sustained pauses observed on the per-frame
    /// best path. Pause-only spans are dropped; boundaries land in the
    /// middle of each long pause so both sides keep some context audio.
    pub fn detect(&self, frame_best: &[FrameBest]) -> Vec<SegmentSpan> {
        let mut spans = Vec::new();
        let mut seg_begin: Option<usize> = None;
        let mut pause_run = 0usize;

        for (t, fb) in frame_best.iter().enumerate() {
            if self.is_pause(fb.word) {
                pause_run += 1;
                if pause_run == self.min_pause_frames {
                    if let Some(begin) = seg_begin.take() {
                        // close the segment at the pause midpoint
                        let cut = t + 1 - self.min_pause_frames / 2;
                        spans.push(SegmentSpan {
                            begin_frame: begin,
                            end_frame: cut,
                        });
                    }
                }
            } else {
                pause_run = 0;
                if seg_begin.is_none() {
                    seg_begin = Some(t);
                }
            }
        }
        if let Some(begin) = seg_begin {
            spans.push(SegmentSpan {
                begin_frame: begin,
                end_frame: frame_best.len(),
            });
        }
        debug!("short-pause segmentation: {} segment(s)", spans.len());
        spans
    }

    /// Context word carried into the next segment: the last non-pause word
    /// of the previous result.
    pub fn carry_context(&self, words: &[WordId]) -> Option<WordId> {
        words.iter().rev().copied().find(|&w| !self.is_pause(w))
    }
}

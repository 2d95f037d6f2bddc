//! Search configuration: a builder that validates once and yields a frozen
//! value the recognizer borrows for the whole session.

use crate::decoder::DecodeError;

/// Language-model flavour driving both passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmKind {
    /// Statistical N-gram with factoring on the tree lexicon.
    Ngram,
    /// Grammar (category-pair constraint), per-category trees.
    Grammar,
}

/// How LM scores are propagated on shared branches of the tree lexicon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factoring {
    /// Precomputed max unigram per branch; exact bigram at single-word
    /// branches.
    Unigram,
    /// Successor lists on branches, contextual bigram computed at run time.
    Bigram,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub lm_kind: LmKind,
    pub factoring: Factoring,

    /// Pass-1 beam width (tokens kept per frame).
    pub beam_width: usize,
    /// Pass-1 score envelope below the per-frame maximum; `None` disables.
    pub score_envelope_width: Option<f32>,
    /// Token uniqueness per (node, last word) instead of per node.
    pub wpair: bool,

    /// LM weight / insertion penalty for pass 1.
    pub lm_weight: f32,
    pub lm_penalty: f32,
    /// LM weight / insertion penalty for pass 2.
    pub lm_weight2: f32,
    pub lm_penalty2: f32,
    /// Grammar-mode word insertion penalties (pass 1 / pass 2).
    pub penalty1: f32,
    pub penalty2: f32,

    /// Append the short-pause model to every word tail (multipath only).
    pub iwsp: bool,

    /// Pass-2 hypothesis stack size.
    pub stack_size: usize,
    /// Number of complete sentences to find.
    pub nbest: usize,
    /// Number of sentences to emit.
    pub output_num: usize,
    /// Give up after this many hypothesis expansions.
    pub max_hypo: usize,
    /// Trellis lookup half-width in frames around the expansion point.
    pub lookup_range: usize,
    /// Per-length pop clamp; `None` disables the word envelope.
    pub enveloped_bestfirst_width: Option<usize>,
    /// Pass-2 score envelope width; `None` disables.
    pub score_envelope_width2: Option<f32>,

    /// Posterior scaling for confidence scores.
    pub cm_alpha: f32,
    /// Drop expansion candidates whose local posterior falls below this.
    pub cm_cut_thres: f32,

    /// Emit the pass-1 best path when pass 2 fails.
    pub fallback_pass1: bool,

    /// Inputs shorter than this are rejected without decoding (msec).
    pub reject_short_msec: u32,
    /// Inputs longer than this are rejected without decoding (msec).
    pub reject_long_msec: Option<u32>,

    /// Generate a word graph during pass 2.
    pub graph_out: bool,
    /// Stop expanding a hypothesis once its newest arc merged into an
    /// existing one ("graph-out search" shortcut).
    pub graph_merge_stop: bool,
    /// Bound for boundary-adjustment iterations.
    pub graph_boundary_loop_limit: usize,
    /// Neighbor-merge half width in frames; `None` disables that pass.
    pub graph_neighbor_merge: Option<usize>,
    /// Bound on concurrent arcs per frame; `None` disables the depth cut.
    pub graph_depth_cut: Option<usize>,
    /// Also cluster the graph into a confusion network.
    pub confnet: bool,

    /// Frame shift in msec (for length rejection accounting).
    pub frame_shift_msec: u32,

    /// Short-pause segmentation: silence run length (frames) that splits an
    /// utterance; `None` disables.
    pub spseg_frames: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            lm_kind: LmKind::Ngram,
            factoring: Factoring::Unigram,
            beam_width: 800,
            score_envelope_width: Some(230.0),
            wpair: false,
            lm_weight: 8.0,
            lm_penalty: -2.0,
            lm_weight2: 8.0,
            lm_penalty2: -2.0,
            penalty1: 0.0,
            penalty2: 0.0,
            iwsp: false,
            stack_size: 500,
            nbest: 1,
            output_num: 1,
            max_hypo: 2000,
            lookup_range: 5,
            enveloped_bestfirst_width: Some(30),
            score_envelope_width2: Some(80.0),
            cm_alpha: 0.05,
            cm_cut_thres: 0.03,
            fallback_pass1: false,
            reject_short_msec: 0,
            reject_long_msec: None,
            graph_out: false,
            graph_merge_stop: false,
            graph_boundary_loop_limit: 20,
            graph_neighbor_merge: None,
            graph_depth_cut: None,
            confnet: false,
            frame_shift_msec: 10,
            spseg_frames: None,
        }
    }
}

/// Builder with validation; the frozen `SearchConfig` never changes after
/// `build`.
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new(lm_kind: LmKind) -> Self {
        let mut config = SearchConfig::default();
        config.lm_kind = lm_kind;
        SearchConfigBuilder { config }
    }

    pub fn beam_width(mut self, width: usize) -> Self {
        self.config.beam_width = width;
        self
    }

    pub fn score_envelope(mut self, width: Option<f32>) -> Self {
        self.config.score_envelope_width = width;
        self
    }

    pub fn wpair(mut self, on: bool) -> Self {
        self.config.wpair = on;
        self
    }

    pub fn factoring(mut self, f: Factoring) -> Self {
        self.config.factoring = f;
        self
    }

    pub fn lm_weights(mut self, w1: f32, p1: f32, w2: f32, p2: f32) -> Self {
        self.config.lm_weight = w1;
        self.config.lm_penalty = p1;
        self.config.lm_weight2 = w2;
        self.config.lm_penalty2 = p2;
        self
    }

    pub fn grammar_penalties(mut self, p1: f32, p2: f32) -> Self {
        self.config.penalty1 = p1;
        self.config.penalty2 = p2;
        self
    }

    pub fn iwsp(mut self, on: bool) -> Self {
        self.config.iwsp = on;
        self
    }

    pub fn stack(mut self, stack_size: usize, nbest: usize, output_num: usize) -> Self {
        self.config.stack_size = stack_size;
        self.config.nbest = nbest;
        self.config.output_num = output_num;
        self
    }

    pub fn max_hypo(mut self, n: usize) -> Self {
        self.config.max_hypo = n;
        self
    }

    pub fn lookup_range(mut self, frames: usize) -> Self {
        self.config.lookup_range = frames;
        self
    }

    pub fn envelopes(mut self, word: Option<usize>, score: Option<f32>) -> Self {
        self.config.enveloped_bestfirst_width = word;
        self.config.score_envelope_width2 = score;
        self
    }

    pub fn confidence(mut self, alpha: f32, cut_thres: f32) -> Self {
        self.config.cm_alpha = alpha;
        self.config.cm_cut_thres = cut_thres;
        self
    }

    pub fn fallback_pass1(mut self, on: bool) -> Self {
        self.config.fallback_pass1 = on;
        self
    }

    pub fn reject_lengths(mut self, short_msec: u32, long_msec: Option<u32>) -> Self {
        self.config.reject_short_msec = short_msec;
        self.config.reject_long_msec = long_msec;
        self
    }

    pub fn graph(mut self, on: bool) -> Self {
        self.config.graph_out = on;
        self
    }

    pub fn graph_merge_stop(mut self, on: bool) -> Self {
        self.config.graph_merge_stop = on;
        self
    }

    pub fn graph_limits(
        mut self,
        boundary_loop_limit: usize,
        neighbor_merge: Option<usize>,
        depth_cut: Option<usize>,
    ) -> Self {
        self.config.graph_boundary_loop_limit = boundary_loop_limit;
        self.config.graph_neighbor_merge = neighbor_merge;
        self.config.graph_depth_cut = depth_cut;
        self
    }

    pub fn confnet(mut self, on: bool) -> Self {
        self.config.confnet = on;
        self
    }

    pub fn frame_shift_msec(mut self, msec: u32) -> Self {
        self.config.frame_shift_msec = msec;
        self
    }

    pub fn short_pause_segmentation(mut self, frames: Option<usize>) -> Self {
        self.config.spseg_frames = frames;
        self
    }

    pub fn build(self) -> Result<SearchConfig, DecodeError> {
        let c = &self.config;
        if c.beam_width == 0 {
            return Err(DecodeError::Config("beam width must be positive".into()));
        }
        if c.stack_size == 0 {
            return Err(DecodeError::Config("stack size must be positive".into()));
        }
        if c.nbest == 0 || c.output_num == 0 {
            return Err(DecodeError::Config("n-best counts must be positive".into()));
        }
        if c.output_num > c.nbest {
            return Err(DecodeError::Config(
                "cannot output more sentences than are searched (output > nbest)".into(),
            ));
        }
        if c.confnet && !c.graph_out {
            return Err(DecodeError::Config(
                "confusion network requires graph output".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.cm_cut_thres) {
            return Err(DecodeError::Config(
                "confidence cut threshold must be within [0,1]".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_bad_combinations() {
        assert!(SearchConfigBuilder::new(LmKind::Ngram)
            .stack(100, 2, 5)
            .build()
            .is_err());
        assert!(SearchConfigBuilder::new(LmKind::Ngram)
            .confnet(true)
            .build()
            .is_err());
        assert!(SearchConfigBuilder::new(LmKind::Ngram)
            .confidence(0.05, 1.5)
            .build()
            .is_err());
    }

    #[test]
    fn builder_freezes_values() {
        let config = SearchConfigBuilder::new(LmKind::Grammar)
            .beam_width(64)
            .stack(100, 10, 5)
            .graph(true)
            .confnet(true)
            .build()
            .unwrap();
        assert_eq!(config.beam_width, 64);
        assert_eq!(config.nbest, 10);
        assert!(config.confnet);
    }
}

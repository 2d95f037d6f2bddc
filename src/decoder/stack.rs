//! Pass 2: backward best-first stack decoding over the word trellis.
//!
//! Hypotheses grow from the utterance end toward the beginning. Each
//! hypothesis carries the exact backward Viterbi column `g[t]` of its word
//! suffix; the pass-1 trellis supplies the heuristic for the remaining
//! frames, so hypotheses are expanded in descending `f = g + h` order. The
//! search is bounded by a capped score-ordered stack, a per-frame score
//! envelope, a per-length word envelope, and a local-posterior confidence
//! cut.

use log::{debug, info, warn};

use crate::decoder::config::{LmKind, SearchConfig};
use crate::decoder::dict::{Dictionary, WordId};
use crate::decoder::graph::{ArcId, GraphArc, GraphArena, WordGraph};
use crate::decoder::hmm::{AcousticScorer, HmmSet, PhoneId, StateId, LOG_ZERO};
use crate::decoder::lm::{CategoryMatrix, LanguageModel};
use crate::decoder::trellis::Trellis;

/// One sentence hypothesis on the stack.
#[derive(Debug, Clone)]
pub struct Hypo {
    /// Words in time order; `seq[0]` is the earliest word known so far and
    /// the last element ends the utterance.
    pub seq: Vec<WordId>,
    /// Estimated sentence score `g[bestt] + h(bestt)`.
    pub score: f32,
    /// `g[t]`: Viterbi score of the suffix when `seq[0]` starts at frame
    /// `t` (index `frames` is the virtual boundary past the last frame).
    pub g: Vec<f32>,
    /// Frame where the estimation maximized; the next word ends at
    /// `bestt - 1`.
    pub bestt: usize,
    /// Set once the hypothesis reaches the utterance start; next pop sends
    /// it to the result stack.
    pub endflag: bool,
    /// Per-word confidence, aligned with `seq`.
    pub cm: Vec<f32>,
    pub lscore_total: f32,
    /// Graph arc of `seq[0]`, linking newly created arcs leftward.
    pub last_arc: Option<ArcId>,
}

/// A finished sentence.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub words: Vec<WordId>,
    pub score: f32,
    pub cm: Vec<f32>,
    pub lscore: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass2Status {
    Success,
    /// Search exhausted without a complete sentence.
    Fail,
    /// Gave up at the expansion bound.
    MaxHypo,
    /// Cancelled from outside.
    Cancelled,
}

#[derive(Debug)]
pub struct Pass2Result {
    pub status: Pass2Status,
    pub sentences: Vec<Sentence>,
    pub graph: Option<WordGraph>,
    /// Hypotheses popped during the search.
    pub pops: usize,
}

/* ------------------------------------------------------------------ */
/* score-ordered stack                                                 */
/* ------------------------------------------------------------------ */

/// Score-ordered hypothesis stack capped at `cap`; pops the best in O(1),
/// inserts by bisection, evicts the worst when full.
struct HypoStack {
    items: Vec<Hypo>, // ascending by score
    cap: usize,
}

impl HypoStack {
    fn new(cap: usize) -> Self {
        HypoStack {
            items: Vec::new(),
            cap,
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn pop_best(&mut self) -> Option<Hypo> {
        self.items.pop()
    }

    /// Insert unless the stack is full and the score is no better than the
    /// current worst.
    fn push(&mut self, hypo: Hypo) -> bool {
        if self.items.len() >= self.cap {
            if let Some(worst) = self.items.first() {
                if hypo.score <= worst.score {
                    return false;
                }
            }
            self.items.remove(0);
        }
        let pos = self
            .items
            .partition_point(|h| h.score <= hypo.score);
        self.items.insert(pos, hypo);
        true
    }
}

/* ------------------------------------------------------------------ */
/* per-word rescoring lattice                                          */
/* ------------------------------------------------------------------ */

/// Flattened state graph of one word used for backward Viterbi rescoring.
struct WordLattice {
    emit: Vec<StateId>,
    /// Within-word arcs `(from, to, prob)`.
    arcs: Vec<(usize, usize, f32)>,
    /// `(position, prob)` reachable from the word entry.
    entries: Vec<(usize, f32)>,
    /// `(position, prob)` leading to the word exit.
    exits: Vec<(usize, f32)>,
}

impl WordLattice {
    fn new(dict: &Dictionary, hmms: &HmmSet, w: WordId, iwsp: bool) -> Self {
        let mut lat = WordLattice {
            emit: Vec::new(),
            arcs: Vec::new(),
            entries: Vec::new(),
            exits: Vec::new(),
        };
        // sources feeding the next phone, as (position, accumulated prob);
        // None marks the word entry itself
        let mut out_prev: Vec<(Option<usize>, f32)> = vec![(None, 0.0)];
        for &ph in &dict.word(w).phones {
            out_prev = lat.append_phone(hmms, ph, out_prev, 0.0);
        }
        if iwsp && hmms.multipath {
            if let Some(sp) = hmms.sp {
                let bypass = out_prev.clone();
                let mut with_sp = lat.append_phone(hmms, sp, out_prev, hmms.iwsp_penalty);
                // the pause stays optional
                for src in bypass {
                    if !with_sp.contains(&src) {
                        with_sp.push(src);
                    }
                }
                out_prev = with_sp;
            }
        }
        for (pos, prob) in out_prev {
            match pos {
                Some(p) => lat.exits.push((p, prob)),
                None => {
                    // a word fully skippable is rejected at lexicon build;
                    // ignore the degenerate path here
                }
            }
        }
        lat
    }

    fn append_phone(
        &mut self,
        hmms: &HmmSet,
        ph: PhoneId,
        out_prev: Vec<(Option<usize>, f32)>,
        extra_penalty: f32,
    ) -> Vec<(Option<usize>, f32)> {
        let phone = hmms.phone(ph);
        let emitting = phone.state_num() - 2;
        let exit = phone.state_num() - 1;
        let base = self.emit.len();
        for k in 0..emitting {
            self.emit.push(phone.states[k]);
        }
        let mut out_next: Vec<(Option<usize>, f32)> = Vec::new();
        for ato in 1..=exit {
            let prob = phone.a(0, ato);
            if prob <= LOG_ZERO {
                continue;
            }
            let prob = prob + extra_penalty;
            if ato == exit {
                for &(src, a) in &out_prev {
                    out_next.push((src, a + prob));
                }
            } else {
                for &(src, a) in &out_prev {
                    match src {
                        Some(p) => self.arcs.push((p, base + ato - 1, a + prob)),
                        None => self.entries.push((base + ato - 1, a + prob)),
                    }
                }
            }
        }
        for k in 1..=emitting {
            for ato in 1..=exit {
                let prob = phone.a(k, ato);
                if prob <= LOG_ZERO {
                    continue;
                }
                if ato == exit {
                    out_next.push((Some(base + k - 1), prob));
                } else {
                    self.arcs.push((base + k - 1, base + ato - 1, prob));
                }
            }
        }
        out_next
    }
}

/* ------------------------------------------------------------------ */
/* the decoder                                                         */
/* ------------------------------------------------------------------ */

pub struct StackDecoder<'a> {
    dict: &'a Dictionary,
    hmms: &'a HmmSet,
    config: &'a SearchConfig,
    lm: Option<&'a dyn LanguageModel>,
    catmat: Option<&'a dyn CategoryMatrix>,
    trellis: &'a Trellis,
    frames: usize,
    /// Per-frame maximum trellis backscore: the admissible `h`.
    btmax: Vec<f32>,
    /// Per-frame maximum `g` among popped hypotheses (score envelope).
    envelope: Vec<f32>,
    /// Pops seen per hypothesis length (word envelope).
    wb_count: Vec<usize>,
    wb_maxpoplen: usize,
    graph: Option<GraphArena>,
    /// Language context carried over from the previous short-pause
    /// segment.
    context_word: Option<WordId>,
}

impl<'a> StackDecoder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dict: &'a Dictionary,
        hmms: &'a HmmSet,
        config: &'a SearchConfig,
        lm: Option<&'a dyn LanguageModel>,
        catmat: Option<&'a dyn CategoryMatrix>,
        trellis: &'a Trellis,
        frames: usize,
    ) -> Self {
        let btmax = trellis.max_backscore_per_frame(frames);
        StackDecoder {
            dict,
            hmms,
            config,
            lm,
            catmat,
            trellis,
            frames,
            btmax,
            envelope: vec![f32::NEG_INFINITY; frames + 1],
            wb_count: Vec::new(),
            wb_maxpoplen: 0,
            graph: if config.graph_out {
                Some(GraphArena::new())
            } else {
                None
            },
            context_word: None,
        }
    }

    /// Seed the LM history with the last word of the previous segment.
    pub fn with_context(mut self, word: Option<WordId>) -> Self {
        self.context_word = word;
        self
    }

    /// Run the search until `nbest` sentences are found or a bound hits.
    /// `cancel` is polled at the top of the expansion loop.
    pub fn decode(
        mut self,
        scorer: &dyn AcousticScorer,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> Pass2Result {
        let mut stack = HypoStack::new(self.config.stack_size);
        let mut results: Vec<Hypo> = Vec::new();
        let mut pops = 0usize;

        for hypo in self.initial_hypotheses(scorer) {
            stack.push(hypo);
        }
        if stack.is_empty() {
            info!("no initial hypothesis on pass 2");
            return self.finish(Pass2Status::Fail, results, pops);
        }

        let status = loop {
            if let Some(cancel) = cancel {
                if cancel() {
                    break Pass2Status::Cancelled;
                }
            }
            let hypo = match stack.pop_best() {
                Some(h) => h,
                None => {
                    break if results.is_empty() {
                        Pass2Status::Fail
                    } else {
                        Pass2Status::Success
                    }
                }
            };

            if hypo.endflag {
                debug!(
                    "accepted: {:?} score {:.2}",
                    self.word_strings(&hypo.seq),
                    hypo.score
                );
                results.push(hypo);
                if results.len() >= self.config.nbest {
                    break Pass2Status::Success;
                }
                continue;
            }

            pops += 1;
            if pops > self.config.max_hypo {
                warn!("pass 2 gave up after {} expansions", self.config.max_hypo);
                break if results.is_empty() {
                    Pass2Status::MaxHypo
                } else {
                    Pass2Status::Success
                };
            }

            if !self.word_envelope_ok(hypo.seq.len()) {
                continue;
            }
            self.update_score_envelope(&hypo);

            // reached the utterance start: re-insert as complete
            if self.acceptable(&hypo) {
                let mut done = hypo;
                done.endflag = true;
                done.score = done.g[0];
                stack.push(done);
                continue;
            }

            self.expand(&hypo, scorer, &mut stack);
        };

        self.finish(status, results, pops)
    }

    fn finish(&mut self, status: Pass2Status, mut results: Vec<Hypo>, pops: usize) -> Pass2Result {
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        let sentences: Vec<Sentence> = results
            .iter()
            .take(self.config.output_num)
            .map(|h| Sentence {
                words: h.seq.clone(),
                score: h.score,
                cm: h.cm.clone(),
                lscore: h.lscore_total,
            })
            .collect();
        let graph = self
            .graph
            .take()
            .filter(|g| !g.is_empty())
            .map(|g| g.finish(self.config, self.frames));
        Pass2Result {
            status: if sentences.is_empty() && status == Pass2Status::Success {
                Pass2Status::Fail
            } else {
                status
            },
            sentences,
            graph,
            pops,
        }
    }

    fn word_strings(&self, seq: &[WordId]) -> Vec<String> {
        seq.iter()
            .map(|&w| self.dict.word(w).output.clone())
            .collect()
    }

    /* ------------------------------------------------------------ */
    /* envelopes                                                     */
    /* ------------------------------------------------------------ */

    /// Per-length pop clamp: once `width` hypotheses of some length have
    /// been popped, shorter hypotheses are no longer expanded.
    fn word_envelope_ok(&mut self, len: usize) -> bool {
        let width = match self.config.enveloped_bestfirst_width {
            Some(w) => w,
            None => return true,
        };
        if len <= self.wb_maxpoplen {
            return false;
        }
        if self.wb_count.len() <= len {
            self.wb_count.resize(len + 1, 0);
        }
        self.wb_count[len] += 1;
        if self.wb_count[len] > width && len > self.wb_maxpoplen {
            self.wb_maxpoplen = len;
        }
        true
    }

    fn update_score_envelope(&mut self, hypo: &Hypo) {
        for (t, &g) in hypo.g.iter().enumerate() {
            if g > self.envelope[t] {
                self.envelope[t] = g;
            }
        }
    }

    fn score_envelope_ok(&self, g: &[f32], bestt: usize) -> bool {
        match self.config.score_envelope_width2 {
            Some(width) => g[bestt] >= self.envelope[bestt] - width,
            None => true,
        }
    }

    /* ------------------------------------------------------------ */
    /* acceptance                                                    */
    /* ------------------------------------------------------------ */

    fn acceptable(&self, hypo: &Hypo) -> bool {
        if hypo.bestt > 5 {
            return false;
        }
        match self.config.lm_kind {
            LmKind::Ngram => match self.dict.head_silwid {
                Some(bos) => hypo.seq.first() == Some(&bos),
                None => true,
            },
            LmKind::Grammar => {
                let cat = self.dict.word(hypo.seq[0]).category;
                self.catmat.map(|m| m.can_start(cat)).unwrap_or(true)
            }
        }
    }

    /* ------------------------------------------------------------ */
    /* initial hypotheses                                            */
    /* ------------------------------------------------------------ */

    fn initial_hypotheses(&mut self, scorer: &dyn AcousticScorer) -> Vec<Hypo> {
        let mut out = Vec::new();
        // virtual boundary column: only the frame past the end connects
        let mut g_right = vec![f32::NEG_INFINITY; self.frames + 1];
        g_right[self.frames] = 0.0;

        let last_words: Vec<WordId> = match self.config.lm_kind {
            LmKind::Ngram => match self.dict.tail_silwid {
                Some(eos) => vec![eos],
                None => self.final_trellis_words(),
            },
            LmKind::Grammar => self
                .final_trellis_words()
                .into_iter()
                .filter(|&w| {
                    let cat = self.dict.word(w).category;
                    self.catmat.map(|m| m.can_end(cat)).unwrap_or(true)
                })
                .collect(),
        };

        for w in last_words {
            let carried: Vec<WordId> = self.context_word.into_iter().collect();
            let lscore = match self.config.lm_kind {
                LmKind::Ngram => self
                    .lm
                    .map(|m| {
                        m.ngram(&carried, w) * self.config.lm_weight2 + self.config.lm_penalty2
                    })
                    .unwrap_or(0.0),
                LmKind::Grammar => self.config.penalty2 + self.dict.word(w).penalty,
            };
            let g = self.scan_word(w, &g_right, scorer, lscore);
            let (bestt, score) = match self.best_connection(&g) {
                Some(v) => v,
                None => continue,
            };
            let (last_arc, _) =
                self.create_arc(w, bestt, self.frames - 1, &g, score, lscore, 1.0, None);
            out.push(Hypo {
                seq: vec![w],
                score,
                g,
                bestt,
                endflag: false,
                cm: vec![1.0],
                lscore_total: lscore,
                last_arc,
            });
        }
        // the initial set is an expansion group too; normalize its
        // posteriors
        if out.len() > 1 {
            let max = out.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f64;
            for h in &out {
                sum += 10f64.powf((self.config.cm_alpha * (h.score - max)) as f64);
            }
            for h in &mut out {
                h.cm[0] =
                    (10f64.powf((self.config.cm_alpha * (h.score - max)) as f64) / sum) as f32;
            }
        }
        out
    }

    /// Words whose trellis entries reach the last frame.
    fn final_trellis_words(&self) -> Vec<WordId> {
        let mut words: Vec<WordId> = self
            .trellis
            .at_frame(self.frames - 1)
            .iter()
            .map(|&id| self.trellis.atom(id).wid)
            .collect();
        words.sort_unstable();
        words.dedup();
        words
    }

    /* ------------------------------------------------------------ */
    /* expansion                                                     */
    /* ------------------------------------------------------------ */

    fn expand(&mut self, hypo: &Hypo, scorer: &dyn AcousticScorer, stack: &mut HypoStack) {
        let candidates = self.next_words(hypo);
        if candidates.is_empty() {
            return;
        }

        // generate all successor hypotheses first; the local posterior is
        // computed over the whole sibling set
        let mut generated: Vec<(Hypo, bool)> = Vec::new();
        for (v, lscore) in candidates {
            let g_new = self.scan_word(v, &hypo.g, scorer, lscore);
            let (bestt, score) = match self.best_connection(&g_new) {
                Some(x) => x,
                None => continue,
            };
            if !self.score_envelope_ok(&g_new, bestt) {
                continue;
            }
            let right_frame = (hypo.bestt - 1) as usize;
            let (last_arc, merged) =
                self.create_arc(v, bestt, right_frame, &g_new, score, lscore, 0.0, hypo.last_arc);
            let mut seq = Vec::with_capacity(hypo.seq.len() + 1);
            seq.push(v);
            seq.extend_from_slice(&hypo.seq);
            let mut cm = Vec::with_capacity(hypo.cm.len() + 1);
            cm.push(0.0);
            cm.extend_from_slice(&hypo.cm);
            generated.push((
                Hypo {
                    seq,
                    score,
                    g: g_new,
                    bestt,
                    endflag: false,
                    cm,
                    lscore_total: hypo.lscore_total + lscore,
                    last_arc,
                },
                merged,
            ));
        }
        if generated.is_empty() {
            return;
        }

        // local posterior over the sibling set
        let max = generated
            .iter()
            .map(|(h, _)| h.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f64;
        for (h, _) in &generated {
            sum += 10f64.powf((self.config.cm_alpha * (h.score - max)) as f64);
        }
        for (h, _) in &mut generated {
            let p = (10f64.powf((self.config.cm_alpha * (h.score - max)) as f64) / sum) as f32;
            h.cm[0] = p;
            if let Some(arc) = h.last_arc {
                if let Some(graph) = self.graph.as_mut() {
                    graph.set_cm(arc, p);
                }
            }
        }

        for (h, merged) in generated {
            if h.cm[0] < self.config.cm_cut_thres {
                continue;
            }
            // a hypothesis whose newest arc merged into a saved one adds
            // nothing new to the graph; optionally stop expanding there
            if merged && self.config.graph_merge_stop {
                continue;
            }
            stack.push(h);
        }
    }

    /// Enumerate expansion candidates as `(word, weighted lscore)`.
    fn next_words(&self, hypo: &Hypo) -> Vec<(WordId, f32)> {
        let t0 = hypo.bestt;
        if t0 == 0 {
            return Vec::new();
        }
        // trellis words ending around the expansion point
        let center = t0 as i32 - 1;
        let range = self.config.lookup_range as i32;
        let mut found: Vec<WordId> = Vec::new();
        for t in (center - range).max(0)..=(center + range).min(self.frames as i32 - 1) {
            for &id in self.trellis.at_frame(t as usize) {
                found.push(self.trellis.atom(id).wid);
            }
        }
        found.sort_unstable();
        found.dedup();

        let mut out = Vec::new();
        match self.config.lm_kind {
            LmKind::Ngram => {
                let lm = match self.lm {
                    Some(lm) => lm,
                    None => return out,
                };
                // LM context: the existing sequence with transparent words
                // removed, most recent first
                let history: Vec<WordId> = hypo
                    .seq
                    .iter()
                    .copied()
                    .filter(|&w| !self.dict.is_transparent(w))
                    .collect();
                for v in found {
                    if self.dict.tail_silwid == Some(v) {
                        continue;
                    }
                    let p = lm.ngram(&history, v);
                    out.push((v, p * self.config.lm_weight2 + self.config.lm_penalty2));
                }
            }
            LmKind::Grammar => {
                let catmat = match self.catmat {
                    Some(c) => c,
                    None => return out,
                };
                // connect against the first non-pause word; a short pause
                // between words is transparent to the grammar
                let target = hypo
                    .seq
                    .iter()
                    .copied()
                    .find(|&w| !self.dict.is_transparent(w))
                    .unwrap_or(hypo.seq[0]);
                let target_cat = self.dict.word(target).category;
                for v in found {
                    // the connection target skips transparent pauses, so a
                    // candidate may attach either before the pause or
                    // directly before the following word
                    let cat = self.dict.word(v).category;
                    if catmat.can_connect(cat, target_cat) {
                        out.push((v, self.config.penalty2 + self.dict.word(v).penalty));
                    }
                }
            }
        }
        out
    }

    /// Best estimation point: the frame `t` maximizing `g[t] + h(t - 1)`,
    /// where `h` is the strongest trellis backscore at the frame before the
    /// suffix starts. `t == 0` covers the whole input and needs no `h`.
    fn best_connection(&self, g: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for t in 0..self.frames {
            if g[t] <= LOG_ZERO {
                continue;
            }
            let h = if t == 0 {
                0.0
            } else {
                let b = self.btmax[t - 1];
                if b == f32::NEG_INFINITY {
                    continue;
                }
                b
            };
            let f = g[t] + h;
            if best.map(|(_, s)| s < f).unwrap_or(true) {
                best = Some((t, f));
            }
        }
        best
    }

    /// Backward Viterbi: prepend word `w` to a suffix whose column is
    /// `g_right` and return the new column. `lscore` enters at the word
    /// boundary.
    fn scan_word(
        &self,
        w: WordId,
        g_right: &[f32],
        scorer: &dyn AcousticScorer,
        lscore: f32,
    ) -> Vec<f32> {
        let lat = WordLattice::new(self.dict, self.hmms, w, self.config.iwsp);
        let m = lat.emit.len();
        let frames = self.frames;

        // d[j] at the current frame; iterate frames backwards
        let mut d = vec![f32::NEG_INFINITY; m];
        let mut d_next = vec![f32::NEG_INFINITY; m];
        let mut g_new = vec![f32::NEG_INFINITY; frames + 1];

        for t in (0..frames).rev() {
            for j in 0..m {
                // continue into the suffix after emitting at t
                let mut best = f32::NEG_INFINITY;
                for &(pos, prob) in &lat.exits {
                    if pos == j {
                        let v = prob + g_right[t + 1] + lscore;
                        if v > best {
                            best = v;
                        }
                    }
                }
                // or continue within the word
                for &(from, to, prob) in &lat.arcs {
                    if from == j {
                        let v = prob + d_next[to];
                        if v > best {
                            best = v;
                        }
                    }
                }
                d[j] = if best == f32::NEG_INFINITY {
                    f32::NEG_INFINITY
                } else {
                    best + scorer.state_logprob(lat.emit[j], t)
                };
            }
            // entering the word at frame t
            let mut entry_best = f32::NEG_INFINITY;
            for &(pos, prob) in &lat.entries {
                let v = prob + d[pos];
                if v > entry_best {
                    entry_best = v;
                }
            }
            g_new[t] = entry_best;
            std::mem::swap(&mut d, &mut d_next);
            d.iter_mut().for_each(|v| *v = f32::NEG_INFINITY);
        }
        g_new
    }

    /* ------------------------------------------------------------ */
    /* graph arcs                                                    */
    /* ------------------------------------------------------------ */

    #[allow(clippy::too_many_arguments)]
    fn create_arc(
        &mut self,
        w: WordId,
        left_frame: usize,
        right_frame: usize,
        g: &[f32],
        fscore: f32,
        lscore: f32,
        cm: f32,
        right_context: Option<ArcId>,
    ) -> (Option<ArcId>, bool) {
        let graph = match self.graph.as_mut() {
            Some(g) => g,
            None => return (None, false),
        };
        if right_frame < left_frame {
            return (None, false);
        }
        let duration = (right_frame - left_frame + 1) as f32;
        let g_head = g[left_frame];
        let g_tail = g
            .get(right_frame + 1)
            .copied()
            .unwrap_or(f32::NEG_INFINITY);
        let amavg = if g_head > LOG_ZERO && g_tail > f32::NEG_INFINITY {
            (g_head - g_tail - lscore) / duration
        } else {
            0.0
        };
        let arc = GraphArc {
            wid: w,
            left_frame: left_frame as i32,
            right_frame: right_frame as i32,
            head_phone: self.dict.head_phone(w),
            tail_phone: self.dict.tail_phone(w),
            fscore_head: fscore,
            fscore_tail: fscore,
            gscore_head: g_head,
            gscore_tail: g_tail,
            lscore,
            amavg,
            cmscore: cm,
            left: Vec::new(),
            right: Vec::new(),
            exist: true,
            graph_id: 0,
            graph_cm: 0.0,
        };
        let (id, merged) = graph.save(arc, right_context);
        (Some(id), merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypo(score: f32) -> Hypo {
        Hypo {
            seq: vec![0],
            score,
            g: vec![score],
            bestt: 0,
            endflag: false,
            cm: vec![1.0],
            lscore_total: 0.0,
            last_arc: None,
        }
    }

    #[test]
    fn stack_pops_best_first() {
        let mut stack = HypoStack::new(10);
        for &s in &[-30.0, -10.0, -20.0] {
            stack.push(hypo(s));
        }
        assert_eq!(stack.pop_best().unwrap().score, -10.0);
        assert_eq!(stack.pop_best().unwrap().score, -20.0);
        assert_eq!(stack.pop_best().unwrap().score, -30.0);
        assert!(stack.pop_best().is_none());
    }

    #[test]
    fn full_stack_evicts_the_worst() {
        let mut stack = HypoStack::new(2);
        assert!(stack.push(hypo(-30.0)));
        assert!(stack.push(hypo(-10.0)));
        // better than the worst: evicts -30
        assert!(stack.push(hypo(-20.0)));
        // no better than the current worst: rejected
        assert!(!stack.push(hypo(-25.0)));
        assert_eq!(stack.pop_best().unwrap().score, -10.0);
        assert_eq!(stack.pop_best().unwrap().score, -20.0);
        assert!(stack.pop_best().is_none());
    }

    #[test]
    fn word_lattice_spans_all_emitting_states() {
        use crate::decoder::dict::{DictWord, Dictionary, CATEGORY_NONE};
        use crate::decoder::hmm::testing::linear_phone;

        let mut hmms = HmmSet::new(false);
        let p1 = hmms.add_phone(linear_phone("a", &[0, 1], 0.5));
        let p2 = hmms.add_phone(linear_phone("b", &[2], 0.5));
        let mut dict = Dictionary::new();
        let w = dict
            .add(DictWord {
                output: "ab".into(),
                name: "ab".into(),
                phones: vec![p1, p2],
                category: CATEGORY_NONE,
                penalty: 0.0,
            })
            .unwrap();

        let lat = WordLattice::new(&dict, &hmms, w, false);
        assert_eq!(lat.emit, vec![0, 1, 2]);
        assert_eq!(lat.entries.len(), 1);
        assert_eq!(lat.exits.len(), 1);
        // the exit leaves the final state of the last phone
        assert_eq!(lat.exits[0].0, 2);
    }
}

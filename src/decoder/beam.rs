//! Pass 1: frame-synchronous token-passing beam search on the tree lexicon.
//!
//! Tokens live in a double-buffered pool addressed by generation parity, so
//! each frame reads the previous generation without copying. Word ends
//! surviving the beam become trellis words; cross-word transitions re-enter
//! the tree at the word-head set with the language score applied, using the
//! single-sweep shortcut for 1-gram-factored heads.

use log::{debug, info};

use crate::decoder::config::{LmKind, SearchConfig};
use crate::decoder::dict::{Dictionary, WordId, WORD_INVALID};
use crate::decoder::hmm::{AcousticScorer, HmmSet, LOG_ZERO};
use crate::decoder::lexicon::{Factor, Lexicon, NodeId, OutProb};
use crate::decoder::lm::{BigramCache, CategoryMatrix, LanguageModel};
use crate::decoder::trellis::{Trellis, TrellisAtom, TrellisAtomId};

type TokenId = u32;
const TOKEN_UNDEF: TokenId = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Token {
    node: NodeId,
    score: f32,
    /// Newest completed word on this path.
    last_tre: Option<TrellisAtomId>,
    /// Newest content word, for cross-word LM context.
    last_cword: WordId,
    /// LM factoring contribution currently folded into `score`.
    last_lscore: f32,
}

/// Outcome of pass 1.
#[derive(Debug)]
pub struct Pass1Result {
    pub trellis: Trellis,
    /// Best word sequence by backtrace, empty on failure.
    pub best_seq: Vec<WordId>,
    pub best_score: f32,
    /// Last trellis word of the best path.
    pub best_atom: Option<TrellisAtomId>,
    pub frames: usize,
}

/// Per-frame diagnostic the short-pause segmenter consumes.
#[derive(Debug, Clone, Copy)]
pub struct FrameBest {
    pub word: WordId,
    pub score: f32,
}

pub struct BeamSearch<'a> {
    lex: &'a Lexicon,
    dict: &'a Dictionary,
    hmms: &'a HmmSet,
    config: &'a SearchConfig,
    lm: Option<&'a dyn LanguageModel>,
    catmat: Option<&'a dyn CategoryMatrix>,

    tokens: [Vec<Token>; 2],
    /// Token ids sorted by score at the end of each frame.
    order: [Vec<TokenId>; 2],
    /// Beam survivor count (prefix of `order`) per generation.
    beam: [usize; 2],
    tn: usize,
    /// Per-node token id in the current generation (1-best mode).
    node_token: Vec<TokenId>,
    /// Per-(node, last word) token map in word-pair mode.
    wpair_token: std::collections::HashMap<(NodeId, WordId), TokenId>,

    trellis: Trellis,
    cache: BigramCache,
    /// Best word end of the current frame, for the factoring sweep.
    wordend_best: Option<(f32, TrellisAtomId, WordId)>,
    /// Per-frame best word (for diagnostics and pause detection).
    pub frame_best: Vec<FrameBest>,
}

impl<'a> BeamSearch<'a> {
    pub fn new(
        lex: &'a Lexicon,
        dict: &'a Dictionary,
        hmms: &'a HmmSet,
        config: &'a SearchConfig,
        lm: Option<&'a dyn LanguageModel>,
        catmat: Option<&'a dyn CategoryMatrix>,
    ) -> Self {
        BeamSearch {
            lex,
            dict,
            hmms,
            config,
            lm,
            catmat,
            tokens: [Vec::new(), Vec::new()],
            order: [Vec::new(), Vec::new()],
            beam: [0, 0],
            tn: 0,
            node_token: vec![TOKEN_UNDEF; lex.num_nodes()],
            wpair_token: std::collections::HashMap::new(),
            trellis: Trellis::new(),
            cache: BigramCache::new(),
            wordend_best: None,
            frame_best: Vec::new(),
        }
    }

    /* ------------------------------------------------------------ */
    /* token pool                                                    */
    /* ------------------------------------------------------------ */

    /// Reset the node map entries set while building generation `gen`.
    /// Only the nodes actually touched need clearing.
    fn clear_map(&mut self, gen: usize) {
        for token in &self.tokens[gen] {
            self.node_token[token.node as usize] = TOKEN_UNDEF;
        }
        if self.config.wpair {
            self.wpair_token.clear();
        }
    }

    fn reset_pool(&mut self, gen: usize) {
        self.tokens[gen].clear();
        self.order[gen].clear();
        self.beam[gen] = 0;
    }

    fn wpair_key(&self, token: &Token) -> WordId {
        token
            .last_tre
            .map(|id| self.trellis.atom(id).wid)
            .unwrap_or(WORD_INVALID)
    }

    /// Pass a token to `node`, keeping only the best per node (or per
    /// (node, previous word) in word-pair mode).
    fn propagate(
        &mut self,
        node: NodeId,
        score: f32,
        last_tre: Option<TrellisAtomId>,
        last_cword: WordId,
        last_lscore: f32,
    ) {
        if score <= LOG_ZERO {
            return;
        }
        let tn = self.tn;
        let new_token = Token {
            node,
            score,
            last_tre,
            last_cword,
            last_lscore,
        };
        let existing = if self.config.wpair {
            let key = (
                node,
                last_tre
                    .map(|id| self.trellis.atom(id).wid)
                    .unwrap_or(WORD_INVALID),
            );
            self.wpair_token.get(&key).copied().unwrap_or(TOKEN_UNDEF)
        } else {
            self.node_token[node as usize]
        };
        if existing != TOKEN_UNDEF {
            let t = &mut self.tokens[tn][existing as usize];
            if t.score < score {
                *t = new_token;
            }
            return;
        }
        let id = self.tokens[tn].len() as TokenId;
        self.tokens[tn].push(new_token);
        if self.config.wpair {
            let key = (node, self.wpair_key(&new_token));
            self.wpair_token.insert(key, id);
        } else {
            self.node_token[node as usize] = id;
        }
    }

    /* ------------------------------------------------------------ */
    /* LM helpers                                                    */
    /* ------------------------------------------------------------ */

    /// Factoring LM value for a node, weighted and offset for pass 1.
    fn factoring_score(&mut self, node: NodeId, context: WordId) -> Option<f32> {
        let lm = self.lm?;
        let value = match &self.lex.node(node).factor {
            Factor::None => return None,
            Factor::Score(f) => *f,
            Factor::SingleWord(w) => self.cache.get(lm, context, *w),
            Factor::Successors(idx) => {
                let words = self.lex.successors(*idx);
                words
                    .iter()
                    .map(|&w| self.cache.get(lm, context, w))
                    .fold(f32::NEG_INFINITY, f32::max)
            }
        };
        Some(value * self.config.lm_weight + self.config.lm_penalty)
    }

    /* ------------------------------------------------------------ */
    /* transitions                                                   */
    /* ------------------------------------------------------------ */

    /// Word-internal propagation of one token along its node's arcs, with
    /// the factoring value swapped at branch entries.
    fn intra_word(&mut self, token: Token) {
        let node = self.lex.node(token.node);
        let self_a = node.self_a;
        let arcs: Vec<(NodeId, f32)> = node.forward_arcs(token.node).collect();

        if self_a > LOG_ZERO {
            self.propagate(
                token.node,
                token.score + self_a,
                token.last_tre,
                token.last_cword,
                token.last_lscore,
            );
        }
        for (to, a) in arcs {
            let mut score = token.score + a;
            let mut lscore = token.last_lscore;
            if self.config.lm_kind == LmKind::Ngram && to != token.node {
                if let Some(new_lscore) = self.factoring_score(to, token.last_cword) {
                    score = score - token.last_lscore + new_lscore;
                    lscore = new_lscore;
                }
            }
            self.propagate(to, score, token.last_tre, token.last_cword, lscore);
        }
    }

    /// Save the completed word on the trellis.
    fn save_trellis(&mut self, token: &Token, t: usize) -> TrellisAtomId {
        let word = self.lex.stend(token.node);
        let begin = token
            .last_tre
            .map(|id| self.trellis.atom(id).end_frame + 1)
            .unwrap_or(0);
        self.trellis.append(TrellisAtom {
            wid: word,
            begin_frame: begin,
            end_frame: t as i32 - 1,
            backscore: token.score,
            last: token.last_tre,
            lscore: token.last_lscore,
        })
    }

    /// Cross-word transition from a word-end token into the word-head set.
    /// Factored heads are skipped here; they are served in one sweep from
    /// the best word end afterwards.
    fn inter_word(&mut self, token: &Token, tre: TrellisAtomId) {
        let sword = self.lex.stend(token.node);
        if self.config.lm_kind == LmKind::Ngram && self.dict.tail_silwid == Some(sword) {
            // no transition out of the end-of-sentence word
            return;
        }
        let last_word = if self.dict.is_transparent(sword) {
            token.last_cword
        } else {
            sword
        };

        let mut base = token.score;
        if !self.lex.multipath {
            base += self.lex.wordend_a(sword);
        }

        // record the frame-best word end for the factoring sweep
        if self.config.lm_kind == LmKind::Ngram {
            let better = match &self.wordend_best {
                Some((s, _, _)) => *s < base,
                None => true,
            };
            if better {
                self.wordend_best = Some((base, tre, last_word));
            }
        }

        for i in 0..self.lex.startnodes.len() {
            let head = self.lex.startnodes[i];
            let mut lscore;
            match self.config.lm_kind {
                LmKind::Ngram => {
                    if self.lex.multipath {
                        if let Some(hs) = self.dict.head_silwid {
                            if self.lex.wordbegin(hs) == head {
                                continue;
                            }
                        }
                    }
                    match self.lex.node(head).factor {
                        Factor::SingleWord(w) => {
                            let lm = match self.lm {
                                Some(lm) => lm,
                                None => continue,
                            };
                            let p = self.cache.get(lm, last_word, w);
                            lscore = p * self.config.lm_weight + self.config.lm_penalty;
                        }
                        _ => continue, // shared head: single sweep later
                    }
                }
                LmKind::Grammar => {
                    let catmat = match self.catmat {
                        Some(c) => c,
                        None => continue,
                    };
                    let v = self.lex.start2wid[i];
                    let from_cat = self.dict.word(sword).category;
                    let to_cat = self.dict.word(v).category;
                    if !catmat.can_connect(from_cat, to_cat) {
                        continue;
                    }
                    lscore = self.config.penalty1;
                    lscore += self.dict.word(v).penalty;
                }
            }
            let score = base + lscore;
            self.enter_head(head, score, tre, last_word, lscore);
        }
    }

    /// Enter a word-head node; in the multipath topology the head is
    /// non-emitting, so entry goes one step further along its arcs.
    fn enter_head(
        &mut self,
        head: NodeId,
        score: f32,
        tre: TrellisAtomId,
        last_word: WordId,
        lscore: f32,
    ) {
        if self.lex.multipath {
            let node = self.lex.node(head);
            let self_a = node.self_a;
            let arcs: Vec<(NodeId, f32)> = node.forward_arcs(head).collect();
            if self_a > LOG_ZERO {
                self.propagate(head, score + self_a, Some(tre), last_word, lscore);
            }
            for (to, a) in arcs {
                self.propagate(to, score + a, Some(tre), last_word, lscore);
            }
        } else {
            self.propagate(head, score, Some(tre), last_word, lscore);
        }
    }

    /// Single-sweep cross-word transition into all 1-gram-factored heads
    /// from the best word end of this frame.
    fn inter_word_factoring(&mut self) {
        if self.config.lm_kind != LmKind::Ngram {
            return;
        }
        let (base, tre, last_word) = match self.wordend_best.take() {
            Some(v) => v,
            None => return,
        };
        for i in 0..self.lex.startnodes.len() {
            let head = self.lex.startnodes[i];
            if self.lex.multipath {
                if let Some(hs) = self.dict.head_silwid {
                    if self.lex.wordbegin(hs) == head {
                        continue;
                    }
                }
            }
            let lscore = match self.lex.node(head).factor {
                Factor::SingleWord(_) => continue, // handled per source
                _ => match self.factoring_score(head, last_word) {
                    Some(s) => s,
                    None => continue,
                },
            };
            self.enter_head(head, base + lscore, tre, last_word, lscore);
        }
    }

    /* ------------------------------------------------------------ */
    /* emission and pruning                                          */
    /* ------------------------------------------------------------ */

    fn emit(&mut self, t: usize, scorer: &dyn AcousticScorer) {
        let tn = self.tn;
        for id in 0..self.tokens[tn].len() {
            let node = self.tokens[tn][id].node;
            let add = match self.lex.node(node).out {
                OutProb::None => continue,
                OutProb::State(s) => scorer.state_logprob(s, t),
                OutProb::Set { cdset, loc } => {
                    let set = &self.hmms.cdset(cdset).state_sets[loc as usize];
                    scorer.max_set_logprob(set, t)
                }
            };
            self.tokens[tn][id].score += add;
        }
    }

    /// Order tokens by score and keep the best `beam_width`, additionally
    /// dropping tokens below the frame maximum minus the envelope width.
    fn prune(&mut self) {
        let tn = self.tn;
        let tokens = &self.tokens[tn];
        self.order[tn] = (0..tokens.len() as TokenId).collect();
        self.order[tn]
            .sort_by(|&a, &b| tokens[b as usize].score.total_cmp(&tokens[a as usize].score));
        let mut keep = tokens.len().min(self.config.beam_width);
        if let Some(width) = self.config.score_envelope_width {
            if keep > 0 {
                let best = tokens[self.order[tn][0] as usize].score;
                let floor = best - width;
                while keep > 1 && tokens[self.order[tn][keep - 1] as usize].score < floor {
                    keep -= 1;
                }
            }
        }
        self.beam[tn] = keep;
    }

    fn record_frame_best(&mut self) {
        let tn = self.tn;
        if self.beam[tn] == 0 {
            self.frame_best.push(FrameBest {
                word: WORD_INVALID,
                score: LOG_ZERO,
            });
            return;
        }
        let best = self.tokens[tn][self.order[tn][0] as usize];
        self.frame_best.push(FrameBest {
            word: self.word_hint(&best),
            score: best.score,
        });
    }

    /// Best guess of the word the token's node belongs to: the ending word
    /// at a leaf, the single successor on an unshared branch, or the last
    /// completed word.
    fn word_hint(&self, token: &Token) -> WordId {
        let stend = self.lex.stend(token.node);
        if stend != WORD_INVALID {
            return stend;
        }
        if let Factor::SingleWord(w) = self.lex.node(token.node).factor {
            return w;
        }
        token
            .last_tre
            .map(|id| self.trellis.atom(id).wid)
            .unwrap_or(WORD_INVALID)
    }

    /* ------------------------------------------------------------ */
    /* driving                                                       */
    /* ------------------------------------------------------------ */

    /// Place initial tokens. For the N-gram case decoding starts inside the
    /// sentence-head silence word; for grammars, at every allowed start.
    pub fn init(&mut self, scorer: &dyn AcousticScorer) {
        self.trellis = Trellis::new();
        self.cache.reset();
        self.frame_best.clear();
        self.tn = 0;
        self.clear_map(0);
        self.clear_map(1);
        self.reset_pool(0);
        self.reset_pool(1);
        self.wordend_best = None;

        match self.config.lm_kind {
            LmKind::Ngram => {
                if let Some(bos) = self.dict.head_silwid {
                    self.place_initial_word(bos, 0.0);
                }
            }
            LmKind::Grammar => {
                for i in 0..self.lex.startnodes.len() {
                    let w = self.lex.start2wid[i];
                    let cat = self.dict.word(w).category;
                    let allowed = self.catmat.map(|m| m.can_start(cat)).unwrap_or(true);
                    if !allowed {
                        continue;
                    }
                    let penalty = self.config.penalty1 + self.dict.word(w).penalty;
                    let head = self.lex.startnodes[i];
                    // multipath rests the token on the non-emitting begin
                    // node; plain enters the first state directly
                    self.propagate(head, penalty, None, WORD_INVALID, penalty);
                }
            }
        }

        if !self.lex.multipath {
            // plain topology: the initial tokens sit on emitting states and
            // consume frame 0 here
            self.emit(0, scorer);
        }
        self.prune();
        self.record_frame_best();
    }

    fn place_initial_word(&mut self, word: WordId, score: f32) {
        if self.lex.multipath {
            let begin = self.lex.wordbegin(word);
            self.propagate(begin, score, None, WORD_INVALID, 0.0);
        } else {
            // enter the first phone's states via its entry transitions
            let phone = self.hmms.phone(self.dict.head_phone(word));
            let base = self.lex.phone_offset(word, 0);
            for ato in 1..phone.state_num() - 1 {
                let p = phone.a(0, ato);
                if p > LOG_ZERO {
                    self.propagate(base + (ato - 1) as NodeId, score + p, None, WORD_INVALID, 0.0);
                }
            }
        }
    }

    /// Process one frame. For the plain topology the first call must be
    /// `t = 1` (frame 0 is consumed by `init`); multipath starts at 0.
    pub fn feed_frame(&mut self, t: usize, scorer: &dyn AcousticScorer) {
        self.step(t, scorer, false);
    }

    fn step(&mut self, t: usize, scorer: &dyn AcousticScorer, final_for_multipath: bool) {
        let tl = self.tn;
        self.tn = 1 - self.tn;
        let tn = self.tn;
        // the node map still holds last frame's entries; drop them before
        // building the new generation into the same map
        self.clear_map(tl);
        self.reset_pool(tn);
        self.wordend_best = None;

        if self.lex.multipath {
            // word-internal transitions first
            for i in 0..self.beam[tl] {
                let token = self.tokens[tl][self.order[tl][i] as usize];
                if token.score <= LOG_ZERO {
                    continue;
                }
                self.intra_word(token);
            }
            self.prune();
            // cross-word from word ends reached this step
            let bound = self.beam[tn];
            for i in 0..bound {
                let token = self.tokens[tn][self.order[tn][i] as usize];
                if self.lex.stend(token.node) == WORD_INVALID {
                    continue;
                }
                let tre = self.save_trellis(&token, t);
                if final_for_multipath {
                    continue;
                }
                self.inter_word(&token, tre);
            }
            if !final_for_multipath {
                self.inter_word_factoring();
            }
        } else {
            for i in 0..self.beam[tl] {
                let token = self.tokens[tl][self.order[tl][i] as usize];
                if token.score <= LOG_ZERO {
                    continue;
                }
                if self.lex.stend(token.node) != WORD_INVALID {
                    let tre = self.save_trellis(&token, t);
                    self.inter_word(&token, tre);
                }
                self.intra_word(token);
            }
            self.inter_word_factoring();
        }

        if !final_for_multipath {
            self.emit(t, scorer);
        }
        self.prune();
        self.record_frame_best();
    }

    /// Close the utterance after `frames` frames and extract the result.
    pub fn finalize(mut self, frames: usize, scorer: &dyn AcousticScorer) -> Pass1Result {
        if self.lex.multipath {
            // one more transition-only step so word ends at the last frame
            // are saved on the trellis
            self.step(frames, scorer, true);
        } else {
            // save word-end survivors of the final frame
            let tn = self.tn;
            let mut ends = Vec::new();
            for i in 0..self.beam[tn] {
                let token = self.tokens[tn][self.order[tn][i] as usize];
                if self.lex.stend(token.node) != WORD_INVALID {
                    ends.push(token);
                }
            }
            for token in ends {
                self.save_trellis(&token, frames);
            }
        }

        // pick the winner among final-frame word ends
        let mut best: Option<(f32, TrellisAtomId)> = None;
        for (id, atom) in (0..self.trellis.len() as TrellisAtomId)
            .map(|id| (id, self.trellis.atom(id)))
        {
            if atom.end_frame != frames as i32 - 1 {
                continue;
            }
            let acceptable = match self.config.lm_kind {
                LmKind::Ngram => match self.dict.tail_silwid {
                    Some(eos) => atom.wid == eos,
                    None => true,
                },
                LmKind::Grammar => {
                    let cat = self.dict.word(atom.wid).category;
                    self.catmat.map(|m| m.can_end(cat)).unwrap_or(true)
                }
            };
            if !acceptable {
                continue;
            }
            let score = atom.backscore;
            if best.map(|(s, _)| s < score).unwrap_or(true) {
                best = Some((score, id));
            }
        }

        let mut trellis = std::mem::take(&mut self.trellis);
        trellis.finalize(frames);

        match best {
            Some((score, id)) => {
                let seq = trellis.backtrace(id);
                debug!("pass1 best: {:?} score {:.2}", seq, score);
                Pass1Result {
                    trellis,
                    best_seq: seq,
                    best_score: score,
                    best_atom: Some(id),
                    frames,
                }
            }
            None => {
                info!("no survivor at the final frame on pass 1");
                Pass1Result {
                    trellis,
                    best_seq: Vec::new(),
                    best_score: LOG_ZERO,
                    best_atom: None,
                    frames,
                }
            }
        }
    }
}


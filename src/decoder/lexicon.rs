//! Tree lexicon: shared-prefix compilation of pronunciation HMMs.
//!
//! All dictionary words are merged into one flat node array sharing common
//! prefix phones. Nodes refer to each other only by index; the array grows
//! during construction, so the builder never holds references across
//! insertions. After `build` the structure is immutable and shared
//! read-only by the search passes.
//!
//! Two topologies are produced depending on the model set:
//!
//! * plain: each phone contributes its emitting states; the last emitting
//!   state of a word's last phone is the word-end node, and the exit
//!   probability is kept aside in `wordend_a`.
//! * multipath: phone models may skip states (including whole phones), so
//!   explicit non-emitting word begin/end nodes are created and skip arcs
//!   are expanded through phone boundaries. With `iwsp`, the short-pause
//!   model is appended at every word tail.

use log::{info, warn};
use std::cmp::Ordering;

use crate::decoder::config::{Factoring, LmKind, SearchConfig};
use crate::decoder::dict::{CategoryId, Dictionary, WordId, CATEGORY_NONE, WORD_INVALID};
use crate::decoder::hmm::{CdSetId, HmmSet, PhoneId, StateId, LOG_ZERO};
use crate::decoder::lm::LanguageModel;
use crate::decoder::DecodeError;

pub type NodeId = u32;
pub const NODE_INVALID: NodeId = u32::MAX;

/// How a node's emission is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutProb {
    /// Non-emitting (word begin/end nodes in multipath topology).
    None,
    /// A single defined state (word-internal phones).
    State(StateId),
    /// A context-dependent state set, maximized at scoring time. `loc` is
    /// the emitting position within the set.
    Set { cdset: CdSetId, loc: u16 },
}

/// Factoring payload on phone-head nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Factor {
    None,
    /// Precomputed 1-gram factoring value (max unigram over successors).
    Score(f32),
    /// Exactly one successor word: compute the exact LM score at run time.
    SingleWord(WordId),
    /// 2-gram factoring: index into the successor-list arena.
    Successors(u32),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub out: OutProb,
    /// Self-loop log-probability, `LOG_ZERO` when absent.
    pub self_a: f32,
    /// Transition to `id + 1`, `LOG_ZERO` when absent.
    pub next_a: f32,
    /// Remaining out-arcs as `(destination, log prob)`.
    pub extra: Vec<(NodeId, f32)>,
    /// Word ending at this node, `WORD_INVALID` otherwise.
    pub stend: WordId,
    pub factor: Factor,
}

impl Node {
    fn new() -> Self {
        Node {
            out: OutProb::None,
            self_a: LOG_ZERO,
            next_a: LOG_ZERO,
            extra: Vec::new(),
            stend: WORD_INVALID,
            factor: Factor::None,
        }
    }

    /// All outgoing arcs, self-loop excluded.
    pub fn forward_arcs(&self, id: NodeId) -> impl Iterator<Item = (NodeId, f32)> + '_ {
        let next = if self.next_a > LOG_ZERO {
            Some((id + 1, self.next_a))
        } else {
            None
        };
        next.into_iter().chain(self.extra.iter().copied())
    }
}

pub struct Lexicon {
    nodes: Vec<Node>,
    /// Word-head nodes reachable by cross-word transitions.
    pub startnodes: Vec<NodeId>,
    /// Word id per start node (category-tree mode only).
    pub start2wid: Vec<WordId>,
    wordbegin: Vec<NodeId>,
    wordend: Vec<NodeId>,
    /// First node of each phone of each word.
    offset: Vec<Vec<NodeId>>,
    /// Plain topology: word exit log-probability per word.
    wordend_a: Vec<f32>,
    /// Successor word lists for 2-gram factoring.
    sclist: Vec<Vec<WordId>>,
    pub multipath: bool,
    pub category_tree: bool,
}

struct Builder<'a> {
    lex: Lexicon,
    dict: &'a Dictionary,
    hmms: &'a HmmSet,
    config: &'a SearchConfig,
    ok: bool,
}

impl Lexicon {
    /// Build the tree lexicon over the whole dictionary.
    pub fn build(
        dict: &Dictionary,
        hmms: &HmmSet,
        lm: Option<&dyn LanguageModel>,
        config: &SearchConfig,
    ) -> Result<Lexicon, DecodeError> {
        if dict.is_empty() {
            return Err(DecodeError::Config("empty dictionary".into()));
        }
        let category_tree = config.lm_kind == LmKind::Grammar;
        let mut builder = Builder {
            lex: Lexicon {
                nodes: Vec::with_capacity(dict.len() * 8),
                startnodes: Vec::new(),
                start2wid: Vec::new(),
                wordbegin: vec![NODE_INVALID; dict.len()],
                wordend: vec![NODE_INVALID; dict.len()],
                offset: vec![Vec::new(); dict.len()],
                wordend_a: vec![LOG_ZERO; dict.len()],
                sclist: Vec::new(),
                multipath: hmms.multipath,
                category_tree,
            },
            dict,
            hmms,
            config,
            ok: true,
        };

        let order = builder.sorted_words();
        let mut prev: Option<WordId> = None;
        for &w in &order {
            let (matchlen, matchword) = match prev {
                Some(p) => (builder.match_len(p, w), p),
                None => (0, w),
            };
            builder.add_word(w, matchlen, matchword)?;
            prev = Some(w);
        }

        if !builder.lex.multipath {
            builder.calc_wordend_arcs();
            builder.duplicate_leaf_nodes();
        }
        builder.assign_factoring(lm);

        if !builder.ok {
            return Err(DecodeError::LexiconBuild);
        }
        let lex = builder.lex;
        info!(
            "lexicon built: {} nodes for {} words ({} start nodes)",
            lex.nodes.len(),
            dict.len(),
            lex.startnodes.len()
        );
        Ok(lex)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn stend(&self, id: NodeId) -> WordId {
        self.nodes[id as usize].stend
    }

    pub fn wordend(&self, w: WordId) -> NodeId {
        self.wordend[w as usize]
    }

    pub fn wordbegin(&self, w: WordId) -> NodeId {
        self.wordbegin[w as usize]
    }

    /// Word exit log-probability (plain topology only).
    pub fn wordend_a(&self, w: WordId) -> f32 {
        self.wordend_a[w as usize]
    }

    pub fn successors(&self, index: u32) -> &[WordId] {
        &self.sclist[index as usize]
    }

    /// First node of phone `j` of word `w`.
    pub fn phone_offset(&self, w: WordId, j: usize) -> NodeId {
        self.offset[w as usize][j]
    }

    /// All node ids on the path of word `w`, in order.
    pub fn word_path(&self, w: WordId, dict: &Dictionary, hmms: &HmmSet) -> Vec<NodeId> {
        let mut path = Vec::new();
        if self.multipath {
            path.push(self.wordbegin[w as usize]);
        }
        for (j, &ph) in dict.word(w).phones.iter().enumerate() {
            let base = self.offset[w as usize][j];
            let n = hmms.phone(ph).state_num() - 2;
            for k in 0..n {
                path.push(base + k as NodeId);
            }
        }
        path.push(self.wordend[w as usize]);
        path.dedup();
        path
    }
}

impl<'a> Builder<'a> {
    /// Sort words by category, then phone sequence, so shared prefixes are
    /// adjacent and category trees never interleave.
    fn sorted_words(&self) -> Vec<WordId> {
        let mut order: Vec<WordId> = self.dict.ids().collect();
        let dict = self.dict;
        let category_tree = self.lex.category_tree;
        order.sort_by(|&a, &b| {
            let wa = dict.word(a);
            let wb = dict.word(b);
            if category_tree {
                match wa.category.cmp(&wb.category) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            wa.phones.cmp(&wb.phones)
        });
        order
    }

    /// Longest shared prefix length (in phones) with the previously
    /// inserted word. Sorted insertion makes the previous word the best
    /// match in the tree.
    fn match_len(&self, prev: WordId, w: WordId) -> usize {
        let pa = &self.dict.word(prev).phones;
        let pb = &self.dict.word(w).phones;
        if self.lex.category_tree
            && self.dict.word(prev).category != self.dict.word(w).category
        {
            return 0;
        }
        let mut n = 0;
        while n < pa.len() && n < pb.len() && pa[n] == pb[n] {
            n += 1;
        }
        n
    }

    fn new_node(&mut self) -> NodeId {
        let id = self.lex.nodes.len() as NodeId;
        self.lex.nodes.push(Node::new());
        id
    }

    /// Register an arc, preferring the packed self/next slots.
    fn add_arc(&mut self, from: NodeId, prob: f32, to: NodeId) {
        let node = &mut self.lex.nodes[from as usize];
        if to == from && node.self_a <= LOG_ZERO {
            node.self_a = prob;
        } else if to == from + 1 && node.next_a <= LOG_ZERO {
            node.next_a = prob;
        } else {
            node.extra.push((to, prob));
        }
    }

    /// Pick the output assignment for emitting position `k` (0-based) of
    /// phone `j` of word `w`.
    fn out_for(&mut self, w: WordId, j: usize, k: usize) -> OutProb {
        let word = self.dict.word(w);
        let phone = self.hmms.phone(word.phones[j]);
        let wlen = word.phones.len();
        let last = j == wlen - 1;
        let first = j == 0;

        if (last && wlen > 1) || (first && last) {
            // word-boundary phone: bind to a context-dependent set
            let name = phone.name.clone();
            let cdset = self.lookup_cdset(&name, word.category, w);
            match cdset {
                Some(cdset) => {
                    return OutProb::Set {
                        cdset,
                        loc: k as u16,
                    }
                }
                None => {
                    self.ok = false;
                    return OutProb::State(phone.states[k]);
                }
            }
        }
        if first && wlen > 1 {
            // head phone: right context undetermined until the next word;
            // use the phone's context set when one is registered
            if let Some(cdset) = self.hmms.cdset_by_name(&phone.name) {
                return OutProb::Set {
                    cdset,
                    loc: k as u16,
                };
            }
        }
        OutProb::State(phone.states[k])
    }

    fn lookup_cdset(
        &mut self,
        name: &str,
        category: CategoryId,
        w: WordId,
    ) -> Option<CdSetId> {
        if self.lex.category_tree && category != CATEGORY_NONE {
            if let Some(id) = self.hmms.cdset_with_category(name, category) {
                return Some(id);
            }
            if let Some(id) = self.hmms.cdset_by_name(name) {
                warn!(
                    "no cdset for [{}::{:04}], fallback to [{}]",
                    name, category, name
                );
                return Some(id);
            }
        } else if let Some(id) = self.hmms.cdset_by_name(name) {
            return Some(id);
        }
        warn!("at word #{}: no cdset found for [{}]", w, name);
        None
    }

    fn add_word(
        &mut self,
        w: WordId,
        matchlen: usize,
        matchword: WordId,
    ) -> Result<(), DecodeError> {
        if self.lex.multipath {
            self.add_word_multipath(w, matchlen, matchword)
        } else {
            self.add_word_plain(w, matchlen, matchword)
        }
    }

    /* ---------------- plain topology ---------------- */

    fn add_word_plain(
        &mut self,
        w: WordId,
        matchlen: usize,
        matchword: WordId,
    ) -> Result<(), DecodeError> {
        let phones = self.dict.word(w).phones.clone();
        let wlen = phones.len();
        let add_head = matchlen;

        // share prefix offsets
        let mut offsets = vec![NODE_INVALID; wlen];
        for j in 0..matchlen {
            offsets[j] = self.lex.offset[matchword as usize][j];
        }

        // create nodes for the unshared phones
        for (j, &ph) in phones.iter().enumerate().skip(add_head) {
            let phone = self.hmms.phone(ph).clone();
            let emitting = phone.state_num() - 2;
            let base = self.lex.nodes.len() as NodeId;
            offsets[j] = base;
            for k in 0..emitting {
                let id = self.new_node();
                debug_assert_eq!(id, base + k as NodeId);
                let out = self.out_for(w, j, k);
                self.lex.nodes[id as usize].out = out;
            }
            // wire transitions between emitting states; the exit from the
            // very last state of the word is kept in wordend_a instead
            for k in 0..emitting {
                let from = base + k as NodeId;
                let row = k + 1;
                for ato in 1..phone.state_num() {
                    let prob = phone.a(row, ato);
                    if prob <= LOG_ZERO {
                        continue;
                    }
                    if j == wlen - 1 && ato == phone.state_num() - 1 {
                        // the word exit probability lives in wordend_a; a
                        // skip-to-exit from an earlier state needs the
                        // multipath topology
                        if k < emitting - 1 {
                            warn!(
                                "phone {} skips to exit; use a multipath model set",
                                phone.name
                            );
                            self.ok = false;
                        }
                        continue;
                    }
                    let to = base + (ato - 1) as NodeId;
                    self.add_arc(from, prob, to);
                }
            }
        }
        self.lex.offset[w as usize] = offsets;

        // word head registration: with an N-gram, the sentence-head silence
        // is entered only at initialization, not by cross-word transitions
        if matchlen == 0 {
            let is_ngram_head_sil =
                self.config.lm_kind == LmKind::Ngram && self.dict.head_silwid == Some(w);
            if !is_ngram_head_sil {
                let head = self.lex.offset[w as usize][0];
                self.lex.startnodes.push(head);
                if self.lex.category_tree {
                    self.lex.start2wid.push(w);
                }
            }
        }

        // link the shared prefix into the new part
        if matchlen > 0 && add_head < wlen {
            let shared_phone = self.hmms.phone(self.dict.word(matchword).phones[matchlen - 1]);
            let emitting = shared_phone.state_num() - 2;
            let from = self.lex.offset[matchword as usize][matchlen - 1] + (emitting - 1) as NodeId;
            let prob = shared_phone.a(shared_phone.state_num() - 2, shared_phone.state_num() - 1);
            let to = self.lex.offset[w as usize][add_head];
            self.add_arc(from, prob, to);
        }

        // word end bookkeeping
        let last_phone = self.hmms.phone(phones[wlen - 1]);
        let end = self.lex.offset[w as usize][wlen - 1]
            + (last_phone.state_num() - 2 - 1) as NodeId;
        self.lex.wordend[w as usize] = end;
        self.lex.wordbegin[w as usize] = self.lex.offset[w as usize][0];
        self.lex.nodes[end as usize].stend = w;
        Ok(())
    }

    /* ---------------- multipath topology ---------------- */

    /// Collect `(node, accumulated prob)` pairs from which the exit of
    /// phone `pos` of word `w` is reachable, following whole-phone skip
    /// chains backwards. `pos == None` yields the word-begin node.
    fn out_trans_list(
        &self,
        w: WordId,
        pos: Option<usize>,
        acc: f32,
        out: &mut Vec<(NodeId, f32)>,
    ) {
        let pos = match pos {
            None => {
                out.push((self.lex.wordbegin[w as usize], acc));
                return;
            }
            Some(p) => p,
        };
        let phone = self.hmms.phone(self.dict.word(w).phones[pos]);
        let base = self.lex.offset[w as usize][pos];
        let exit = phone.state_num() - 1;
        for k in 1..exit {
            let prob = phone.a(k, exit);
            if prob > LOG_ZERO {
                out.push((base + (k - 1) as NodeId, acc + prob));
            }
        }
        let skip = phone.a(0, exit);
        if skip > LOG_ZERO {
            let prev = if pos == 0 { None } else { Some(pos - 1) };
            self.out_trans_list(w, prev, acc + skip, out);
        }
    }

    fn add_word_multipath(
        &mut self,
        w: WordId,
        matchlen: usize,
        matchword: WordId,
    ) -> Result<(), DecodeError> {
        let phones = self.dict.word(w).phones.clone();
        let wlen = phones.len();
        let add_head = matchlen;
        let new_phones = wlen - add_head;

        let mut offsets = vec![NODE_INVALID; wlen];
        for j in 0..matchlen {
            offsets[j] = self.lex.offset[matchword as usize][j];
        }

        // word-begin node
        if matchlen == 0 {
            let begin = self.new_node();
            self.lex.wordbegin[w as usize] = begin;
            self.lex.startnodes.push(begin);
            if self.lex.category_tree {
                self.lex.start2wid.push(w);
            }
        } else {
            self.lex.wordbegin[w as usize] = self.lex.wordbegin[matchword as usize];
        }

        // sources feeding the next phone: (node, accumulated prob)
        let mut out_prev: Vec<(NodeId, f32)> = Vec::new();
        if matchlen == 0 {
            out_prev.push((self.lex.wordbegin[w as usize], 0.0));
        } else {
            // sharing includes the prefix's appended short pause, if any
            let mut list = Vec::new();
            self.out_trans_list(matchword, Some(matchlen - 1), 0.0, &mut list);
            out_prev = list;
        }

        // create emitting nodes for new phones
        for (j, &ph) in phones.iter().enumerate().skip(add_head) {
            let phone = self.hmms.phone(ph).clone();
            let emitting = phone.state_num() - 2;
            let base = self.lex.nodes.len() as NodeId;
            offsets[j] = base;
            for k in 0..emitting {
                let id = self.new_node();
                let out = self.out_for(w, j, k);
                self.lex.nodes[id as usize].out = out;
            }

            // wire entry arcs (expanding through the accumulated sources)
            let exit = phone.state_num() - 1;
            let mut out_next: Vec<(NodeId, f32)> = Vec::new();
            for ato in 1..=exit {
                let prob = phone.a(0, ato);
                if prob <= LOG_ZERO {
                    continue;
                }
                if ato == exit {
                    // whole-phone skip: carry sources to the next phone
                    for &(from, a) in &out_prev {
                        out_next.push((from, a + prob));
                    }
                } else {
                    for &(from, a) in out_prev.clone().iter() {
                        self.add_arc(from, a + prob, base + (ato - 1) as NodeId);
                    }
                }
            }
            // internal arcs
            for k in 1..=emitting {
                for ato in 1..=exit {
                    let prob = phone.a(k, ato);
                    if prob <= LOG_ZERO {
                        continue;
                    }
                    let from = base + (k - 1) as NodeId;
                    if ato == exit {
                        out_next.push((from, prob));
                    } else {
                        self.add_arc(from, prob, base + (ato - 1) as NodeId);
                    }
                }
            }
            out_prev = out_next;
        }
        self.lex.offset[w as usize] = offsets;

        // inter-word short pause at the word tail
        if self.config.iwsp && new_phones > 0 {
            if let Some(sp) = self.hmms.sp {
                out_prev = self.append_short_pause(sp, out_prev)?;
            }
        }

        // word-end node
        let end = self.new_node();
        self.lex.wordend[w as usize] = end;
        self.lex.nodes[end as usize].stend = w;
        for &(from, a) in &out_prev {
            self.add_arc(from, a, end);
        }

        // reject words whose whole phone chain can be skipped
        if matchlen == 0 {
            let mut list = Vec::new();
            self.out_trans_list(w, Some(wlen - 1), 0.0, &mut list);
            if list.iter().any(|&(n, _)| n == self.lex.wordbegin[w as usize]) {
                warn!(
                    "word #{} ({}) has a word-skipping transition; not supported",
                    w,
                    self.dict.word(w).name
                );
                self.ok = false;
            }
        }
        Ok(())
    }

    /// Append the short-pause model after the last phone, with the skip
    /// path forced so the pause stays optional.
    fn append_short_pause(
        &mut self,
        sp: PhoneId,
        out_prev: Vec<(NodeId, f32)>,
    ) -> Result<Vec<(NodeId, f32)>, DecodeError> {
        let phone = self.hmms.phone(sp).clone();
        let penalty = self.hmms.iwsp_penalty;
        let emitting = phone.state_num() - 2;
        let exit = phone.state_num() - 1;
        let base = self.lex.nodes.len() as NodeId;
        for k in 0..emitting {
            let id = self.new_node();
            self.lex.nodes[id as usize].out = match self.hmms.cdset_by_name(&phone.name) {
                Some(cdset) => OutProb::Set {
                    cdset,
                    loc: k as u16,
                },
                None => OutProb::State(phone.states[k]),
            };
        }

        let mut out_next: Vec<(NodeId, f32)> = Vec::new();
        for ato in 1..=exit {
            let prob = phone.a(0, ato);
            if prob <= LOG_ZERO {
                continue;
            }
            let prob = prob + penalty;
            if ato == exit {
                for &(from, a) in &out_prev {
                    out_next.push((from, a + prob));
                }
            } else {
                for &(from, a) in out_prev.clone().iter() {
                    self.add_arc(from, a + prob, base + (ato - 1) as NodeId);
                }
            }
        }
        if phone.a(0, exit) <= LOG_ZERO {
            // no model skip: force a free bypass so the pause cannot block
            // the original path
            for &(from, a) in &out_prev {
                out_next.push((from, a));
            }
        }
        for k in 1..=emitting {
            for ato in 1..=exit {
                let prob = phone.a(k, ato);
                if prob <= LOG_ZERO {
                    continue;
                }
                let from = base + (k - 1) as NodeId;
                if ato == exit {
                    out_next.push((from, prob));
                } else {
                    self.add_arc(from, prob, base + (ato - 1) as NodeId);
                }
            }
        }
        Ok(out_next)
    }

    /* ---------------- post passes ---------------- */

    /// Plain topology: record each word's exit probability.
    fn calc_wordend_arcs(&mut self) {
        for w in self.dict.ids() {
            let phone = self.hmms.phone(self.dict.tail_phone(w));
            let n = phone.state_num();
            self.lex.wordend_a[w as usize] = phone.a(n - 2, n - 1);
        }
    }

    /// Make every word's end node a unique leaf. A word whose end node is
    /// claimed by another word (homophone) or continues into other words
    /// (embedded word) gets a duplicated leaf with all incoming arcs
    /// mirrored.
    fn duplicate_leaf_nodes(&mut self) {
        let mut duplicated = 0;
        let mut marked = vec![false; self.lex.nodes.len()];
        for w in self.dict.ids() {
            let end = self.lex.wordend[w as usize];
            if marked[end as usize] {
                // homophone: a word already owns this leaf
                self.duplicate_state(end, w);
                duplicated += 1;
                continue;
            }
            marked[end as usize] = true;

            // arcs the phone model would give its last state vs arcs the
            // node actually has; a surplus means the node continues into
            // other words and is no clean word tail
            let phone = self.hmms.phone(self.dict.tail_phone(w));
            let last = phone.state_num() - 2;
            let narc_model = (1..phone.state_num() - 1)
                .filter(|&i| phone.a(last, i) > LOG_ZERO)
                .count();
            let node = &self.lex.nodes[end as usize];
            let mut narc = node.extra.len();
            if node.self_a > LOG_ZERO {
                narc += 1;
            }
            if node.next_a > LOG_ZERO {
                narc += 1;
            }
            if narc != narc_model {
                self.duplicate_state(end, w);
                self.lex.nodes[end as usize].stend = WORD_INVALID;
                duplicated += 1;
            } else {
                self.lex.nodes[end as usize].stend = w;
            }
        }
        if duplicated > 0 {
            info!("{} leaf node(s) duplicated for unique word ends", duplicated);
        }
    }

    /// Copy `end` into a fresh leaf owned by `word`, mirroring the self
    /// loop and every incoming arc. The copy gets no outgoing arcs.
    fn duplicate_state(&mut self, end: NodeId, word: WordId) {
        let new_id = self.lex.nodes.len() as NodeId;
        let mut copy = Node::new();
        copy.out = self.lex.nodes[end as usize].out;
        copy.self_a = self.lex.nodes[end as usize].self_a;
        copy.stend = word;
        self.lex.nodes.push(copy);

        for from in 0..new_id {
            let (mirror_next, mirror_extra): (f32, Vec<f32>) = {
                let node = &self.lex.nodes[from as usize];
                let next = if from + 1 == end { node.next_a } else { LOG_ZERO };
                let extra = node
                    .extra
                    .iter()
                    .filter(|&&(to, _)| to == end)
                    .map(|&(_, p)| p)
                    .collect();
                (next, extra)
            };
            if mirror_next > LOG_ZERO {
                self.add_arc(from, mirror_next, new_id);
            }
            for prob in mirror_extra {
                self.add_arc(from, prob, new_id);
            }
        }
        self.lex.wordend[word as usize] = new_id;
    }

    /// Attach successor lists / factoring values to phone-head nodes.
    fn assign_factoring(&mut self, lm: Option<&dyn LanguageModel>) {
        if self.lex.category_tree {
            // category trees apply the grammar constraint at word ends
            return;
        }
        // collect words passing through each phone-head node
        let mut successors: Vec<Vec<WordId>> = vec![Vec::new(); self.lex.nodes.len()];
        for w in self.dict.ids() {
            for j in 0..self.dict.word(w).phones.len() {
                let head = self.lex.offset[w as usize][j];
                successors[head as usize].push(w);
            }
            if self.lex.multipath {
                let begin = self.lex.wordbegin[w as usize];
                successors[begin as usize].push(w);
            }
        }
        for (id, words) in successors.into_iter().enumerate() {
            if words.is_empty() {
                continue;
            }
            let factor = if words.len() == 1 {
                Factor::SingleWord(words[0])
            } else {
                match self.config.factoring {
                    Factoring::Unigram => {
                        let best = words
                            .iter()
                            .map(|&w| lm.map(|m| m.unigram(w)).unwrap_or(0.0))
                            .fold(f32::NEG_INFINITY, f32::max);
                        Factor::Score(best)
                    }
                    Factoring::Bigram => {
                        let index = self.lex.sclist.len() as u32;
                        self.lex.sclist.push(words);
                        Factor::Successors(index)
                    }
                }
            };
            self.lex.nodes[id].factor = factor;
        }
    }
}


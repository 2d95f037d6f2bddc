//! Word graph generation and post-processing.
//!
//! Arcs are created while the stack decoder expands hypotheses; a new arc
//! that matches a saved one (same word, span and boundary phones) merges
//! into it instead, so the graph grows by context-set updates rather than
//! duplication. After the search, the arc set is purged, boundary-adjusted,
//! merged, topologically numbered and annotated with forward-backward
//! posteriors. All cross-references are arena indices; merging rewrites
//! ids, never pointers.

use log::{debug, info};
use std::fmt;

use crate::decoder::config::SearchConfig;
use crate::decoder::dict::{Dictionary, WordId};
use crate::decoder::hmm::PhoneId;

pub type ArcId = u32;

#[derive(Debug, Clone)]
pub struct GraphArc {
    pub wid: WordId,
    pub left_frame: i32,
    pub right_frame: i32,
    pub head_phone: PhoneId,
    pub tail_phone: PhoneId,
    /// Estimated sentence score when this arc's boundary was fixed.
    pub fscore_head: f32,
    pub fscore_tail: f32,
    /// Viterbi scores at the arc boundaries.
    pub gscore_head: f32,
    pub gscore_tail: f32,
    pub lscore: f32,
    /// Average per-frame acoustic score within the arc.
    pub amavg: f32,
    /// Confidence assigned by the search.
    pub cmscore: f32,
    pub left: Vec<ArcId>,
    pub right: Vec<ArcId>,
    /// Cleared when the arc is erased by a post-processing pass.
    pub exist: bool,
    /// Sequential id after topological numbering.
    pub graph_id: u32,
    /// Posterior from the forward-backward pass.
    pub graph_cm: f32,
}

impl GraphArc {
    fn duration(&self) -> i32 {
        self.right_frame - self.left_frame + 1
    }

    fn same_span(&self, other: &GraphArc) -> bool {
        self.wid == other.wid
            && self.left_frame == other.left_frame
            && self.right_frame == other.right_frame
    }

    fn same_boundary_phones(&self, other: &GraphArc) -> bool {
        self.head_phone == other.head_phone && self.tail_phone == other.tail_phone
    }
}

/// Arena of arcs being collected during the search.
pub struct GraphArena {
    arcs: Vec<GraphArc>,
}

impl GraphArena {
    pub fn new() -> Self {
        GraphArena { arcs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn arc(&self, id: ArcId) -> &GraphArc {
        &self.arcs[id as usize]
    }

    /// Save an arc, merging into an equal existing arc when possible.
    /// Returns the resulting id and whether a merge happened.
    pub fn save(&mut self, arc: GraphArc, right_context: Option<ArcId>) -> (ArcId, bool) {
        for id in 0..self.arcs.len() {
            let existing = &self.arcs[id];
            if existing.exist && existing.same_span(&arc) && existing.same_boundary_phones(&arc) {
                let id = id as ArcId;
                if let Some(r) = right_context {
                    self.connect(id, r, arc.lscore);
                }
                return (id, true);
            }
        }
        let id = self.arcs.len() as ArcId;
        self.arcs.push(arc);
        if let Some(r) = right_context {
            self.connect(id, r, self.arcs[id as usize].lscore);
        }
        (id, false)
    }

    /// Update the search confidence on an arc (keep the best seen).
    pub fn set_cm(&mut self, id: ArcId, cm: f32) {
        let arc = &mut self.arcs[id as usize];
        if cm > arc.cmscore {
            arc.cmscore = cm;
        }
    }

    /// Link `left` before `right` on the time axis.
    pub fn connect(&mut self, left: ArcId, right: ArcId, _lscore: f32) {
        if !self.arcs[right as usize].left.contains(&left) {
            self.arcs[right as usize].left.push(left);
        }
        if !self.arcs[left as usize].right.contains(&right) {
            self.arcs[left as usize].right.push(right);
        }
    }

    /// Run the whole post-processing pipeline and freeze the graph.
    pub fn finish(mut self, config: &SearchConfig, frames: usize) -> WordGraph {
        let before = self.arcs.len();
        self.purge_leaves(frames);
        if let Some(limit) = config.graph_depth_cut {
            self.depth_cut(limit, frames);
        }
        self.adjust_boundaries(config.graph_boundary_loop_limit);
        self.purge_leaves(frames);
        self.merge_exact();
        self.merge_same_boundary();
        if let Some(k) = config.graph_neighbor_merge {
            self.merge_neighbors(k as i32);
        }
        self.purge_leaves(frames);
        let order = self.assign_ids();
        self.forward_backward(config.cm_alpha, frames, &order);

        let arcs: Vec<GraphArc> = self.arcs.into_iter().filter(|a| a.exist).collect();
        info!("word graph: {} arcs ({} before post-processing)", arcs.len(), before);
        WordGraph { arcs, frames }
    }

    /* ------------------------------------------------------------ */

    fn erase(&mut self, id: ArcId) {
        self.arcs[id as usize].exist = false;
        let lefts = self.arcs[id as usize].left.clone();
        let rights = self.arcs[id as usize].right.clone();
        for l in lefts {
            self.arcs[l as usize].right.retain(|&r| r != id);
        }
        for r in rights {
            self.arcs[r as usize].left.retain(|&l| l != id);
        }
    }

    /// Remove arcs lying on no start-to-end path, iterating until stable.
    /// Sentence-head arcs may begin a few frames late (the acceptance
    /// margin), so anchoring tolerates that slack.
    fn purge_leaves(&mut self, frames: usize) {
        const HEAD_SLACK_FRAMES: i32 = 5;
        let last = frames as i32 - 1;
        loop {
            let mut removed = 0;
            for id in 0..self.arcs.len() as ArcId {
                let arc = &self.arcs[id as usize];
                if !arc.exist {
                    continue;
                }
                let live_left = arc.left_frame <= HEAD_SLACK_FRAMES
                    || arc.left.iter().any(|&l| self.arcs[l as usize].exist);
                let live_right = arc.right_frame >= last
                    || arc.right.iter().any(|&r| self.arcs[r as usize].exist);
                if !live_left || !live_right {
                    self.erase(id);
                    removed += 1;
                }
            }
            if removed == 0 {
                break;
            }
            debug!("graph purge: removed {} arcs", removed);
        }
    }

    /// Bound the number of arcs crossing any frame, dropping the worst.
    fn depth_cut(&mut self, limit: usize, frames: usize) {
        let mut depth = vec![0usize; frames];
        for arc in self.arcs.iter().filter(|a| a.exist) {
            for t in arc.left_frame.max(0)..=arc.right_frame.min(frames as i32 - 1) {
                depth[t as usize] += 1;
            }
        }
        let mut candidates: Vec<ArcId> = (0..self.arcs.len() as ArcId)
            .filter(|&id| self.arcs[id as usize].exist)
            .collect();
        // worst first
        candidates.sort_by(|&a, &b| {
            self.arcs[a as usize]
                .fscore_head
                .total_cmp(&self.arcs[b as usize].fscore_head)
        });
        for id in candidates {
            let arc = &self.arcs[id as usize];
            let over = (arc.left_frame.max(0)..=arc.right_frame.min(frames as i32 - 1))
                .any(|t| depth[t as usize] > limit);
            if !over {
                continue;
            }
            for t in arc.left_frame.max(0)..=arc.right_frame.min(frames as i32 - 1) {
                depth[t as usize] -= 1;
            }
            self.erase(id);
        }
    }

    /// Align every arc's left boundary with the right boundaries of its
    /// left contexts, duplicating per distinct boundary, up to a fixed
    /// point or the iteration bound.
    fn adjust_boundaries(&mut self, loop_limit: usize) {
        for round in 0..loop_limit {
            let mut changed = 0;
            for id in 0..self.arcs.len() as ArcId {
                if !self.arcs[id as usize].exist {
                    continue;
                }
                let lefts = self.arcs[id as usize].left.clone();
                if lefts.is_empty() {
                    continue;
                }
                // group left contexts by their implied boundary
                let mut boundaries: Vec<i32> = lefts
                    .iter()
                    .filter(|&&l| self.arcs[l as usize].exist)
                    .map(|&l| self.arcs[l as usize].right_frame + 1)
                    .collect();
                boundaries.sort_unstable();
                boundaries.dedup();
                if boundaries.is_empty() {
                    continue;
                }
                let own = self.arcs[id as usize].left_frame;
                if boundaries == [own] {
                    continue;
                }

                // keep the first boundary on this arc, split off the rest
                for &b in &boundaries {
                    let matching: Vec<ArcId> = lefts
                        .iter()
                        .copied()
                        .filter(|&l| {
                            self.arcs[l as usize].exist
                                && self.arcs[l as usize].right_frame + 1 == b
                        })
                        .collect();
                    if b == boundaries[0] {
                        let arc = &mut self.arcs[id as usize];
                        arc.left_frame = b;
                        arc.left = matching;
                        continue;
                    }
                    if b > self.arcs[id as usize].right_frame {
                        continue;
                    }
                    let mut copy = self.arcs[id as usize].clone();
                    copy.left_frame = b;
                    copy.left = matching.clone();
                    let new_id = self.arcs.len() as ArcId;
                    let rights = copy.right.clone();
                    self.arcs.push(copy);
                    for l in matching {
                        self.arcs[l as usize].right.push(new_id);
                    }
                    for r in rights {
                        self.arcs[r as usize].left.push(new_id);
                    }
                    changed += 1;
                }
                // a boundary may have pushed left past right
                if self.arcs[id as usize].left_frame > self.arcs[id as usize].right_frame {
                    self.erase(id);
                    changed += 1;
                }
            }
            // drop arcs invalidated by adjustment
            for id in 0..self.arcs.len() as ArcId {
                if self.arcs[id as usize].exist
                    && self.arcs[id as usize].left_frame > self.arcs[id as usize].right_frame
                {
                    self.erase(id);
                    changed += 1;
                }
            }
            if changed == 0 {
                debug!("graph boundary adjustment converged after {} round(s)", round);
                return;
            }
        }
        debug!("graph boundary adjustment hit the iteration bound");
    }

    fn merge_into(&mut self, keep: ArcId, drop: ArcId) {
        let lefts = self.arcs[drop as usize].left.clone();
        let rights = self.arcs[drop as usize].right.clone();
        for l in lefts {
            if self.arcs[l as usize].exist && l != keep {
                self.connect(l, keep, self.arcs[keep as usize].lscore);
            }
        }
        for r in rights {
            if self.arcs[r as usize].exist && r != keep {
                self.connect(keep, r, self.arcs[r as usize].lscore);
            }
        }
        if self.arcs[drop as usize].cmscore > self.arcs[keep as usize].cmscore {
            self.arcs[keep as usize].cmscore = self.arcs[drop as usize].cmscore;
        }
        self.erase(drop);
    }

    /// Merge arcs identical in span, phones and scores.
    fn merge_exact(&mut self) {
        for a in 0..self.arcs.len() as ArcId {
            if !self.arcs[a as usize].exist {
                continue;
            }
            for b in (a + 1)..self.arcs.len() as ArcId {
                if !self.arcs[b as usize].exist {
                    continue;
                }
                let (x, y) = (&self.arcs[a as usize], &self.arcs[b as usize]);
                if x.same_span(y)
                    && x.same_boundary_phones(y)
                    && x.fscore_head == y.fscore_head
                    && x.gscore_head == y.gscore_head
                {
                    self.merge_into(a, b);
                }
            }
        }
    }

    /// Merge arcs with the same word and span, keeping the better scores.
    fn merge_same_boundary(&mut self) {
        for a in 0..self.arcs.len() as ArcId {
            if !self.arcs[a as usize].exist {
                continue;
            }
            for b in (a + 1)..self.arcs.len() as ArcId {
                if !self.arcs[b as usize].exist {
                    continue;
                }
                if !self.arcs[a as usize].same_span(&self.arcs[b as usize]) {
                    continue;
                }
                if self.arcs[b as usize].fscore_head > self.arcs[a as usize].fscore_head {
                    let fscore = self.arcs[b as usize].fscore_head;
                    let gscore = self.arcs[b as usize].gscore_head;
                    let arc = &mut self.arcs[a as usize];
                    arc.fscore_head = fscore;
                    arc.gscore_head = gscore;
                }
                self.merge_into(a, b);
            }
        }
    }

    /// Merge arcs of the same word whose boundaries differ by at most `k`
    /// frames, keeping the better-scored span.
    fn merge_neighbors(&mut self, k: i32) {
        for a in 0..self.arcs.len() as ArcId {
            if !self.arcs[a as usize].exist {
                continue;
            }
            for b in (a + 1)..self.arcs.len() as ArcId {
                if !self.arcs[b as usize].exist {
                    continue;
                }
                let near = {
                    let (x, y) = (&self.arcs[a as usize], &self.arcs[b as usize]);
                    x.wid == y.wid
                        && (x.left_frame - y.left_frame).abs() <= k
                        && (x.right_frame - y.right_frame).abs() <= k
                };
                if !near {
                    continue;
                }
                if self.arcs[b as usize].fscore_head > self.arcs[a as usize].fscore_head {
                    let (lf, rf, fscore, gscore) = {
                        let y = &self.arcs[b as usize];
                        (y.left_frame, y.right_frame, y.fscore_head, y.gscore_head)
                    };
                    let arc = &mut self.arcs[a as usize];
                    arc.left_frame = lf;
                    arc.right_frame = rf;
                    arc.fscore_head = fscore;
                    arc.gscore_head = gscore;
                }
                self.merge_into(a, b);
            }
        }
    }

    /// Sort live arcs by (left, right, score) and assign sequential ids.
    /// Returns ids in topological order.
    fn assign_ids(&mut self) -> Vec<ArcId> {
        let mut order: Vec<ArcId> = (0..self.arcs.len() as ArcId)
            .filter(|&id| self.arcs[id as usize].exist)
            .collect();
        order.sort_by(|&a, &b| {
            let x = &self.arcs[a as usize];
            let y = &self.arcs[b as usize];
            x.left_frame
                .cmp(&y.left_frame)
                .then(x.right_frame.cmp(&y.right_frame))
                .then(y.fscore_head.total_cmp(&x.fscore_head))
        });
        for (i, &id) in order.iter().enumerate() {
            self.arcs[id as usize].graph_id = i as u32;
        }
        order
    }

    /// Posterior per arc via forward-backward over the context links, in
    /// log10 domain scaled by `alpha`.
    fn forward_backward(&mut self, alpha: f32, frames: usize, order: &[ArcId]) {
        let last = frames as i32 - 1;
        let score = |arc: &GraphArc| -> f32 {
            alpha * (arc.amavg * arc.duration() as f32 + arc.lscore)
        };

        let mut forward = vec![f32::NEG_INFINITY; self.arcs.len()];
        for &id in order {
            let arc = &self.arcs[id as usize];
            let own = if arc.left_frame <= 0 {
                0.0
            } else {
                let mut acc = f32::NEG_INFINITY;
                for &l in &arc.left {
                    if self.arcs[l as usize].exist {
                        let v = forward[l as usize] + score(&self.arcs[l as usize]);
                        acc = add_log10(acc, v);
                    }
                }
                acc
            };
            forward[id as usize] = own;
        }

        let mut backward = vec![f32::NEG_INFINITY; self.arcs.len()];
        for &id in order.iter().rev() {
            let arc = &self.arcs[id as usize];
            let own = if arc.right_frame >= last {
                0.0
            } else {
                let mut acc = f32::NEG_INFINITY;
                for &r in &arc.right {
                    if self.arcs[r as usize].exist {
                        let v = backward[r as usize] + score(&self.arcs[r as usize]);
                        acc = add_log10(acc, v);
                    }
                }
                acc
            };
            backward[id as usize] = own;
        }

        // normalizer: sum over complete paths
        let mut total = f32::NEG_INFINITY;
        for &id in order {
            let arc = &self.arcs[id as usize];
            if arc.right_frame >= last {
                total = add_log10(total, forward[id as usize] + score(arc));
            }
        }

        for &id in order {
            let arc = &mut self.arcs[id as usize];
            let post = forward[id as usize] + score(&*arc) + backward[id as usize] - total;
            arc.graph_cm = 10f32.powf(post.min(0.0));
        }
    }
}

impl Default for GraphArena {
    fn default() -> Self {
        Self::new()
    }
}

/// log10(10^a + 10^b) without leaving log domain.
fn add_log10(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (1.0 + 10f32.powf(lo - hi)).log10()
}

/// The frozen post-processed graph.
#[derive(Debug)]
pub struct WordGraph {
    pub arcs: Vec<GraphArc>,
    pub frames: usize,
}

impl WordGraph {
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Render arcs in the conventional one-line-per-arc text form.
    pub fn dump<'b>(&'b self, dict: &'b Dictionary) -> WordGraphDump<'b> {
        WordGraphDump { graph: self, dict }
    }
}

pub struct WordGraphDump<'b> {
    graph: &'b WordGraph,
    dict: &'b Dictionary,
}

impl fmt::Display for WordGraphDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs: Vec<&GraphArc> = self.graph.arcs.iter().collect();
        arcs.sort_by_key(|a| a.graph_id);
        for arc in arcs {
            writeln!(
                f,
                "{}: [{}..{}] \"{}\" cm={:.3} graphcm={:.3} lscore={:.2}",
                arc.graph_id,
                arc.left_frame,
                arc.right_frame,
                self.dict.word(arc.wid).output,
                arc.cmscore,
                arc.graph_cm,
                arc.lscore,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(wid: WordId, left: i32, right: i32, fscore: f32) -> GraphArc {
        GraphArc {
            wid,
            left_frame: left,
            right_frame: right,
            head_phone: 0,
            tail_phone: 0,
            fscore_head: fscore,
            fscore_tail: fscore,
            gscore_head: fscore,
            gscore_tail: fscore,
            lscore: -1.0,
            amavg: -1.0,
            cmscore: 0.5,
            left: Vec::new(),
            right: Vec::new(),
            exist: true,
            graph_id: 0,
            graph_cm: 0.0,
        }
    }

    #[test]
    fn log_sum_keeps_the_larger_term_dominant() {
        let sum = add_log10(-1.0, -100.0);
        assert!((sum - -1.0).abs() < 1e-4);
        let sum = add_log10(-1.0, -1.0);
        assert!((sum - (-1.0 + 2f32.log10() as f32)).abs() < 1e-4);
    }

    #[test]
    fn identical_arcs_merge_on_save() {
        let mut arena = GraphArena::new();
        let (a, merged_a) = arena.save(arc(1, 0, 9, -10.0), None);
        assert!(!merged_a);
        let (b, merged_b) = arena.save(arc(1, 0, 9, -12.0), None);
        assert!(merged_b);
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn posterior_of_a_linear_chain_is_one() {
        let config = SearchConfig::default();
        let mut arena = GraphArena::new();
        let (first, _) = arena.save(arc(1, 0, 9, -10.0), None);
        let (second, _) = arena.save(arc(2, 10, 19, -20.0), None);
        arena.connect(first, second, -1.0);
        let graph = arena.finish(&config, 20);
        assert_eq!(graph.len(), 2);
        for a in &graph.arcs {
            assert!((a.graph_cm - 1.0).abs() < 1e-3, "cm {}", a.graph_cm);
        }
    }

    #[test]
    fn dangling_arcs_are_purged() {
        let config = SearchConfig::default();
        let mut arena = GraphArena::new();
        let (first, _) = arena.save(arc(1, 0, 9, -10.0), None);
        let (second, _) = arena.save(arc(2, 10, 19, -20.0), None);
        arena.connect(first, second, -1.0);
        // an island in the middle with no connections
        arena.save(arc(3, 12, 15, -30.0), None);
        let graph = arena.finish(&config, 20);
        assert_eq!(graph.len(), 2);
        assert!(graph.arcs.iter().all(|a| a.wid != 3));
    }
}

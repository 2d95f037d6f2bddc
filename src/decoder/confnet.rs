//! Confusion network: the word graph linearized into time-ordered
//! equivalence classes.
//!
//! Arcs are folded into clusters following the graph's topological order:
//! same-word overlapping arcs always share a cluster, other arcs join the
//! best-overlapping cluster or open a new one. Cluster word lists carry
//! summed posteriors plus a skip entry completing the probability mass.

use crate::decoder::dict::{Dictionary, WordId};
use crate::decoder::graph::WordGraph;

#[derive(Debug, Clone)]
pub struct ClusterEntry {
    pub wid: Option<WordId>,
    /// Posterior mass of this word within the cluster (`None` = skip).
    pub prob: f32,
}

#[derive(Debug, Clone)]
pub struct ConfusionCluster {
    pub left_frame: i32,
    pub right_frame: i32,
    /// Entries sorted by descending probability.
    pub entries: Vec<ClusterEntry>,
}

#[derive(Debug, Clone)]
pub struct ConfusionNetwork {
    pub clusters: Vec<ConfusionCluster>,
}

struct WorkCluster {
    left: i32,
    right: i32,
    words: Vec<(WordId, f32)>,
}

impl WorkCluster {
    fn overlap(&self, left: i32, right: i32) -> i32 {
        self.right.min(right) - self.left.max(left) + 1
    }

    fn add(&mut self, wid: WordId, prob: f32, left: i32, right: i32) {
        self.left = self.left.min(left);
        self.right = self.right.max(right);
        match self.words.iter_mut().find(|(w, _)| *w == wid) {
            Some((_, p)) => *p += prob,
            None => self.words.push((wid, prob)),
        }
    }
}

/// Build the network from a post-processed graph.
pub fn build(graph: &WordGraph) -> ConfusionNetwork {
    let mut arcs: Vec<_> = graph.arcs.iter().collect();
    arcs.sort_by_key(|a| a.graph_id);

    let mut clusters: Vec<WorkCluster> = Vec::new();
    for arc in arcs {
        // same-word overlapping cluster first
        let mut target = clusters.iter().position(|c| {
            c.overlap(arc.left_frame, arc.right_frame) > 0
                && c.words.iter().any(|(w, _)| *w == arc.wid)
        });
        if target.is_none() {
            // otherwise the cluster with the widest overlap
            target = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| {
                    let ov = c.overlap(arc.left_frame, arc.right_frame);
                    ov * 2 > (arc.right_frame - arc.left_frame + 1)
                })
                .max_by_key(|(_, c)| c.overlap(arc.left_frame, arc.right_frame))
                .map(|(i, _)| i);
        }
        match target {
            Some(i) => clusters[i].add(arc.wid, arc.graph_cm, arc.left_frame, arc.right_frame),
            None => clusters.push(WorkCluster {
                left: arc.left_frame,
                right: arc.right_frame,
                words: vec![(arc.wid, arc.graph_cm)],
            }),
        }
    }

    clusters.sort_by_key(|c| (c.left + c.right) / 2);

    let clusters = clusters
        .into_iter()
        .map(|c| {
            let mut entries: Vec<ClusterEntry> = c
                .words
                .into_iter()
                .map(|(wid, prob)| ClusterEntry {
                    wid: Some(wid),
                    prob: prob.min(1.0),
                })
                .collect();
            let mass: f32 = entries.iter().map(|e| e.prob).sum();
            if mass < 1.0 {
                entries.push(ClusterEntry {
                    wid: None,
                    prob: 1.0 - mass,
                });
            }
            entries.sort_by(|a, b| b.prob.total_cmp(&a.prob));
            ConfusionCluster {
                left_frame: c.left,
                right_frame: c.right,
                entries,
            }
        })
        .collect();

    ConfusionNetwork { clusters }
}

impl ConfusionNetwork {
    /// The single best path: the strongest real word per cluster, skips
    /// omitted.
    pub fn best_words(&self) -> Vec<WordId> {
        self.clusters
            .iter()
            .filter_map(|c| c.entries.first().and_then(|e| e.wid))
            .collect()
    }

    pub fn render(&self, dict: &Dictionary) -> String {
        let mut out = String::new();
        for (i, c) in self.clusters.iter().enumerate() {
            out.push_str(&format!("#{} [{}..{}]:", i, c.left_frame, c.right_frame));
            for e in &c.entries {
                match e.wid {
                    Some(w) => out.push_str(&format!(" {}({:.3})", dict.word(w).output, e.prob)),
                    None => out.push_str(&format!(" -({:.3})", e.prob)),
                }
            }
            out.push('\n');
        }
        out
    }
}

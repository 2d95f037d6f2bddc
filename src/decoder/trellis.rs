//! Word trellis: surviving word ends from pass 1, indexed for pass 2.
//!
//! Trellis words live in one per-utterance arena and refer to their
//! predecessors by index, which makes backtracing a simple walk and rules
//! out reference cycles. After the pass ends, words are bucketed by end
//! frame and sorted by word id so pass 2 can binary-search them.

use crate::decoder::dict::{WordId, WORD_INVALID};

/// Arena index of a trellis word.
pub type TrellisAtomId = u32;

#[derive(Debug, Clone)]
pub struct TrellisAtom {
    pub wid: WordId,
    pub begin_frame: i32,
    pub end_frame: i32,
    /// Accumulated score from utterance start through this word end.
    pub backscore: f32,
    /// Preceding word on the surviving path.
    pub last: Option<TrellisAtomId>,
    /// LM score contribution of this word on pass 1.
    pub lscore: f32,
}

#[derive(Debug)]
pub struct Trellis {
    atoms: Vec<TrellisAtom>,
    /// Per end-frame buckets of atom ids, sorted by word id after
    /// `finalize`.
    frames: Vec<Vec<TrellisAtomId>>,
    finalized: bool,
}

impl Trellis {
    pub fn new() -> Self {
        Trellis {
            atoms: Vec::new(),
            frames: Vec::new(),
            finalized: false,
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atom(&self, id: TrellisAtomId) -> &TrellisAtom {
        &self.atoms[id as usize]
    }

    /// Store a new word survivor during pass 1.
    pub fn append(&mut self, atom: TrellisAtom) -> TrellisAtomId {
        debug_assert!(!self.finalized);
        debug_assert!(atom.begin_frame <= atom.end_frame);
        let id = self.atoms.len() as TrellisAtomId;
        self.atoms.push(atom);
        id
    }

    /// Bucket atoms per end frame and sort each bucket by word id.
    pub fn finalize(&mut self, num_frames: usize) {
        self.frames = vec![Vec::new(); num_frames];
        for (i, atom) in self.atoms.iter().enumerate() {
            let t = atom.end_frame;
            if t >= 0 && (t as usize) < num_frames {
                self.frames[t as usize].push(i as TrellisAtomId);
            }
        }
        let atoms = &self.atoms;
        for bucket in &mut self.frames {
            bucket.sort_by_key(|&id| atoms[id as usize].wid);
        }
        self.finalized = true;
    }

    /// All words ending at frame `t`.
    pub fn at_frame(&self, t: usize) -> &[TrellisAtomId] {
        static EMPTY: [TrellisAtomId; 0] = [];
        self.frames.get(t).map(|v| v.as_slice()).unwrap_or(&EMPTY)
    }

    /// Binary search for `wid` ending at frame `t`.
    pub fn search(&self, t: usize, wid: WordId) -> Option<&TrellisAtom> {
        debug_assert!(self.finalized);
        let bucket = self.frames.get(t)?;
        let idx = bucket
            .binary_search_by_key(&wid, |&id| self.atoms[id as usize].wid)
            .ok()?;
        Some(&self.atoms[bucket[idx] as usize])
    }

    /// Best-scored atom ending at frame `t`, if any.
    pub fn best_at_frame(&self, t: usize) -> Option<&TrellisAtom> {
        self.at_frame(t)
            .iter()
            .map(|&id| &self.atoms[id as usize])
            .max_by(|a, b| a.backscore.total_cmp(&b.backscore))
    }

    /// Per-frame maximum backscore, used as the pass-2 estimation bound.
    pub fn max_backscore_per_frame(&self, num_frames: usize) -> Vec<f32> {
        let mut out = vec![f32::NEG_INFINITY; num_frames];
        for atom in &self.atoms {
            let t = atom.end_frame;
            if t >= 0 && (t as usize) < num_frames && atom.backscore > out[t as usize] {
                out[t as usize] = atom.backscore;
            }
        }
        out
    }

    /// Backtrace from `id` to the utterance start, oldest word first.
    pub fn backtrace(&self, id: TrellisAtomId) -> Vec<WordId> {
        let mut seq = Vec::new();
        let mut cur = Some(id);
        while let Some(i) = cur {
            let atom = &self.atoms[i as usize];
            if atom.wid != WORD_INVALID {
                seq.push(atom.wid);
            }
            cur = atom.last;
        }
        seq.reverse();
        seq
    }
}

impl Default for Trellis {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(wid: WordId, begin: i32, end: i32, score: f32, last: Option<TrellisAtomId>) -> TrellisAtom {
        TrellisAtom {
            wid,
            begin_frame: begin,
            end_frame: end,
            backscore: score,
            last,
            lscore: 0.0,
        }
    }

    #[test]
    fn search_finds_by_frame_and_word() {
        let mut tr = Trellis::new();
        tr.append(atom(5, 0, 10, -100.0, None));
        tr.append(atom(2, 0, 10, -120.0, None));
        tr.append(atom(2, 0, 11, -130.0, None));
        tr.finalize(20);
        assert_eq!(tr.search(10, 5).unwrap().backscore, -100.0);
        assert_eq!(tr.search(10, 2).unwrap().backscore, -120.0);
        assert_eq!(tr.search(11, 2).unwrap().backscore, -130.0);
        assert!(tr.search(11, 5).is_none());
        assert!(tr.search(12, 2).is_none());
    }

    #[test]
    fn backtrace_follows_predecessors() {
        let mut tr = Trellis::new();
        let a = tr.append(atom(1, 0, 5, -10.0, None));
        let b = tr.append(atom(2, 6, 9, -20.0, Some(a)));
        let c = tr.append(atom(3, 10, 15, -30.0, Some(b)));
        tr.finalize(16);
        assert_eq!(tr.backtrace(c), vec![1, 2, 3]);
    }

    #[test]
    fn predecessor_frames_strictly_precede() {
        let mut tr = Trellis::new();
        let a = tr.append(atom(1, 0, 5, -10.0, None));
        let b = tr.append(atom(2, 6, 9, -20.0, Some(a)));
        tr.finalize(10);
        let atom_b = tr.atom(b);
        let atom_a = tr.atom(atom_b.last.unwrap());
        assert!(atom_a.end_frame < atom_b.begin_frame);
    }
}

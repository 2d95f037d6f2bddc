//! Phone HMM models and context-dependent state sets.
//!
//! Acoustic model files are loaded by an external collaborator; this module
//! only defines the shapes the search needs: per-phone state sequences with
//! a transition matrix, and pseudo phones whose emitting positions carry a
//! *set* of states to maximize over (used to stitch cross-word triphone
//! contexts at word boundaries).

use std::collections::HashMap;

/// Index into the model set's global state table. Output probabilities for
/// states come from the [`AcousticScorer`] collaborator.
pub type StateId = u32;

/// Index of a phone model within an [`HmmSet`].
pub type PhoneId = u32;

/// Index of a context-dependent state set within an [`HmmSet`].
pub type CdSetId = u32;

/// Log-probability floor; transitions at or below this value do not exist.
pub const LOG_ZERO: f32 = -1.0e10;

/// One logical phone model.
///
/// `trans` is the full (entry + emitting + exit) transition matrix in log
/// domain: `trans[i][j]` is the transition from state `i` to state `j`,
/// where state 0 is the non-emitting entry and `state_num() - 1` the
/// non-emitting exit. `states[k]` is the output state for emitting position
/// `k` (matrix row `k + 1`).
#[derive(Debug, Clone)]
pub struct PhoneModel {
    pub name: String,
    pub states: Vec<StateId>,
    pub trans: Vec<Vec<f32>>,
}

impl PhoneModel {
    /// Total state count including entry and exit.
    pub fn state_num(&self) -> usize {
        self.states.len() + 2
    }

    /// Transition log-probability, `LOG_ZERO` if absent.
    pub fn a(&self, from: usize, to: usize) -> f32 {
        self.trans[from][to]
    }

    /// True when the model can pass from entry to exit without emitting.
    pub fn has_skip_path(&self) -> bool {
        self.a(0, self.state_num() - 1) > LOG_ZERO
    }
}

/// A pseudo phone: per emitting position, the set of states of all context
/// variants that share a base phone. Scoring maximizes over the set.
#[derive(Debug, Clone)]
pub struct CdSet {
    pub name: String,
    /// One state set per emitting position.
    pub state_sets: Vec<Vec<StateId>>,
}

/// The model set handed to the lexicon builder.
pub struct HmmSet {
    phones: Vec<PhoneModel>,
    by_name: HashMap<String, PhoneId>,
    cdsets: Vec<CdSet>,
    cdset_by_name: HashMap<String, CdSetId>,
    /// Category-keyed context sets for per-category lexicon trees.
    cdset_by_name_category: HashMap<(String, u16), CdSetId>,
    /// Multipath mode: phone models may carry entry-to-exit skip
    /// transitions and the lexicon gets explicit word begin/end nodes.
    pub multipath: bool,
    /// Short-pause model appended at word tails with `iwsp`.
    pub sp: Option<PhoneId>,
    /// Penalty added to transitions entering the inter-word short pause.
    pub iwsp_penalty: f32,
}

impl HmmSet {
    pub fn new(multipath: bool) -> Self {
        HmmSet {
            phones: Vec::new(),
            by_name: HashMap::new(),
            cdsets: Vec::new(),
            cdset_by_name: HashMap::new(),
            cdset_by_name_category: HashMap::new(),
            multipath,
            sp: None,
            iwsp_penalty: 0.0,
        }
    }

    pub fn add_phone(&mut self, phone: PhoneModel) -> PhoneId {
        let id = self.phones.len() as PhoneId;
        self.by_name.insert(phone.name.clone(), id);
        self.phones.push(phone);
        id
    }

    pub fn phone(&self, id: PhoneId) -> &PhoneModel {
        &self.phones[id as usize]
    }

    pub fn phone_by_name(&self, name: &str) -> Option<PhoneId> {
        self.by_name.get(name).copied()
    }

    pub fn num_phones(&self) -> usize {
        self.phones.len()
    }

    pub fn add_cdset(&mut self, cdset: CdSet) -> CdSetId {
        let id = self.cdsets.len() as CdSetId;
        self.cdset_by_name.insert(cdset.name.clone(), id);
        self.cdsets.push(cdset);
        id
    }

    pub fn add_cdset_with_category(&mut self, cdset: CdSet, category: u16) -> CdSetId {
        let id = self.cdsets.len() as CdSetId;
        self.cdset_by_name_category
            .insert((cdset.name.clone(), category), id);
        self.cdsets.push(cdset);
        id
    }

    pub fn cdset(&self, id: CdSetId) -> &CdSet {
        &self.cdsets[id as usize]
    }

    /// Plain lookup by phone name.
    pub fn cdset_by_name(&self, name: &str) -> Option<CdSetId> {
        self.cdset_by_name.get(name).copied()
    }

    /// Category-aware lookup for per-category trees.
    pub fn cdset_with_category(&self, name: &str, category: u16) -> Option<CdSetId> {
        self.cdset_by_name_category.get(&(name.to_string(), category)).copied()
    }

    pub fn set_short_pause(&mut self, phone: PhoneId, penalty: f32) {
        self.sp = Some(phone);
        self.iwsp_penalty = penalty;
    }

    /// Register the trivial context set of a phone (each emitting position
    /// maps to the single defined state). Useful for monophone setups where
    /// every phone is its own context set.
    pub fn register_identity_cdset(&mut self, phone_id: PhoneId) -> CdSetId {
        let phone = self.phone(phone_id);
        let cdset = CdSet {
            name: phone.name.clone(),
            state_sets: phone.states.iter().map(|&s| vec![s]).collect(),
        };
        self.add_cdset(cdset)
    }
}

/// Supplies per-frame emission log-probabilities. Implemented outside the
/// crate by the acoustic model runtime; tests use table-driven scorers.
pub trait AcousticScorer {
    fn state_logprob(&self, state: StateId, t: usize) -> f32;

    /// Pseudo-phone scoring: the best state in the set.
    fn max_set_logprob(&self, states: &[StateId], t: usize) -> f32 {
        states
            .iter()
            .map(|&s| self.state_logprob(s, t))
            .fold(LOG_ZERO, f32::max)
    }
}

/// Model-building helpers for tests and examples.
pub mod testing {
    use super::*;

    /// Build a left-to-right phone with `n` emitting states: self loop
    /// probability `self_p`, advance `1 - self_p`, no skips.
    pub fn linear_phone(name: &str, states: &[StateId], self_p: f32) -> PhoneModel {
        let n = states.len();
        let total = n + 2;
        let mut trans = vec![vec![LOG_ZERO; total]; total];
        trans[0][1] = 0.0;
        let stay = self_p.ln();
        let advance = (1.0 - self_p).ln();
        for k in 1..=n {
            trans[k][k] = stay;
            trans[k][k + 1] = advance;
        }
        PhoneModel {
            name: name.to_string(),
            states: states.to_vec(),
            trans,
        }
    }

    /// A scorer that likes one particular state per frame and penalizes the
    /// rest by a fixed margin.
    pub struct FrameTableScorer {
        /// `best[t]` is the state favoured at frame `t`.
        pub best: Vec<StateId>,
        pub hit: f32,
        pub miss: f32,
    }

    impl AcousticScorer for FrameTableScorer {
        fn state_logprob(&self, state: StateId, t: usize) -> f32 {
            if self.best.get(t).copied() == Some(state) {
                self.hit
            } else {
                self.miss
            }
        }
    }

    /// A scorer that is uniform over all states (useful when only the LM
    /// and topology matter).
    pub struct FlatScorer(pub f32);

    impl AcousticScorer for FlatScorer {
        fn state_logprob(&self, _state: StateId, _t: usize) -> f32 {
            self.0
        }
    }
}

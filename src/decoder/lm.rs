//! Language model and grammar constraint seams.
//!
//! N-gram probability tables and grammar automata are loaded elsewhere; the
//! search only needs these callable shapes. The cross-word bigram cache is
//! an explicit object owned by the recognizer and reset per utterance.

use std::collections::HashMap;

use crate::decoder::dict::{CategoryId, WordId, WORD_INVALID};

/// Word probabilities in log10 domain (as customary for recognition LMs).
pub trait LanguageModel {
    /// log P(w)
    fn unigram(&self, w: WordId) -> f32;

    /// log P(w | context); `context == WORD_INVALID` means sentence start.
    fn bigram(&self, context: WordId, w: WordId) -> f32;

    /// log P(w | history), `history` most-recent-first. The default backs
    /// off to the bigram on the nearest history word.
    fn ngram(&self, history: &[WordId], w: WordId) -> f32 {
        match history.first() {
            Some(&context) => self.bigram(context, w),
            None => self.unigram(w),
        }
    }
}

/// Grammar category-pair constraint (DFA mode).
pub trait CategoryMatrix {
    /// May `right` immediately follow `left` in time order?
    fn can_connect(&self, left: CategoryId, right: CategoryId) -> bool;

    /// May a sentence start with this category?
    fn can_start(&self, category: CategoryId) -> bool;

    /// May a sentence end with this category?
    fn can_end(&self, category: CategoryId) -> bool;
}

/// Cross-word LM cache keyed by (context word, word). One per recognizer;
/// never shared, reset at utterance boundaries.
pub struct BigramCache {
    map: HashMap<(WordId, WordId), f32>,
    hits: u64,
    misses: u64,
}

impl BigramCache {
    pub fn new() -> Self {
        BigramCache {
            map: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, lm: &dyn LanguageModel, context: WordId, w: WordId) -> f32 {
        if let Some(&p) = self.map.get(&(context, w)) {
            self.hits += 1;
            return p;
        }
        self.misses += 1;
        let p = if context == WORD_INVALID {
            lm.unigram(w)
        } else {
            lm.bigram(context, w)
        };
        self.map.insert((context, w), p);
        p
    }

    pub fn reset(&mut self) {
        self.map.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for BigramCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Small concrete models for tests and examples.
pub mod testing {
    use super::*;

    /// Uniform LM: every word gets the same score everywhere.
    pub struct UniformLm(pub f32);

    impl LanguageModel for UniformLm {
        fn unigram(&self, _w: WordId) -> f32 {
            self.0
        }

        fn bigram(&self, _context: WordId, _w: WordId) -> f32 {
            self.0
        }
    }

    /// Table-driven bigram LM with a default floor.
    pub struct TableLm {
        pub unigrams: HashMap<WordId, f32>,
        pub bigrams: HashMap<(WordId, WordId), f32>,
        pub floor: f32,
    }

    impl LanguageModel for TableLm {
        fn unigram(&self, w: WordId) -> f32 {
            self.unigrams.get(&w).copied().unwrap_or(self.floor)
        }

        fn bigram(&self, context: WordId, w: WordId) -> f32 {
            self.bigrams
                .get(&(context, w))
                .copied()
                .unwrap_or_else(|| self.unigram(w))
        }
    }

    /// Category matrix that allows every connection.
    pub struct AllowAll;

    impl CategoryMatrix for AllowAll {
        fn can_connect(&self, _left: CategoryId, _right: CategoryId) -> bool {
            true
        }

        fn can_start(&self, _category: CategoryId) -> bool {
            true
        }

        fn can_end(&self, _category: CategoryId) -> bool {
            true
        }
    }

    /// Explicit pair table.
    pub struct PairTable {
        pub pairs: std::collections::HashSet<(CategoryId, CategoryId)>,
        pub starts: std::collections::HashSet<CategoryId>,
        pub ends: std::collections::HashSet<CategoryId>,
    }

    impl CategoryMatrix for PairTable {
        fn can_connect(&self, left: CategoryId, right: CategoryId) -> bool {
            self.pairs.contains(&(left, right))
        }

        fn can_start(&self, category: CategoryId) -> bool {
            self.starts.contains(&category)
        }

        fn can_end(&self, category: CategoryId) -> bool {
            self.ends.contains(&category)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::UniformLm;
    use super::*;

    #[test]
    fn cache_hits_after_first_lookup() {
        let lm = UniformLm(-1.5);
        let mut cache = BigramCache::new();
        assert_eq!(cache.get(&lm, 3, 7), -1.5);
        assert_eq!(cache.get(&lm, 3, 7), -1.5);
        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn invalid_context_means_unigram() {
        struct Lm;
        impl LanguageModel for Lm {
            fn unigram(&self, _w: WordId) -> f32 {
                -1.0
            }
            fn bigram(&self, _c: WordId, _w: WordId) -> f32 {
                -2.0
            }
        }
        let mut cache = BigramCache::new();
        assert_eq!(cache.get(&Lm, WORD_INVALID, 0), -1.0);
        assert_eq!(cache.get(&Lm, 1, 0), -2.0);
    }
}

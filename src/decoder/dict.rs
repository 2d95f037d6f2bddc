//! Word dictionary: pronunciation sequences, categories, output strings.

use crate::decoder::hmm::PhoneId;
use crate::decoder::DecodeError;

pub type WordId = u32;
pub const WORD_INVALID: WordId = u32::MAX;

/// Grammar category id; `CATEGORY_NONE` in N-gram mode.
pub type CategoryId = u16;
pub const CATEGORY_NONE: CategoryId = u16::MAX;

#[derive(Debug, Clone)]
pub struct DictWord {
    /// String emitted in recognition results.
    pub output: String,
    /// Internal name (distinct homophones keep distinct names).
    pub name: String,
    pub phones: Vec<PhoneId>,
    pub category: CategoryId,
    /// Per-word log-domain insertion penalty (e.g. unigram weighting).
    pub penalty: f32,
}

pub struct Dictionary {
    words: Vec<DictWord>,
    /// Sentence-head silence word (N-gram mode).
    pub head_silwid: Option<WordId>,
    /// Sentence-tail silence word (N-gram mode).
    pub tail_silwid: Option<WordId>,
    /// Short-pause word skipped transparently in pass-2 context.
    pub sp_word: Option<WordId>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            words: Vec::new(),
            head_silwid: None,
            tail_silwid: None,
            sp_word: None,
        }
    }

    pub fn add(&mut self, word: DictWord) -> Result<WordId, DecodeError> {
        if word.phones.is_empty() {
            return Err(DecodeError::EmptyPronunciation(word.name));
        }
        let id = self.words.len() as WordId;
        self.words.push(word);
        Ok(id)
    }

    pub fn word(&self, id: WordId) -> &DictWord {
        &self.words[id as usize]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WordId> {
        0..self.words.len() as WordId
    }

    pub fn head_phone(&self, id: WordId) -> PhoneId {
        self.word(id).phones[0]
    }

    pub fn tail_phone(&self, id: WordId) -> PhoneId {
        *self.word(id).phones.last().unwrap()
    }

    /// True for words the pass-2 context treats as transparent.
    pub fn is_transparent(&self, id: WordId) -> bool {
        self.sp_word == Some(id)
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

//! # Tree Lexicon Tests
//!
//! Build small lexicons and verify the structural invariants: every word
//! reads back from its unique end node, embedded words get exactly one
//! duplicated leaf, and category trees never share nodes across
//! categories.

use lvcsr::decoder::config::{LmKind, SearchConfigBuilder};
use lvcsr::decoder::dict::{DictWord, Dictionary, CATEGORY_NONE};
use lvcsr::decoder::hmm::testing::linear_phone;
use lvcsr::decoder::hmm::{HmmSet, StateId};
use lvcsr::decoder::lexicon::Lexicon;
use lvcsr::decoder::lm::testing::UniformLm;

/// One-emitting-state phone per letter; the identity context set is
/// registered so boundary phones resolve.
fn phone_world(letters: &str) -> (HmmSet, std::collections::HashMap<char, u32>) {
    let mut hmms = HmmSet::new(false);
    let mut ids = std::collections::HashMap::new();
    for (i, c) in letters.chars().enumerate() {
        let id = hmms.add_phone(linear_phone(&c.to_string(), &[i as StateId], 0.5));
        hmms.register_identity_cdset(id);
        ids.insert(c, id);
    }
    (hmms, ids)
}

fn word(name: &str, phones: &[u32], category: u16) -> DictWord {
    DictWord {
        output: name.to_string(),
        name: name.to_string(),
        phones: phones.to_vec(),
        category,
        penalty: 0.0,
    }
}

#[test]
fn every_word_reads_back_from_its_end_node() {
    let (hmms, p) = phone_world("abcdeklmnst");
    let mut dict = Dictionary::new();
    let words = [
        ("as", vec![p[&'a'], p[&'s']]),
        ("ask", vec![p[&'a'], p[&'s'], p[&'k']]),
        ("bat", vec![p[&'b'], p[&'a'], p[&'t']]),
        ("ban", vec![p[&'b'], p[&'a'], p[&'n']]),
        ("eel", vec![p[&'e'], p[&'e'], p[&'l']]),
    ];
    let mut ids = Vec::new();
    for (name, phones) in &words {
        ids.push(dict.add(word(name, phones, CATEGORY_NONE)).unwrap());
    }
    let config = SearchConfigBuilder::new(LmKind::Ngram).build().unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&dict, &hmms, Some(&lm), &config).unwrap();

    for &w in &ids {
        let end = lex.wordend(w);
        assert_eq!(lex.stend(end), w, "word {} lost its end node", dict.word(w).name);
        // the node path covers the word's phones and ends at its leaf
        let path = lex.word_path(w, &dict, &hmms);
        assert!(path.len() >= dict.word(w).phones.len());
        assert_eq!(lex.stend(*path.last().unwrap()), w);
    }
    // every end node is unique
    let mut ends: Vec<_> = ids.iter().map(|&w| lex.wordend(w)).collect();
    ends.sort_unstable();
    ends.dedup();
    assert_eq!(ends.len(), ids.len());
}

/// Embedded word: exactly one leaf duplicated, distinct end owners.
#[test]
fn embedded_word_duplicates_one_leaf() {
    let (hmms, p) = phone_world("abehlpt");
    let seq_alpha = vec![p[&'a'], p[&'l'], p[&'p'], p[&'h'], p[&'a']];
    let seq_alphabet = vec![
        p[&'a'], p[&'l'], p[&'p'], p[&'h'], p[&'a'], p[&'b'], p[&'e'], p[&'t'],
    ];
    let mut dict = Dictionary::new();
    let alpha = dict.add(word("alpha", &seq_alpha, CATEGORY_NONE)).unwrap();
    let alphabet = dict.add(word("alphabet", &seq_alphabet, CATEGORY_NONE)).unwrap();

    let config = SearchConfigBuilder::new(LmKind::Ngram).build().unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&dict, &hmms, Some(&lm), &config).unwrap();

    // 8 shared+new emitting nodes plus exactly one duplicated leaf
    assert_eq!(lex.num_nodes(), 8 + 1);
    let end_alpha = lex.wordend(alpha);
    let end_alphabet = lex.wordend(alphabet);
    assert_ne!(end_alpha, end_alphabet);
    assert_eq!(lex.stend(end_alpha), alpha);
    assert_eq!(lex.stend(end_alphabet), alphabet);
}

/// Homophones each get their own leaf.
#[test]
fn homophones_get_distinct_leaves() {
    let (hmms, p) = phone_world("der");
    let seq = vec![p[&'r'], p[&'e'], p[&'d']];
    let mut dict = Dictionary::new();
    let read = dict.add(word("read", &seq, CATEGORY_NONE)).unwrap();
    let reed = dict.add(word("reed", &seq, CATEGORY_NONE)).unwrap();

    let config = SearchConfigBuilder::new(LmKind::Ngram).build().unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&dict, &hmms, Some(&lm), &config).unwrap();

    assert_ne!(lex.wordend(read), lex.wordend(reed));
    assert_eq!(lex.stend(lex.wordend(read)), read);
    assert_eq!(lex.stend(lex.wordend(reed)), reed);
}

/// Grammar mode: words of different categories share nothing even with a
/// common phone prefix, and every start node maps to its word.
#[test]
fn category_trees_do_not_share_across_categories() {
    let (hmms, p) = phone_world("abct");
    let mut dict = Dictionary::new();
    let w1 = dict.add(word("cat0", &[p[&'a'], p[&'b']], 0)).unwrap();
    let w2 = dict.add(word("cat1", &[p[&'a'], p[&'c']], 1)).unwrap();

    let config = SearchConfigBuilder::new(LmKind::Grammar).build().unwrap();
    let lex = Lexicon::build(&dict, &hmms, None, &config).unwrap();

    // no node sharing: each word contributes its own two nodes
    assert_eq!(lex.num_nodes(), 4);
    assert_eq!(lex.startnodes.len(), 2);
    let mapped: std::collections::HashSet<_> = lex.start2wid.iter().copied().collect();
    assert!(mapped.contains(&w1) && mapped.contains(&w2));
}

//! # Two-Pass Decoder Tests
//!
//! End-to-end decodes over synthetic table-driven acoustic models: one
//! state per phone, a scorer that rewards the state spelt out by the
//! ground-truth utterance, and a uniform or table language model. This
//! exercises the full path lexicon -> pass 1 -> trellis -> pass 2.

use std::collections::HashMap;

use lvcsr::decoder::beam::BeamSearch;
use lvcsr::decoder::config::{LmKind, SearchConfig, SearchConfigBuilder};
use lvcsr::decoder::dict::{DictWord, Dictionary, WordId, CATEGORY_NONE};
use lvcsr::decoder::hmm::testing::{linear_phone, FrameTableScorer};
use lvcsr::decoder::hmm::{HmmSet, StateId};
use lvcsr::decoder::lexicon::Lexicon;
use lvcsr::decoder::lm::testing::{PairTable, UniformLm};
use lvcsr::decoder::{RecogStatus, Recognizer};

const HIT: f32 = -1.0;
const MISS: f32 = -8.0;
const FRAMES_PER_PHONE: usize = 8;
const SIL_FRAMES: usize = 10;

/// A tiny phonetic world: one emitting state per letter, head/tail silence
/// words, and the given `(name, pronunciation)` entries.
struct World {
    hmms: HmmSet,
    dict: Dictionary,
    phone_state: HashMap<char, StateId>,
    bos: WordId,
    eos: WordId,
}

fn build_world(entries: &[(&str, &str)]) -> World {
    let mut hmms = HmmSet::new(false);
    let mut phone_state = HashMap::new();
    let mut phone_id = HashMap::new();

    let mut letters: Vec<char> = entries
        .iter()
        .flat_map(|(_, pron)| pron.chars())
        .collect();
    letters.push('<');
    letters.push('>');
    letters.sort_unstable();
    letters.dedup();
    for (i, c) in letters.into_iter().enumerate() {
        let state = i as StateId;
        let id = hmms.add_phone(linear_phone(&c.to_string(), &[state], 0.5));
        hmms.register_identity_cdset(id);
        phone_state.insert(c, state);
        phone_id.insert(c, id);
    }

    let mut dict = Dictionary::new();
    let bos = dict
        .add(DictWord {
            output: "<s>".to_string(),
            name: "<s>".to_string(),
            phones: vec![phone_id[&'<']],
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    let eos = dict
        .add(DictWord {
            output: "</s>".to_string(),
            name: "</s>".to_string(),
            phones: vec![phone_id[&'>']],
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    for (name, pron) in entries {
        dict.add(DictWord {
            output: name.to_string(),
            name: name.to_string(),
            phones: pron.chars().map(|c| phone_id[&c]).collect(),
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    }
    dict.head_silwid = Some(bos);
    dict.tail_silwid = Some(eos);

    World {
        hmms,
        dict,
        phone_state,
        bos,
        eos,
    }
}

impl World {
    /// Ground-truth state table: silence, then each pronunciation letter
    /// for `FRAMES_PER_PHONE` frames, then silence.
    fn utterance(&self, prons: &[&str]) -> FrameTableScorer {
        let mut best = Vec::new();
        best.extend(std::iter::repeat(self.phone_state[&'<']).take(SIL_FRAMES));
        for pron in prons {
            for c in pron.chars() {
                best.extend(std::iter::repeat(self.phone_state[&c]).take(FRAMES_PER_PHONE));
            }
        }
        best.extend(std::iter::repeat(self.phone_state[&'>']).take(SIL_FRAMES));
        FrameTableScorer {
            best,
            hit: HIT,
            miss: MISS,
        }
    }

    fn word_id(&self, name: &str) -> WordId {
        self.dict
            .ids()
            .find(|&w| self.dict.word(w).name == name)
            .unwrap()
    }
}

fn wide_open_config() -> SearchConfig {
    SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .stack(500, 1, 1)
        .build()
        .unwrap()
}

/// A pre-segmented single word decodes to exactly that word.
#[test]
fn single_word_utterance_decodes_to_ground_truth() {
    let world = build_world(&[("apple", "apl"), ("melon", "mln")]);
    let config = wide_open_config();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    let scorer = world.utterance(&["apl"]);
    let frames = scorer.best.len();

    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    assert_eq!(result.sentences.len(), 1);
    let words = &result.sentences[0].words;
    assert_eq!(
        words,
        &vec![world.bos, world.word_id("apple"), world.eos],
        "decoded {:?}",
        result.sentences[0]
    );
}

/// With the beam wide open, pass 1 alone already finds the spoken word.
#[test]
fn pass1_best_path_matches_on_wide_beam() {
    let world = build_world(&[("apple", "apl"), ("melon", "mln")]);
    let config = wide_open_config();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    let scorer = world.utterance(&["mln"]);
    let frames = scorer.best.len();

    let mut beam = BeamSearch::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    beam.init(&scorer);
    for t in 1..frames {
        beam.feed_frame(t, &scorer);
    }
    let pass1 = beam.finalize(frames, &scorer);

    assert_eq!(
        pass1.best_seq,
        vec![world.bos, world.word_id("melon"), world.eos]
    );

    // trellis monotonicity: begin <= end, predecessor strictly earlier
    let mut checked = 0;
    for t in 0..frames {
        for &id in pass1.trellis.at_frame(t) {
            let atom = pass1.trellis.atom(id);
            assert!(atom.begin_frame <= atom.end_frame);
            if let Some(prev) = atom.last {
                assert!(pass1.trellis.atom(prev).end_frame < atom.begin_frame);
            }
            checked += 1;
        }
    }
    assert!(checked > 0);
}

/// Two-word utterance with a bigram that prefers the spoken order.
#[test]
fn two_word_utterance_decodes_in_order() {
    let world = build_world(&[("apple", "apl"), ("melon", "mln")]);
    let config = wide_open_config();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    let scorer = world.utterance(&["apl", "mln"]);
    let frames = scorer.best.len();

    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    assert_eq!(
        result.sentences[0].words,
        vec![
            world.bos,
            world.word_id("apple"),
            world.word_id("melon"),
            world.eos
        ]
    );
}

/// Homophones: both sentences come out, ordered by score, and their
/// sibling confidences sum to one.
#[test]
fn homophones_yield_nbest_with_complementary_confidence() {
    let world = build_world(&[("read", "red"), ("reed", "red")]);
    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .stack(500, 2, 2)
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    let scorer = world.utterance(&["red"]);
    let frames = scorer.best.len();

    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    assert_eq!(result.sentences.len(), 2);
    assert!(result.sentences[0].score >= result.sentences[1].score);

    // the middle word of each sentence is one of the homophones
    let mids: Vec<WordId> = result.sentences.iter().map(|s| s.words[1]).collect();
    assert!(mids.contains(&world.word_id("read")));
    assert!(mids.contains(&world.word_id("reed")));

    // local posterior over the sibling expansion sums to one
    let cm_sum: f32 = result.sentences.iter().map(|s| s.cm[1]).sum();
    assert!((cm_sum - 1.0).abs() < 1e-3, "cm sum {}", cm_sum);
}

/// Length gating rejects inputs outside the configured window.
#[test]
fn length_rejection() {
    let world = build_world(&[("apple", "apl")]);
    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .reject_lengths(600, Some(10_000))
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();
    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);

    let scorer = world.utterance(&["apl"]);
    // 30 frames at 10 ms = 300 ms, below the 600 ms floor
    let result = recognizer.recognize(&scorer, 30, None);
    assert_eq!(result.status, RecogStatus::RejectedShort);
    assert!(result.sentences.is_empty());

    // 2000 frames = 20 s, above the 10 s ceiling
    let result = recognizer.recognize(&scorer, 2000, None);
    assert_eq!(result.status, RecogStatus::RejectedLong);
}

/// When pass 2 hits its expansion bound, the pass-1 best path is emitted
/// as the fallback result.
#[test]
fn pass1_fallback_on_search_abort() {
    let world = build_world(&[("apple", "apl")]);
    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .max_hypo(0)
        .fallback_pass1(true)
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    let scorer = world.utterance(&["apl"]);
    let frames = scorer.best.len();
    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    assert_eq!(
        result.sentences[0].words,
        vec![world.bos, world.word_id("apple"), world.eos]
    );
    assert_eq!(result.sentences[0].words, result.pass1_seq);
}

/// A long input with a sustained pause splits into two segments, each
/// decoding its own content word.
#[test]
fn short_pause_segmentation_splits_and_decodes() {
    let mut world = build_world(&[("apple", "apl"), ("melon", "mln")]);
    // add a short-pause word on its own phone so the survey pass can sit
    // in it during the gap
    let sp_phone = world.hmms.add_phone(linear_phone(
        "_",
        &[world.phone_state.len() as StateId],
        0.5,
    ));
    world.hmms.register_identity_cdset(sp_phone);
    let sp_state = world.phone_state.len() as StateId;
    let sp = world
        .dict
        .add(DictWord {
            output: "<sp>".to_string(),
            name: "<sp>".to_string(),
            phones: vec![sp_phone],
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    world.dict.sp_word = Some(sp);

    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .short_pause_segmentation(Some(10))
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&world.dict, &world.hmms, Some(&lm), &config).unwrap();

    // <s> apple ... 20 frames of pause ... melon </s>
    let mut best = Vec::new();
    best.extend(std::iter::repeat(world.phone_state[&'<']).take(SIL_FRAMES));
    for c in "apl".chars() {
        best.extend(std::iter::repeat(world.phone_state[&c]).take(FRAMES_PER_PHONE));
    }
    best.extend(std::iter::repeat(sp_state).take(20));
    for c in "mln".chars() {
        best.extend(std::iter::repeat(world.phone_state[&c]).take(FRAMES_PER_PHONE));
    }
    best.extend(std::iter::repeat(world.phone_state[&'>']).take(SIL_FRAMES));
    let scorer = FrameTableScorer {
        best,
        hit: HIT,
        miss: MISS,
    };
    let frames = SIL_FRAMES * 2 + FRAMES_PER_PHONE * 6 + 20;

    let mut recognizer =
        Recognizer::new(&lex, &world.dict, &world.hmms, &config, Some(&lm), None);
    let results = recognizer.recognize_segmented(&scorer, frames, None);

    assert_eq!(results.len(), 2, "expected a split at the pause");
    let first_words = &results[0].sentences.first().expect("segment 1 empty").words;
    let second_words = &results[1].sentences.first().expect("segment 2 empty").words;
    assert!(first_words.contains(&world.word_id("apple")));
    assert!(!first_words.contains(&world.word_id("melon")));
    assert!(second_words.contains(&world.word_id("melon")));
    assert!(!second_words.contains(&world.word_id("apple")));
}

/// Grammar-driven decode with a category pair table.
#[test]
fn grammar_decode_follows_category_chain() {
    // two categories: 0 may start, 1 may end, 0 -> 1 allowed
    let mut hmms = HmmSet::new(false);
    let mut phone_id = HashMap::new();
    for (i, c) in "abxy".chars().enumerate() {
        let id = hmms.add_phone(linear_phone(&c.to_string(), &[i as StateId], 0.5));
        hmms.register_identity_cdset(id);
        phone_id.insert(c, id);
    }
    let mut dict = Dictionary::new();
    let first = dict
        .add(DictWord {
            output: "first".to_string(),
            name: "first".to_string(),
            phones: vec![phone_id[&'a'], phone_id[&'b']],
            category: 0,
            penalty: 0.0,
        })
        .unwrap();
    let second = dict
        .add(DictWord {
            output: "second".to_string(),
            name: "second".to_string(),
            phones: vec![phone_id[&'x'], phone_id[&'y']],
            category: 1,
            penalty: 0.0,
        })
        .unwrap();

    let config = SearchConfigBuilder::new(LmKind::Grammar)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .build()
        .unwrap();
    let lex = Lexicon::build(&dict, &hmms, None, &config).unwrap();

    let catmat = PairTable {
        pairs: [(0u16, 1u16)].into_iter().collect(),
        starts: [0u16].into_iter().collect(),
        ends: [1u16].into_iter().collect(),
    };

    // utterance: a b x y, 8 frames per phone
    let mut best = Vec::new();
    for c in "abxy".chars() {
        let state = "abxy".chars().position(|x| x == c).unwrap() as StateId;
        best.extend(std::iter::repeat(state).take(FRAMES_PER_PHONE));
    }
    let scorer = FrameTableScorer {
        best,
        hit: HIT,
        miss: MISS,
    };
    let frames = FRAMES_PER_PHONE * 4;

    let mut recognizer = Recognizer::new(&lex, &dict, &hmms, &config, None, Some(&catmat));
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    assert_eq!(result.sentences[0].words, vec![first, second]);
}

//! # Word Graph and Confusion Network Tests
//!
//! Decode an ambiguous utterance with graph generation on and check the
//! post-processed structure: topological numbering, posterior range, and
//! time-ordered confusion clusters containing the competing words.

use std::collections::HashMap;

use lvcsr::decoder::config::{LmKind, SearchConfigBuilder};
use lvcsr::decoder::dict::{DictWord, Dictionary, WordId, CATEGORY_NONE};
use lvcsr::decoder::hmm::testing::{linear_phone, FrameTableScorer};
use lvcsr::decoder::hmm::{HmmSet, StateId};
use lvcsr::decoder::lexicon::Lexicon;
use lvcsr::decoder::lm::testing::UniformLm;
use lvcsr::decoder::{RecogStatus, Recognizer};

const FRAMES_PER_PHONE: usize = 8;
const SIL_FRAMES: usize = 10;

struct Setup {
    hmms: HmmSet,
    dict: Dictionary,
    state: HashMap<char, StateId>,
}

fn setup(entries: &[(&str, &str)]) -> Setup {
    let mut hmms = HmmSet::new(false);
    let mut state = HashMap::new();
    let mut phone_id = HashMap::new();
    let mut letters: Vec<char> = entries.iter().flat_map(|(_, p)| p.chars()).collect();
    letters.push('<');
    letters.push('>');
    letters.sort_unstable();
    letters.dedup();
    for (i, c) in letters.into_iter().enumerate() {
        let id = hmms.add_phone(linear_phone(&c.to_string(), &[i as StateId], 0.5));
        hmms.register_identity_cdset(id);
        state.insert(c, i as StateId);
        phone_id.insert(c, id);
    }
    let mut dict = Dictionary::new();
    let bos = dict
        .add(DictWord {
            output: "<s>".into(),
            name: "<s>".into(),
            phones: vec![phone_id[&'<']],
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    let eos = dict
        .add(DictWord {
            output: "</s>".into(),
            name: "</s>".into(),
            phones: vec![phone_id[&'>']],
            category: CATEGORY_NONE,
            penalty: 0.0,
        })
        .unwrap();
    dict.head_silwid = Some(bos);
    dict.tail_silwid = Some(eos);
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
    Setup { hmms, dict, state }
}

impl Setup {
    fn utterance(&self, pron: &str) -> FrameTableScorer {
        let mut best = Vec::new();
        best.extend(std::iter::repeat(self.state[&'<']).take(SIL_FRAMES));
        for c in pron.chars() {
            best.extend(std::iter::repeat(self.state[&c]).take(FRAMES_PER_PHONE));
        }
        best.extend(std::iter::repeat(self.state[&'>']).take(SIL_FRAMES));
        FrameTableScorer {
            best,
            hit: -1.0,
            miss: -8.0,
        }
    }

    fn word_id(&self, name: &str) -> WordId {
        self.dict
            .ids()
            .find(|&w| self.dict.word(w).name == name)
            .unwrap()
    }
}

#[test]
fn graph_arcs_are_numbered_and_scored() {
    let s = setup(&[("read", "red"), ("reed", "red")]);
    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .stack(500, 2, 2)
        .graph(true)
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&s.dict, &s.hmms, Some(&lm), &config).unwrap();

    let scorer = s.utterance("red");
    let frames = scorer.best.len();
    let mut recognizer = Recognizer::new(&lex, &s.dict, &s.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    assert_eq!(result.status, RecogStatus::Success);
    let graph = result.graph.expect("graph requested but missing");
    assert!(!graph.is_empty());

    // both competing words survive as arcs
    let words: Vec<WordId> = graph.arcs.iter().map(|a| a.wid).collect();
    assert!(words.contains(&s.word_id("read")));
    assert!(words.contains(&s.word_id("reed")));

    // ids follow the (left, right) topological order
    let mut arcs = graph.arcs.clone();
    arcs.sort_by_key(|a| a.graph_id);
    for pair in arcs.windows(2) {
        assert!(
            pair[0].left_frame <= pair[1].left_frame
                || pair[0].right_frame <= pair[1].right_frame
        );
    }

    // posteriors are probabilities, spans are sane
    for arc in &graph.arcs {
        assert!(arc.left_frame <= arc.right_frame);
        assert!((0.0..=1.0).contains(&arc.graph_cm), "cm {}", arc.graph_cm);
    }

    // the dump renders one line per arc
    let text = format!("{}", graph.dump(&s.dict));
    assert_eq!(text.lines().count(), graph.len());
}

#[test]
fn confusion_network_orders_clusters_over_time() {
    let s = setup(&[("read", "red"), ("reed", "red")]);
    let config = SearchConfigBuilder::new(LmKind::Ngram)
        .beam_width(10_000)
        .score_envelope(None)
        .envelopes(None, None)
        .stack(500, 2, 2)
        .graph(true)
        .confnet(true)
        .build()
        .unwrap();
    let lm = UniformLm(-1.0);
    let lex = Lexicon::build(&s.dict, &s.hmms, Some(&lm), &config).unwrap();

    let scorer = s.utterance("red");
    let frames = scorer.best.len();
    let mut recognizer = Recognizer::new(&lex, &s.dict, &s.hmms, &config, Some(&lm), None);
    let result = recognizer.recognize(&scorer, frames, None);

    let confnet = result.confnet.expect("confusion network requested");
    assert!(!confnet.clusters.is_empty());

    // clusters are ordered over the time axis
    for pair in confnet.clusters.windows(2) {
        let m0 = (pair[0].left_frame + pair[0].right_frame) / 2;
        let m1 = (pair[1].left_frame + pair[1].right_frame) / 2;
        assert!(m0 <= m1);
    }

    // the homophone pair lands in one cluster
    let both = confnet.clusters.iter().find(|c| {
        let ids: Vec<WordId> = c.entries.iter().filter_map(|e| e.wid).collect();
        ids.contains(&s.word_id("read")) && ids.contains(&s.word_id("reed"))
    });
    assert!(both.is_some(), "homophones were not clustered together");

    // every entry is a probability
    for c in &confnet.clusters {
        for e in &c.entries {
            assert!((0.0..=1.0).contains(&e.prob));
        }
    }
}

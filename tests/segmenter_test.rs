use metta_voice::segmenter::{normalize, prepare_speech_text, DEFAULT_LONG_PHRASE_CHARS};
use metta_voice::{segment, Segmenter};

const SUTTA: &str = "\u{201C}Monks, there are these two extremes that are not to be \
indulged in by one who has gone forth.\u{201D} Which two? That which is devoted to sensual \
pleasure with reference to sensual objects: base, vulgar, common, ignoble, unprofitable; \
and that which is devoted to self-affliction: painful, ignoble, unprofitable. Avoiding \
both of these extremes, the middle way realized by the Tathagata (the one thus gone) \
produces vision, produces knowledge, and leads to calm -- to direct knowledge, to \
self-awakening, to Unbinding.";

const SAMPLES: &[&str] = &[
    SUTTA,
    "Monks, this is the first sentence. This is the second sentence, with a clause.",
    "Thus have I heard. At one time the Blessed One was staying near Savatthi.",
    "He asked \u{2018}why?\u{2019} and went on \u{2014} Then silence.",
    "word",
    "A. B. C.",
];

#[test]
fn segmentation_is_deterministic() {
    for text in SAMPLES {
        assert_eq!(segment(text), segment(text));
    }
}

#[test]
fn phrases_cover_the_normalized_text() {
    for text in SAMPLES {
        let phrases = segment(text);
        assert_eq!(phrases.join(" "), normalize(text), "{phrases:#?}");
    }
}

#[test]
fn no_phrase_is_empty_and_non_empty_input_yields_phrases() {
    for text in SAMPLES {
        let phrases = segment(text);
        assert!(!phrases.is_empty());
        assert!(phrases.iter().all(|p| !p.trim().is_empty()));
    }
}

#[test]
fn sentence_and_clause_scenario() {
    let phrases =
        segment("Monks, this is the first sentence. This is the second sentence, with a clause.");
    assert!(phrases.iter().any(|p| p.ends_with("first sentence.")));
    assert!(phrases.iter().any(|p| p.ends_with("second sentence,")));
    assert_eq!(phrases.last().map(String::as_str), Some("with a clause."));
    assert!(phrases
        .iter()
        .all(|p| p.chars().count() <= DEFAULT_LONG_PHRASE_CHARS));
}

#[test]
fn thresholds_change_granularity() {
    let fine = Segmenter::new(20, 5).segment(SUTTA);
    let coarse = Segmenter::new(120, 60).segment(SUTTA);
    assert!(fine.len() > coarse.len());
    assert_eq!(fine.join(" "), coarse.join(" "));
}

#[test]
fn speech_text_is_never_longer_than_the_phrase() {
    for phrase in segment(SUTTA) {
        let spoken = prepare_speech_text(&phrase);
        assert!(!spoken.contains('"'));
        assert!(spoken.chars().count() <= phrase.chars().count() + 1, "{phrase} -> {spoken}");
    }
}

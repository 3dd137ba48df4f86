//! Sutta text → speakable phrases.
//!
//! Pipeline:
//! 1. Normalize quotes, dashes and whitespace
//! 2. Split into sentences (.!? followed by a capitalized or quoted start)
//! 3. Split sentences into clauses (,;: always; `)`, closing quotes and
//!    em-dashes only before a capitalized continuation)
//! 4. Re-split clauses longer than the long threshold before conjunctions
//! 5. Merge short units forward so single words are never spoken alone
//!
//! Every split happens at a single space of the normalized text, so joining
//! the phrases with one space gives the normalized text back.

use std::ops::Range;
use std::time::Duration;

pub const DEFAULT_LONG_PHRASE_CHARS: usize = 50;
pub const DEFAULT_SHORT_PHRASE_CHARS: usize = 25;

const EM_DASH: char = '—';

const CONJUNCTIONS: &[&str] = &[
    "and", "but", "or", "nor", "yet", "so", "because", "although", "though", "while",
    "whereas", "unless", "until", "when", "whenever", "where", "which", "who", "whom",
    "whose", "that", "if", "however", "therefore", "thus", "then",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    long_phrase_chars: usize,
    short_phrase_chars: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            long_phrase_chars: DEFAULT_LONG_PHRASE_CHARS,
            short_phrase_chars: DEFAULT_SHORT_PHRASE_CHARS,
        }
    }
}

impl Segmenter {
    pub fn new(long_phrase_chars: usize, short_phrase_chars: usize) -> Self {
        Self {
            long_phrase_chars: long_phrase_chars.max(1),
            short_phrase_chars,
        }
    }

    /// Split `text` into phrases. Empty or whitespace-only input yields an
    /// empty list, which callers treat as "nothing to read".
    pub fn segment(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let words: Vec<&str> = normalized.split(' ').collect();
        let mut phrases = Vec::new();

        for sentence in split_where(&words, 0..words.len(), is_sentence_break) {
            let mut units = Vec::new();
            for clause in split_where(&words, sentence, is_clause_break) {
                if span_chars(&words, &clause) > self.long_phrase_chars {
                    units.extend(split_where(&words, clause, is_conjunction_break));
                } else {
                    units.push(clause);
                }
            }

            for unit in self.merge_short(&words, units) {
                phrases.push(words[unit].join(" "));
            }
        }

        phrases
    }

    fn merge_short(&self, words: &[&str], units: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let mut merged = Vec::with_capacity(units.len());
        let mut units = units.into_iter().peekable();

        while let Some(mut current) = units.next() {
            while span_chars(words, &current) < self.short_phrase_chars {
                let Some(next) = units.next_if(|next| self.can_merge(words, &current, next)) else {
                    break;
                };
                current = current.start..next.end;
            }
            merged.push(current);
        }

        merged
    }

    fn can_merge(&self, words: &[&str], current: &Range<usize>, next: &Range<usize>) -> bool {
        let last = words[current.end - 1];
        let first = words[next.start];

        // Dash boundaries are deliberate pauses.
        if last.ends_with(EM_DASH) || first.starts_with(EM_DASH) {
            return false;
        }
        if is_quote_boundary(last, first) {
            return false;
        }
        span_chars(words, &(current.start..next.end)) <= self.long_phrase_chars
    }
}

/// Segment with the default thresholds.
pub fn segment(text: &str) -> Vec<String> {
    Segmenter::default().segment(text)
}

/// Canonicalize quote and dash glyphs and collapse whitespace.
///
/// Curly quotes become straight quotes, `--` and em/horizontal bars become a
/// spaced em-dash.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => out.push('"'),
            '\u{2014}' | '\u{2015}' => out.push_str(" — "),
            '-' if chars.peek() == Some(&'-') => {
                while chars.next_if_eq(&'-').is_some() {}
                out.push_str(" — ");
            }
            c => out.push(c),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `range` of `words` at every boundary where `is_break(prev, next)`
/// holds. Boundaries before punctuation-only words are never taken, so
/// stray punctuation stays with the preceding phrase.
fn split_where(
    words: &[&str],
    range: Range<usize>,
    is_break: fn(&str, &str) -> bool,
) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut start = range.start;

    for i in range.start..range.end.saturating_sub(1) {
        let (prev, next) = (words[i], words[i + 1]);
        if !is_punctuation_only(next) && is_break(prev, next) {
            parts.push(start..i + 1);
            start = i + 1;
        }
    }

    if start < range.end {
        parts.push(start..range.end);
    }
    parts
}

fn span_chars(words: &[&str], range: &Range<usize>) -> usize {
    let letters: usize = words[range.clone()].iter().map(|w| w.chars().count()).sum();
    letters + range.len().saturating_sub(1)
}

fn is_sentence_break(prev: &str, next: &str) -> bool {
    let core = prev.trim_end_matches(['"', '\'', ')']);
    core.ends_with(['.', '!', '?']) && starts_capitalized(next)
}

fn is_clause_break(prev: &str, next: &str) -> bool {
    let core = prev.trim_end_matches(['"', '\'']);
    if core.ends_with([',', ';', ':']) {
        return true;
    }
    let closes = prev.ends_with(')') || prev.ends_with(['"', '\'']) || prev == "—";
    closes && starts_capitalized(next)
}

fn is_conjunction_break(_prev: &str, next: &str) -> bool {
    let word = next.trim_end_matches(|c: char| !c.is_alphanumeric());
    word.chars().all(char::is_lowercase) && CONJUNCTIONS.contains(&word)
}

fn starts_capitalized(word: &str) -> bool {
    if word.starts_with(['"', '\'']) {
        return true;
    }
    word.trim_start_matches('(')
        .chars()
        .next()
        .is_some_and(char::is_uppercase)
}

fn is_quote_boundary(last: &str, first: &str) -> bool {
    let closing = last.trim_end_matches(['.', ',', ';', ':', '!', '?']);
    closing.ends_with('"') || first.starts_with('"')
}

fn is_punctuation_only(word: &str) -> bool {
    !word.chars().any(char::is_alphanumeric)
}

/// Silence after a phrase, chosen by its trailing punctuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhrasePauses {
    pub sentence: Duration,
    pub clause: Duration,
    pub dash: Duration,
    pub phrase: Duration,
}

impl Default for PhrasePauses {
    fn default() -> Self {
        Self {
            sentence: Duration::from_millis(1000),
            clause: Duration::from_millis(500),
            dash: Duration::from_millis(300),
            phrase: Duration::from_millis(150),
        }
    }
}

impl PhrasePauses {
    pub fn after(&self, phrase: &str) -> Duration {
        let end = phrase.trim_end().trim_end_matches(['"', '\'', ')']);
        if end.ends_with(['.', '!', '?']) {
            self.sentence
        } else if end.ends_with([',', ';', ':']) {
            self.clause
        } else if end.ends_with(EM_DASH) {
            self.dash
        } else {
            self.phrase
        }
    }
}

/// Pause after `phrase` with the default durations.
pub fn pause_after(phrase: &str) -> Duration {
    PhrasePauses::default().after(phrase)
}

/// Text actually sent to a speech provider for a displayed phrase.
///
/// Drops double quotes, word-edge single quotes and parenthetical asides,
/// turns em-dashes into a comma pause and tidies spacing.
pub fn prepare_speech_text(phrase: &str) -> String {
    let mut stripped = String::with_capacity(phrase.len());
    let mut depth = 0usize;
    for c in phrase.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '"' => {}
            EM_DASH if depth == 0 => stripped.push_str(", "),
            c if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let words: Vec<&str> = stripped
        .split_whitespace()
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .collect();

    let mut out = String::with_capacity(stripped.len());
    for word in words {
        let attaches = word.chars().all(|c| matches!(c, ',' | '.' | ';' | ':' | '!' | '?'));
        if attaches {
            // Avoid doubled commas where a dash met existing punctuation.
            if !out.ends_with([',', '.', ';', ':', '!', '?']) || !word.starts_with(',') {
                out.push_str(word);
            }
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }

    out.trim_start_matches([',', ' ']).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_quotes_dashes_and_spaces() {
        assert_eq!(
            normalize("  \u{201C}Monks,\u{201D}  he said\u{2014}then\tpaused -- here "),
            "\"Monks,\" he said — then paused — here"
        );
        assert_eq!(normalize("it\u{2019}s"), "it's");
    }

    #[test]
    fn empty_input_is_nothing_to_read() {
        assert!(segment("").is_empty());
        assert!(segment(" \n\t  ").is_empty());
    }

    #[test]
    fn splits_sentences_and_clauses() {
        let phrases =
            segment("Monks, this is the first sentence. This is the second sentence, with a clause.");
        assert_eq!(
            phrases,
            vec![
                "Monks, this is the first sentence.",
                "This is the second sentence,",
                "with a clause.",
            ]
        );
    }

    #[test]
    fn long_clause_splits_before_conjunctions() {
        let text = "And the Blessed One said that the monks who were dwelling in the forest were content and happy.";
        let phrases = segment(text);
        assert!(phrases.len() > 1, "{phrases:?}");
        assert!(phrases.iter().all(|p| p.chars().count() <= DEFAULT_LONG_PHRASE_CHARS));
        assert_eq!(phrases.join(" "), normalize(text));
    }

    #[test]
    fn dash_boundary_is_not_merged() {
        let phrases = segment("He stopped — Then the monk spoke at great length about the path.");
        assert_eq!(phrases[0], "He stopped —");
    }

    #[test]
    fn short_units_do_not_merge_across_quotes() {
        let phrases = segment("He said, \"Go now,\" and left them there.");
        assert!(phrases.iter().any(|p| p == "He said,"), "{phrases:?}");
    }

    #[test]
    fn punctuation_only_words_attach_to_previous_phrase() {
        let phrases = segment("Thus have I heard . . . At one time.");
        assert_eq!(phrases.join(" "), "Thus have I heard . . . At one time.");
        assert!(phrases.iter().all(|p| !is_punctuation_only(p)));
    }

    #[test]
    fn pause_follows_trailing_punctuation() {
        let pauses = PhrasePauses::default();
        assert_eq!(pauses.after("the end."), Duration::from_millis(1000));
        assert_eq!(pauses.after("he asked?\""), Duration::from_millis(1000));
        assert_eq!(pauses.after("monks,"), Duration::from_millis(500));
        assert_eq!(pauses.after("and then —"), Duration::from_millis(300));
        assert_eq!(pauses.after("and then"), Duration::from_millis(150));
    }

    #[test]
    fn speech_text_drops_quotes_and_asides() {
        assert_eq!(
            prepare_speech_text("\"Monks (bhikkhus), listen\" — he said"),
            "Monks, listen, he said"
        );
        assert_eq!(prepare_speech_text("the Buddha's words"), "the Buddha's words");
        assert_eq!(prepare_speech_text("(aside only)"), "");
    }
}

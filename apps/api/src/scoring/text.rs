//! Text primitives shared by the scoring engine: tokenization, sentence and
//! syllable counting.

/// Lower-cases `text`, turns every non-word character into whitespace and
/// splits on whitespace. Empty tokens are discarded.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Number of segments produced by splitting on runs of `.`, `!` and `?`.
///
/// A trailing terminator still closes a (possibly empty) final segment, so
/// "One. Two." counts as three segments.
pub fn count_sentences(text: &str) -> usize {
    let mut segments = 1;
    let mut in_run = false;
    for c in text.chars() {
        let terminator = matches!(c, '.' | '!' | '?');
        if terminator && !in_run {
            segments += 1;
        }
        in_run = terminator;
    }
    segments
}

/// Vowel-group runs in a single token, floored at 1.
pub fn count_syllables(token: &str) -> usize {
    let mut groups = 0;
    let mut in_group = false;
    for c in token.chars() {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !in_group {
            groups += 1;
        }
        in_group = vowel;
    }
    groups.max(1)
}

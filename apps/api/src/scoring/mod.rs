//! Content Scoring: pure, deterministic heuristics over generated text.
//!
//! Default: `HeuristicScorer` (word count, reading time, Flesch-style
//! readability, keyword density, composite 0–100 score).
//!
//! `AppState` holds an `Arc<dyn ContentScorer>` so the worker pool and the
//! streaming session share one configured scorer.

pub mod handlers;
pub mod recommendations;
pub mod text;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::text::{count_sentences, count_syllables, tokenize};

/// Words per minute assumed when estimating reading time.
pub const DEFAULT_READING_WPM: u32 = 200;

// ────────────────────────────────────────────────────────────────────────────
// Output data model
// ────────────────────────────────────────────────────────────────────────────

/// Metrics embedded into a completed generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub word_count: usize,
    pub reading_time_minutes: u32,
    pub readability: f64, // 0 – 100
    /// Keyword phrase → percentage of all tokens covered by its matches.
    pub keyword_density: BTreeMap<String, f64>,
    pub score: u32, // 0 – 100
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

pub trait ContentScorer: Send + Sync {
    fn analyze(&self, text: &str, keywords: &[String]) -> ContentMetrics;
}

/// Pure-Rust heuristic scorer. No I/O, no shared state.
///
/// Algorithm:
/// 1. Tokenize (lower-case, punctuation → whitespace).
/// 2. readability = 206.835 − 1.015·(words/sentences) − 84.6·(syllables/words), clamped to [0,100]
/// 3. density(k) = non-overlapping phrase matches / words × 100
/// 4. score = word-count band + reading-time band + readability band + mean keyword band
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    words_per_minute: u32,
}

impl HeuristicScorer {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
        }
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new(DEFAULT_READING_WPM)
    }
}

impl ContentScorer for HeuristicScorer {
    fn analyze(&self, text: &str, keywords: &[String]) -> ContentMetrics {
        analyze(text, keywords, self.words_per_minute)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Core algorithm
// ────────────────────────────────────────────────────────────────────────────

pub fn analyze(text: &str, keywords: &[String], words_per_minute: u32) -> ContentMetrics {
    let tokens = tokenize(text);
    let word_count = tokens.len();
    let reading_time_minutes = reading_time(word_count, words_per_minute);
    let readability = readability(text, &tokens);
    let keyword_density = keyword_density(&tokens, keywords);
    let score = composite_score(word_count, reading_time_minutes, readability, &keyword_density);

    ContentMetrics {
        word_count,
        reading_time_minutes,
        readability,
        keyword_density,
        score,
    }
}

fn reading_time(word_count: usize, words_per_minute: u32) -> u32 {
    let wpm = words_per_minute.max(1) as usize;
    word_count.div_ceil(wpm) as u32
}

fn readability(text: &str, tokens: &[String]) -> f64 {
    let words = tokens.len();
    let sentences = count_sentences(text);
    if words == 0 || sentences == 0 {
        return 0.0;
    }

    let syllables: usize = tokens.iter().map(|t| count_syllables(t)).sum();
    let words = words as f64;
    let flesch =
        206.835 - 1.015 * (words / sentences as f64) - 84.6 * (syllables as f64 / words);

    flesch.clamp(0.0, 100.0)
}

fn keyword_density(tokens: &[String], keywords: &[String]) -> BTreeMap<String, f64> {
    let total = tokens.len();
    let mut density = BTreeMap::new();

    for keyword in keywords {
        let phrase = tokenize(keyword);
        if phrase.is_empty() {
            continue;
        }

        let matches = count_phrase_matches(tokens, &phrase);
        let value = if total > 0 {
            matches as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        density.insert(keyword.clone(), value);
    }

    density
}

/// Counts non-overlapping, contiguous occurrences of `phrase` in `tokens`.
fn count_phrase_matches(tokens: &[String], phrase: &[String]) -> usize {
    if phrase.len() > tokens.len() {
        return 0;
    }

    let mut count = 0;
    let mut i = 0;
    while i + phrase.len() <= tokens.len() {
        if tokens[i..i + phrase.len()] == *phrase {
            count += 1;
            i += phrase.len();
        } else {
            i += 1;
        }
    }
    count
}

fn composite_score(
    word_count: usize,
    reading_time_minutes: u32,
    readability: f64,
    keyword_density: &BTreeMap<String, f64>,
) -> u32 {
    let mut score = 0.0_f64;

    // Word count (optimal: 1000–2500)
    score += if (1000..=2500).contains(&word_count) {
        25.0
    } else if word_count >= 500 {
        15.0
    } else {
        5.0
    };

    // Reading time (optimal: 3–10 min)
    score += if (3..=10).contains(&reading_time_minutes) {
        20.0
    } else if reading_time_minutes >= 2 {
        12.0
    } else {
        5.0
    };

    // Readability (optimal: 60–80)
    score += if (60.0..=80.0).contains(&readability) {
        25.0
    } else if readability >= 40.0 {
        15.0
    } else {
        5.0
    };

    // Keyword density (optimal: 1–3%); excluded entirely when there are no keywords
    if !keyword_density.is_empty() {
        let total: f64 = keyword_density
            .values()
            .map(|&d| {
                if (1.0..=3.0).contains(&d) {
                    30.0
                } else if d >= 0.5 {
                    20.0
                } else {
                    5.0
                }
            })
            .sum();
        score += total / keyword_density.len() as f64;
    }

    score.round().clamp(0.0, 100.0) as u32
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

//! Similarity Engine: cosine similarity and ranking over profile embeddings.

use std::cmp::Ordering;

use crate::voice::models::{SimilarityMatch, VoiceProfile};

/// Cosine similarity in [-1, 1].
///
/// Returns 0.0 when either vector has zero magnitude, or when the lengths
/// differ (vectors from different models are not comparable).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Scores every candidate against `query`, sorted by descending similarity
/// and truncated to `limit`. Equal scores keep their input order.
pub fn rank(query: &[f32], candidates: &[VoiceProfile], limit: usize) -> Vec<SimilarityMatch> {
    let mut matches: Vec<SimilarityMatch> = candidates
        .iter()
        .map(|profile| SimilarityMatch {
            profile_id: profile.id,
            name: profile.name.clone(),
            similarity: cosine_similarity(query, &profile.embedding),
            samples: profile.samples.clone(),
        })
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

//! Vector similarity utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Ranking knowledge entries against a query embedding
//! - Average pairwise similarity of a group of vectors

use lorekeep_core::knowledge::{KnowledgeEntry, ScoredEntry};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 on length mismatch, empty input, or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank entries by cosine similarity to `query`, highest first.
///
/// Entries without an embedding are skipped. Ties keep input order.
pub fn rank_by_similarity<'a, I>(entries: I, query: &[f32], limit: usize) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = &'a KnowledgeEntry>,
{
    let mut scored: Vec<ScoredEntry> = entries
        .into_iter()
        .filter_map(|entry| {
            let embedding = entry.embedding.as_ref()?;
            Some(ScoredEntry {
                score: cosine_similarity(embedding, query),
                entry: entry.clone(),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Mean cosine similarity over all distinct pairs. A single vector scores 1.0.
pub fn average_pairwise_similarity(vectors: &[&[f32]]) -> f64 {
    if vectors.len() < 2 {
        return if vectors.is_empty() { 0.0 } else { 1.0 };
    }

    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for (i, a) in vectors.iter().enumerate() {
        for b in &vectors[i + 1..] {
            total += cosine_similarity(a, b) as f64;
            pairs += 1;
        }
    }
    total / pairs as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, embedding: Option<Vec<f32>>) -> KnowledgeEntry {
        let mut e = KnowledgeEntry::draft("history", title, "content");
        e.embedding = embedding;
        e
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_and_degenerate_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn ranking_orders_and_skips_unembedded() {
        let entries = vec![
            entry("far", Some(vec![0.0, 1.0])),
            entry("none", None),
            entry("near", Some(vec![1.0, 0.1])),
        ];
        let ranked = rank_by_similarity(&entries, &[1.0, 0.0], 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry.title, "near");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn ranking_respects_limit() {
        let entries: Vec<_> = (0..5).map(|i| entry(&i.to_string(), Some(vec![1.0, i as f32]))).collect();
        assert_eq!(rank_by_similarity(&entries, &[1.0, 0.0], 2).len(), 2);
    }

    #[test]
    fn pairwise_average() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        // pairs: ab=1, ac=0, bc=0
        let avg = average_pairwise_similarity(&[&a, &b, &c]);
        assert!((avg - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(average_pairwise_similarity(&[&a]), 1.0);
    }
}

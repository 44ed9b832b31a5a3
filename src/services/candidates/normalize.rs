//! Per-source score normalization.
//!
//! Raw scores from one channel are compressed with `log1p` and min–max
//! scaled onto [0, 1]. Sources are never co-mingled before this step:
//! popularity and co-occurrence scores live on unrelated scales and only
//! become comparable after normalization.

use crate::models::{ItemId, ScoredCandidate};
use std::collections::HashMap;

/// Spread below this is treated as "all scores equal".
const DEGENERATE_SPREAD: f64 = 1e-12;

pub fn normalize(candidates: &[ScoredCandidate]) -> HashMap<ItemId, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }

    let compressed: Vec<f64> = candidates
        .iter()
        .map(|c| c.score.max(0.0).ln_1p())
        .collect();

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in &compressed {
        min = min.min(v);
        max = max.max(v);
    }

    let spread = max - min;
    candidates
        .iter()
        .zip(compressed)
        .map(|(c, v)| {
            let normalized = if spread < DEGENERATE_SPREAD {
                1.0
            } else {
                (v - min) / spread
            };
            (c.article_id.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateSource;

    fn scored(id: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            article_id: id.to_string(),
            score,
            source: CandidateSource::Popularity,
        }
    }

    #[test]
    fn test_values_land_in_unit_interval() {
        let raw = vec![
            scored("a", 1000.0),
            scored("b", 50.0),
            scored("c", 0.5),
            scored("d", 0.0),
        ];

        let normalized = normalize(&raw);

        for value in normalized.values() {
            assert!((0.0..=1.0).contains(value));
        }
        assert!((normalized["a"] - 1.0).abs() < 1e-12);
        assert!(normalized["d"].abs() < 1e-12);
        // log1p compression keeps relative order.
        assert!(normalized["a"] > normalized["b"]);
        assert!(normalized["b"] > normalized["c"]);
    }

    #[test]
    fn test_all_equal_scores_become_exactly_one() {
        let raw = vec![scored("a", 3.0), scored("b", 3.0), scored("c", 3.0)];

        let normalized = normalize(&raw);

        assert!(normalized.values().all(|&v| v == 1.0));
    }

    #[test]
    fn test_single_candidate_is_degenerate() {
        let normalized = normalize(&[scored("a", 42.0)]);
        assert_eq!(normalized["a"], 1.0);
    }

    #[test]
    fn test_negative_scores_clamp_before_compression() {
        let raw = vec![scored("a", -5.0), scored("b", 1.0)];
        let normalized = normalize(&raw);
        assert_eq!(normalized["a"], 0.0);
        assert_eq!(normalized["b"], 1.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize(&[]).is_empty());
    }
}

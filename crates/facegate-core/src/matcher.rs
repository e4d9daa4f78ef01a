//! Nearest-match engine over stored embeddings.
//!
//! A probe is compared against every candidate with a fixed distance metric.
//! The closest candidate wins; it is a match only when its distance is
//! strictly below the configured threshold.

use crate::types::{DistanceMetric, Embedding, EmbeddingRecord, IdentityId};
use serde::{Deserialize, Serialize};

/// Matching parameters, fixed for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub metric: DistanceMetric,
    /// A candidate matches when `distance < threshold`.
    pub threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            threshold: 0.6,
        }
    }
}

/// The closest candidate seen during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub identity_id: IdentityId,
    pub embedding_id: String,
    pub distance: f32,
}

impl Candidate {
    /// `1 - distance`, clamped to [0, 1] so unbounded metrics stay meaningful.
    pub fn confidence(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Result of matching a probe embedding against a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Nothing was compared: the candidate set was empty or held no
    /// comparable vectors.
    NoCandidates,
    /// Candidates were compared but the closest one is not under the threshold.
    NoMatch { best: Candidate },
    Matched(Candidate),
}

impl MatchOutcome {
    /// Confidence reported when there was nothing to compare against.
    pub const NO_CANDIDATES_CONFIDENCE: f32 = -1.0;

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Caller-facing confidence: the match confidence, `0.0` for a failed
    /// comparison, or [`Self::NO_CANDIDATES_CONFIDENCE`].
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Matched(c) => c.confidence(),
            Self::NoMatch { .. } => 0.0,
            Self::NoCandidates => Self::NO_CANDIDATES_CONFIDENCE,
        }
    }

    /// Closest candidate, whether or not it matched.
    pub fn best(&self) -> Option<&Candidate> {
        match self {
            Self::Matched(c) | Self::NoMatch { best: c } => Some(c),
            Self::NoCandidates => None,
        }
    }
}

/// Strategy for comparing a probe embedding against enrolled records.
pub trait Matcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        candidates: &[EmbeddingRecord],
        threshold: f32,
    ) -> MatchOutcome;
}

/// Linear-scan matcher with a fixed distance metric.
///
/// Ties keep the first candidate encountered, so results are stable for a
/// given candidate order. Candidates with a different dimensionality than
/// the probe, or a non-finite distance, are skipped.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    metric: DistanceMetric,
}

impl DistanceMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

impl Matcher for DistanceMatcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        candidates: &[EmbeddingRecord],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in candidates.iter().enumerate() {
            let Some(distance) = probe.distance(&record.embedding, self.metric) else {
                tracing::debug!(
                    embedding_id = %record.embedding_id,
                    probe_dim = probe.dim(),
                    candidate_dim = record.embedding.dim(),
                    "skipping candidate with mismatched dimension"
                );
                continue;
            };
            if !distance.is_finite() {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((i, distance)),
            }
        }

        let Some((idx, distance)) = best else {
            return MatchOutcome::NoCandidates;
        };

        let record = &candidates[idx];
        let candidate = Candidate {
            identity_id: record.identity_id,
            embedding_id: record.embedding_id.clone(),
            distance,
        };

        if distance < threshold {
            MatchOutcome::Matched(candidate)
        } else {
            MatchOutcome::NoMatch { best: candidate }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(identity: i64, id: &str, values: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            identity_id: IdentityId::new(identity).unwrap(),
            embedding_id: id.into(),
            embedding: Embedding::new(values),
            model_tag: "m".into(),
            detector_tag: "d".into(),
            created_at: Utc::now(),
        }
    }

    /// Unit vector whose cosine distance to [1, 0] is `distance`.
    fn at_cosine_distance(distance: f32) -> Vec<f32> {
        let cos = 1.0 - distance;
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_empty_candidates_is_distinct_from_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let matcher = DistanceMatcher::new(DistanceMetric::Cosine);
        let outcome = matcher.find_best_match(&probe, &[], 0.6);
        assert_eq!(outcome, MatchOutcome::NoCandidates);
        assert_eq!(outcome.confidence(), -1.0);
        assert!(outcome.best().is_none());
    }

    #[test]
    fn test_picks_closest_under_threshold() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            record(1, "a", at_cosine_distance(0.8)),
            record(2, "b", at_cosine_distance(0.3)),
        ];
        let outcome =
            DistanceMatcher::new(DistanceMetric::Cosine).find_best_match(&probe, &candidates, 0.6);

        let MatchOutcome::Matched(best) = &outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(best.embedding_id, "b");
        assert_eq!(best.identity_id.get(), 2);
        assert!((outcome.confidence() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_no_match_above_threshold_reports_best() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![record(1, "a", at_cosine_distance(0.9))];
        let outcome =
            DistanceMatcher::new(DistanceMetric::Cosine).find_best_match(&probe, &candidates, 0.6);

        assert!(!outcome.is_match());
        assert!(outcome.confidence() <= 0.0);
        let best = outcome.best().unwrap();
        assert_eq!(best.embedding_id, "a");
        assert!((best.distance - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_threshold_is_strict() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let candidates = vec![record(1, "a", vec![0.6, 0.0])];
        let outcome = DistanceMatcher::new(DistanceMetric::Euclidean)
            .find_best_match(&probe, &candidates, 0.6);
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![
            record(1, "first", vec![1.0, 0.0]),
            record(2, "second", vec![1.0, 0.0]),
        ];
        let outcome =
            DistanceMatcher::new(DistanceMetric::Cosine).find_best_match(&probe, &candidates, 0.6);
        assert_eq!(outcome.best().unwrap().embedding_id, "first");
    }

    #[test]
    fn test_winner_has_minimum_distance() {
        let probe = Embedding::new(vec![0.3, -0.2, 0.9]);
        let candidates: Vec<_> = (0..20)
            .map(|i| {
                let f = i as f32;
                record(i + 1, &format!("e{i}"), vec![(f * 0.7).sin(), (f * 1.3).cos(), f * 0.05])
            })
            .collect();
        let matcher = DistanceMatcher::new(DistanceMetric::Euclidean);
        let outcome = matcher.find_best_match(&probe, &candidates, 10.0);
        let best = outcome.best().unwrap();

        for c in &candidates {
            let d = probe.euclidean_distance(&c.embedding);
            assert!(d >= best.distance, "{} is closer than the winner", c.embedding_id);
        }
    }

    #[test]
    fn test_deterministic() {
        let probe = Embedding::new(vec![0.5, 0.5]);
        let candidates = vec![
            record(1, "a", vec![0.4, 0.6]),
            record(2, "b", vec![0.6, 0.4]),
            record(3, "c", vec![-0.5, 0.5]),
        ];
        let matcher = DistanceMatcher::new(DistanceMetric::Cosine);
        let first = matcher.find_best_match(&probe, &candidates, 0.6);
        let second = matcher.find_best_match(&probe, &candidates, 0.6);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mismatched_dimensions_are_skipped() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let candidates = vec![record(1, "wide", vec![1.0, 0.0, 0.0])];
        let outcome =
            DistanceMatcher::new(DistanceMetric::Cosine).find_best_match(&probe, &candidates, 0.6);
        assert_eq!(outcome, MatchOutcome::NoCandidates);
    }

    #[test]
    fn test_euclidean_confidence_is_clamped() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let candidates = vec![record(1, "far", vec![3.0, 4.0])];
        let outcome = DistanceMatcher::new(DistanceMetric::Euclidean)
            .find_best_match(&probe, &candidates, 10.0);
        assert!(outcome.is_match());
        assert_eq!(outcome.confidence(), 0.0);
    }
}

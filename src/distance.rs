//! Distance metrics for vector similarity calculations.
//!
//! All three metrics are expressed so that **smaller is more similar**,
//! matching hnswlib's space conventions: `l2` is squared Euclidean distance,
//! `cosine` is `1 - cosine_similarity`, and `ip` is `1 - dot_product`. This
//! lets the query engine merge brute-force and HNSW results with one
//! ascending sort regardless of which metric the segment was created with.

use serde::{Deserialize, Serialize};

/// Distance metric fixed at segment creation; immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance. Best for spatial data.
    L2,

    /// `1 - cosine_similarity`. Best for normalized text/embedding vectors.
    Cosine,

    /// `1 - dot_product`. Best for maximum inner product search (MIPS).
    Ip,
}

impl DistanceMetric {
    /// Parses the config string form used by `SegmentConfig::space`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "l2" => Some(Self::L2),
            "cosine" => Some(Self::Cosine),
            "ip" => Some(Self::Ip),
            _ => None,
        }
    }

    /// Returns the config string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
            Self::Ip => "ip",
        }
    }

    /// Computes the distance between two equal-length vectors; smaller means
    /// more similar for every variant.
    ///
    /// # Panics
    ///
    /// Panics if `a.len() != b.len()`. Callers are expected to have already
    /// rejected dimension mismatches before reaching distance computation.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "vector dimensions must match");

        match self {
            Self::L2 => Self::squared_euclidean(a, b),
            Self::Cosine => 1.0 - Self::cosine_similarity(a, b),
            Self::Ip => 1.0 - Self::dot_product(a, b),
        }
    }

    fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot = Self::dot_product(a, b);
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }

    fn dot_product(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Caller input that fails validation before any analysis or storage happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid student id: {0}")]
    InvalidIdentity(i64),
    #[error("{0} is required")]
    MissingInput(&'static str),
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Identifier of an enrolled subject (a student).
///
/// Student ids are positive integers; zero and negative values are rejected
/// at construction so every stored record carries a valid owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct IdentityId(i64);

impl IdentityId {
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        if raw <= 0 {
            return Err(ValidationError::InvalidIdentity(raw));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for IdentityId {
    type Error = ValidationError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<IdentityId> for i64 {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Distance function used to compare two embeddings. Lower = more similar.
///
/// The metric must match the one the embedding model was trained for; cosine
/// and Euclidean distances are not interchangeable and use different thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in [0, 2].
    #[default]
    Cosine,
    /// L2 distance, unbounded above.
    Euclidean,
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Euclidean => f.write_str("euclidean"),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero vector has no direction, so its similarity to anything is 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Distance under `metric`, or `None` when the dimensions differ.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> Option<f32> {
        if self.dim() != other.dim() {
            return None;
        }
        Some(match metric {
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
        })
    }
}

/// One stored enrollment sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub identity_id: IdentityId,
    pub embedding_id: String,
    pub embedding: Embedding,
    /// Recognition model that produced the vector (e.g. "w600k_r50").
    pub model_tag: String,
    /// Detector used to locate the face (e.g. "det_10g").
    pub detector_tag: String,
    pub created_at: DateTime<Utc>,
}

/// Listing view of a record, without the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSummary {
    pub embedding_id: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub detector: String,
}

impl From<&EmbeddingRecord> for EmbeddingSummary {
    fn from(record: &EmbeddingRecord) -> Self {
        Self {
            embedding_id: record.embedding_id.clone(),
            created_at: record.created_at,
            model: record.model_tag.clone(),
            detector: record.detector_tag.clone(),
        }
    }
}

/// The highest-confidence face found in an image, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub confidence: f32,
    pub embedding: Embedding,
}

/// What the analyzer reports for one image: how many faces it saw and the
/// embedding of the most confident one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectorOutput {
    pub face_count: usize,
    pub primary: Option<DetectedFace>,
}

impl DetectorOutput {
    pub fn no_face() -> Self {
        Self::default()
    }

    pub fn single(confidence: f32, embedding: Embedding) -> Self {
        Self {
            face_count: 1,
            primary: Some(DetectedFace {
                confidence,
                embedding,
            }),
        }
    }
}

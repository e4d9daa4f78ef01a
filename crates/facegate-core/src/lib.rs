//! facegate-core: face registration and verification.
//!
//! Embeddings come from SCRFD detection plus ArcFace recognition on ONNX
//! Runtime, are persisted per student in SQLite, and are compared with a
//! nearest-neighbour search under a configurable distance metric.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod gate;
pub mod matcher;
pub mod recognizer;
pub mod service;
pub mod settings;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use gate::{GateConfig, GatingPolicy, Purpose, RejectReason};
pub use matcher::{DistanceMatcher, MatchConfig, MatchOutcome, Matcher};
pub use service::{FaceService, RegisterOutcome, ServiceError, VerifyOutcome, VerifyReport};
pub use settings::Settings;
pub use store::{EmbeddingStore, RegistrationPolicy, SqliteStore, StoreError};
pub use types::{
    DistanceMetric, Embedding, EmbeddingRecord, EmbeddingSummary, IdentityId, ValidationError,
};

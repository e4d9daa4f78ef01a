//! Registration and verification workflow.
//!
//! `FaceService` owns one store and one analyzer. Every operation runs to
//! completion on the caller's thread; gate rejections are ordinary outcomes,
//! not errors, and never reach the store.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::gate::{GateConfig, GateResult, GatingPolicy, Purpose, RejectReason};
use crate::matcher::{DistanceMatcher, MatchConfig, MatchOutcome, Matcher};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{
    DistanceMetric, EmbeddingRecord, EmbeddingSummary, IdentityId, ValidationError,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub gate: GateConfig,
    pub matching: MatchConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Registered { record: EmbeddingRecord, confidence: f32 },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Completed(MatchOutcome),
    Rejected(RejectReason),
}

/// Caller-facing summary of a completed verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub matched: bool,
    /// Matched student, only present on a match.
    pub student_id: Option<IdentityId>,
    pub embedding_id: Option<String>,
    pub confidence: f32,
    /// Distance to the closest candidate, present whenever anything was compared.
    pub distance: Option<f32>,
}

impl From<&MatchOutcome> for VerifyReport {
    fn from(outcome: &MatchOutcome) -> Self {
        let matched = match outcome {
            MatchOutcome::Matched(c) => Some(c),
            _ => None,
        };
        Self {
            matched: outcome.is_match(),
            student_id: matched.map(|c| c.identity_id),
            embedding_id: matched.map(|c| c.embedding_id.clone()),
            confidence: outcome.confidence(),
            distance: outcome.best().map(|c| c.distance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub total_embeddings: usize,
    pub model: String,
    pub detector: String,
    pub metric: DistanceMetric,
    pub threshold: f32,
}

pub struct FaceService<S, A> {
    store: S,
    analyzer: A,
    gate: GatingPolicy,
    matcher: DistanceMatcher,
    threshold: f32,
}

impl<S: EmbeddingStore, A: FaceAnalyzer> FaceService<S, A> {
    pub fn new(store: S, analyzer: A, config: ServiceConfig) -> Self {
        Self {
            store,
            analyzer,
            gate: GatingPolicy::new(config.gate),
            matcher: DistanceMatcher::new(config.matching.metric),
            threshold: config.matching.threshold,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Enroll one face sample for `identity`.
    pub fn register(
        &mut self,
        identity: IdentityId,
        image: &RgbImage,
    ) -> Result<RegisterOutcome, ServiceError> {
        require_image(image)?;

        if let Err(reason) = self.gate.precheck(image, Purpose::Register) {
            tracing::warn!(student_id = %identity, %reason, "registration image rejected");
            return Ok(RegisterOutcome::Rejected(reason));
        }

        let output = self.analyzer.analyze(image)?;
        let gated = self.gate.validate_detection(output, Purpose::Register);
        let (embedding, confidence) = match gated {
            GateResult::Accepted { embedding, confidence } => (embedding, confidence),
            GateResult::Rejected(reason) => {
                tracing::warn!(student_id = %identity, %reason, "registration rejected");
                return Ok(RegisterOutcome::Rejected(reason));
            }
        };

        let record = self.store.put(
            identity,
            &embedding,
            self.analyzer.model_tag(),
            self.analyzer.detector_tag(),
        )?;
        tracing::info!(
            student_id = %identity,
            embedding_id = %record.embedding_id,
            confidence,
            "face registered"
        );

        Ok(RegisterOutcome::Registered { record, confidence })
    }

    /// Verify `image` against one student's samples, or against everyone
    /// when `identity` is `None`.
    pub fn verify(
        &mut self,
        identity: Option<IdentityId>,
        image: &RgbImage,
    ) -> Result<VerifyOutcome, ServiceError> {
        require_image(image)?;

        let output = self.analyzer.analyze(image)?;
        let probe = match self.gate.validate_detection(output, Purpose::Verify) {
            GateResult::Accepted { embedding, .. } => embedding,
            GateResult::Rejected(reason) => {
                tracing::warn!(
                    student_id = ?identity.map(IdentityId::get),
                    %reason,
                    "verification rejected"
                );
                return Ok(VerifyOutcome::Rejected(reason));
            }
        };

        let stored = match identity {
            Some(id) => self.store.list(id)?,
            None => self.store.list_all()?,
        };
        let total = stored.len();
        let candidates: Vec<EmbeddingRecord> = stored
            .into_iter()
            .filter(|r| self.comparable(r, probe.dim()))
            .collect();
        if candidates.len() < total {
            tracing::debug!(
                skipped = total - candidates.len(),
                "excluded samples from another model, detector or dimension"
            );
        }

        let outcome = self.matcher.find_best_match(&probe, &candidates, self.threshold);
        tracing::info!(
            student_id = ?identity.map(IdentityId::get),
            candidates = candidates.len(),
            matched = outcome.is_match(),
            distance = ?outcome.best().map(|c| c.distance),
            "verification finished"
        );

        Ok(VerifyOutcome::Completed(outcome))
    }

    pub fn list_embeddings(
        &self,
        identity: IdentityId,
    ) -> Result<Vec<EmbeddingSummary>, ServiceError> {
        let records = self.store.list(identity)?;
        Ok(records.iter().map(EmbeddingSummary::from).collect())
    }

    /// Returns `false` when the sample does not exist for this student.
    pub fn delete_embedding(
        &self,
        identity: IdentityId,
        embedding_id: &str,
    ) -> Result<bool, ServiceError> {
        if embedding_id.trim().is_empty() {
            return Err(ValidationError::MissingInput("embedding_id").into());
        }
        let deleted = self.store.delete(identity, embedding_id)?;
        if deleted {
            tracing::info!(student_id = %identity, embedding_id, "face sample deleted");
        }
        Ok(deleted)
    }

    pub fn status(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus {
            total_embeddings: self.store.count()?,
            model: self.analyzer.model_tag().to_string(),
            detector: self.analyzer.detector_tag().to_string(),
            metric: self.matcher.metric(),
            threshold: self.threshold,
        })
    }

    fn comparable(&self, record: &EmbeddingRecord, dim: usize) -> bool {
        record.model_tag == self.analyzer.model_tag()
            && record.detector_tag == self.analyzer.detector_tag()
            && record.embedding.dim() == dim
    }
}

fn require_image(image: &RgbImage) -> Result<(), ValidationError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ValidationError::MissingInput("image"));
    }
    Ok(())
}

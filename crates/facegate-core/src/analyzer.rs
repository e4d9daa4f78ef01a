//! The face analysis capability: detect faces in an image and embed the
//! primary one.

use crate::detector::{DetectorError, FaceDetector, SCRFD_DETECTOR_TAG};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MODEL_TAG};
use crate::types::{DetectedFace, DetectorOutput};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Black-box `detect_and_embed`. Implementations report every face they see
/// and embed only the most confident one; deciding whether that is
/// acceptable is the gate's job.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<DetectorOutput, AnalyzerError>;

    /// Recognition model that produces the embeddings.
    fn model_tag(&self) -> &str;

    fn detector_tag(&self) -> &str;
}

/// SCRFD + ArcFace pipeline on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, AnalyzerError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<DetectorOutput, AnalyzerError> {
        let faces = self.detector.detect(image)?;
        let Some(best) = faces.first() else {
            return Ok(DetectorOutput::no_face());
        };

        let embedding = self.recognizer.extract(image, best)?;
        tracing::debug!(
            faces = faces.len(),
            confidence = best.confidence,
            "analyzed image"
        );

        Ok(DetectorOutput {
            face_count: faces.len(),
            primary: Some(DetectedFace {
                confidence: best.confidence,
                embedding,
            }),
        })
    }

    fn model_tag(&self) -> &str {
        ARCFACE_MODEL_TAG
    }

    fn detector_tag(&self) -> &str {
        SCRFD_DETECTOR_TAG
    }
}

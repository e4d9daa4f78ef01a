//! Gating policy applied to analyzer output before an embedding is trusted.
//!
//! Registration and verification both require exactly one face. The
//! detection-confidence floor is enforced per purpose, and registration
//! images can additionally be screened for size and exposure.

use crate::types::{DetectorOutput, Embedding};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the gate is being consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Register,
    Verify,
}

/// Size and exposure limits for registration images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageQualityLimits {
    /// Minimum width and height in pixels.
    pub min_side: u32,
    /// Mean brightness window over all channels (0–255).
    pub min_brightness: f32,
    pub max_brightness: f32,
}

impl Default for ImageQualityLimits {
    fn default() -> Self {
        Self {
            min_side: 100,
            min_brightness: 30.0,
            max_brightness: 220.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Detector confidence floor.
    pub min_confidence: f32,
    pub enforce_on_register: bool,
    pub enforce_on_verify: bool,
    /// Checked before registration only; `None` disables the check.
    pub image_quality: Option<ImageQualityLimits>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            enforce_on_register: true,
            enforce_on_verify: false,
            image_quality: Some(ImageQualityLimits::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageDefect {
    TooSmall { width: u32, height: u32, min_side: u32 },
    TooDark { brightness: f32 },
    TooBright { brightness: f32 },
}

/// Expected, user-facing reasons an image is not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NoFace,
    MultipleFaces { count: usize },
    LowConfidence { confidence: f32, floor: f32 },
    PoorImage(ImageDefect),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFace => f.write_str("No face detected"),
            Self::MultipleFaces { .. } => f.write_str(
                "Multiple faces detected, please provide an image with only one face",
            ),
            Self::LowConfidence { .. } => f.write_str(
                "Low quality face image. Please use better lighting and a clear frontal face position",
            ),
            Self::PoorImage(ImageDefect::TooSmall { min_side, .. }) => {
                write!(f, "Image too small, both sides must be at least {min_side} pixels")
            }
            Self::PoorImage(ImageDefect::TooDark { .. }) => f.write_str("Image too dark"),
            Self::PoorImage(ImageDefect::TooBright { .. }) => f.write_str("Image too bright"),
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, PartialEq)]
pub enum GateResult {
    Accepted { embedding: Embedding, confidence: f32 },
    Rejected(RejectReason),
}

/// Pure decision function over analyzer output. Knows nothing about storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatingPolicy {
    config: GateConfig,
}

impl GatingPolicy {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    fn enforces_floor(&self, purpose: Purpose) -> bool {
        match purpose {
            Purpose::Register => self.config.enforce_on_register,
            Purpose::Verify => self.config.enforce_on_verify,
        }
    }

    pub fn validate_detection(&self, output: DetectorOutput, purpose: Purpose) -> GateResult {
        if output.face_count > 1 {
            return GateResult::Rejected(RejectReason::MultipleFaces {
                count: output.face_count,
            });
        }
        let Some(face) = output.primary.filter(|_| output.face_count == 1) else {
            return GateResult::Rejected(RejectReason::NoFace);
        };

        let floor = self.config.min_confidence;
        if self.enforces_floor(purpose) && face.confidence < floor {
            return GateResult::Rejected(RejectReason::LowConfidence {
                confidence: face.confidence,
                floor,
            });
        }

        GateResult::Accepted {
            embedding: face.embedding,
            confidence: face.confidence,
        }
    }

    /// Screen the raw image before it reaches the analyzer.
    pub fn precheck(&self, image: &RgbImage, purpose: Purpose) -> Result<(), RejectReason> {
        match (purpose, &self.config.image_quality) {
            (Purpose::Register, Some(limits)) => {
                check_image_quality(image, limits).map_err(RejectReason::PoorImage)
            }
            _ => Ok(()),
        }
    }
}

/// Mean of every channel byte, 0–255.
pub fn mean_brightness(image: &RgbImage) -> f32 {
    let raw = image.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let sum: u64 = raw.iter().map(|&b| b as u64).sum();
    sum as f32 / raw.len() as f32
}

pub fn check_image_quality(
    image: &RgbImage,
    limits: &ImageQualityLimits,
) -> Result<(), ImageDefect> {
    let (width, height) = image.dimensions();
    if width < limits.min_side || height < limits.min_side {
        return Err(ImageDefect::TooSmall {
            width,
            height,
            min_side: limits.min_side,
        });
    }

    let brightness = mean_brightness(image);
    if brightness < limits.min_brightness {
        return Err(ImageDefect::TooDark { brightness });
    }
    if brightness > limits.max_brightness {
        return Err(ImageDefect::TooBright { brightness });
    }
    Ok(())
}

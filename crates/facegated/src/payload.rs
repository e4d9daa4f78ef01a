//! Base64 image payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use facegate_core::types::ValidationError;
use image::RgbImage;

/// Decode a base64 image, with or without a `data:image/...;base64,` header.
pub fn decode_image(payload: &str) -> Result<RgbImage, ValidationError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(ValidationError::MissingInput("image"));
    }

    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (_, data) = rest.split_once(',').ok_or_else(|| {
                ValidationError::InvalidImage("data URL has no payload".to_string())
            })?;
            data
        }
        None => payload,
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ValidationError::InvalidImage(format!("invalid base64: {e}")))?;

    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| ValidationError::InvalidImage(format!("cannot decode image: {e}")))?;

    Ok(decoded.to_rgb8())
}

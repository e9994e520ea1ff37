use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::services::storage::StorageError;

/// JPEG quality for every derivative.
pub const JPEG_QUALITY: u8 = 90;

/// Height that keeps the source aspect ratio at `target_width`.
///
/// Computed as `floor(height * (target_width / width))` in double precision.
pub fn derived_height(width: u32, height: u32, target_width: u32) -> u32 {
    let ratio = f64::from(target_width) / f64::from(width);
    (f64::from(height) * ratio).floor() as u32
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ResizeError> {
    image::load_from_memory(bytes).map_err(ResizeError::Decode)
}

/// Resample `img` to `target_width`, preserving aspect ratio. Upscaling is allowed.
pub fn resize_to_width(img: &DynamicImage, target_width: u32) -> Result<DynamicImage, ResizeError> {
    let (width, height) = img.dimensions();
    if target_width == 0 || width == 0 {
        return Err(ResizeError::InvalidWidth {
            target_width,
            reason: "width must be positive".to_string(),
        });
    }

    let new_height = derived_height(width, height, target_width);
    if new_height == 0 {
        return Err(ResizeError::InvalidWidth {
            target_width,
            reason: format!("derived height is zero for a {width}x{height} source"),
        });
    }

    Ok(img.resize_exact(target_width, new_height, FilterType::Lanczos3))
}

pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ResizeError> {
    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))
        .map_err(ResizeError::Encode)?;
    Ok(buffer)
}

/// A resampled and encoded derivative, not yet persisted.
#[derive(Debug)]
pub struct RenderedDerivative {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

pub fn render_derivative(img: &DynamicImage, target_width: u32) -> Result<RenderedDerivative, ResizeError> {
    let resized = resize_to_width(img, target_width)?;
    let (width, height) = resized.dimensions();
    let jpeg = encode_jpeg(&resized)?;
    Ok(RenderedDerivative { width, height, jpeg })
}

#[derive(Debug, thiserror::Error)]
pub enum ResizeError {
    #[error("Invalid job message: {0}")]
    InvalidMessage(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode derivative: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Cannot resize to width {target_width}: {reason}")]
    InvalidWidth { target_width: u32, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to serialize completion record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

//! Page image clean-up ahead of recognition.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageEncoder};
use resilience::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
}

impl PreprocessError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ProcessingFailure
    }
}

/// CPU-bound transform applied to every page before OCR.
///
/// Implementations are called from blocking worker threads.
pub trait Preprocessor: Send + Sync {
    fn preprocess(&self, image: &[u8]) -> Result<Vec<u8>, PreprocessError>;
}

/// Grayscale, contrast boost and JPEG re-encode, downscaling pages larger
/// than `max_dimension` on their long side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePreprocessor {
    pub max_dimension: u32,
    pub contrast: f32,
    pub jpeg_quality: u8,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            max_dimension: 2480,
            contrast: 15.0,
            jpeg_quality: 90,
        }
    }
}

impl ImagePreprocessor {
    fn prepare(&self, image: DynamicImage) -> DynamicImage {
        let image = if image.width().max(image.height()) > self.max_dimension {
            image.thumbnail(self.max_dimension, self.max_dimension)
        } else {
            image
        };
        image.grayscale().adjust_contrast(self.contrast)
    }
}

impl Preprocessor for ImagePreprocessor {
    fn preprocess(&self, bytes: &[u8]) -> Result<Vec<u8>, PreprocessError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| PreprocessError::Decode(e.to_string()))?;
        let luma = self.prepare(decoded).to_luma8();

        let mut encoded = Vec::with_capacity(bytes.len() / 2);
        JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
            .write_image(
                luma.as_raw(),
                luma.width(),
                luma.height(),
                ColorType::L8.into(),
            )
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        Ok(encoded)
    }
}

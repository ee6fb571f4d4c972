//! Multi-page document split and merge.

use resilience::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("multi-page documents are not supported: {0}")]
    Unsupported(&'static str),
    #[error("failed to load document: {0}")]
    Load(String),
    #[error("failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },
    #[error("failed to merge pages: {0}")]
    Merge(String),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Unsupported(_) | CodecError::Load(_) => ErrorKind::InvalidInput,
            CodecError::Render { .. } | CodecError::Merge(_) => ErrorKind::ProcessingFailure,
        }
    }
}

/// Splits a document into page images and rebuilds one from them.
///
/// Page order is preserved in both directions. Calls run on blocking
/// worker threads.
pub trait PageCodec: Send + Sync {
    fn split(&self, document: &[u8]) -> Result<Vec<Vec<u8>>, CodecError>;
    fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, CodecError>;
}

/// Codec used when no document backend is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPageCodec;

impl PageCodec for NoPageCodec {
    fn split(&self, _document: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        Err(CodecError::Unsupported("built without the `pdf` feature"))
    }

    fn merge(&self, _pages: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unsupported("built without the `pdf` feature"))
    }
}

/// Whether the input should go through page fan-out.
pub fn is_multi_page(filename: &str, bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-") || filename.to_ascii_lowercase().ends_with(".pdf")
}

/// The codec this build can offer.
pub fn default_codec() -> std::sync::Arc<dyn PageCodec> {
    #[cfg(feature = "pdf")]
    {
        std::sync::Arc::new(pdf::PdfiumCodec::default())
    }
    #[cfg(not(feature = "pdf"))]
    {
        std::sync::Arc::new(NoPageCodec)
    }
}

#[cfg(feature = "pdf")]
pub mod pdf {
    //! Pdfium-backed codec. Pages render to JPEG; merge writes one image
    //! per page into a fresh PDF, decoding a single page at a time.

    use super::{CodecError, PageCodec};
    use image::codecs::jpeg::JpegEncoder;
    use image::{ColorType, ImageEncoder};
    use pdfium_render::prelude::{PdfPagePaperSize, PdfPoints, PdfRenderConfig, Pdfium, PdfiumError};

    #[derive(Debug, Clone, Copy)]
    pub struct PdfiumCodec {
        /// Render width in pixels.
        pub target_width: u32,
        /// Resolution used to size merged pages.
        pub dpi: f32,
        pub jpeg_quality: u8,
    }

    impl Default for PdfiumCodec {
        fn default() -> Self {
            Self {
                target_width: 1654,
                dpi: 200.0,
                jpeg_quality: 90,
            }
        }
    }

    fn load_pdfium() -> Result<Pdfium, PdfiumError> {
        if let Ok(path) = std::env::var("PDFIUM_LIBRARY_PATH") {
            if let Ok(bindings) =
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            {
                return Ok(Pdfium::new(bindings));
            }
        }
        Pdfium::bind_to_system_library().map(Pdfium::new)
    }

    impl PageCodec for PdfiumCodec {
        fn split(&self, document: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
            let pdfium = load_pdfium().map_err(|e| CodecError::Load(e.to_string()))?;
            let document = pdfium
                .load_pdf_from_byte_slice(document, None)
                .map_err(|e| CodecError::Load(e.to_string()))?;

            let render_config = PdfRenderConfig::new().set_target_width(self.target_width as i32);
            let mut pages = Vec::with_capacity(document.pages().len() as usize);

            for (index, page) in document.pages().iter().enumerate() {
                let page_no = index + 1;
                let bitmap = page
                    .render_with_config(&render_config)
                    .map_err(|e| CodecError::Render {
                        page: page_no,
                        reason: e.to_string(),
                    })?;
                let width = bitmap.width() as u32;
                let height = bitmap.height() as u32;
                let rgba = bitmap.as_rgba_bytes();
                let rgb: Vec<u8> = rgba
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect();

                let mut encoded = Vec::new();
                JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
                    .write_image(&rgb, width, height, ColorType::Rgb8.into())
                    .map_err(|e| CodecError::Render {
                        page: page_no,
                        reason: e.to_string(),
                    })?;
                pages.push(encoded);
            }

            Ok(pages)
        }

        fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
            let pdfium = load_pdfium().map_err(|e| CodecError::Load(e.to_string()))?;
            let mut document = pdfium
                .create_new_pdf()
                .map_err(|e| CodecError::Merge(e.to_string()))?;
            let points_per_pixel = 72.0 / self.dpi;

            for (index, bytes) in pages.iter().enumerate() {
                let image = image::load_from_memory(bytes).map_err(|e| CodecError::Render {
                    page: index + 1,
                    reason: e.to_string(),
                })?;
                let width = PdfPoints::new(image.width() as f32 * points_per_pixel);
                let height = PdfPoints::new(image.height() as f32 * points_per_pixel);

                let mut page = document
                    .pages_mut()
                    .create_page_at_end(PdfPagePaperSize::from_points(width, height))
                    .map_err(|e| CodecError::Merge(e.to_string()))?;
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::ZERO,
                        PdfPoints::ZERO,
                        &image,
                        Some(width),
                        Some(height),
                    )
                    .map_err(|e| CodecError::Merge(e.to_string()))?;
            }

            document
                .save_to_bytes()
                .map_err(|e| CodecError::Merge(e.to_string()))
        }
    }
}

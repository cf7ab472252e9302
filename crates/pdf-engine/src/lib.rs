use image::{ImageBuffer, Rgba};
use std::fs;
use std::path::{Path, PathBuf};

mod content;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod lopdf_backend;

pub use lopdf_backend::LopdfDocument;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Native page units per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Longest edge, in pixels, a single render may produce.
pub const MAX_RENDER_EDGE_PX: u32 = 12_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

    pub fn bounds(&self) -> PageRect {
        PageRect { x: 0.0, y: 0.0, width: self.width_pt, height: self.height_pt }
    }
}

/// Rectangle in native document space: points, origin at the page's bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.top()
    }
}

/// A positioned piece of native-layer content.
///
/// Coordinates are document units measured from the page's top-left corner
/// (y grows downward), so sorting by `y0` ascending walks the page top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    /// `false` for images and drawings.
    pub is_text_block: bool,
}

impl TextFragment {
    /// Whether the fragment's centre falls inside `clip` on a page `page_height` tall.
    pub fn centered_in(&self, clip: &PageRect, page_height: f64) -> bool {
        let center_x = (self.x0 + self.x1) / 2.0;
        let center_y = page_height - (self.y0 + self.y1) / 2.0;
        clip.contains_point(center_x, center_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    /// Pixels per document unit (render DPI / 72).
    pub scale: f64,
    /// Sub-rectangle to rasterize instead of the full page.
    pub clip: Option<PageRect>,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0, clip: None }
    }
}

impl RenderRequest {
    pub fn at_dpi(page_index: u32, dpi: u32) -> Self {
        Self { page_index, scale: f64::from(dpi) / POINTS_PER_INCH, clip: None }
    }

    pub fn with_clip(mut self, clip: PageRect) -> Self {
        self.clip = Some(clip);
        self
    }

    /// Output raster dimensions for a page of `page_size`.
    pub fn output_size(&self, page_size: PageSize) -> (u32, u32) {
        let scale = if self.scale <= 0.0 { 1.0 } else { self.scale };
        let (width, height) = match self.clip {
            Some(clip) => (clip.width, clip.height),
            None => (page_size.width_pt, page_size.height_pt),
        };

        let edge = |value: f64| {
            (value * scale).round().clamp(1.0, f64::from(MAX_RENDER_EDGE_PX)) as u32
        };
        (edge(width), edge(height))
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl OpenSource {
    pub fn into_bytes(self) -> Result<Vec<u8>, PdfEngineError> {
        match self {
            OpenSource::Path(path) => Ok(fs::read(path)?),
            OpenSource::Bytes(bytes) => Ok(bytes),
        }
    }
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("rasterization requires the pdfium backend")]
    RasterizationUnavailable,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Read access to one opened source document.
///
/// Implementations hold no interior mutability that callers can observe, so a
/// single handle can serve extraction workers on several threads.
pub trait SourceDocument: Send + Sync {
    fn page_count(&self) -> u32;

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError>;

    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError>;

    /// Native-layer fragments whose centre lies inside `clip`.
    fn text_fragments(
        &self,
        page_index: u32,
        clip: PageRect,
    ) -> Result<Vec<TextFragment>, PdfEngineError>;
}

pub(crate) fn reject_encrypted(bytes: &[u8]) -> Result<(), PdfEngineError> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }
    Ok(())
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// PDFium-backed document: real rasterization and text segments.
    ///
    /// Page geometry comes from the lopdf layout pass; PDFium is bound per call
    /// so the handle stays `Send + Sync`.
    pub struct PdfiumDocument {
        bytes: Vec<u8>,
        layout: LopdfDocument,
    }

    impl PdfiumDocument {
        pub fn open(source: OpenSource) -> Result<Self, PdfEngineError> {
            let bytes = source.into_bytes()?;
            let _ = bind()?;
            let layout = LopdfDocument::from_bytes(&bytes)?;
            Ok(Self { bytes, layout })
        }

        fn with_page<T>(
            &self,
            page_index: u32,
            f: impl FnOnce(&PdfPage<'_>) -> Result<T, PdfEngineError>,
        ) -> Result<T, PdfEngineError> {
            let page_count = self.layout.page_count();
            let out_of_range = || PdfEngineError::PageOutOfRange { page: page_index, page_count };
            if page_index >= page_count {
                return Err(out_of_range());
            }

            let pdfium = bind()?;
            let document = pdfium.load_pdf_from_byte_slice(&self.bytes, None).map_err(backend)?;
            let index = u16::try_from(page_index).map_err(|_| out_of_range())?;
            let page = document.pages().get(index).map_err(backend)?;
            f(&page)
        }
    }

    fn bind() -> Result<Pdfium, PdfEngineError> {
        Pdfium::bind_to_system_library().map(Pdfium::new).map_err(|err| {
            PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
        })
    }

    fn backend(err: PdfiumError) -> PdfEngineError {
        PdfEngineError::Backend(err.to_string())
    }

    impl SourceDocument for PdfiumDocument {
        fn page_count(&self) -> u32 {
            self.layout.page_count()
        }

        fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
            self.layout.page_size(page_index)
        }

        fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
            let page_size = self.page_size(request.page_index)?;
            let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

            let page_image = self.with_page(request.page_index, |page| {
                let config = PdfRenderConfig::new().scale_page_by_factor(scale as f32);
                let bitmap = page.render_with_config(&config).map_err(backend)?;
                Ok(bitmap.as_image().to_rgba8())
            })?;

            let Some(clip) = request.clip else {
                return Ok(page_image);
            };

            let (width, height) = request.output_size(page_size);
            let left = (clip.x * scale).round().max(0.0) as u32;
            let top = ((page_size.height_pt - clip.top()) * scale).round().max(0.0) as u32;
            Ok(image::imageops::crop_imm(&page_image, left, top, width, height).to_image())
        }

        fn text_fragments(
            &self,
            page_index: u32,
            clip: PageRect,
        ) -> Result<Vec<TextFragment>, PdfEngineError> {
            let page_height = self.page_size(page_index)?.height_pt;

            self.with_page(page_index, |page| {
                let text = page.text().map_err(backend)?;
                let fragments = text
                    .segments()
                    .iter()
                    .map(|segment| {
                        let bounds = segment.bounds();
                        TextFragment {
                            text: segment.text(),
                            x0: f64::from(bounds.left().value),
                            y0: page_height - f64::from(bounds.top().value),
                            x1: f64::from(bounds.right().value),
                            y1: page_height - f64::from(bounds.bottom().value),
                            is_text_block: true,
                        }
                    })
                    .filter(|fragment| fragment.centered_in(&clip, page_height))
                    .collect();
                Ok(fragments)
            })
        }
    }
}

/// Opens `source` with the best backend compiled in.
pub fn open_document(source: OpenSource) -> Result<Box<dyn SourceDocument>, PdfEngineError> {
    #[cfg(feature = "pdfium")]
    {
        match pdfium_backend::PdfiumDocument::open(source.clone()) {
            Ok(document) => return Ok(Box::new(document)),
            Err(PdfEngineError::Backend(reason)) => {
                tracing::warn!(%reason, "pdfium unavailable, falling back to lopdf layout backend");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(Box::new(LopdfDocument::open(source)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{build_pdf, FixturePage};

    #[test]
    fn output_size_follows_clip_and_scale() {
        let request = RenderRequest::at_dpi(0, 144)
            .with_clip(PageRect { x: 10.0, y: 10.0, width: 100.0, height: 50.0 });
        assert_eq!(request.output_size(PageSize::LETTER), (200, 100));

        let full = RenderRequest::at_dpi(0, 72);
        assert_eq!(full.output_size(PageSize::LETTER), (612, 792));
    }

    #[test]
    fn fragment_centre_test_uses_bottom_left_clip() {
        let fragment = TextFragment {
            text: "headline".to_owned(),
            x0: 100.0,
            y0: 90.0,
            x1: 200.0,
            y1: 110.0,
            is_text_block: true,
        };
        // Centre is 100 units below the top of a 792-unit page, i.e. y=692 from the bottom.
        let top_band = PageRect { x: 0.0, y: 650.0, width: 612.0, height: 142.0 };
        let bottom_band = PageRect { x: 0.0, y: 0.0, width: 612.0, height: 650.0 };
        assert!(fragment.centered_in(&top_band, 792.0));
        assert!(!fragment.centered_in(&bottom_band, 792.0));
    }

    #[test]
    fn open_document_reads_generated_pdf() {
        let bytes = build_pdf(&[FixturePage::letter(), FixturePage::letter()])
            .expect("fixture should build");
        let document = open_document(OpenSource::Bytes(bytes)).expect("open should succeed");
        assert_eq!(document.page_count(), 2);
    }

    #[test]
    fn encrypted_marker_is_rejected() {
        let err = reject_encrypted(b"%PDF-1.4 trailer << /Encrypt 5 0 R >>").expect_err("marker");
        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }
}

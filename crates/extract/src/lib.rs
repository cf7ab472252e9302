//! Region-to-text extraction: maps annotated regions onto a source document,
//! reads their native text or recognizes them, and assembles article text.

pub mod article;
pub mod block_sort;
pub mod cleanup;
pub mod config;
pub mod geometry;
pub mod ocr;
pub mod quality;
pub mod region;

pub use article::{ArticleAssembler, ArticleExport, ArticleText, ExtractionReport, MethodCounts};
pub use block_sort::{sort_blocks, ROW_TOLERANCE};
pub use cleanup::cleanup;
pub use config::{ConfigError, ExtractionConfig};
pub use geometry::{clamp_to_page, to_document_space, to_pixel_space, GeometryError};
pub use ocr::{OcrConfig, OcrEngine, OcrError, OcrRequest, TesseractCli};
pub use quality::{quality_score, should_fallback_to_ocr, QualityThresholds, TextStats};
pub use region::{ExtractionMethod, RegionExtractor, RegionMetadata, RegionText};

use doc_model::{ArticleId, RegionId};
use pdf_engine::PdfEngineError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
    #[error("page {page_index} out of range (page_count={page_count})")]
    PageOutOfRange { page_index: u32, page_count: u32 },
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(#[from] OcrError),
    #[error("unknown article {0}")]
    UnknownArticle(ArticleId),
    #[error("unknown region {0}")]
    UnknownRegion(RegionId),
    #[error("source document error: {0}")]
    Source(PdfEngineError),
}

impl From<PdfEngineError> for ExtractError {
    fn from(err: PdfEngineError) -> Self {
        match err {
            PdfEngineError::PageOutOfRange { page, page_count } => {
                Self::PageOutOfRange { page_index: page, page_count }
            }
            other => Self::Source(other),
        }
    }
}

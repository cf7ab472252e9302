use crate::block_sort::sort_blocks;
use crate::config::ExtractionConfig;
use crate::geometry::{clamp_to_page, to_document_space};
use crate::ocr::OcrEngine;
use crate::quality::{quality_score, should_fallback_to_ocr};
use crate::ExtractError;
use doc_model::{AnnotationDocument, Region, RegionId, Settings};
use pdf_engine::{PageRect, RenderRequest, SourceDocument};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    NativeText,
    Ocr,
    /// Recognition was needed but the engine was missing or errored.
    OcrFailed,
    /// The region could not be located on the source document.
    Skipped,
}

/// Provenance for one region's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub region_id: RegionId,
    pub page_index: u32,
    pub method: ExtractionMethod,
    pub quality_score: f64,
    pub char_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionText {
    pub text: String,
    pub metadata: RegionMetadata,
}

impl RegionText {
    fn new(region: &Region, text: String, method: ExtractionMethod, quality_score: f64) -> Self {
        let char_count = text.chars().count();
        Self {
            text,
            metadata: RegionMetadata {
                region_id: region.region_id.clone(),
                page_index: region.page_index,
                method,
                quality_score,
                char_count,
                error: None,
            },
        }
    }

    fn failed(region: &Region, method: ExtractionMethod, error: String) -> Self {
        let mut result = Self::new(region, String::new(), method, 0.0);
        result.metadata.error = Some(error);
        result
    }
}

/// Produces text for single regions from one source document.
///
/// Holds only shared references, so one extractor can be used from several
/// threads at once.
#[derive(Clone, Copy)]
pub struct RegionExtractor<'a> {
    source: &'a dyn SourceDocument,
    ocr: &'a dyn OcrEngine,
    config: &'a ExtractionConfig,
}

impl<'a> RegionExtractor<'a> {
    pub fn new(
        source: &'a dyn SourceDocument,
        ocr: &'a dyn OcrEngine,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self { source, ocr, config }
    }

    pub fn config(&self) -> &'a ExtractionConfig {
        self.config
    }

    /// Native text when the document prefers it and it passes the quality
    /// check, recognized text otherwise.
    ///
    /// A missing or failing recognizer does not make this an error: the
    /// result carries empty text, [`ExtractionMethod::OcrFailed`] and the
    /// reason. Errors are reserved for regions that cannot be located.
    pub fn extract(
        &self,
        region: &Region,
        settings: &Settings,
    ) -> Result<RegionText, ExtractError> {
        self.run(region, settings, settings.prefer_text_layer)
    }

    /// Recognizes the region regardless of the document's text-layer setting.
    pub fn extract_forced_ocr(
        &self,
        region: &Region,
        settings: &Settings,
    ) -> Result<RegionText, ExtractError> {
        self.run(region, settings, false)
    }

    /// Looks `region_id` up in `doc` and extracts it with the document's settings.
    pub fn extract_by_id(
        &self,
        doc: &AnnotationDocument,
        region_id: &RegionId,
        force_ocr: bool,
    ) -> Result<RegionText, ExtractError> {
        let region =
            doc.region(region_id).ok_or_else(|| ExtractError::UnknownRegion(region_id.clone()))?;
        if force_ocr {
            self.extract_forced_ocr(region, &doc.settings)
        } else {
            self.extract(region, &doc.settings)
        }
    }

    /// Like [`extract`](Self::extract), but a region that cannot be located
    /// becomes a [`ExtractionMethod::Skipped`] result instead of an error.
    pub fn extract_or_skip(
        &self,
        region: &Region,
        settings: &Settings,
        force_ocr: bool,
    ) -> RegionText {
        let result = if force_ocr {
            self.extract_forced_ocr(region, settings)
        } else {
            self.extract(region, settings)
        };

        result.unwrap_or_else(|err| {
            tracing::warn!(
                region = %region.region_id,
                page = region.page_index,
                error = %err,
                "region skipped"
            );
            RegionText::failed(region, ExtractionMethod::Skipped, err.to_string())
        })
    }

    fn run(
        &self,
        region: &Region,
        settings: &Settings,
        use_text_layer: bool,
    ) -> Result<RegionText, ExtractError> {
        let page_count = self.source.page_count();
        if region.page_index >= page_count {
            return Err(ExtractError::PageOutOfRange { page_index: region.page_index, page_count });
        }

        let page_size = self.source.page_size(region.page_index)?;
        let scale = settings.render_scale();
        let rect = to_document_space(&region.bbox, page_size.height_pt, scale)?;
        let rect = clamp_to_page(rect, page_size)?;

        tracing::debug!(
            region = %region.region_id,
            page = region.page_index,
            dpi = settings.dpi,
            ?rect,
            "extracting region"
        );

        if use_text_layer {
            match self.native_text(region.page_index, rect) {
                Ok(Some(text)) if !should_fallback_to_ocr(&text, &self.config.quality) => {
                    let score = quality_score(&text, &self.config.quality);
                    tracing::debug!(
                        region = %region.region_id,
                        chars = text.len(),
                        score,
                        "using native text"
                    );
                    return Ok(RegionText::new(region, text, ExtractionMethod::NativeText, score));
                }
                Ok(Some(_)) => {
                    tracing::info!(
                        region = %region.region_id,
                        "native text failed quality check, using OCR"
                    );
                }
                Ok(None) => {
                    tracing::info!(
                        region = %region.region_id,
                        "no native text in region, using OCR"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        region = %region.region_id,
                        error = %err,
                        "native text extraction failed, using OCR"
                    );
                }
            }
        }

        self.recognize(region, settings, rect)
    }

    /// Block-sorted native text, or `None` when the clip holds no text fragments.
    fn native_text(&self, page_index: u32, rect: PageRect) -> Result<Option<String>, ExtractError> {
        let fragments = self.source.text_fragments(page_index, rect)?;
        if !fragments.iter().any(|fragment| fragment.is_text_block) {
            return Ok(None);
        }
        Ok(Some(sort_blocks(&fragments, self.config.row_tolerance)))
    }

    fn recognize(
        &self,
        region: &Region,
        settings: &Settings,
        rect: PageRect,
    ) -> Result<RegionText, ExtractError> {
        let request = RenderRequest {
            page_index: region.page_index,
            scale: settings.render_scale(),
            clip: Some(rect),
        };
        let image = match self.source.render_page(request) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(
                    region = %region.region_id,
                    error = %err,
                    "region could not be rasterized for OCR"
                );
                let reason = format!("cannot rasterize region for OCR: {err}");
                return Ok(RegionText::failed(region, ExtractionMethod::OcrFailed, reason));
            }
        };
        let ocr_request = self.config.ocr.request(settings.ocr_language.as_str());

        match self.ocr.recognize(&image, &ocr_request) {
            Ok(text) => {
                let score = quality_score(&text, &self.config.quality);
                tracing::debug!(
                    region = %region.region_id,
                    chars = text.len(),
                    score,
                    "using OCR text"
                );
                Ok(RegionText::new(region, text, ExtractionMethod::Ocr, score))
            }
            Err(err) => {
                let err = ExtractError::OcrUnavailable(err);
                tracing::warn!(
                    region = %region.region_id,
                    error = %err,
                    "OCR failed, region left empty"
                );
                Ok(RegionText::failed(region, ExtractionMethod::OcrFailed, err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrError, OcrRequest};
    use doc_model::{ArticleId, BBox, RegionType};
    use pdf_engine::fixtures::{build_pdf, CanvasDocument, FixturePage};
    use pdf_engine::{LopdfDocument, OpenSource, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PARAGRAPH: &str = "The harbour commission met on Tuesday to review the tender.";

    struct CountingOcr {
        calls: AtomicUsize,
        reply: Result<&'static str, &'static str>,
    }

    impl CountingOcr {
        fn replying(text: &'static str) -> Self {
            Self { calls: AtomicUsize::new(0), reply: Ok(text) }
        }

        fn failing() -> Self {
            Self { calls: AtomicUsize::new(0), reply: Err("tesseract not installed") }
        }
    }

    impl OcrEngine for CountingOcr {
        fn recognize(&self, image: &RgbaImage, request: &OcrRequest) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(image.width() > 0 && image.height() > 0);
            assert_eq!(request.page_segmentation_mode, 6);
            match self.reply {
                Ok(text) => Ok(text.to_owned()),
                Err(reason) => Err(OcrError::Unavailable(reason.to_owned())),
            }
        }
    }

    fn page() -> FixturePage {
        FixturePage::letter().with_text(72, 700, 10, PARAGRAPH).with_text(72, 300, 10, "xqz! @# %^")
    }

    fn source() -> CanvasDocument {
        CanvasDocument::from_pages(&[page()]).unwrap()
    }

    /// A region at 72 DPI covering the band between `top` and `bottom`
    /// (document units measured from the bottom edge).
    fn band(page_index: u32, top: f64, bottom: f64) -> Region {
        Region {
            region_id: RegionId::from("r-1"),
            article_id: ArticleId::from("A1"),
            order: 1,
            page_index,
            bbox: BBox { x: 36.0, y: 792.0 - top, w: 540.0, h: top - bottom },
            region_type: RegionType::Body,
            notes: String::new(),
        }
    }

    fn settings() -> Settings {
        Settings { dpi: 72, ..Settings::default() }
    }

    #[test]
    fn trustworthy_native_text_skips_ocr() {
        let source = source();
        let ocr = CountingOcr::replying("unused");
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);

        let result = extractor.extract(&band(0, 750.0, 650.0), &settings()).unwrap();
        assert_eq!(result.text, PARAGRAPH);
        assert_eq!(result.metadata.method, ExtractionMethod::NativeText);
        assert_eq!(result.metadata.char_count, PARAGRAPH.chars().count());
        assert!(result.metadata.quality_score > 0.5);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn garbled_native_text_falls_back_to_ocr() {
        let source = source();
        let ocr = CountingOcr::replying("Recognized paragraph text from the scan.");
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);

        let result = extractor.extract(&band(0, 320.0, 280.0), &settings()).unwrap();
        assert_eq!(result.metadata.method, ExtractionMethod::Ocr);
        assert_eq!(result.text, "Recognized paragraph text from the scan.");
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn text_layer_preference_and_forced_ocr_bypass_native_text() {
        let source = source();
        let ocr = CountingOcr::replying("ocr text");
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);
        let region = band(0, 750.0, 650.0);

        let forced = extractor.extract_forced_ocr(&region, &settings()).unwrap();
        assert_eq!(forced.metadata.method, ExtractionMethod::Ocr);

        let no_layer = Settings { prefer_text_layer: false, ..settings() };
        let result = extractor.extract(&region, &no_layer).unwrap();
        assert_eq!(result.metadata.method, ExtractionMethod::Ocr);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_region_uses_ocr_and_failure_is_recorded() {
        let source = source();
        let ocr = CountingOcr::failing();
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);

        let result = extractor.extract(&band(0, 200.0, 100.0), &settings()).unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.metadata.method, ExtractionMethod::OcrFailed);
        assert_eq!(result.metadata.quality_score, 0.0);
        assert!(result.metadata.error.as_deref().is_some_and(|e| e.contains("not installed")));
    }

    #[test]
    fn layout_only_backend_marks_recognition_failed() {
        let source = LopdfDocument::open(OpenSource::Bytes(build_pdf(&[page()]).unwrap())).unwrap();
        let ocr = CountingOcr::replying("never reached");
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);

        let result = extractor.extract(&band(0, 320.0, 280.0), &settings()).unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.metadata.method, ExtractionMethod::OcrFailed);
        assert!(result.metadata.error.as_deref().is_some_and(|e| e.contains("pdfium")));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_page_is_an_error_or_a_skip() {
        let source = source();
        let ocr = CountingOcr::replying("unused");
        let config = ExtractionConfig::default();
        let extractor = RegionExtractor::new(&source, &ocr, &config);
        let region = band(3, 750.0, 650.0);

        let err = extractor.extract(&region, &settings()).expect_err("page 3 does not exist");
        assert!(matches!(err, ExtractError::PageOutOfRange { page_index: 3, page_count: 1 }));

        let skipped = extractor.extract_or_skip(&region, &settings(), false);
        assert_eq!(skipped.metadata.method, ExtractionMethod::Skipped);
        assert!(skipped.metadata.error.is_some());
    }
}

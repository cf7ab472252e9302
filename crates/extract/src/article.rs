use crate::cleanup::cleanup;
use crate::region::{RegionExtractor, RegionMetadata, RegionText};
use crate::ExtractError;
use doc_model::{duplicate_orders, AnnotationDocument, Article, ArticleId, IntegrityWarning, Region};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Assembled text of one article plus per-region provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleText {
    pub article_id: ArticleId,
    pub text: String,
    pub regions_metadata: Vec<RegionMetadata>,
    pub warnings: Vec<IntegrityWarning>,
}

/// One article as handed to a document writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleExport {
    pub article_id: ArticleId,
    #[serde(flatten)]
    pub article: Article,
    pub text: String,
    pub regions_metadata: Vec<RegionMetadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<IntegrityWarning>,
}

/// Every article of a document, written next to the annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub source_document_path: PathBuf,
    pub dpi: u32,
    pub articles: Vec<ArticleExport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<IntegrityWarning>,
}

/// Summary of a report's region outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCounts {
    pub native_text: usize,
    pub ocr: usize,
    pub ocr_failed: usize,
    pub skipped: usize,
}

impl ExtractionReport {
    pub fn method_counts(&self) -> MethodCounts {
        use crate::region::ExtractionMethod::*;

        let mut counts = MethodCounts::default();
        for metadata in self.articles.iter().flat_map(|article| &article.regions_metadata) {
            match metadata.method {
                NativeText => counts.native_text += 1,
                Ocr => counts.ocr += 1,
                OcrFailed => counts.ocr_failed += 1,
                Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Concatenates region text into article text.
pub struct ArticleAssembler<'a> {
    extractor: RegionExtractor<'a>,
}

impl<'a> ArticleAssembler<'a> {
    pub fn new(extractor: RegionExtractor<'a>) -> Self {
        Self { extractor }
    }

    /// Builds one article: regions sorted by `(page_index, order)` with
    /// `region_id` breaking ties, each extracted, joined with a blank line.
    ///
    /// Regions that fail are recorded in `regions_metadata` and contribute
    /// no text; only an unknown article is an error.
    pub fn build_article_text(
        &self,
        doc: &AnnotationDocument,
        article_id: &ArticleId,
    ) -> Result<ArticleText, ExtractError> {
        if !doc.articles.contains_key(article_id) {
            return Err(ExtractError::UnknownArticle(article_id.clone()));
        }

        let regions = doc.regions_for_article(article_id);
        let warnings = duplicate_orders(regions.iter().copied());
        for warning in &warnings {
            tracing::warn!(
                article = %article_id,
                %warning,
                "duplicate region order, falling back to region id"
            );
        }

        let extracted = self.extract_all(&regions, doc);

        let parts: Vec<&str> = extracted
            .iter()
            .map(|region| region.text.as_str())
            .filter(|text| !text.trim().is_empty())
            .collect();
        let mut text = parts.join("\n\n");
        if self.extractor.config().cleanup {
            text = cleanup(&text);
        }

        tracing::info!(
            article = %article_id,
            regions = regions.len(),
            chars = text.chars().count(),
            "assembled article"
        );

        Ok(ArticleText {
            article_id: article_id.clone(),
            text,
            regions_metadata: extracted.into_iter().map(|region| region.metadata).collect(),
            warnings,
        })
    }

    /// Builds every article in id order.
    pub fn build_all(&self, doc: &AnnotationDocument) -> Vec<ArticleText> {
        doc.articles
            .keys()
            .filter_map(|article_id| self.build_article_text(doc, article_id).ok())
            .collect()
    }

    /// [`build_all`](Self::build_all) packaged with article metadata and
    /// document-level integrity warnings.
    pub fn export(&self, doc: &AnnotationDocument) -> ExtractionReport {
        let articles = self
            .build_all(doc)
            .into_iter()
            .filter_map(|built| {
                let article = doc.articles.get(&built.article_id)?.clone();
                Some(ArticleExport {
                    article_id: built.article_id,
                    article,
                    text: built.text,
                    regions_metadata: built.regions_metadata,
                    warnings: built.warnings,
                })
            })
            .collect();

        let warnings: Vec<IntegrityWarning> = doc
            .validate()
            .into_iter()
            .filter(|warning| !matches!(warning, IntegrityWarning::DuplicateOrder { .. }))
            .collect();
        for warning in &warnings {
            tracing::warn!(%warning, "annotation integrity warning");
        }

        ExtractionReport {
            source_document_path: doc.source_document_path().to_path_buf(),
            dpi: doc.settings.dpi,
            articles,
            warnings,
        }
    }

    fn extract_all(&self, regions: &[&Region], doc: &AnnotationDocument) -> Vec<RegionText> {
        let extract =
            |region: &&Region| self.extractor.extract_or_skip(region, &doc.settings, false);
        if self.extractor.config().parallel {
            regions.par_iter().map(extract).collect()
        } else {
            regions.iter().map(extract).collect()
        }
    }
}

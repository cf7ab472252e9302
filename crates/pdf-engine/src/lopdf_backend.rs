use crate::content::layout_fragments;
use crate::{
    reject_encrypted, OpenSource, PageRect, PageSize, PdfEngineError, RenderRequest, RgbaImage,
    SourceDocument, TextFragment,
};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Parent links followed when looking for an inherited MediaBox.
const MAX_PAGE_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct PageLayout {
    size: PageSize,
    fragments: Vec<TextFragment>,
}

/// Pure-Rust backend: page geometry and an approximate native text layer.
///
/// Pages are laid out once at open time. This backend cannot rasterize; every
/// render request fails with [`PdfEngineError::RasterizationUnavailable`].
#[derive(Debug, Clone)]
pub struct LopdfDocument {
    pages: Vec<PageLayout>,
}

impl LopdfDocument {
    pub fn open(source: OpenSource) -> Result<Self, PdfEngineError> {
        let bytes = source.into_bytes()?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfEngineError> {
        reject_encrypted(bytes)?;

        let doc = Document::load_mem(bytes)?;
        let page_ids = doc.get_pages();
        let mut pages = Vec::with_capacity(page_ids.len());

        for (page_number, object_id) in page_ids {
            let size = media_box(&doc, object_id).unwrap_or(PageSize::LETTER);
            let fragments = match page_operations(&doc, object_id) {
                Ok(operations) => layout_fragments(&operations, size),
                Err(err) => {
                    tracing::warn!(page_number, error = %err, "page content could not be decoded");
                    Vec::new()
                }
            };
            pages.push(PageLayout { size, fragments });
        }

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        tracing::debug!(page_count = pages.len(), "opened document with lopdf backend");
        Ok(Self { pages })
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.layout(page_index).map(|page| page.size)
    }

    fn layout(&self, page_index: u32) -> Result<&PageLayout, PdfEngineError> {
        self.pages.get(page_index as usize).ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.page_count(),
        })
    }
}

impl SourceDocument for LopdfDocument {
    fn page_count(&self) -> u32 {
        LopdfDocument::page_count(self)
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        LopdfDocument::page_size(self, page_index)
    }

    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        self.layout(request.page_index)?;
        Err(PdfEngineError::RasterizationUnavailable)
    }

    fn text_fragments(
        &self,
        page_index: u32,
        clip: PageRect,
    ) -> Result<Vec<TextFragment>, PdfEngineError> {
        let page = self.layout(page_index)?;
        Ok(page
            .fragments
            .iter()
            .filter(|fragment| fragment.centered_in(&clip, page.size.height_pt))
            .cloned()
            .collect())
    }
}

fn page_operations(
    doc: &Document,
    page_id: ObjectId,
) -> Result<Vec<lopdf::content::Operation>, PdfEngineError> {
    let bytes = doc.get_page_content(page_id)?;
    Ok(Content::decode(&bytes)?.operations)
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let mut dict = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Some(size) = dict.get(b"MediaBox").ok().and_then(|obj| parse_box(doc, obj)) {
            return Some(size);
        }
        dict = parent(doc, dict)?;
    }

    None
}

fn parent<'a>(doc: &'a Document, dict: &Dictionary) -> Option<&'a Dictionary> {
    let parent_id = dict.get(b"Parent").ok()?.as_reference().ok()?;
    doc.get_dictionary(parent_id).ok()
}

fn parse_box(doc: &Document, object: &Object) -> Option<PageSize> {
    let object = match object {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let array = object.as_array().ok()?;
    let [x0, y0, x1, y1] = array.as_slice() else {
        return None;
    };

    let x0 = f64::from(x0.as_float().ok()?);
    let y0 = f64::from(y0.as_float().ok()?);
    let x1 = f64::from(x1.as_float().ok()?);
    let y1 = f64::from(y1.as_float().ok()?);
    let size = PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() };

    (size.width_pt > 0.0 && size.height_pt > 0.0).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{build_pdf, FixturePage};

    fn sample() -> LopdfDocument {
        let pages = [
            FixturePage::letter()
                .with_text(72, 720, 12, "Council approves budget")
                .with_text(72, 400, 10, "Lower half paragraph")
                .with_image(300, 100, 200, 150),
            FixturePage::new(400, 600).with_text(50, 550, 10, "Second page"),
        ];
        LopdfDocument::from_bytes(&build_pdf(&pages).expect("fixture should build"))
            .expect("open should succeed")
    }

    #[test]
    fn reads_page_count_and_sizes() {
        let document = sample();
        assert_eq!(document.page_count(), 2);
        assert_eq!(document.page_size(0).unwrap(), PageSize::LETTER);
        assert_eq!(document.page_size(1).unwrap(), PageSize { width_pt: 400.0, height_pt: 600.0 });
    }

    #[test]
    fn out_of_range_page_is_reported() {
        let err = sample().page_size(5).expect_err("page 5 does not exist");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 5, page_count: 2 }));
    }

    #[test]
    fn clip_selects_fragments_by_centre() {
        let document = sample();
        let top_band = PageRect { x: 0.0, y: 600.0, width: 612.0, height: 192.0 };
        let fragments = document.text_fragments(0, top_band).unwrap();
        let texts: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["Council approves budget"]);

        let everything = document.text_fragments(0, PageSize::LETTER.bounds()).unwrap();
        assert_eq!(everything.len(), 3);
        assert_eq!(everything.iter().filter(|f| !f.is_text_block).count(), 1);
    }

    #[test]
    fn render_is_refused_instead_of_returning_a_blank_page() {
        let document = sample();
        let request = RenderRequest::at_dpi(1, 144)
            .with_clip(PageRect { x: 0.0, y: 0.0, width: 100.0, height: 30.0 });
        let err = document.render_page(request).expect_err("layout backend cannot rasterize");
        assert!(matches!(err, PdfEngineError::RasterizationUnavailable));

        let err = document.render_page(RenderRequest::at_dpi(9, 72)).expect_err("no page 9");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 9, page_count: 2 }));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let err = LopdfDocument::from_bytes(b"not a pdf").expect_err("garbage");
        assert!(matches!(err, PdfEngineError::Parse(_)));
    }
}

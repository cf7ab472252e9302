//! Small generated PDFs for tests in this and dependent crates.

use crate::{
    LopdfDocument, PageRect, PageSize, PdfEngineError, RenderRequest, RgbaImage, SourceDocument,
    TextFragment,
};
use image::Rgba;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureText {
    pub x: i64,
    pub baseline: i64,
    pub size: i64,
    pub text: String,
}

/// One page: text lines and image placements in bottom-left page units.
#[derive(Debug, Clone, PartialEq)]
pub struct FixturePage {
    pub width: i64,
    pub height: i64,
    pub lines: Vec<FixtureText>,
    pub images: Vec<[i64; 4]>,
}

impl FixturePage {
    pub fn new(width: i64, height: i64) -> Self {
        Self { width, height, lines: Vec::new(), images: Vec::new() }
    }

    pub fn letter() -> Self {
        Self::new(612, 792)
    }

    pub fn with_text(mut self, x: i64, baseline: i64, size: i64, text: impl Into<String>) -> Self {
        self.lines.push(FixtureText { x, baseline, size, text: text.into() });
        self
    }

    pub fn with_image(mut self, x: i64, y: i64, width: i64, height: i64) -> Self {
        self.images.push([x, y, width, height]);
        self
    }

    fn operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();

        for line in &self.lines {
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new("Tf", vec!["F1".into(), Object::Integer(line.size)]));
            ops.push(Operation::new(
                "Td",
                vec![Object::Integer(line.x), Object::Integer(line.baseline)],
            ));
            ops.push(Operation::new("Tj", vec![Object::string_literal(line.text.as_str())]));
            ops.push(Operation::new("ET", vec![]));
        }

        for [x, y, width, height] in &self.images {
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new(
                "cm",
                vec![
                    Object::Integer(*width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(*height),
                    Object::Integer(*x),
                    Object::Integer(*y),
                ],
            ));
            ops.push(Operation::new("Do", vec!["Im0".into()]));
            ops.push(Operation::new("Q", vec![]));
        }

        ops
    }
}

/// Serializes `pages` into an unencrypted PDF using a Courier base font and a
/// 1x1 grey image XObject.
pub fn build_pdf(pages: &[FixturePage]) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![128],
    ));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => dictionary! { "Im0" => image_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content { operations: page.operations() };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(page.width),
                Object::Integer(page.height),
            ],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|err| PdfEngineError::Backend(err.to_string()))?;
    Ok(bytes)
}

/// Layout document whose renders are white canvases of the requested size.
///
/// Stands in for a rasterizing backend where only crop geometry matters.
pub struct CanvasDocument(pub LopdfDocument);

impl CanvasDocument {
    pub fn from_pages(pages: &[FixturePage]) -> Result<Self, PdfEngineError> {
        Ok(Self(LopdfDocument::from_bytes(&build_pdf(pages)?)?))
    }
}

impl SourceDocument for CanvasDocument {
    fn page_count(&self) -> u32 {
        self.0.page_count()
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.0.page_size(page_index)
    }

    fn render_page(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        let (width, height) = request.output_size(self.0.page_size(request.page_index)?);
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }

    fn text_fragments(
        &self,
        page_index: u32,
        clip: PageRect,
    ) -> Result<Vec<TextFragment>, PdfEngineError> {
        self.0.text_fragments(page_index, clip)
    }
}

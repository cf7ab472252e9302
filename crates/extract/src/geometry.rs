//! Mapping between annotation pixel space and native document space.
//!
//! Pixel space has its origin at the top-left of the rendered page; document
//! space has its origin at the bottom-left. `render_scale` is pixels per
//! document unit (render DPI / 72).

use doc_model::BBox;
use pdf_engine::{PageRect, PageSize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid geometry: width and height must be positive (w={w}, h={h})")]
    InvalidGeometry { w: f64, h: f64 },
    #[error("render scale must be positive and finite, got {0}")]
    InvalidScale(f64),
    #[error("region lies outside the {page_width}x{page_height} page")]
    OutsidePage { page_width: f64, page_height: f64 },
}

pub fn to_document_space(
    bbox: &BBox,
    page_height: f64,
    render_scale: f64,
) -> Result<PageRect, GeometryError> {
    check_scale(render_scale)?;
    if bbox.validate().is_err() {
        return Err(GeometryError::InvalidGeometry { w: bbox.w, h: bbox.h });
    }

    Ok(PageRect {
        x: bbox.x / render_scale,
        y: page_height - (bbox.y + bbox.h) / render_scale,
        width: bbox.w / render_scale,
        height: bbox.h / render_scale,
    })
}

pub fn to_pixel_space(
    rect: &PageRect,
    page_height: f64,
    render_scale: f64,
) -> Result<BBox, GeometryError> {
    check_scale(render_scale)?;

    Ok(BBox {
        x: rect.x * render_scale,
        y: (page_height - rect.top()) * render_scale,
        w: rect.width * render_scale,
        h: rect.height * render_scale,
    })
}

/// Intersects `rect` with the page. A rect that had to be trimmed is logged;
/// one with nothing left on the page is an error.
pub fn clamp_to_page(rect: PageRect, page: PageSize) -> Result<PageRect, GeometryError> {
    let left = rect.x.max(0.0);
    let bottom = rect.y.max(0.0);
    let right = rect.right().min(page.width_pt);
    let top = rect.top().min(page.height_pt);

    if right <= left || top <= bottom {
        return Err(GeometryError::OutsidePage {
            page_width: page.width_pt,
            page_height: page.height_pt,
        });
    }

    let clamped = PageRect { x: left, y: bottom, width: right - left, height: top - bottom };
    if clamped != rect {
        tracing::warn!(
            requested = ?rect,
            clamped = ?clamped,
            "region extends past the page edge, clamped to page bounds"
        );
    }
    Ok(clamped)
}

fn check_scale(render_scale: f64) -> Result<(), GeometryError> {
    if !render_scale.is_finite() || render_scale <= 0.0 {
        return Err(GeometryError::InvalidScale(render_scale));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE_200_DPI: f64 = 200.0 / 72.0;

    #[test]
    fn flips_the_vertical_axis() {
        let bbox = BBox { x: 144.0, y: 0.0, w: 72.0, h: 144.0 };
        let rect = to_document_space(&bbox, 792.0, 2.0).unwrap();
        assert_eq!(rect, PageRect { x: 72.0, y: 720.0, width: 36.0, height: 72.0 });
    }

    #[test]
    fn round_trip_stays_within_half_a_pixel() {
        let boxes = [
            BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 },
            BBox { x: 137.3, y: 2011.9, w: 612.25, h: 83.5 },
            BBox { x: 1699.0, y: 2199.0, w: 1.0, h: 1.0 },
        ];
        for (scale, height) in [(SCALE_200_DPI, 792.0), (1.0, 842.0), (300.0 / 72.0, 1190.55)] {
            for bbox in &boxes {
                let rect = to_document_space(bbox, height, scale).unwrap();
                let back = to_pixel_space(&rect, height, scale).unwrap();
                assert!((back.x - bbox.x).abs() <= 0.5, "{bbox:?} -> {back:?}");
                assert!((back.y - bbox.y).abs() <= 0.5, "{bbox:?} -> {back:?}");
                assert!((back.w - bbox.w).abs() <= 0.5, "{bbox:?} -> {back:?}");
                assert!((back.h - bbox.h).abs() <= 0.5, "{bbox:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn rejects_degenerate_boxes_and_scales() {
        let flat = BBox { x: 1.0, y: 1.0, w: 10.0, h: 0.0 };
        assert_eq!(
            to_document_space(&flat, 792.0, 1.0),
            Err(GeometryError::InvalidGeometry { w: 10.0, h: 0.0 })
        );

        let bbox = BBox { x: 1.0, y: 1.0, w: 10.0, h: 10.0 };
        assert_eq!(to_document_space(&bbox, 792.0, 0.0), Err(GeometryError::InvalidScale(0.0)));
    }

    #[test]
    fn clamps_overhanging_rects_and_rejects_off_page_ones() {
        let overhang = PageRect { x: -10.0, y: 700.0, width: 100.0, height: 200.0 };
        let clamped = clamp_to_page(overhang, PageSize::LETTER).unwrap();
        assert_eq!(clamped, PageRect { x: 0.0, y: 700.0, width: 90.0, height: 92.0 });

        let inside = PageRect { x: 10.0, y: 10.0, width: 50.0, height: 50.0 };
        assert_eq!(clamp_to_page(inside, PageSize::LETTER).unwrap(), inside);

        let off_page = PageRect { x: 700.0, y: 10.0, width: 50.0, height: 50.0 };
        assert!(matches!(
            clamp_to_page(off_page, PageSize::LETTER),
            Err(GeometryError::OutsidePage { .. })
        ));
    }
}

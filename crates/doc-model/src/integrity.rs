use crate::{AnnotationDocument, ArticleId, Region, RegionId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A broken invariant found in annotation data. Never fatal; callers decide
/// how to surface it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityWarning {
    DanglingArticle { region_id: RegionId, article_id: ArticleId },
    DuplicateOrder { article_id: ArticleId, order: u32, region_ids: Vec<RegionId> },
    PageIndexMismatch { region_id: RegionId, stored: u32, page: u32 },
    InvalidGeometry { region_id: RegionId, w: f64, h: f64 },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingArticle { region_id, article_id } => {
                write!(f, "region {region_id} references missing article {article_id}")
            }
            Self::DuplicateOrder { article_id, order, region_ids } => {
                let ids: Vec<&str> = region_ids.iter().map(RegionId::as_str).collect();
                write!(f, "article {article_id} has order {order} on regions {}", ids.join(", "))
            }
            Self::PageIndexMismatch { region_id, stored, page } => {
                write!(f, "region {region_id} records page {stored} but is stored on page {page}")
            }
            Self::InvalidGeometry { region_id, w, h } => {
                write!(f, "region {region_id} has a degenerate bbox ({w} x {h})")
            }
        }
    }
}

/// Groups regions by `(article, order)` and reports every group with more than
/// one member. Region ids inside a warning are sorted.
pub fn duplicate_orders<'a>(
    regions: impl IntoIterator<Item = &'a Region>,
) -> Vec<IntegrityWarning> {
    let mut slots: BTreeMap<(&ArticleId, u32), Vec<RegionId>> = BTreeMap::new();
    for region in regions {
        slots.entry((&region.article_id, region.order)).or_default().push(region.region_id.clone());
    }

    slots
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((article_id, order), mut region_ids)| {
            region_ids.sort();
            IntegrityWarning::DuplicateOrder { article_id: article_id.clone(), order, region_ids }
        })
        .collect()
}

pub(crate) fn validate(doc: &AnnotationDocument) -> Vec<IntegrityWarning> {
    let mut warnings = Vec::new();

    for (page_index, page) in &doc.pages {
        for region in &page.regions {
            if !doc.articles.contains_key(&region.article_id) {
                warnings.push(IntegrityWarning::DanglingArticle {
                    region_id: region.region_id.clone(),
                    article_id: region.article_id.clone(),
                });
            }
            if region.page_index != *page_index {
                warnings.push(IntegrityWarning::PageIndexMismatch {
                    region_id: region.region_id.clone(),
                    stored: region.page_index,
                    page: *page_index,
                });
            }
            if region.bbox.validate().is_err() {
                warnings.push(IntegrityWarning::InvalidGeometry {
                    region_id: region.region_id.clone(),
                    w: region.bbox.w,
                    h: region.bbox.h,
                });
            }
        }
    }

    warnings.extend(duplicate_orders(doc.regions()));
    warnings
}

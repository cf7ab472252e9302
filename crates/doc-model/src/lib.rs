use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

mod actions;
mod integrity;
mod timestamp;

pub use actions::{apply_annotation_action, ActionOutcome, AnnotationAction};
pub use integrity::{duplicate_orders, IntegrityWarning};

pub const SCHEMA_VERSION: &str = "1.0";

pub const DEFAULT_DPI: u32 = 200;

/// Display colors handed out to new articles, cycling by article count.
pub const ARTICLE_PALETTE: [&str; 10] = [
    "#3498db", "#e74c3c", "#2ecc71", "#f39c12", "#9b59b6", "#1abc9c", "#e67e22", "#34495e",
    "#16a085", "#c0392b",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid geometry: width and height must be positive (w={w}, h={h})")]
    InvalidGeometry { w: f64, h: f64 },
    #[error("unknown article {0}")]
    UnknownArticle(ArticleId),
    #[error("article {0} already exists")]
    DuplicateArticle(ArticleId),
    #[error("unknown region {0}")]
    UnknownRegion(RegionId),
    #[error("order {order} is already used in article {article_id}")]
    DuplicateOrder { article_id: ArticleId, order: u32 },
    #[error("region order is 1-based, got 0")]
    ZeroOrder,
    #[error("article {0} has no order left to append a region")]
    OrderOverflow(ArticleId),
    #[error("article ids are exhausted")]
    ArticleIdsExhausted,
}

/// Rectangle in rendered-page pixel space (origin top-left) at the document's DPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Result<Self, ModelError> {
        let bbox = Self { x, y, w, h };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let finite = [self.x, self.y, self.w, self.h].iter().all(|value| value.is_finite());
        if !finite || self.w <= 0.0 || self.h <= 0.0 {
            return Err(ModelError::InvalidGeometry { w: self.w, h: self.h });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Short human-readable article label such as `A1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub String);

impl ArticleId {
    pub fn from_sequence(number: u32) -> Self {
        Self(format!("A{number}"))
    }

    /// The numeric part of an `A<n>` label, if the label has that shape.
    pub fn sequence_number(&self) -> Option<u32> {
        let digits = self.0.strip_prefix('A')?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionType {
    #[default]
    Body,
    Header,
    Footer,
    #[serde(alias = "image-caption")]
    Caption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub region_id: RegionId,
    pub article_id: ArticleId,
    pub order: u32,
    #[serde(default)]
    pub page_index: u32,
    pub bbox: BBox,
    #[serde(rename = "type", default)]
    pub region_type: RegionType,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub tags: BTreeSet<String>,
    pub color: String,
    pub reading_hint: String,
}

impl Default for Article {
    fn default() -> Self {
        Self {
            title: String::new(),
            subtitle: String::new(),
            author: String::new(),
            tags: BTreeSet::new(),
            color: ARTICLE_PALETTE[0].to_owned(),
            reading_hint: "top-to-bottom".to_owned(),
        }
    }
}

/// Partial edit of an article's metadata; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub color: Option<String>,
    pub reading_hint: Option<String>,
}

impl ArticleUpdate {
    fn apply_to(self, article: &mut Article) {
        if let Some(title) = self.title {
            article.title = title;
        }
        if let Some(subtitle) = self.subtitle {
            article.subtitle = subtitle;
        }
        if let Some(author) = self.author {
            article.author = author;
        }
        if let Some(tags) = self.tags {
            article.tags = tags;
        }
        if let Some(color) = self.color {
            article.color = color;
        }
        if let Some(reading_hint) = self.reading_hint {
            article.reading_hint = reading_hint;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub regions: Vec<Region>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dpi: u32,
    #[serde(alias = "ocr_lang")]
    pub ocr_language: String,
    #[serde(alias = "prefer_pdf_text_layer")]
    pub prefer_text_layer: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI, ocr_language: "eng".to_owned(), prefer_text_layer: true }
    }
}

impl Settings {
    /// Ratio between the annotation raster and the 72-unit document space.
    pub fn render_scale(&self) -> f64 {
        f64::from(self.dpi) / 72.0
    }
}

/// All annotations for one source document; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    pub schema_version: String,
    #[serde(alias = "source_pdf")]
    pub source_document_path: PathBuf,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pages: BTreeMap<u32, Page>,
    #[serde(default)]
    pub articles: BTreeMap<ArticleId, Article>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    article_seq: u32,
}

impl AnnotationDocument {
    pub fn new(source_document_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            source_document_path: source_document_path.into(),
            created_at: now,
            updated_at: now,
            pages: BTreeMap::new(),
            articles: BTreeMap::new(),
            settings: Settings::default(),
            article_seq: 0,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn source_document_path(&self) -> &Path {
        &self.source_document_path
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn next_article_id(&self) -> Result<ArticleId, ModelError> {
        let highest_existing =
            self.articles.keys().filter_map(ArticleId::sequence_number).max().unwrap_or(0);
        let next = self.article_seq.max(highest_existing).checked_add(1);
        next.map(ArticleId::from_sequence).ok_or(ModelError::ArticleIdsExhausted)
    }

    pub fn add_article(&mut self, article_id: Option<ArticleId>) -> Result<ArticleId, ModelError> {
        let article_id = match article_id {
            Some(article_id) => article_id,
            None => self.next_article_id()?,
        };
        if self.articles.contains_key(&article_id) {
            return Err(ModelError::DuplicateArticle(article_id));
        }

        let color = ARTICLE_PALETTE[self.articles.len() % ARTICLE_PALETTE.len()];
        let article = Article { color: color.to_owned(), ..Article::default() };
        self.articles.insert(article_id.clone(), article);

        if let Some(number) = article_id.sequence_number() {
            self.article_seq = self.article_seq.max(number);
        }

        self.touch();
        Ok(article_id)
    }

    pub fn update_article(
        &mut self,
        article_id: &ArticleId,
        update: ArticleUpdate,
    ) -> Result<(), ModelError> {
        let article = self
            .articles
            .get_mut(article_id)
            .ok_or_else(|| ModelError::UnknownArticle(article_id.clone()))?;
        update.apply_to(article);
        self.touch();
        Ok(())
    }

    /// Removes the article and every region that references it.
    pub fn delete_article(&mut self, article_id: &ArticleId) -> Result<Vec<RegionId>, ModelError> {
        if self.articles.remove(article_id).is_none() {
            return Err(ModelError::UnknownArticle(article_id.clone()));
        }

        let mut removed = Vec::new();
        for page in self.pages.values_mut() {
            page.regions.retain(|region| {
                if region.article_id == *article_id {
                    removed.push(region.region_id.clone());
                    false
                } else {
                    true
                }
            });
        }

        tracing::debug!(article = %article_id, regions = removed.len(), "deleted article");
        self.touch();
        Ok(removed)
    }

    pub fn add_region(
        &mut self,
        page_index: u32,
        bbox: BBox,
        article_id: &ArticleId,
        order: Option<u32>,
        region_type: RegionType,
    ) -> Result<RegionId, ModelError> {
        bbox.validate()?;
        if !self.articles.contains_key(article_id) {
            return Err(ModelError::UnknownArticle(article_id.clone()));
        }

        let order = match order {
            Some(order) => {
                self.ensure_order_free(article_id, order, None)?;
                order
            }
            None => self.next_order(article_id)?,
        };

        let region = Region {
            region_id: RegionId::generate(),
            article_id: article_id.clone(),
            order,
            page_index,
            bbox,
            region_type,
            notes: String::new(),
        };
        let region_id = region.region_id.clone();

        self.pages.entry(page_index).or_default().regions.push(region);
        self.touch();
        Ok(region_id)
    }

    pub fn delete_region(&mut self, region_id: &RegionId) -> Result<Region, ModelError> {
        for page in self.pages.values_mut() {
            if let Some(index) = page.regions.iter().position(|r| r.region_id == *region_id) {
                let region = page.regions.remove(index);
                self.touch();
                return Ok(region);
            }
        }

        Err(ModelError::UnknownRegion(region_id.clone()))
    }

    pub fn set_region_order(&mut self, region_id: &RegionId, order: u32) -> Result<(), ModelError> {
        let article_id = self.require_region(region_id)?.article_id.clone();
        self.ensure_order_free(&article_id, order, Some(region_id))?;

        if let Some(region) = self.region_mut(region_id) {
            region.order = order;
        }
        self.touch();
        Ok(())
    }

    /// Moves a region to another article, appending it to that article's order.
    pub fn assign_region(
        &mut self,
        region_id: &RegionId,
        article_id: &ArticleId,
    ) -> Result<u32, ModelError> {
        let current = self.require_region(region_id)?.article_id.clone();
        if !self.articles.contains_key(article_id) {
            return Err(ModelError::UnknownArticle(article_id.clone()));
        }
        if current == *article_id {
            return Ok(self.require_region(region_id)?.order);
        }

        let order = self.next_order(article_id)?;
        if let Some(region) = self.region_mut(region_id) {
            region.article_id = article_id.clone();
            region.order = order;
        }
        self.touch();
        Ok(order)
    }

    pub fn set_region_notes(
        &mut self,
        region_id: &RegionId,
        notes: impl Into<String>,
    ) -> Result<(), ModelError> {
        let region =
            self.region_mut(region_id).ok_or_else(|| ModelError::UnknownRegion(region_id.clone()))?;
        region.notes = notes.into();
        self.touch();
        Ok(())
    }

    pub fn set_region_type(
        &mut self,
        region_id: &RegionId,
        region_type: RegionType,
    ) -> Result<(), ModelError> {
        let region =
            self.region_mut(region_id).ok_or_else(|| ModelError::UnknownRegion(region_id.clone()))?;
        region.region_type = region_type;
        self.touch();
        Ok(())
    }

    /// Renumbers an article's regions 1..n by page, then top edge, then left edge.
    pub fn auto_order_article(&mut self, article_id: &ArticleId) -> Result<(), ModelError> {
        if !self.articles.contains_key(article_id) {
            return Err(ModelError::UnknownArticle(article_id.clone()));
        }

        let mut placed: Vec<(u32, f64, f64, RegionId)> = self
            .regions()
            .filter(|region| region.article_id == *article_id)
            .map(|region| {
                (region.page_index, region.bbox.y, region.bbox.x, region.region_id.clone())
            })
            .collect();
        placed.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.total_cmp(&b.2))
                .then_with(|| a.3.cmp(&b.3))
        });

        for (position, (_, _, _, region_id)) in placed.iter().enumerate() {
            if let Some(region) = self.region_mut(region_id) {
                region.order = position as u32 + 1;
            }
        }

        self.touch();
        Ok(())
    }

    pub fn region(&self, region_id: &RegionId) -> Option<&Region> {
        self.regions().find(|region| region.region_id == *region_id)
    }

    /// All regions, page by page, in drawing order within a page.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.pages.values().flat_map(|page| page.regions.iter())
    }

    pub fn region_count(&self) -> usize {
        self.pages.values().map(|page| page.regions.len()).sum()
    }

    /// Regions of one article in assembly order: page, then order, then id.
    pub fn regions_for_article(&self, article_id: &ArticleId) -> Vec<&Region> {
        let mut regions: Vec<&Region> =
            self.regions().filter(|region| region.article_id == *article_id).collect();
        regions.sort_by(|a, b| {
            a.page_index
                .cmp(&b.page_index)
                .then(a.order.cmp(&b.order))
                .then_with(|| a.region_id.cmp(&b.region_id))
        });
        regions
    }

    /// One past the article's highest order; fails once `u32::MAX` is taken.
    pub fn next_order(&self, article_id: &ArticleId) -> Result<u32, ModelError> {
        self.regions()
            .filter(|region| region.article_id == *article_id)
            .map(|region| region.order)
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| ModelError::OrderOverflow(article_id.clone()))
    }

    /// Reports every invariant violation without changing anything.
    pub fn validate(&self) -> Vec<IntegrityWarning> {
        integrity::validate(self)
    }

    /// Aligns each region's `page_index` with the page it is stored under.
    ///
    /// Sidecars written before regions carried their own page index load with
    /// zero everywhere; every correction made here is returned so callers can
    /// record it.
    pub fn normalize_page_indices(&mut self) -> Vec<IntegrityWarning> {
        let mut corrections = Vec::new();
        for (page_index, page) in self.pages.iter_mut() {
            for region in page.regions.iter_mut().filter(|r| r.page_index != *page_index) {
                corrections.push(IntegrityWarning::PageIndexMismatch {
                    region_id: region.region_id.clone(),
                    stored: region.page_index,
                    page: *page_index,
                });
                region.page_index = *page_index;
            }
        }
        corrections
    }

    fn require_region(&self, region_id: &RegionId) -> Result<&Region, ModelError> {
        self.region(region_id).ok_or_else(|| ModelError::UnknownRegion(region_id.clone()))
    }

    fn region_mut(&mut self, region_id: &RegionId) -> Option<&mut Region> {
        self.pages
            .values_mut()
            .flat_map(|page| page.regions.iter_mut())
            .find(|region| region.region_id == *region_id)
    }

    fn ensure_order_free(
        &self,
        article_id: &ArticleId,
        order: u32,
        ignore: Option<&RegionId>,
    ) -> Result<(), ModelError> {
        if order == 0 {
            return Err(ModelError::ZeroOrder);
        }

        let taken = self.regions().any(|region| {
            region.article_id == *article_id
                && region.order == order
                && Some(&region.region_id) != ignore
        });
        if taken {
            return Err(ModelError::DuplicateOrder { article_id: article_id.clone(), order });
        }

        Ok(())
    }
}

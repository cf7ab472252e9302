use crate::{
    AnnotationDocument, ArticleId, ArticleUpdate, BBox, ModelError, Region, RegionId, RegionType,
};

/// A user edit arriving from the annotation surface.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationAction {
    AddArticle { article_id: Option<ArticleId> },
    UpdateArticle { article_id: ArticleId, update: ArticleUpdate },
    DeleteArticle { article_id: ArticleId },
    AddRegion {
        page_index: u32,
        bbox: BBox,
        article_id: ArticleId,
        order: Option<u32>,
        region_type: RegionType,
    },
    DeleteRegion { region_id: RegionId },
    SetRegionOrder { region_id: RegionId, order: u32 },
    AssignRegion { region_id: RegionId, article_id: ArticleId },
    SetRegionNotes { region_id: RegionId, notes: String },
    SetRegionType { region_id: RegionId, region_type: RegionType },
    AutoOrderArticle { article_id: ArticleId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    ArticleAdded(ArticleId),
    ArticleUpdated,
    ArticleDeleted { removed_regions: Vec<RegionId> },
    RegionAdded(RegionId),
    RegionDeleted(Region),
    RegionUpdated,
    RegionAssigned { order: u32 },
    ArticleReordered,
}

pub fn apply_annotation_action(
    doc: &mut AnnotationDocument,
    action: AnnotationAction,
) -> Result<ActionOutcome, ModelError> {
    match action {
        AnnotationAction::AddArticle { article_id } => {
            doc.add_article(article_id).map(ActionOutcome::ArticleAdded)
        }
        AnnotationAction::UpdateArticle { article_id, update } => {
            doc.update_article(&article_id, update)?;
            Ok(ActionOutcome::ArticleUpdated)
        }
        AnnotationAction::DeleteArticle { article_id } => {
            let removed_regions = doc.delete_article(&article_id)?;
            Ok(ActionOutcome::ArticleDeleted { removed_regions })
        }
        AnnotationAction::AddRegion { page_index, bbox, article_id, order, region_type } => doc
            .add_region(page_index, bbox, &article_id, order, region_type)
            .map(ActionOutcome::RegionAdded),
        AnnotationAction::DeleteRegion { region_id } => {
            doc.delete_region(&region_id).map(ActionOutcome::RegionDeleted)
        }
        AnnotationAction::SetRegionOrder { region_id, order } => {
            doc.set_region_order(&region_id, order)?;
            Ok(ActionOutcome::RegionUpdated)
        }
        AnnotationAction::AssignRegion { region_id, article_id } => {
            let order = doc.assign_region(&region_id, &article_id)?;
            Ok(ActionOutcome::RegionAssigned { order })
        }
        AnnotationAction::SetRegionNotes { region_id, notes } => {
            doc.set_region_notes(&region_id, notes)?;
            Ok(ActionOutcome::RegionUpdated)
        }
        AnnotationAction::SetRegionType { region_id, region_type } => {
            doc.set_region_type(&region_id, region_type)?;
            Ok(ActionOutcome::RegionUpdated)
        }
        AnnotationAction::AutoOrderArticle { article_id } => {
            doc.auto_order_article(&article_id)?;
            Ok(ActionOutcome::ArticleReordered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_flow_creates_article_and_region() {
        let mut doc = AnnotationDocument::new("/tmp/issue.pdf");

        let ActionOutcome::ArticleAdded(article_id) =
            apply_annotation_action(&mut doc, AnnotationAction::AddArticle { article_id: None })
                .expect("article should be added")
        else {
            panic!("unexpected outcome");
        };

        let outcome = apply_annotation_action(
            &mut doc,
            AnnotationAction::AddRegion {
                page_index: 4,
                bbox: BBox::new(10.0, 20.0, 300.0, 400.0).unwrap(),
                article_id: article_id.clone(),
                order: None,
                region_type: RegionType::Body,
            },
        )
        .expect("region should be added");

        let ActionOutcome::RegionAdded(region_id) = outcome else {
            panic!("unexpected outcome");
        };
        let region = doc.region(&region_id).expect("region stored");
        assert_eq!(region.article_id, article_id);
        assert_eq!(region.page_index, 4);
        assert!(doc.pages.contains_key(&4));
    }

    #[test]
    fn failed_action_leaves_document_untouched() {
        let mut doc = AnnotationDocument::new("/tmp/issue.pdf");
        let before = doc.clone();

        let err = apply_annotation_action(
            &mut doc,
            AnnotationAction::DeleteArticle { article_id: ArticleId::from("A1") },
        )
        .expect_err("missing article");

        assert_eq!(err, ModelError::UnknownArticle(ArticleId::from("A1")));
        assert_eq!(doc, before);
    }

    #[test]
    fn delete_region_returns_the_removed_region() {
        let mut doc = AnnotationDocument::new("/tmp/issue.pdf");
        let article_id = doc.add_article(None).unwrap();
        let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let region_id = doc.add_region(0, bbox, &article_id, None, RegionType::Body).unwrap();

        let outcome = apply_annotation_action(
            &mut doc,
            AnnotationAction::DeleteRegion { region_id: region_id.clone() },
        )
        .unwrap();

        assert!(matches!(
            outcome,
            ActionOutcome::RegionDeleted(region) if region.region_id == region_id
        ));
        assert_eq!(doc.region_count(), 0);
    }
}

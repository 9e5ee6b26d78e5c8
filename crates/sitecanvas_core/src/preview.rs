use anyhow::Result;

use crate::export::{build_export_document, combine_page_css};
use crate::model::PageCollection;

/// Read-only rendering of a collection; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewArtifact {
    pub html: String,
    pub page_count: usize,
    pub current_page_id: String,
}

pub fn render_preview(collection: &PageCollection, theme_name: &str) -> Result<PreviewArtifact> {
    let css = combine_page_css(&collection.pages);
    let html = build_export_document(collection, theme_name, &css)?;
    Ok(PreviewArtifact {
        html,
        page_count: collection.len(),
        current_page_id: collection.current_page_id.clone(),
    })
}

/// URL fragment that opens the preview on the page being edited.
pub fn preview_fragment(artifact: &PreviewArtifact) -> String {
    format!("#{}", artifact.current_page_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;

    #[test]
    fn preview_matches_export_document() {
        let collection = PageCollection::from_pages(vec![Page::new("page-1", "Home"), Page::new("page-2", "About")])
            .with_current("page-2");
        let artifact = render_preview(&collection, "Demo").expect("preview");
        let (exported, _) = crate::export::export_collection(&collection, "Demo").expect("export");
        assert_eq!(artifact.html, exported);
        assert_eq!(artifact.page_count, 2);
        assert_eq!(preview_fragment(&artifact), "#page-2");
    }
}

//! Editing session: the page collection bound to one live editor.

use crate::bridge::{ApplyOptions, ApplyReport, ScriptContext, apply_page};
use crate::clock::Clock;
use crate::css_capture::capture_css;
use crate::editor::EditorHandle;
use crate::error::PageError;
use crate::links::find_page;
use crate::model::{PageCollection, page_link_targets};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingLink {
    pub page_id: String,
    pub target: String,
}

pub struct EditorSession<E: EditorHandle> {
    editor: E,
    collection: PageCollection,
    context: ScriptContext,
    options: ApplyOptions,
    clock: Box<dyn Clock>,
    destroyed: bool,
}

impl<E: EditorHandle> EditorSession<E> {
    /// Binds `collection` to `editor` and loads the current page.
    pub fn create(
        editor: E,
        collection: PageCollection,
        context: ScriptContext,
        options: ApplyOptions,
        clock: Box<dyn Clock>,
    ) -> Self {
        let mut session = Self {
            editor,
            collection,
            context,
            options,
            clock,
            destroyed: false,
        };
        session.load_current();
        session
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn collection(&self) -> &PageCollection {
        &self.collection
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn into_parts(self) -> (E, PageCollection) {
        (self.editor, self.collection)
    }

    fn ensure_alive(&self) -> Result<(), PageError> {
        if self.destroyed {
            Err(PageError::SessionDestroyed)
        } else {
            Ok(())
        }
    }

    fn capture_into_current(&mut self) {
        let html = self.editor.html();
        let css = capture_css(&self.editor);
        let current = self.collection.current_page_id.clone();
        self.collection.merge_captured(&current, &html, &css);
    }

    fn load_current(&mut self) -> Option<ApplyReport> {
        let page = self.collection.current_page()?.clone();
        Some(apply_page(
            &mut self.editor,
            &page,
            &self.context,
            &self.options,
            self.clock.as_ref(),
        ))
    }

    /// Checkpoint before save, preview, or leaving the tab.
    pub fn commit_current_page(&mut self) -> Result<&PageCollection, PageError> {
        self.ensure_alive()?;
        self.capture_into_current();
        Ok(&self.collection)
    }

    pub fn switch_page(&mut self, page_id: &str) -> Result<Option<ApplyReport>, PageError> {
        self.ensure_alive()?;
        let page_id = page_id.trim();
        if page_id.is_empty() || page_id == self.collection.current_page_id {
            return Ok(None);
        }
        if self.collection.page(page_id).is_none() {
            return Err(PageError::UnknownPage(page_id.to_string()));
        }
        self.capture_into_current();
        self.collection.set_current(page_id)?;
        Ok(self.load_current())
    }

    pub fn add_page(&mut self) -> Result<String, PageError> {
        self.ensure_alive()?;
        self.capture_into_current();
        let id = self.collection.push_new_page().id.clone();
        self.load_current();
        Ok(id)
    }

    pub fn delete_page(&mut self, page_id: &str) -> Result<(), PageError> {
        self.ensure_alive()?;
        if self.collection.len() <= 1 {
            tracing::warn!(page = page_id, "refusing to delete the only page");
            return Err(PageError::LastPage);
        }
        if page_id != self.collection.current_page_id {
            self.capture_into_current();
        }
        if self.collection.remove_page(page_id)? {
            self.load_current();
        }
        Ok(())
    }

    pub fn rename_page(&mut self, page_id: &str, new_name: &str) -> Result<(), PageError> {
        self.ensure_alive()?;
        self.collection.rename_page(page_id, new_name)
    }

    /// Adopts a collection written by another tab; ignored once destroyed.
    pub fn adopt_external(&mut self, collection: PageCollection) -> bool {
        if self.destroyed {
            return false;
        }
        self.collection = collection;
        if self.collection.current_page().is_none() {
            if let Some(first) = self.collection.pages.first() {
                self.collection.current_page_id = first.id.clone();
            }
        }
        self.load_current();
        true
    }

    /// Page links whose target matches no page. They are tolerated at runtime.
    pub fn dangling_page_links(&self) -> Vec<DanglingLink> {
        let pages = &self.collection.pages;
        let mut dangling = Vec::new();
        for page in pages {
            let mut targets = page_link_targets(&page.html);
            if page.id == self.collection.current_page_id {
                targets.extend(
                    self.editor
                        .components()
                        .iter()
                        .filter_map(|component| component.kind.page_target().map(str::to_string)),
                );
            }
            for target in targets {
                if find_page(pages, &target).is_none()
                    && !dangling
                        .iter()
                        .any(|link: &DanglingLink| link.page_id == page.id && link.target == target)
                {
                    dangling.push(DanglingLink {
                        page_id: page.id.clone(),
                        target,
                    });
                }
            }
        }
        dangling
    }
}

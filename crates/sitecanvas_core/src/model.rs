//! Core page and theme models

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PageError;
use crate::ids::new_page_id;
use crate::{PAGE_LINK_ATTR, PLACEHOLDER_HTML};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
    pub html: String,
    pub css: String,
}

impl Page {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            html: PLACEHOLDER_HTML.to_string(),
            css: String::new(),
        }
    }
}

/// Ordered pages plus the page currently open in the editor.
///
/// A collection is never empty; constructors that receive no pages fall back
/// to a single placeholder page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCollection {
    pub pages: Vec<Page>,
    pub current_page_id: String,
}

impl Default for PageCollection {
    fn default() -> Self {
        Self::single(Page::new(crate::ids::positional_page_id(0), "Home"))
    }
}

impl PageCollection {
    pub fn single(page: Page) -> Self {
        let current_page_id = page.id.clone();
        Self {
            pages: vec![page],
            current_page_id,
        }
    }

    /// Builds a collection with the first page current. Empty input yields the default.
    pub fn from_pages(pages: Vec<Page>) -> Self {
        match pages.first() {
            Some(first) => Self {
                current_page_id: first.id.clone(),
                pages,
            },
            None => Self::default(),
        }
    }

    /// Keeps `current_page_id` pointing at a real page.
    pub fn with_current(mut self, page_id: &str) -> Self {
        if self.page(page_id).is_some() {
            self.current_page_id = page_id.to_string();
        }
        self
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    fn page_mut(&mut self, page_id: &str) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id == page_id)
    }

    pub fn current_page(&self) -> Option<&Page> {
        self.page(&self.current_page_id)
    }

    /// Detached copy of the pages and current id, for persistence and export.
    pub fn snapshot(&self) -> PageCollection {
        self.clone()
    }

    /// Writes captured content into a page, keeping stored values where the capture is blank.
    pub fn merge_captured(&mut self, page_id: &str, html: &str, css: &str) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        if !html.trim().is_empty() {
            page.html = html.to_string();
        }
        if !css.trim().is_empty() {
            page.css = css.to_string();
        }
        true
    }

    /// Appends `Page N` (N = len + 1) with placeholder content and makes it current.
    pub fn push_new_page(&mut self) -> &Page {
        let name = format!("Page {}", self.pages.len() + 1);
        let mut id = new_page_id();
        while self.page(&id).is_some() {
            id = new_page_id();
        }
        self.current_page_id = id.clone();
        self.pages.push(Page::new(id, name));
        let last = self.pages.len() - 1;
        &self.pages[last]
    }

    /// Removes a page. Returns whether the current page changed.
    pub fn remove_page(&mut self, page_id: &str) -> Result<bool, PageError> {
        let index = self
            .pages
            .iter()
            .position(|page| page.id == page_id)
            .ok_or_else(|| PageError::UnknownPage(page_id.to_string()))?;
        if self.pages.len() <= 1 {
            return Err(PageError::LastPage);
        }
        self.pages.remove(index);
        if self.current_page_id == page_id {
            self.current_page_id = self.pages[0].id.clone();
            return Ok(true);
        }
        Ok(false)
    }

    /// Blank names are ignored so a page never ends up unnamed.
    pub fn rename_page(&mut self, page_id: &str, new_name: &str) -> Result<(), PageError> {
        let page = self
            .page_mut(page_id)
            .ok_or_else(|| PageError::UnknownPage(page_id.to_string()))?;
        let trimmed = new_name.trim();
        if !trimmed.is_empty() {
            page.name = trimmed.to_string();
        }
        Ok(())
    }

    pub fn set_current(&mut self, page_id: &str) -> Result<(), PageError> {
        if self.page(page_id).is_none() {
            return Err(PageError::UnknownPage(page_id.to_string()));
        }
        self.current_page_id = page_id.to_string();
        Ok(())
    }
}

/// Which theme a session edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeIdentity {
    Custom { id: String },
    Installed { owner_id: String, theme_id: String },
}

impl ThemeIdentity {
    /// Accepts `[A-Za-z0-9_-]{1,64}`; anything else is treated as malformed.
    pub fn custom(id: &str) -> Option<Self> {
        let id = id.trim();
        if is_valid_theme_id(id) {
            Some(Self::Custom { id: id.to_string() })
        } else {
            None
        }
    }

    pub fn installed(owner_id: &str, theme_id: &str) -> Option<Self> {
        if is_valid_theme_id(owner_id.trim()) && is_valid_theme_id(theme_id.trim()) {
            Some(Self::Installed {
                owner_id: owner_id.trim().to_string(),
                theme_id: theme_id.trim().to_string(),
            })
        } else {
            None
        }
    }

    /// Deterministic slug used to derive storage keys.
    pub fn storage_slug(&self) -> String {
        match self {
            Self::Custom { id } => format!("custom-{id}"),
            Self::Installed { owner_id, theme_id } => format!("installed-{owner_id}-{theme_id}"),
        }
    }
}

pub fn is_valid_theme_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Remote record shape of a saved theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoredThemeRecord {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub thumbnail: String,
}

/// A `<script>` carried out of band of the editor tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScriptDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub script_type: Option<String>,
    #[serde(rename = "async", default)]
    pub async_load: bool,
    #[serde(default)]
    pub defer: bool,
}

impl ScriptDescriptor {
    pub fn is_external(&self) -> bool {
        self.src.as_deref().is_some_and(|src| !src.trim().is_empty())
    }

    /// External scripts that must finish loading before the next one starts.
    pub fn is_blocking(&self) -> bool {
        self.is_external() && !self.async_load && !self.defer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub content: String,
    pub created_at: i64,
}

/// Semantic role of an editor component, decided once when the node is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    PageLink { target: String },
    ExternalLink { href: String },
    Button,
    Container,
    Text,
    Media,
    Other,
}

impl ComponentKind {
    pub fn classify(tag: &str, attributes: &BTreeMap<String, String>) -> Self {
        if let Some(target) = attributes
            .get(PAGE_LINK_ATTR)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
        {
            return Self::PageLink {
                target: target.to_string(),
            };
        }
        let tag = tag.to_ascii_lowercase();
        if tag == "a" {
            if let Some(href) = attributes.get("href").map(|value| value.trim()) {
                if let Some(fragment) = href.strip_prefix('#') {
                    if !fragment.is_empty() {
                        return Self::PageLink {
                            target: href.to_string(),
                        };
                    }
                } else if !href.is_empty() {
                    return Self::ExternalLink {
                        href: href.to_string(),
                    };
                }
            }
            return Self::Text;
        }
        match tag.as_str() {
            "button" => Self::Button,
            "div" | "section" | "header" | "footer" | "main" | "nav" | "article" | "aside"
            | "body" => Self::Container,
            "p" | "span" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "label"
            | "blockquote" => Self::Text,
            "img" | "video" | "picture" | "iframe" | "svg" | "audio" => Self::Media,
            _ => Self::Other,
        }
    }

    pub fn page_target(&self) -> Option<&str> {
        match self {
            Self::PageLink { target } => Some(target),
            _ => None,
        }
    }
}

/// Extracts every `data-page-link` value from a serialized fragment.
pub fn page_link_targets(html: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?i)data-page-link\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("page link regex")
    });
    re.captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

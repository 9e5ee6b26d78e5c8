//! Page-link matching and external URL normalization.
//!
//! The exported runtime script carries a JavaScript copy of these rules; both
//! sides must agree so that links behave the same in the editor and in an
//! exported document.

use std::sync::OnceLock;

use regex::Regex;

use crate::PAGE_ID_PREFIX;
use crate::model::Page;

/// Trims, drops a leading `#`, then drops a leading `page-`.
pub fn normalize_page_ref(value: &str) -> &str {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
    trimmed.strip_prefix(PAGE_ID_PREFIX).unwrap_or(trimmed)
}

/// Exact match on the hash-stripped target first, then a loose match on normalized forms.
pub fn find_page<'a>(pages: &'a [Page], target: &str) -> Option<&'a Page> {
    let raw = target.trim();
    let raw = raw.strip_prefix('#').unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    if let Some(page) = pages.iter().find(|page| page.id == raw) {
        return Some(page);
    }
    let wanted = normalize_page_ref(raw);
    if wanted.is_empty() {
        return None;
    }
    pages
        .iter()
        .find(|page| normalize_page_ref(&page.id) == wanted)
}

/// The single normalization applied to every followed external link.
pub fn normalize_external_url(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if ["http://", "https://", "mailto:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return Some(trimmed.to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if looks_like_domain(trimmed) {
        return Some(format!("https://{trimmed}"));
    }
    Some(format!("https://{}", trimmed.trim_start_matches('/')))
}

fn looks_like_domain(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+(:\d+)?([/?#].*)?$").expect("domain regex")
    });
    re.is_match(value)
}

/// What a click on an element should do, in the exported runtime's terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    ShowPage(String),
    OpenExternal(String),
    Ignore,
}

/// Decides the click behavior for an element carrying a page-link attribute and/or an `href`.
pub fn classify_link(pages: &[Page], page_link: Option<&str>, href: Option<&str>) -> LinkAction {
    if let Some(target) = page_link.map(str::trim).filter(|value| !value.is_empty()) {
        if let Some(page) = find_page(pages, target) {
            return LinkAction::ShowPage(page.id.clone());
        }
    }
    let Some(href) = href.map(str::trim).filter(|value| !value.is_empty()) else {
        return LinkAction::Ignore;
    };
    if href.starts_with('#') {
        return match find_page(pages, href) {
            Some(page) => LinkAction::ShowPage(page.id.clone()),
            None => LinkAction::Ignore,
        };
    }
    if href.to_ascii_lowercase().starts_with("javascript:") {
        return LinkAction::Ignore;
    }
    match normalize_external_url(href) {
        Some(url) => LinkAction::OpenExternal(url),
        None => LinkAction::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str) -> Page {
        Page {
            id: id.to_string(),
            name: id.to_string(),
            html: String::new(),
            css: String::new(),
        }
    }

    #[test]
    fn targets_match_unprefixed_ids() {
        let pages = vec![page("1"), page("3")];
        for target in ["page-3", "#page-3", "3"] {
            assert_eq!(find_page(&pages, target).map(|p| p.id.as_str()), Some("3"));
        }
        assert!(find_page(&pages, "page-9").is_none());
    }

    #[test]
    fn targets_match_prefixed_ids() {
        let pages = vec![page("page-1"), page("page-3")];
        for target in ["page-3", "#page-3", "3", " #page-3 "] {
            assert_eq!(
                find_page(&pages, target).map(|p| p.id.as_str()),
                Some("page-3")
            );
        }
        assert!(find_page(&pages, "#").is_none());
        assert!(find_page(&pages, "").is_none());
    }

    #[test]
    fn external_urls_are_normalized() {
        assert_eq!(
            normalize_external_url("example.com").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_external_url("//example.com").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_external_url("https://example.com").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_external_url("mailto:a@b.com").as_deref(),
            Some("mailto:a@b.com")
        );
        assert_eq!(
            normalize_external_url("tel:+15551234").as_deref(),
            Some("tel:+15551234")
        );
        assert_eq!(normalize_external_url("   "), None);
    }

    #[test]
    fn link_actions_prefer_page_links() {
        let pages = vec![page("page-1"), page("about")];
        assert_eq!(
            classify_link(&pages, Some("about"), Some("https://x.test")),
            LinkAction::ShowPage("about".to_string())
        );
        assert_eq!(
            classify_link(&pages, Some("missing"), Some("x.test")),
            LinkAction::OpenExternal("https://x.test".to_string())
        );
        assert_eq!(classify_link(&pages, Some("missing"), None), LinkAction::Ignore);
        assert_eq!(classify_link(&pages, None, Some("#nowhere")), LinkAction::Ignore);
    }
}

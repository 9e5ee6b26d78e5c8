//! Parsing of previously saved exports back into pages

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ids::{positional_page_id, positional_page_name, unique_page_id};
use crate::model::{Page, PageCollection};
use crate::{PAYLOAD_ELEMENT_ID, PLACEHOLDER_HTML};

fn payload_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r#"(?is)<script\b[^>]*\bid\s*=\s*["']?{}["']?[^>]*>(.*?)</script\s*>"#,
            regex::escape(PAYLOAD_ELEMENT_ID)
        );
        Regex::new(&pattern).expect("payload regex")
    })
}

/// Recognizes the legacy bare JSON array and the current embedded-payload document.
pub fn parse_saved_export(html: &str) -> Option<Vec<Page>> {
    let trimmed = html.trim();
    if trimmed.starts_with('[') {
        if let Some(pages) = serde_json::from_str::<Value>(trimmed)
            .ok()
            .and_then(|value| pages_from_value(&value))
        {
            return Some(pages);
        }
    }
    let caps = payload_re().captures(html)?;
    let value: Value = serde_json::from_str(caps[1].trim()).ok()?;
    pages_from_value(&value)
}

fn pages_from_value(value: &Value) -> Option<Vec<Page>> {
    let entries = value.as_array()?;
    if entries.is_empty() {
        return None;
    }
    // Explicit ids are reserved first so a positional fallback never shadows one.
    let explicit: HashSet<String> = entries.iter().filter_map(explicit_id).collect();
    let mut pages: Vec<Page> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let id = match explicit_id(entry) {
            Some(id) => unique_page_id(id, |id| pages.iter().any(|page| page.id == id)),
            None => unique_page_id(positional_page_id(index), |id| {
                explicit.contains(id) || pages.iter().any(|page| page.id == id)
            }),
        };
        pages.push(page_from_entry(index, id, entry));
    }
    Some(pages)
}

fn entry_text(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(|value| match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn explicit_id(entry: &Value) -> Option<String> {
    entry_text(entry, "id").filter(|id| !id.trim().is_empty())
}

fn page_from_entry(index: usize, id: String, entry: &Value) -> Page {
    Page {
        id,
        name: entry_text(entry, "name")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| positional_page_name(index)),
        html: entry_text(entry, "html").unwrap_or_else(|| PLACEHOLDER_HTML.to_string()),
        css: entry_text(entry, "css").unwrap_or_default(),
    }
}

/// Turns a stored record's `html`/`css` into a collection; unknown shapes become one raw page.
pub fn pages_from_stored_html(html: &str, css: &str) -> PageCollection {
    match parse_saved_export(html) {
        Some(pages) => PageCollection::from_pages(pages),
        None => PageCollection::single(Page {
            id: positional_page_id(0),
            name: positional_page_name(0),
            html: html.to_string(),
            css: css.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_array_is_parsed_directly() {
        let pages = parse_saved_export(r#"[{"id":"a","name":"A","html":"<p>1</p>","css":""}]"#)
            .expect("pages");
        assert_eq!(pages[0].id, "a");
        assert_eq!(pages[0].html, "<p>1</p>");
    }

    #[test]
    fn missing_fields_get_positional_defaults() {
        let doc = r#"<html><body><script type="application/json" id="sc-pages-data">[{"html":"<b>x</b>"},{"id":7,"name":""}]</script></body></html>"#;
        let pages = parse_saved_export(doc).expect("pages");
        assert_eq!(pages[0].id, "page-1");
        assert_eq!(pages[0].name, "Page 1");
        assert_eq!(pages[0].css, "");
        assert_eq!(pages[1].id, "7");
        assert_eq!(pages[1].name, "Page 2");
        assert_eq!(pages[1].html, PLACEHOLDER_HTML);
    }

    #[test]
    fn positional_ids_do_not_collide_with_explicit_ones() {
        let pages = parse_saved_export(r#"[{"id":"page-2","name":"Shop"},{"name":"About"},{"id":"page-2"}]"#)
            .expect("pages");
        let ids: Vec<&str> = pages.iter().map(|page| page.id.as_str()).collect();
        assert_eq!(ids, vec!["page-2", "page-2-2", "page-2-3"]);
        let collection = PageCollection::from_pages(pages);
        assert_eq!(collection.page("page-2-2").map(|page| page.name.as_str()), Some("About"));
    }

    #[test]
    fn unknown_shapes_fall_back_to_a_single_raw_page() {
        assert!(parse_saved_export("<h1>Old site</h1>").is_none());
        assert!(parse_saved_export("[not json").is_none());
        let collection = pages_from_stored_html("<h1>Old site</h1>", "h1{}");
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.pages[0].html, "<h1>Old site</h1>");
        assert_eq!(collection.pages[0].css, "h1{}");
        assert_eq!(collection.current_page_id, "page-1");
    }
}

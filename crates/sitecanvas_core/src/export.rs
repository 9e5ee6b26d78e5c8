//! Single-file export of a page collection.
//!
//! The document carries every page inside one JSON payload plus an inline
//! runtime that renders and switches pages, so it works without the editor
//! and without any external file.

use anyhow::{Context, Result};
use minijinja::{AutoEscape, Environment, context};

use crate::model::{Page, PageCollection};
use crate::{
    PAGE_ID_PREFIX, PAGE_LINK_ATTR, PAGE_MARKER_CLASS, PAYLOAD_ELEMENT_ID, ROOT_ELEMENT_ID,
    WRAPPER_CLASS,
};

pub const RUNTIME_JS: &str = include_str!("../assets/runtime.js");
const EXPORT_TEMPLATE: &str = include_str!("../assets/templates/export.html");

/// Makes JSON safe to embed verbatim inside a `<script>` element.
pub fn escape_json_for_script(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(ch),
        }
    }
    out
}

/// Per-page stylesheets in page order; later pages win cascade ties.
pub fn combine_page_css(pages: &[Page]) -> String {
    pages
        .iter()
        .filter(|page| !page.css.trim().is_empty())
        .map(|page| format!("/* page: {} */\n{}", sanitize_comment(&page.id), page.css.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_comment(value: &str) -> String {
    value.replace("*/", "* /")
}

fn guard_style_text(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(pos) = find_ascii_case_insensitive(rest, "</style") {
        out.push_str(&rest[..pos]);
        out.push_str("<\\/style");
        rest = &rest[pos + "</style".len()..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn export_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.add_template("export.html", EXPORT_TEMPLATE)?;
    Ok(env)
}

/// Builds the self-contained export document.
pub fn build_export_document(
    collection: &PageCollection,
    theme_name: &str,
    combined_css: &str,
) -> Result<String> {
    let json = serde_json::to_string(&collection.pages).context("failed to serialize pages")?;
    let payload = escape_json_for_script(&json);
    let title = if theme_name.trim().is_empty() {
        "Untitled site"
    } else {
        theme_name.trim()
    };
    let env = export_env()?;
    let template = env.get_template("export.html")?;
    let html = template
        .render(context! {
            title => title,
            css => guard_style_text(combined_css),
            root_id => ROOT_ELEMENT_ID,
            payload_id => PAYLOAD_ELEMENT_ID,
            id_prefix => PAGE_ID_PREFIX,
            page_class => PAGE_MARKER_CLASS,
            wrapper_class => WRAPPER_CLASS,
            link_attr => PAGE_LINK_ATTR,
            payload => payload,
            runtime => RUNTIME_JS,
        })
        .context("failed to render export document")?;
    Ok(html)
}

/// Export using the concatenated per-page stylesheets.
pub fn export_collection(collection: &PageCollection, theme_name: &str) -> Result<(String, String)> {
    let css = combine_page_css(&collection.pages);
    let html = build_export_document(collection, theme_name, &css)?;
    Ok((html, css))
}

//! HTML and CSS helpers for reconciling foreign theme markup

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use url::Url;

use crate::model::ScriptDescriptor;
use crate::scripts::{descriptor_from_parts, strip_script_tags};

/// A stylesheet reference or inline block, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    Link(String),
    Inline(String),
}

fn url_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(\s(?:src|data-src|poster)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
            .expect("url attribute regex")
    })
}

fn srcset_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(\ssrcset\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("srcset regex")
    })
}

fn style_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(\sstyle\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("style attribute regex")
    })
}

fn anchor_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<a\b[^>]*>").expect("anchor regex"))
}

fn href_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(\shref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("href regex")
    })
}

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]*))\s*\)"#).expect("css url regex")
    })
}

/// Values left alone by rewriting: absolute, fragment, or special-scheme URLs.
pub fn is_non_rewritable(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    if ["data:", "mailto:", "tel:", "javascript:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return true;
    }
    Url::parse(trimmed).is_ok()
}

pub fn absolutize(value: &str, base: &Url) -> String {
    if is_non_rewritable(value) {
        return value.to_string();
    }
    base.join(value.trim())
        .map(|url| url.to_string())
        .unwrap_or_else(|_| value.to_string())
}

fn quoted_value<'a>(caps: &'a Captures<'_>) -> (&'a str, char) {
    match caps.get(2) {
        Some(m) => (m.as_str(), '"'),
        None => (caps.get(3).map(|m| m.as_str()).unwrap_or(""), '\''),
    }
}

/// Rewrites `src`, `srcset`, and `url()` inside `style` attributes to absolute URLs.
pub fn rewrite_resource_urls(html: &str, base: &Url) -> String {
    let html = url_attr_re().replace_all(html, |caps: &Captures<'_>| {
        let (value, quote) = quoted_value(caps);
        format!("{}{quote}{}{quote}", &caps[1], absolutize(value, base))
    });
    let html = srcset_attr_re().replace_all(&html, |caps: &Captures<'_>| {
        let (value, quote) = quoted_value(caps);
        format!("{}{quote}{}{quote}", &caps[1], rewrite_srcset(value, base))
    });
    let html = style_attr_re().replace_all(&html, |caps: &Captures<'_>| {
        let (value, quote) = quoted_value(caps);
        format!("{}{quote}{}{quote}", &caps[1], rewrite_css_urls(value, base))
    });
    html.into_owned()
}

fn rewrite_srcset(value: &str, base: &Url) -> String {
    value
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            match candidate.split_once(char::is_whitespace) {
                Some((url, descriptor)) => format!("{} {}", absolutize(url, base), descriptor.trim()),
                None => absolutize(candidate, base),
            }
        })
        .filter(|candidate| !candidate.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrites every `href` on `<a>` start tags to an absolute URL.
pub fn rewrite_anchor_hrefs(html: &str, base: &Url) -> String {
    anchor_tag_re()
        .replace_all(html, |tag: &Captures<'_>| {
            href_attr_re()
                .replace_all(&tag[0], |caps: &Captures<'_>| {
                    let (value, quote) = quoted_value(caps);
                    format!("{}{quote}{}{quote}", &caps[1], absolutize(value, base))
                })
                .into_owned()
        })
        .into_owned()
}

/// Rewrites relative `url()` references in a stylesheet.
pub fn rewrite_css_urls(css: &str, base: &Url) -> String {
    css_url_re()
        .replace_all(css, |caps: &Captures<'_>| {
            let (value, quote) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(m), _, _) => (m.as_str(), "\""),
                (_, Some(m), _) => (m.as_str(), "'"),
                (_, _, Some(m)) => (m.as_str(), ""),
                _ => ("", ""),
            };
            if is_non_rewritable(value) {
                return caps[0].to_string();
            }
            format!("url({quote}{}{quote})", absolutize(value, base))
        })
        .into_owned()
}

/// Anchor targets that name another page of the same bundle, in first-seen order.
///
/// Must run on the original markup: once hrefs are absolute they can no
/// longer be told apart from external links.
pub fn collect_internal_page_paths(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(path) = internal_page_path(href) {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }
    paths
}

pub fn internal_page_path(href: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || is_non_rewritable(trimmed) {
        return None;
    }
    let path = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    let path = path.trim_start_matches('/').trim_end_matches('/');
    if path.is_empty() || path.eq_ignore_ascii_case("index.html") || path == "." {
        return None;
    }
    let last = path.rsplit('/').next().unwrap_or(path);
    if let Some((_, ext)) = last.rsplit_once('.') {
        if !ext.eq_ignore_ascii_case("html") && !ext.eq_ignore_ascii_case("htm") {
            return None;
        }
    }
    Some(path.to_string())
}

/// URLs to try, in order, when fetching a discovered page path.
pub fn page_candidates(path: &str, base: &Url) -> Vec<Url> {
    let lower = path.to_ascii_lowercase();
    let relative: Vec<String> = if lower.ends_with(".html") || lower.ends_with(".htm") {
        vec![path.to_string()]
    } else {
        vec![format!("{path}/index.html"), format!("{path}.html")]
    };
    relative
        .iter()
        .filter_map(|candidate| base.join(candidate).ok())
        .collect()
}

/// `<link rel=stylesheet>` hrefs (resolved) and `<style>` bodies, in document order.
pub fn collect_style_sources(html: &str, base: &Url) -> Vec<StyleSource> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("link, style") else {
        return Vec::new();
    };
    let mut sources = Vec::new();
    for element in document.select(&selector) {
        let value = element.value();
        if value.name().eq_ignore_ascii_case("style") {
            let text: String = element.text().collect();
            if !text.trim().is_empty() {
                sources.push(StyleSource::Inline(text));
            }
            continue;
        }
        let is_stylesheet = value
            .attr("rel")
            .map(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            })
            .unwrap_or(false);
        if !is_stylesheet {
            continue;
        }
        if let Some(href) = value.attr("href").map(str::trim).filter(|href| !href.is_empty()) {
            let absolute = if let Some(rest) = href.strip_prefix("//") {
                format!("https://{rest}")
            } else {
                absolutize(href, base)
            };
            sources.push(StyleSource::Link(absolute));
        }
    }
    sources
}

/// Every `<script>` in the document, head and body, in order.
pub fn collect_scripts(html: &str) -> Vec<ScriptDescriptor> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|element| {
            let attributes: Vec<(String, Option<String>)> = element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_ascii_lowercase(), Some(value.to_string())))
                .collect();
            let body: String = element.text().collect();
            descriptor_from_parts(&attributes, &body)
        })
        .filter(|script| script.src.is_some() || script.content.is_some())
        .collect()
}

/// Body markup with every script removed.
pub fn body_markup(html: &str) -> String {
    let document = Html::parse_document(html);
    let inner = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(|body| body.inner_html()))
        .unwrap_or_else(|| html.to_string());
    strip_script_tags(&inner).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.test/themes/installed/u1/t1/unzippedTheme/index.html").expect("url")
    }

    #[test]
    fn rewrites_resource_attributes() {
        let html = r#"<img src="img/a.png" srcset="img/a.png 1x, img/a@2x.png 2x"><div style="background:url('bg.jpg')"></div><img src="data:image/png;base64,xx"><img src='https://cdn.test/b.png'>"#;
        let out = rewrite_resource_urls(html, &base());
        assert!(out.contains(r#"src="https://api.test/themes/installed/u1/t1/unzippedTheme/img/a.png""#));
        assert!(out.contains("unzippedTheme/img/a@2x.png 2x"));
        assert!(out.contains("url('https://api.test/themes/installed/u1/t1/unzippedTheme/bg.jpg')"));
        assert!(out.contains("data:image/png;base64,xx"));
        assert!(out.contains("src='https://cdn.test/b.png'"));
    }

    #[test]
    fn collects_internal_paths_before_rewrite() {
        let html = r##"<a href="about.html">A</a><a href="./shop/">S</a><a href="index.html">H</a>
            <a href="/">R</a><a href="#top">T</a><a href="https://x.test/p.html">X</a>
            <a href="mailto:a@b.c">M</a><a href="about.html#team">A2</a><a href="brochure.pdf">P</a><a href="">E</a>"##;
        assert_eq!(collect_internal_page_paths(html), vec!["about.html", "shop"]);
    }

    #[test]
    fn anchors_become_absolute() {
        let out = rewrite_anchor_hrefs(r##"<a class="x" href="about.html">A</a><a href="#top">T</a>"##, &base());
        assert!(out.contains("https://api.test/themes/installed/u1/t1/unzippedTheme/about.html"));
        assert!(out.contains(r##"href="#top""##));
    }

    #[test]
    fn css_urls_are_rewritten_only_when_relative() {
        let css = r#"a{background:url(img/x.png)} b{background:url("data:image/gif;base64,R0")} c{src:url('//fonts.test/f.woff')}"#;
        let out = rewrite_css_urls(css, &base());
        assert!(out.contains("url(https://api.test/themes/installed/u1/t1/unzippedTheme/img/x.png)"));
        assert!(out.contains(r#"url("data:image/gif;base64,R0")"#));
        assert!(out.contains("url('//fonts.test/f.woff')"));
    }

    #[test]
    fn candidates_cover_directory_and_file_forms() {
        let urls: Vec<String> = page_candidates("about", &base()).iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.test/themes/installed/u1/t1/unzippedTheme/about/index.html",
                "https://api.test/themes/installed/u1/t1/unzippedTheme/about.html",
            ]
        );
        assert_eq!(page_candidates("contact.html", &base()).len(), 1);
    }

    #[test]
    fn extracts_styles_scripts_and_body() {
        let html = r#"<html><head><link rel="stylesheet" href="css/site.css"><style>h1{color:red}</style>
            <script src="js/a.js"></script></head><body><h1>Hi</h1><script>boot()</script></body></html>"#;
        let styles = collect_style_sources(html, &base());
        assert_eq!(
            styles,
            vec![
                StyleSource::Link("https://api.test/themes/installed/u1/t1/unzippedTheme/css/site.css".to_string()),
                StyleSource::Inline("h1{color:red}".to_string()),
            ]
        );
        let scripts = collect_scripts(html);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[1].content.as_deref(), Some("boot()"));
        assert_eq!(body_markup(html), "<h1>Hi</h1>");
    }
}

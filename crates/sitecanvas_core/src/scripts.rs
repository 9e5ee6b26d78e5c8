//! Out-of-band handling of `<script>` tags.
//!
//! The editor cannot keep live script tags in its tree, so scripts are pulled
//! out of the markup and carried alongside it. When content has to travel as a
//! plain string, the descriptors ride along in a marker comment holding
//! base64-encoded JSON.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use url::Url;

use crate::model::ScriptDescriptor;

const MARKER_PREFIX: &str = "<!--sitecanvas-scripts:";
const MARKER_SUFFIX: &str = "-->";

fn script_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script tag regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([a-z_:][-a-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute regex")
    })
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<!--sitecanvas-scripts:([A-Za-z0-9+/=\s]*)-->").expect("marker regex")
    })
}

/// Parses the attribute section of a start tag into lower-cased name/value pairs.
pub fn parse_attributes(raw: &str) -> Vec<(String, Option<String>)> {
    attr_re()
        .captures_iter(raw)
        .map(|caps| {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string());
            (name, value)
        })
        .collect()
}

pub fn descriptor_from_parts(attributes: &[(String, Option<String>)], body: &str) -> ScriptDescriptor {
    let mut script = ScriptDescriptor::default();
    for (name, value) in attributes {
        match name.as_str() {
            "src" => {
                script.src = value
                    .as_deref()
                    .map(str::trim)
                    .filter(|src| !src.is_empty())
                    .map(str::to_string);
            }
            "type" => {
                script.script_type = value
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string);
            }
            "async" => script.async_load = true,
            "defer" => script.defer = true,
            _ => {}
        }
    }
    if script.src.is_none() && !body.trim().is_empty() {
        script.content = Some(body.to_string());
    }
    script
}

/// Scans raw HTML for `<script>` tags, in document order.
pub fn extract_script_tags(html: &str) -> Vec<ScriptDescriptor> {
    script_tag_re()
        .captures_iter(html)
        .map(|caps| descriptor_from_parts(&parse_attributes(&caps[1]), &caps[2]))
        .filter(|script| script.src.is_some() || script.content.is_some())
        .collect()
}

pub fn strip_script_tags(html: &str) -> String {
    script_tag_re().replace_all(html, "").into_owned()
}

pub fn encode_marker(scripts: &[ScriptDescriptor]) -> Option<String> {
    if scripts.is_empty() {
        return None;
    }
    let json = serde_json::to_vec(scripts).ok()?;
    Some(format!("{MARKER_PREFIX}{}{MARKER_SUFFIX}", STANDARD.encode(json)))
}

/// Removes the marker comment, returning the remaining HTML and any decoded descriptors.
pub fn take_marker(html: &str) -> (String, Option<Vec<ScriptDescriptor>>) {
    let Some(caps) = marker_re().captures(html) else {
        return (html.to_string(), None);
    };
    let payload: String = caps[1].chars().filter(|ch| !ch.is_whitespace()).collect();
    let decoded = STANDARD
        .decode(payload.as_bytes())
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Vec<ScriptDescriptor>>(&bytes).ok());
    if decoded.is_none() {
        tracing::warn!("script marker present but unreadable; ignoring it");
    }
    (marker_re().replace_all(html, "").into_owned(), decoded)
}

/// Separates markup from scripts: marker first, direct scan only when no marker exists.
pub fn recover_scripts(html: &str) -> (String, Vec<ScriptDescriptor>) {
    let (without_marker, from_marker) = take_marker(html);
    let scripts = match from_marker {
        Some(scripts) => scripts,
        None => extract_script_tags(&without_marker),
    };
    (strip_script_tags(&without_marker), scripts)
}

/// Resolves a possibly relative `src` against `base`. Absolute URLs pass through.
pub fn resolve_script_src(src: &str, base: Option<&str>) -> String {
    let trimmed = src.trim();
    if Url::parse(trimmed).is_ok() {
        return trimmed.to_string();
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return format!("https://{rest}");
    }
    match base.and_then(|base| Url::parse(&ensure_trailing_slash(base)).ok()) {
        Some(base) => base
            .join(trimmed)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| trimmed.to_string()),
        None => trimmed.to_string(),
    }
}

pub(crate) fn ensure_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

//! Page id generation and path-derived ids

use chrono::Utc;
use uuid::Uuid;

use crate::PAGE_ID_PREFIX;

/// Short time-ordered token with a random suffix, e.g. `page-m1x3k9q2a7f1`.
pub fn new_page_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = Uuid::new_v4().simple().to_string();
    format!("{PAGE_ID_PREFIX}{}{}", to_base36(millis), &random[..4])
}

/// Positional fallback id used when a stored page has none.
pub fn positional_page_id(index: usize) -> String {
    format!("{PAGE_ID_PREFIX}{}", index + 1)
}

/// Returns `wanted`, or `wanted-2`, `wanted-3`, ... when it is already taken.
pub fn unique_page_id(wanted: String, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(&wanted) {
        return wanted;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{wanted}-{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

pub fn positional_page_name(index: usize) -> String {
    format!("Page {}", index + 1)
}

/// Lower-cases the path and collapses every run of non-alphanumerics into one hyphen.
pub fn page_id_from_path(path: &str) -> String {
    let logical = logical_page_path(path);
    let mut out = String::with_capacity(logical.len());
    let mut pending_dash = false;
    for ch in logical.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "page".to_string()
    } else {
        out
    }
}

/// Title-cases the last segment of the path: `shop/about-us.html` -> `About Us`.
pub fn page_name_from_path(path: &str) -> String {
    let logical = logical_page_path(path);
    let last = logical.rsplit('/').next().unwrap_or(&logical);
    let words: Vec<String> = last
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect();
    if words.is_empty() {
        "Page".to_string()
    } else {
        words.join(" ")
    }
}

fn logical_page_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    let trimmed = trimmed.strip_suffix("/index.html").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(".html").unwrap_or(trimmed);
    trimmed.trim_matches('/').to_string()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

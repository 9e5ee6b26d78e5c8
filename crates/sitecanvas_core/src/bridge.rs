//! Pushing a page into the live editor.
//!
//! Scripts are stripped before the editor sees the markup, then re-injected
//! into the preview frame once it reports ready. Frame readiness is checked at
//! fixed delays; CSS is re-applied on every check after the first ready one,
//! which is safe because the frame keeps a single marked `<style>` element.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::clock::Clock;
use crate::config::{DEFAULT_RETRY_DELAYS_MS, DEFAULT_SCRIPT_TIMEOUT_SECS};
use crate::editor::{EditorHandle, ExternalScript, PreviewFrame, ScriptLoad};
use crate::model::{Page, ScriptDescriptor};
use crate::scripts::{ensure_trailing_slash, recover_scripts, resolve_script_src};

/// Marker of the `<style>` element holding the applied page CSS.
pub const PAGE_STYLE_MARKER: &str = "sitecanvas-page-css";

/// Conventional bootstrap functions tried after scripts are injected.
pub const INIT_FUNCTIONS: &[&str] = &[
    "init",
    "initialize",
    "initTheme",
    "initSite",
    "main",
    "start",
    "setup",
    "onReady",
];

/// How relative script sources are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptContext {
    /// Theme files served from a per-theme base URL.
    Custom { files_base: String },
    /// Sources were made absolute during import; `base` is the bundle directory.
    Installed { base: String },
    None,
}

impl ScriptContext {
    fn base(&self) -> Option<&str> {
        match self {
            Self::Custom { files_base } => Some(files_base),
            Self::Installed { base } => Some(base),
            Self::None => None,
        }
    }

    fn resolve(&self, src: &str) -> String {
        match self {
            Self::Custom { files_base } => resolve_script_src(src, Some(files_base)),
            Self::Installed { .. } | Self::None => resolve_script_src(src, None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub retry_delays: Vec<Duration>,
    pub script_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            script_timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub frame_ready: bool,
    pub css_applications: usize,
    pub import_links: Vec<String>,
    pub scripts_loaded: usize,
    pub scripts_failed: usize,
    pub scripts_timed_out: usize,
    pub inline_scripts: usize,
    pub init_called: Vec<String>,
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
            .expect("import regex")
    })
}

/// `@import` targets in a stylesheet, in order, without duplicates.
pub fn import_urls(css: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for caps in import_re().captures_iter(css) {
        let url = caps[1].to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// Loads `page` into the editor and re-injects its scripts and CSS into the preview frame.
pub fn apply_page(
    editor: &mut dyn EditorHandle,
    page: &Page,
    context: &ScriptContext,
    options: &ApplyOptions,
    clock: &dyn Clock,
) -> ApplyReport {
    let (markup, scripts) = recover_scripts(&page.html);
    editor.set_components(&markup);
    editor.set_style(&page.css);

    let mut report = ApplyReport::default();
    let mut scripts_done = false;
    for delay in &options.retry_delays {
        if !delay.is_zero() {
            clock.sleep(*delay);
        }
        let Some(frame) = editor.frame() else {
            tracing::debug!("editor has no preview frame; skipping injection");
            break;
        };
        if !frame.is_ready() {
            continue;
        }
        report.frame_ready = true;
        apply_css(frame, &page.css, &mut report);
        if !scripts_done {
            inject_scripts(frame, &scripts, context, options, &mut report);
            scripts_done = true;
        }
    }
    if !report.frame_ready && editor.frame().is_some() {
        tracing::warn!(page = %page.id, "preview frame never became ready; scripts not injected");
    }
    report
}

fn apply_css(frame: &mut dyn PreviewFrame, css: &str, report: &mut ApplyReport) {
    frame.upsert_style(PAGE_STYLE_MARKER, css);
    report.css_applications += 1;
    for url in import_urls(css) {
        frame.ensure_stylesheet_link(&url);
        if !report.import_links.contains(&url) {
            report.import_links.push(url);
        }
    }
}

fn inject_scripts(
    frame: &mut dyn PreviewFrame,
    scripts: &[ScriptDescriptor],
    context: &ScriptContext,
    options: &ApplyOptions,
    report: &mut ApplyReport,
) {
    if scripts.is_empty() {
        return;
    }
    if let Some(base) = context.base() {
        frame.set_base_href(&ensure_trailing_slash(base));
    }
    for script in scripts {
        if let Some(src) = script.src.as_deref().filter(|_| script.is_external()) {
            let external = ExternalScript {
                src: context.resolve(src),
                script_type: script.script_type.clone(),
                async_load: script.async_load,
                defer: script.defer,
            };
            match frame.load_external_script(&external, script.is_blocking(), options.script_timeout) {
                ScriptLoad::Loaded | ScriptLoad::Detached => report.scripts_loaded += 1,
                ScriptLoad::TimedOut => {
                    tracing::warn!(src = %external.src, "script load timed out; continuing");
                    report.scripts_timed_out += 1;
                }
                ScriptLoad::Failed(err) => {
                    tracing::warn!(src = %external.src, error = %err, "script failed to load; continuing");
                    report.scripts_failed += 1;
                }
            }
        } else if let Some(content) = script.content.as_deref() {
            frame.append_inline_script(content, script.script_type.as_deref());
            report.inline_scripts += 1;
        }
    }
    frame.dispatch_event("DOMContentLoaded");
    frame.dispatch_event("load");
    for name in INIT_FUNCTIONS {
        if !frame.has_global_function(name) {
            continue;
        }
        match frame.call_global_function(name) {
            Ok(()) => report.init_called.push((*name).to_string()),
            Err(err) => tracing::debug!(function = name, error = %err, "init function failed"),
        }
    }
}

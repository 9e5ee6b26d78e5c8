//! Reconstructs a page collection from a static theme bundle this tool never produced.
//!
//! Only the bundle's `index.html` is required. Sub-pages, stylesheets, and
//! scripts that fail to load are dropped or degraded with a warning, so a
//! partially reconstructed theme is returned rather than an error.

use std::thread;

use url::Url;

use crate::error::{FetchError, ImportError};
use crate::html::{
    StyleSource, body_markup, collect_internal_page_paths, collect_scripts, collect_style_sources,
    page_candidates, rewrite_anchor_hrefs, rewrite_css_urls, rewrite_resource_urls,
};
use crate::ids::{page_id_from_path, page_name_from_path, unique_page_id};
use crate::model::{Page, PageCollection, ScriptDescriptor};
use crate::scripts::encode_marker;

/// Public CDNs whose stylesheets are referenced with `@import` instead of fetched.
pub const KNOWN_CDN_HOSTS: &[&str] = &[
    "fonts.googleapis.com",
    "cdn.jsdelivr.net",
    "cdnjs.cloudflare.com",
    "unpkg.com",
    "use.fontawesome.com",
    "stackpath.bootstrapcdn.com",
    "maxcdn.bootstrapcdn.com",
    "code.jquery.com",
];

/// Upper bound on concurrent sub-page fetches.
pub const SUB_PAGE_FETCH_WORKERS: usize = 8;

pub const MAIN_PAGE_ID: &str = "index";
pub const MAIN_PAGE_NAME: &str = "Home";

/// Source of remote text. Shared across the sub-page discovery threads.
pub trait ResourceFetcher: Sync {
    fn fetch_text(&self, url: &str, with_credentials: bool) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct InstalledSource {
    base: Url,
    cache_bust: Option<String>,
}

impl InstalledSource {
    /// `base_url` is the bundle directory; a trailing slash is added when missing.
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let normalized = crate::scripts::ensure_trailing_slash(base_url.trim());
        let base =
            Url::parse(&normalized).map_err(|_| ImportError::InvalidBaseUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ImportError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            base,
            cache_bust: None,
        })
    }

    pub fn with_cache_bust(mut self, token: impl Into<String>) -> Self {
        self.cache_bust = Some(token.into());
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn index_url(&self) -> Url {
        let mut url = self
            .base
            .join("index.html")
            .unwrap_or_else(|_| self.base.clone());
        if let Some(token) = &self.cache_bust {
            url.query_pairs_mut().append_pair("v", token);
        }
        url
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Origins whose stylesheets are fetched and inlined; others get `@import`.
    pub api_origin: Option<String>,
    pub app_origin: Option<String>,
    pub extra_cdn_hosts: Vec<String>,
}

impl ImportOptions {
    fn should_import(&self, url: &Url, page_url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if KNOWN_CDN_HOSTS.contains(&host.as_str())
            || self.extra_cdn_hosts.iter().any(|extra| *extra == host)
        {
            return true;
        }
        let origin = url.origin().ascii_serialization();
        let same_as = |candidate: Option<&str>| {
            candidate
                .and_then(|value| Url::parse(value).ok())
                .is_some_and(|parsed| parsed.origin().ascii_serialization() == origin)
        };
        let api_origin = self.api_origin.as_deref();
        let page_origin = page_url.origin().ascii_serialization();
        !(same_as(api_origin) || same_as(self.app_origin.as_deref()) || origin == page_origin)
    }
}

#[derive(Debug, Clone)]
pub struct InstalledImport {
    pub collection: PageCollection,
    pub combined_css: String,
    pub scripts: Vec<ScriptDescriptor>,
    /// Discovered paths that could not be fetched under any URL form.
    pub skipped_paths: Vec<String>,
}

struct FetchedPage {
    html: String,
    css: String,
}

pub fn import_installed_theme<F>(
    fetcher: &F,
    source: &InstalledSource,
    options: &ImportOptions,
) -> Result<InstalledImport, ImportError>
where
    F: ResourceFetcher + ?Sized,
{
    let index_url = source.index_url();
    let raw = fetcher
        .fetch_text(index_url.as_str(), true)
        .map_err(|source| ImportError::Index {
            url: index_url.to_string(),
            source,
        })?;

    let paths = collect_internal_page_paths(&raw);
    let rewritten = rewrite_resource_urls(&raw, &index_url);
    let rewritten = rewrite_anchor_hrefs(&rewritten, &index_url);
    let main_css = extract_css(fetcher, &rewritten, &index_url, options);
    let scripts = collect_scripts(&rewritten);
    let mut main_html = body_markup(&rewritten);
    if let Some(marker) = encode_marker(&scripts) {
        main_html.push_str(&marker);
    }

    let mut pages = vec![Page {
        id: MAIN_PAGE_ID.to_string(),
        name: MAIN_PAGE_NAME.to_string(),
        html: main_html,
        css: main_css.clone(),
    }];
    let mut css_parts = vec![main_css];
    let mut skipped_paths = Vec::new();

    let fetched = fetch_sub_pages(fetcher, &paths, source.base(), options);
    for (path, result) in paths.iter().zip(fetched) {
        let Some(page) = result else {
            skipped_paths.push(path.clone());
            continue;
        };
        let id = unique_page_id(page_id_from_path(path), |id| {
            pages.iter().any(|page| page.id == id)
        });
        css_parts.push(page.css.clone());
        pages.push(Page {
            id,
            name: page_name_from_path(path),
            html: page.html,
            css: page.css,
        });
    }

    tracing::info!(
        pages = pages.len(),
        skipped = skipped_paths.len(),
        "installed theme reconstructed"
    );

    Ok(InstalledImport {
        collection: PageCollection::from_pages(pages),
        combined_css: join_css(css_parts),
        scripts,
        skipped_paths,
    })
}

fn fetch_sub_pages<F>(
    fetcher: &F,
    paths: &[String],
    base: &Url,
    options: &ImportOptions,
) -> Vec<Option<FetchedPage>>
where
    F: ResourceFetcher + ?Sized,
{
    let mut fetched = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(SUB_PAGE_FETCH_WORKERS) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|path| scope.spawn(move || fetch_sub_page(fetcher, path, base, options)))
                .collect();
            fetched.extend(handles.into_iter().map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("sub-page fetch thread panicked");
                    None
                }
            }));
        });
    }
    fetched
}

fn fetch_sub_page<F>(
    fetcher: &F,
    path: &str,
    base: &Url,
    options: &ImportOptions,
) -> Option<FetchedPage>
where
    F: ResourceFetcher + ?Sized,
{
    for candidate in page_candidates(path, base) {
        match fetcher.fetch_text(candidate.as_str(), true) {
            Ok(raw) => {
                let rewritten = rewrite_resource_urls(&raw, &candidate);
                let rewritten = rewrite_anchor_hrefs(&rewritten, &candidate);
                let css = extract_css(fetcher, &rewritten, &candidate, options);
                let scripts = collect_scripts(&rewritten);
                let mut html = body_markup(&rewritten);
                if let Some(marker) = encode_marker(&scripts) {
                    html.push_str(&marker);
                }
                return Some(FetchedPage { html, css });
            }
            Err(err) => {
                tracing::debug!(url = %candidate, error = %err, "sub-page candidate failed");
            }
        }
    }
    tracing::warn!(path, "sub-page could not be fetched; dropping it from the import");
    None
}

/// Combines linked and inline styles of one document. `@import` rules are hoisted first.
fn extract_css<F>(fetcher: &F, html: &str, page_url: &Url, options: &ImportOptions) -> String
where
    F: ResourceFetcher + ?Sized,
{
    let mut imports = Vec::new();
    let mut blocks = Vec::new();
    for source in collect_style_sources(html, page_url) {
        match source {
            StyleSource::Inline(text) => blocks.push(rewrite_css_urls(&text, page_url)),
            StyleSource::Link(href) => {
                let Ok(url) = Url::parse(&href) else {
                    imports.push(import_rule(&href));
                    continue;
                };
                if options.should_import(&url, page_url) {
                    imports.push(import_rule(&href));
                    continue;
                }
                match fetcher.fetch_text(&href, true) {
                    Ok(css) => blocks.push(rewrite_css_urls(&css, &url)),
                    Err(err) => {
                        tracing::warn!(href = %href, error = %err, "stylesheet fetch failed; falling back to @import");
                        imports.push(import_rule(&href));
                    }
                }
            }
        }
    }
    imports.extend(blocks);
    join_css(imports)
}

fn import_rule(href: &str) -> String {
    format!("@import url(\"{}\");", href.replace('"', "%22"))
}

fn join_css(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

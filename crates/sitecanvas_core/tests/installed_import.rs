use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sitecanvas_core::error::{FetchError, ImportError};
use sitecanvas_core::installed::{
    ImportOptions, InstalledSource, ResourceFetcher, SUB_PAGE_FETCH_WORKERS, import_installed_theme,
};
use sitecanvas_core::scripts::recover_scripts;

const BASE: &str = "https://api.shop.test/themes/installed/owner1/theme9/unzippedTheme/";

struct FakeFetcher {
    files: BTreeMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, body)| (format!("{BASE}{path}"), body.to_string()))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self, path: &str) -> bool {
        self.requested_url(&format!("{BASE}{path}"))
    }

    fn requested_url(&self, url: &str) -> bool {
        self.requests
            .lock()
            .map(|requests| requests.iter().any(|requested| requested == url))
            .unwrap_or(false)
    }
}

impl ResourceFetcher for FakeFetcher {
    fn fetch_text(&self, url: &str, _with_credentials: bool) -> Result<String, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
  <link rel="stylesheet" href="https://fonts.googleapis.com/css?family=Inter">
  <link rel="stylesheet" href="css/main.css">
  <style>.hero { background: url(img/hero.jpg); }</style>
  <script src="js/jquery.js"></script>
</head>
<body>
  <nav>
    <a href="about.html">About</a>
    <a href="shop/">Shop</a>
    <a href="blog">Blog</a>
    <a href="index.html">Home</a>
    <a href="https://elsewhere.test/">Out</a>
  </nav>
  <img src="img/logo.png" alt="logo">
  <script>window.themeReady = true;</script>
</body>
</html>"#;

fn options() -> ImportOptions {
    ImportOptions {
        api_origin: Some("https://api.shop.test".to_string()),
        app_origin: Some("https://app.shop.test".to_string()),
        extra_cdn_hosts: Vec::new(),
    }
}

#[test]
fn partial_sub_page_failure_keeps_successful_pages() {
    let fetcher = FakeFetcher::new(&[
        ("index.html", INDEX),
        ("css/main.css", "body { background: url('../img/bg.png'); }"),
        ("about.html", "<html><body><h1>About us</h1></body></html>"),
        (
            "shop/index.html",
            "<html><head><style>.shop{color:red}</style></head><body><h1>Shop</h1><script>cart()</script></body></html>",
        ),
    ]);
    let source = InstalledSource::new(BASE).expect("source");
    let import = import_installed_theme(&fetcher, &source, &options()).expect("import");

    let ids: Vec<&str> = import
        .collection
        .pages
        .iter()
        .map(|page| page.id.as_str())
        .collect();
    assert_eq!(ids, vec!["index", "about", "shop"]);
    assert_eq!(import.collection.current_page_id, "index");
    assert_eq!(import.skipped_paths, vec!["blog".to_string()]);
    assert!(fetcher.requested("blog/index.html"));
    assert!(fetcher.requested("blog.html"));

    let shop = &import.collection.pages[2];
    assert_eq!(shop.name, "Shop");
    let (shop_markup, shop_scripts) = recover_scripts(&shop.html);
    assert_eq!(shop_markup, "<h1>Shop</h1>");
    assert_eq!(shop_scripts[0].content.as_deref(), Some("cart()"));
}

#[test]
fn main_page_is_rewritten_and_scripts_are_quarantined() {
    let fetcher = FakeFetcher::new(&[
        ("index.html", INDEX),
        ("css/main.css", "body { background: url('../img/bg.png'); }"),
    ]);
    let source = InstalledSource::new(BASE).expect("source");
    let import = import_installed_theme(&fetcher, &source, &options()).expect("import");
    let main = &import.collection.pages[0];

    assert!(!main.html.contains("<script"));
    assert!(main.html.contains(&format!(r#"src="{BASE}img/logo.png""#)));
    assert!(main.html.contains(&format!(r#"href="{BASE}about.html""#)));
    assert!(main.html.contains(r#"href="https://elsewhere.test/""#));

    let (_, scripts) = recover_scripts(&main.html);
    assert_eq!(scripts.len(), 2);
    assert_eq!(scripts[0].src.as_deref(), Some(format!("{BASE}js/jquery.js").as_str()));
    assert_eq!(scripts[1].content.as_deref(), Some("window.themeReady = true;"));
    assert_eq!(import.scripts, scripts);

    let css = &import.combined_css;
    assert!(css.starts_with("@import url(\"https://fonts.googleapis.com/css?family=Inter\");"));
    assert!(css.contains("url('https://api.shop.test/themes/installed/owner1/theme9/unzippedTheme/img/bg.png')"));
    assert!(css.contains(&format!("url({BASE}img/hero.jpg)")));
    assert!(!fetcher.requested_url("https://fonts.googleapis.com/css?family=Inter"));
    assert!(fetcher.requested("css/main.css"));
}

#[test]
fn sub_page_css_follows_main_css() {
    let fetcher = FakeFetcher::new(&[
        ("index.html", r#"<html><head><style>.a{color:red}</style></head><body><a href="two.html">2</a></body></html>"#),
        ("two.html", "<html><head><style>.a{color:blue}</style></head><body>two</body></html>"),
    ]);
    let source = InstalledSource::new(BASE).expect("source");
    let import = import_installed_theme(&fetcher, &source, &options()).expect("import");
    let red = import.combined_css.find("color:red").expect("main css");
    let blue = import.combined_css.find("color:blue").expect("sub css");
    assert!(red < blue);
    assert_eq!(import.collection.pages[1].id, "two");
    assert_eq!(import.collection.pages[1].name, "Two");
}

#[test]
fn missing_index_is_fatal() {
    let fetcher = FakeFetcher::new(&[]);
    let source = InstalledSource::new(BASE).expect("source");
    let err = import_installed_theme(&fetcher, &source, &options()).expect_err("should fail");
    assert!(matches!(err, ImportError::Index { .. }));
}

struct CountingFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ResourceFetcher for CountingFetcher {
    fn fetch_text(&self, url: &str, _with_credentials: bool) -> Result<String, FetchError> {
        if url.ends_with("index.html") {
            let links: String = (0..30)
                .map(|n| format!(r#"<a href="p{n}.html">P{n}</a>"#))
                .collect();
            return Ok(format!("<html><body><nav>{links}</nav></body></html>"));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("<html><body><p>sub</p></body></html>".to_string())
    }
}

#[test]
fn sub_page_fetches_are_bounded() {
    let fetcher = CountingFetcher {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    };
    let source = InstalledSource::new(BASE).expect("source");
    let import = import_installed_theme(&fetcher, &source, &options()).expect("import");
    assert_eq!(import.collection.len(), 31);
    assert!(import.skipped_paths.is_empty());
    let peak = fetcher.peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= SUB_PAGE_FETCH_WORKERS, "peak concurrency {peak}");
}

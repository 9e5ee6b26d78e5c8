use std::time::{Duration, Instant};

use sitecanvas_cli::preview::{PreviewOpts, spawn_preview};
use sitecanvas_core::model::{Page, PageCollection};
use sitecanvas_core::preview::render_preview;

fn wait_for_ready(url: &str) {
    let start = Instant::now();
    loop {
        match ureq::get(url).call() {
            Ok(_) => return,
            Err(ureq::Error::Status(_, _)) => return,
            Err(_) => {
                if start.elapsed() > Duration::from_secs(2) {
                    panic!("preview server did not start in time");
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn page(id: &str, name: &str, html: &str) -> Page {
    Page {
        html: html.to_string(),
        ..Page::new(id, name)
    }
}

#[test]
fn preview_serves_the_export_document() {
    let collection = PageCollection::from_pages(vec![
        page("page-1", "Home", "<h1>Welcome</h1>"),
        page("page-2", "Contact", "<p>Write to us</p>"),
    ]);
    let artifact = render_preview(&collection, "Bakery").expect("render");

    let handle = spawn_preview(
        PreviewOpts {
            host: "127.0.0.1".to_string(),
            port: 0,
            no_open: true,
        },
        artifact,
    )
    .expect("spawn preview");

    let url = handle.url.clone();
    let artifact = handle.artifact.clone();
    let result = std::panic::catch_unwind(move || {
        wait_for_ready(&url);
        let response = ureq::get(&url).call().expect("get /");
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Cache-Control"), Some("no-store"));
        let body = response.into_string().expect("read body");
        assert!(body.contains("sc-pages-data"));
        assert!(body.contains("Welcome"));

        match ureq::get(&format!("{url}missing.css")).call() {
            Err(ureq::Error::Status(status, _)) => assert_eq!(status, 404),
            other => panic!("expected 404, got {other:?}"),
        }

        let updated = PageCollection::from_pages(vec![page("page-1", "Home", "<h1>Fresh bread</h1>")]);
        artifact.replace(render_preview(&updated, "Bakery").expect("render"));
        let body = ureq::get(&format!("{url}index.html"))
            .call()
            .expect("get index")
            .into_string()
            .expect("read body");
        assert!(body.contains("Fresh bread"));
        assert!(!body.contains("Write to us"));
    });

    handle.stop().expect("stop preview");
    if let Err(err) = result {
        std::panic::resume_unwind(err);
    }
}

use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use tiny_http::{Header, Method, Response, Server, StatusCode};

use sitecanvas_core::preview::{PreviewArtifact, preview_fragment};

pub struct PreviewOpts {
    pub host: String,
    pub port: u16,
    pub no_open: bool,
}

/// The document currently served; replaced in place when pages change.
#[derive(Clone)]
pub struct SharedArtifact(Arc<RwLock<PreviewArtifact>>);

impl SharedArtifact {
    pub fn new(artifact: PreviewArtifact) -> Self {
        Self(Arc::new(RwLock::new(artifact)))
    }

    pub fn replace(&self, artifact: PreviewArtifact) {
        let mut current = self
            .0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = artifact;
    }

    fn html(&self) -> String {
        self.0
            .read()
            .map(|artifact| artifact.html.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().html.clone())
    }
}

pub struct PreviewHandle {
    pub url: String,
    pub artifact: SharedArtifact,
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<Result<()>>,
}

impl PreviewHandle {
    pub fn stop(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.join.join() {
            Ok(result) => result,
            Err(_) => anyhow::bail!("preview thread panicked"),
        }
    }
}

/// Serves `artifact` until the process is interrupted.
pub fn run_preview(opts: PreviewOpts, artifact: PreviewArtifact) -> Result<()> {
    let (server, addr) = bind_server(&opts.host, opts.port)?;
    let url = preview_url(&opts.host, addr);
    let fragment = preview_fragment(&artifact);

    println!("Preview: {url}");
    println!("Pages: {}", artifact.page_count);

    if !opts.no_open {
        open_browser(&format!("{url}{fragment}"));
    }

    serve_loop(server, SharedArtifact::new(artifact), None)
}

/// Serves on a background thread; the document can be swapped through the handle.
pub fn spawn_preview(opts: PreviewOpts, artifact: PreviewArtifact) -> Result<PreviewHandle> {
    let (server, addr) = bind_server(&opts.host, opts.port)?;
    let url = preview_url(&opts.host, addr);
    if !opts.no_open {
        open_browser(&format!("{url}{}", preview_fragment(&artifact)));
    }
    let artifact = SharedArtifact::new(artifact);
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let served = artifact.clone();
    let join = thread::spawn(move || serve_loop(server, served, Some(shutdown_thread)));

    Ok(PreviewHandle {
        url,
        artifact,
        shutdown,
        join,
    })
}

fn open_browser(url: &str) {
    if let Err(err) = webbrowser::open(url) {
        eprintln!("warning: failed to open browser: {err}");
    }
}

fn bind_server(host: &str, port: u16) -> Result<(Server, SocketAddr)> {
    let addr = format!("{host}:{port}");
    let server = Server::http(&addr)
        .map_err(|err| anyhow::anyhow!("failed to bind to {addr}: {err}"))?;
    let actual = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow::anyhow!("failed to resolve socket address"))?;
    Ok((server, actual))
}

fn preview_url(host: &str, addr: SocketAddr) -> String {
    format!("http://{host}:{}/", addr.port())
}

fn serve_loop(
    server: Server,
    artifact: SharedArtifact,
    shutdown: Option<Arc<AtomicBool>>,
) -> Result<()> {
    loop {
        if let Some(flag) = &shutdown {
            if flag.load(Ordering::SeqCst) {
                break;
            }
        }

        let request = match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => return Err(err.into()),
        };

        let response = handle_request(&request, &artifact);
        if let Err(err) = request.respond(response) {
            tracing::warn!(error = %err, "failed to send preview response");
        }
    }
    Ok(())
}

fn handle_request(
    request: &tiny_http::Request,
    artifact: &SharedArtifact,
) -> Response<Box<dyn Read + Send>> {
    if request.method() != &Method::Get && request.method() != &Method::Head {
        return Response::from_string("Method Not Allowed")
            .with_status_code(StatusCode(405))
            .boxed();
    }

    if !is_document_path(request.url()) {
        return Response::from_string("Not Found")
            .with_status_code(StatusCode(404))
            .boxed();
    }

    if request.method() == &Method::Head {
        return Response::empty(200).with_header(html_header()).boxed();
    }

    Response::from_string(artifact.html())
        .with_header(html_header())
        .with_header(no_store_header())
        .boxed()
}

/// The preview is one self-contained document; pages are addressed by fragment.
fn is_document_path(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let Ok(decoded) = urlencoding::decode(path) else {
        return false;
    };
    matches!(decoded.trim_start_matches('/'), "" | "index.html")
}

fn html_header() -> Header {
    Header::from_bytes("Content-Type", "text/html; charset=utf-8").expect("valid header")
}

fn no_store_header() -> Header {
    Header::from_bytes("Cache-Control", "no-store").expect("valid header")
}

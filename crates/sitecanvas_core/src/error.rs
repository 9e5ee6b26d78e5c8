use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("a theme needs at least one page; the last page cannot be deleted")]
    LastPage,
    #[error("unknown page: {0}")]
    UnknownPage(String),
    #[error("editor session has been destroyed")]
    SessionDestroyed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to fetch theme index {url}: {source}")]
    Index {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid theme base url {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("the editor did not become available after {attempts} attempts; reload the page to try again")]
    EditorUnavailable { attempts: usize },
}

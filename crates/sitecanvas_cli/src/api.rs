//! Client for the remote theme API.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sitecanvas_core::config::ApiConfig;
use sitecanvas_core::error::FetchError;
use sitecanvas_core::installed::ResourceFetcher;
use sitecanvas_core::model::StoredThemeRecord;

/// Save failures, each with a message the user can act on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("saving timed out; check your connection and try again")]
    Timeout,
    #[error("the theme is too large to save; remove large inline images or styles and try again")]
    PayloadTooLarge,
    #[error("the server could not save the theme (status {0}); try again later")]
    Server(u16),
    #[error("saving failed: {0}")]
    Other(String),
}

/// Body of a create or update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeDraft {
    pub name: String,
    pub html: String,
    pub css: String,
    pub thumbnail: String,
}

/// Remote operations the load and save workflows depend on.
pub trait ThemeBackend: ResourceFetcher {
    /// `Ok(None)` when the server reports the theme as missing (404 or 400).
    fn get_custom_theme(&self, id: &str) -> Result<Option<StoredThemeRecord>, FetchError>;
    fn create_theme(&self, draft: &ThemeDraft) -> Result<String, SaveError>;
    /// Falls back to creating a new theme when `id` no longer exists.
    fn update_theme(&self, id: &str, draft: &ThemeDraft) -> Result<String, SaveError>;
    fn installed_base_url(&self, owner_id: &str, theme_id: &str) -> String;
    fn theme_files_base(&self, id: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTheme {
    #[serde(alias = "_id")]
    id: String,
}

pub struct ThemeApi {
    agent: ureq::Agent,
    base_url: String,
    app_origin: String,
    token: Option<String>,
}

impl ThemeApi {
    pub fn new(config: &ApiConfig) -> Self {
        Self::with_timeout(&config.base_url, &config.app_origin, config.token.clone(), config.timeout)
    }

    pub fn with_timeout(
        base_url: &str,
        app_origin: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_origin: app_origin.to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn app_origin(&self) -> &str {
        &self.app_origin
    }

    fn request(&self, method: &str, url: &str, with_credentials: bool) -> ureq::Request {
        let mut request = self.agent.request(method, url);
        if with_credentials {
            if let Some(token) = &self.token {
                request = request.set("Authorization", &format!("Bearer {token}"));
            }
        }
        request
    }

    fn send_draft(&self, method: &str, url: &str, draft: &ThemeDraft) -> Result<String, ureq::Error> {
        let body = serde_json::to_string(draft).unwrap_or_default();
        let response = self
            .request(method, url, true)
            .set("Content-Type", "application/json")
            .send_string(&body)?;
        Ok(response.into_string().unwrap_or_default())
    }
}

fn fetch_error(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(404, _) => FetchError::NotFound(url.to_string()),
        ureq::Error::Status(status, _) => FetchError::Status {
            status,
            url: url.to_string(),
        },
        ureq::Error::Transport(transport) if is_timeout(&transport) => {
            FetchError::Timeout(url.to_string())
        }
        ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
    }
}

fn save_error(err: ureq::Error) -> SaveError {
    match err {
        ureq::Error::Status(413, _) => SaveError::PayloadTooLarge,
        ureq::Error::Status(status, _) if status >= 500 => SaveError::Server(status),
        ureq::Error::Status(status, response) => {
            let detail = response
                .into_string()
                .ok()
                .and_then(|body| serde_json::from_str::<Envelope<serde_json::Value>>(&body).ok())
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| format!("status {status}"));
            SaveError::Other(detail)
        }
        ureq::Error::Transport(transport) if is_timeout(&transport) => SaveError::Timeout,
        ureq::Error::Transport(transport) => SaveError::Other(transport.to_string()),
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    if !matches!(
        transport.kind(),
        ureq::ErrorKind::Io | ureq::ErrorKind::ConnectionFailed
    ) {
        return false;
    }
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return matches!(io.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock);
        }
        source = err.source();
    }
    false
}

fn created_id(body: &str) -> Result<String, SaveError> {
    let envelope: Envelope<CreatedTheme> = serde_json::from_str(body)
        .map_err(|err| SaveError::Other(format!("unexpected response from server: {err}")))?;
    if envelope.success == Some(false) {
        return Err(SaveError::Other(
            envelope
                .message
                .unwrap_or_else(|| "server rejected the theme".to_string()),
        ));
    }
    envelope
        .data
        .map(|created| created.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SaveError::Other("server response carried no theme id".to_string()))
}

impl ResourceFetcher for ThemeApi {
    fn fetch_text(&self, url: &str, with_credentials: bool) -> Result<String, FetchError> {
        let response = self
            .request("GET", url, with_credentials)
            .call()
            .map_err(|err| fetch_error(url, err))?;
        response
            .into_string()
            .map_err(|err| FetchError::Transport(err.to_string()))
    }
}

impl ThemeBackend for ThemeApi {
    fn get_custom_theme(&self, id: &str) -> Result<Option<StoredThemeRecord>, FetchError> {
        let url = format!("{}/custom-themes/{}", self.base_url, urlencoding::encode(id));
        let body = match self.fetch_text(&url, true) {
            Ok(body) => body,
            Err(FetchError::NotFound(_)) | Err(FetchError::Status { status: 400, .. }) => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let envelope: Envelope<StoredThemeRecord> = serde_json::from_str(&body)
            .map_err(|err| FetchError::Transport(format!("malformed theme response: {err}")))?;
        if envelope.success == Some(false) {
            return Ok(None);
        }
        Ok(envelope.data.map(|mut record| {
            if record.id.is_empty() {
                record.id = id.to_string();
            }
            record
        }))
    }

    fn create_theme(&self, draft: &ThemeDraft) -> Result<String, SaveError> {
        let url = format!("{}/custom-themes", self.base_url);
        let body = self.send_draft("POST", &url, draft).map_err(save_error)?;
        created_id(&body)
    }

    fn update_theme(&self, id: &str, draft: &ThemeDraft) -> Result<String, SaveError> {
        let url = format!("{}/custom-themes/{}", self.base_url, urlencoding::encode(id));
        match self.send_draft("PUT", &url, draft) {
            Ok(_) => Ok(id.to_string()),
            Err(ureq::Error::Status(404, _)) => {
                tracing::info!(id, "theme no longer exists on the server; creating a new one");
                self.create_theme(draft)
            }
            Err(err) => Err(save_error(err)),
        }
    }

    fn installed_base_url(&self, owner_id: &str, theme_id: &str) -> String {
        format!(
            "{}/themes/installed/{}/{}/unzippedTheme/",
            self.base_url,
            urlencoding::encode(owner_id),
            urlencoding::encode(theme_id)
        )
    }

    fn theme_files_base(&self, id: &str) -> String {
        format!("{}/custom-themes/{}/files/", self.base_url, urlencoding::encode(id))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn api() -> ThemeApi {
        ThemeApi::with_timeout(
            "https://api.test/api/",
            "https://app.test",
            None,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn builds_theme_urls() {
        let api = api();
        assert_eq!(api.base_url(), "https://api.test/api");
        assert_eq!(
            api.installed_base_url("owner 1", "t9"),
            "https://api.test/api/themes/installed/owner%201/t9/unzippedTheme/"
        );
        assert_eq!(api.theme_files_base("abc"), "https://api.test/api/custom-themes/abc/files/");
    }

    #[test]
    fn reads_created_id_from_envelope() {
        assert_eq!(
            created_id(r#"{"success":true,"data":{"_id":"t-42","name":"x"}}"#),
            Ok("t-42".to_string())
        );
        assert!(matches!(
            created_id(r#"{"success":false,"message":"name taken"}"#),
            Err(SaveError::Other(message)) if message == "name taken"
        ));
        assert!(created_id(r#"{"success":true,"data":{"id":""}}"#).is_err());
    }

    #[test]
    fn silent_server_is_reported_as_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let api = ThemeApi::with_timeout(
            &format!("http://{addr}/api"),
            "http://app.test",
            None,
            Duration::from_millis(200),
        );
        let url = format!("http://{addr}/api/custom-themes/t1");
        assert!(matches!(api.fetch_text(&url, false), Err(FetchError::Timeout(_))));
        assert_eq!(
            api.create_theme(&ThemeDraft {
                name: "x".to_string(),
                html: String::new(),
                css: String::new(),
                thumbnail: String::new(),
            }),
            Err(SaveError::Timeout)
        );
        drop(listener);
    }

    #[test]
    fn refused_connection_is_not_a_timeout() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .expect("addr");
        let api = ThemeApi::with_timeout(
            &format!("http://{addr}/api"),
            "http://app.test",
            None,
            Duration::from_secs(2),
        );
        let url = format!("http://{addr}/api/custom-themes/t1");
        assert!(matches!(api.fetch_text(&url, false), Err(FetchError::Transport(_))));
    }

    #[test]
    fn save_errors_have_tailored_messages() {
        assert!(SaveError::Timeout.to_string().contains("timed out"));
        assert!(SaveError::PayloadTooLarge.to_string().contains("too large"));
        assert!(SaveError::Server(502).to_string().contains("502"));
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "sitecanvas.yaml";
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;
pub const DEFAULT_CSS_TRUNCATE_LIMIT: usize = 50_000;
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RETRY_DELAYS_MS: &[u64] = &[0, 100, 300, 800, 1500];

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub import: ImportConfig,
    pub editor: EditorConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub app_origin: String,
    pub owner_id: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub quota_bytes: Option<usize>,
    pub debounce: Duration,
    pub css_truncate_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportConfig {
    pub extra_cdn_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    pub retry_delays: Vec<Duration>,
    pub script_timeout: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:3000/api".to_string(),
                app_origin: "http://localhost:3000".to_string(),
                owner_id: None,
                token: None,
                timeout: Duration::from_secs(30),
            },
            storage: StorageConfig {
                path: PathBuf::from(".sitecanvas/storage.sqlite"),
                quota_bytes: Some(5 * 1024 * 1024),
                debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
                css_truncate_limit: DEFAULT_CSS_TRUNCATE_LIMIT,
            },
            import: ImportConfig::default(),
            editor: EditorConfig {
                retry_delays: DEFAULT_RETRY_DELAYS_MS
                    .iter()
                    .map(|ms| Duration::from_millis(*ms))
                    .collect(),
                script_timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
            },
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BuilderConfigRaw {
    api: Option<ApiConfigRaw>,
    storage: Option<StorageConfigRaw>,
    import: Option<ImportConfigRaw>,
    editor: Option<EditorConfigRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiConfigRaw {
    base_url: Option<String>,
    app_origin: Option<String>,
    owner_id: Option<String>,
    token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageConfigRaw {
    path: Option<PathBuf>,
    quota_bytes: Option<usize>,
    debounce_ms: Option<u64>,
    css_truncate_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportConfigRaw {
    extra_cdn_hosts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EditorConfigRaw {
    retry_delays_ms: Option<Vec<u64>>,
    script_timeout_secs: Option<u64>,
}

/// Loads `sitecanvas.yaml`. A missing file yields the defaults.
pub fn load_builder_config(path: &Path) -> Result<BuilderConfig> {
    if !path.exists() {
        return Ok(BuilderConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_builder_config(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_builder_config(contents: &str) -> Result<BuilderConfig> {
    let raw: BuilderConfigRaw = if contents.trim().is_empty() {
        BuilderConfigRaw::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    let mut config = BuilderConfig::default();

    if let Some(api) = raw.api {
        if let Some(base_url) = non_empty(api.base_url) {
            config.api.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(app_origin) = non_empty(api.app_origin) {
            config.api.app_origin = app_origin.trim_end_matches('/').to_string();
        }
        config.api.owner_id = non_empty(api.owner_id);
        config.api.token = non_empty(api.token);
        if let Some(secs) = api.timeout_secs {
            if secs == 0 {
                bail!("api.timeout_secs must be greater than zero");
            }
            config.api.timeout = Duration::from_secs(secs);
        }
    }

    if let Some(storage) = raw.storage {
        if let Some(path) = storage.path {
            config.storage.path = path;
        }
        if storage.quota_bytes.is_some() {
            config.storage.quota_bytes = storage.quota_bytes.filter(|bytes| *bytes > 0);
        }
        if let Some(ms) = storage.debounce_ms {
            config.storage.debounce = Duration::from_millis(ms);
        }
        if let Some(limit) = storage.css_truncate_limit {
            config.storage.css_truncate_limit = limit;
        }
    }

    if let Some(import) = raw.import {
        config.import.extra_cdn_hosts = import
            .extra_cdn_hosts
            .unwrap_or_default()
            .into_iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
    }

    if let Some(editor) = raw.editor {
        if let Some(delays) = editor.retry_delays_ms {
            if delays.is_empty() {
                bail!("editor.retry_delays_ms needs at least one delay");
            }
            config.editor.retry_delays = delays.into_iter().map(Duration::from_millis).collect();
        }
        if let Some(secs) = editor.script_timeout_secs {
            config.editor.script_timeout = Duration::from_secs(secs);
        }
    }

    Ok(config)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let config = load_builder_config(&temp.path().join(DEFAULT_CONFIG_FILE)).expect("load");
        assert_eq!(config, BuilderConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let config = parse_builder_config(
            "\
api:
  base_url: https://api.shop.test/v1/
  owner_id: owner-7
storage:
  debounce_ms: 50
  quota_bytes: 2048
import:
  extra_cdn_hosts: [\" Fonts.Example.com \"]
editor:
  retry_delays_ms: [10, 20]
",
        )
        .expect("parse");
        assert_eq!(config.api.base_url, "https://api.shop.test/v1");
        assert_eq!(config.api.owner_id.as_deref(), Some("owner-7"));
        assert_eq!(config.storage.debounce, Duration::from_millis(50));
        assert_eq!(config.storage.quota_bytes, Some(2048));
        assert_eq!(config.import.extra_cdn_hosts, vec!["fonts.example.com"]);
        assert_eq!(config.editor.retry_delays.len(), 2);
    }

    #[test]
    fn rejects_unknown_keys_and_empty_delays() {
        assert!(parse_builder_config("bogus: 1\n").is_err());
        assert!(parse_builder_config("editor:\n  retry_delays_ms: []\n").is_err());
    }
}

//! Load and save flows with their fallbacks.
//!
//! Loading tries the custom theme, then the installed bundle, then starts a
//! new single-page theme, and finally lets a newer local snapshot win. Saving
//! never touches the page collection, so a failed save can be retried.

use sitecanvas_core::bridge::ScriptContext;
use sitecanvas_core::config::BuilderConfig;
use sitecanvas_core::export::export_collection;
use sitecanvas_core::installed::{ImportOptions, InstalledSource, import_installed_theme};
use sitecanvas_core::model::{PageCollection, ThemeIdentity};
use sitecanvas_core::saved::pages_from_stored_html;
use sitecanvas_store::notes::clear_theme_data;
use sitecanvas_store::{KeyValueStore, PersistOptions, ThemePersistence};

use crate::api::{SaveError, ThemeBackend, ThemeDraft};

pub const UNTITLED_THEME: &str = "Untitled theme";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadRequest {
    pub theme_id: Option<String>,
    pub installed: Option<(String, String)>,
    pub cache_bust: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub import: ImportOptions,
    pub persist: PersistOptions,
}

impl From<&BuilderConfig> for LoadOptions {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            import: ImportOptions {
                api_origin: Some(config.api.base_url.clone()),
                app_origin: Some(config.api.app_origin.clone()),
                extra_cdn_hosts: config.import.extra_cdn_hosts.clone(),
            },
            persist: PersistOptions::from(&config.storage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    Custom,
    Installed,
    New,
}

pub struct LoadedTheme<S: KeyValueStore> {
    pub identity: Option<ThemeIdentity>,
    pub name: String,
    pub collection: PageCollection,
    pub context: ScriptContext,
    pub origin: LoadOrigin,
    pub skipped_paths: Vec<String>,
    /// The requested id was malformed and its stale local data was cleared.
    pub rejected_id: Option<String>,
    pub persistence: ThemePersistence<S>,
}

impl<S: KeyValueStore> LoadedTheme<S> {
    pub fn restored_from_local(&self) -> bool {
        self.persistence.restored_from_local()
    }
}

struct RemoteTheme {
    identity: Option<ThemeIdentity>,
    name: String,
    collection: PageCollection,
    context: ScriptContext,
    origin: LoadOrigin,
    skipped_paths: Vec<String>,
}

pub fn load_theme<B, S>(
    backend: &B,
    request: &LoadRequest,
    mut store: S,
    options: &LoadOptions,
) -> LoadedTheme<S>
where
    B: ThemeBackend + ?Sized,
    S: KeyValueStore,
{
    let mut rejected_id = None;
    let custom = match request.theme_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match ThemeIdentity::custom(raw) {
            Some(identity) => Some(identity),
            None => {
                tracing::warn!(id = raw, "malformed theme id; ignoring it and clearing its local data");
                if let Err(err) = clear_theme_data(&mut store, &format!("custom-{raw}")) {
                    tracing::warn!(error = %err, "could not clear stale local data");
                }
                rejected_id = Some(raw.to_string());
                None
            }
        },
        _ => None,
    };

    let remote = fetch_remote(backend, request, custom, options);
    let mut persistence = ThemePersistence::new(store, remote.identity.as_ref(), options.persist.clone());
    let collection = match persistence.mount() {
        Some(local) => {
            tracing::info!(pages = local.len(), "using newer local snapshot");
            local
        }
        None => remote.collection,
    };

    LoadedTheme {
        identity: remote.identity,
        name: remote.name,
        collection,
        context: remote.context,
        origin: remote.origin,
        skipped_paths: remote.skipped_paths,
        rejected_id,
        persistence,
    }
}

fn fetch_remote<B>(
    backend: &B,
    request: &LoadRequest,
    custom: Option<ThemeIdentity>,
    options: &LoadOptions,
) -> RemoteTheme
where
    B: ThemeBackend + ?Sized,
{
    if let Some(ThemeIdentity::Custom { id }) = &custom {
        match backend.get_custom_theme(id) {
            Ok(Some(record)) => {
                let name = if record.name.trim().is_empty() {
                    UNTITLED_THEME.to_string()
                } else {
                    record.name.clone()
                };
                return RemoteTheme {
                    collection: pages_from_stored_html(&record.html, &record.css),
                    context: ScriptContext::Custom {
                        files_base: backend.theme_files_base(id),
                    },
                    identity: custom.clone(),
                    name,
                    origin: LoadOrigin::Custom,
                    skipped_paths: Vec::new(),
                };
            }
            Ok(None) => tracing::info!(id = %id, "custom theme not found"),
            Err(err) => tracing::warn!(id = %id, error = %err, "custom theme fetch failed"),
        }
    }

    if let Some((owner_id, theme_id)) = &request.installed {
        if let Some(remote) = fetch_installed(backend, owner_id, theme_id, request, options) {
            return remote;
        }
    }

    RemoteTheme {
        identity: custom,
        name: UNTITLED_THEME.to_string(),
        collection: PageCollection::default(),
        context: ScriptContext::None,
        origin: LoadOrigin::New,
        skipped_paths: Vec::new(),
    }
}

fn fetch_installed<B>(
    backend: &B,
    owner_id: &str,
    theme_id: &str,
    request: &LoadRequest,
    options: &LoadOptions,
) -> Option<RemoteTheme>
where
    B: ThemeBackend + ?Sized,
{
    let Some(identity) = ThemeIdentity::installed(owner_id, theme_id) else {
        tracing::warn!(owner_id, theme_id, "malformed installed theme id");
        return None;
    };
    let base = backend.installed_base_url(owner_id, theme_id);
    let mut source = match InstalledSource::new(&base) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(error = %err, "cannot import installed theme");
            return None;
        }
    };
    if let Some(token) = &request.cache_bust {
        source = source.with_cache_bust(token.clone());
    }
    match import_installed_theme(backend, &source, &options.import) {
        Ok(import) => Some(RemoteTheme {
            identity: Some(identity),
            name: theme_id.to_string(),
            collection: import.collection,
            context: ScriptContext::Installed {
                base: source.base().to_string(),
            },
            origin: LoadOrigin::Installed,
            skipped_paths: import.skipped_paths,
        }),
        Err(err) => {
            tracing::warn!(error = %err, "installed theme import failed");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTheme {
    pub id: String,
    /// The server assigned a new id rather than updating in place.
    pub created: bool,
}

/// Exports and uploads the collection. Errors reach the caller untouched.
pub fn save_theme<B>(
    backend: &B,
    identity: Option<&ThemeIdentity>,
    name: &str,
    collection: &PageCollection,
) -> Result<SavedTheme, SaveError>
where
    B: ThemeBackend + ?Sized,
{
    let (html, css) = export_collection(collection, name)
        .map_err(|err| SaveError::Other(format!("export failed: {err:#}")))?;
    let draft = ThemeDraft {
        name: name.to_string(),
        html,
        css,
        thumbnail: String::new(),
    };
    match identity {
        Some(ThemeIdentity::Custom { id }) => {
            let saved_id = backend.update_theme(id, &draft)?;
            Ok(SavedTheme {
                created: saved_id != *id,
                id: saved_id,
            })
        }
        _ => {
            let id = backend.create_theme(&draft)?;
            Ok(SavedTheme { id, created: true })
        }
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use sitecanvas_core::config::{BuilderConfig, DEFAULT_CONFIG_FILE, load_builder_config};

/// An explicit `--config` must exist; the default `sitecanvas.yaml` is optional.
/// A relative storage path is taken relative to the config file's directory.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<BuilderConfig> {
    let path = match explicit {
        Some(path) => {
            let path = absolute(root, path);
            if !path.exists() {
                bail!("Config file {} does not exist.", path.display());
            }
            path
        }
        None => root.join(DEFAULT_CONFIG_FILE),
    };
    let mut config = load_builder_config(&path)?;
    if config.storage.path.is_relative() {
        let dir = path.parent().unwrap_or(root);
        config.storage.path = dir.join(&config.storage.path);
    }
    Ok(config)
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

//! User settings
//!
//! Settings live in `<config dir>/reqtree/settings.yaml` (override with
//! `REQTREE_SETTINGS`). A missing or unreadable file yields the defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ReqError, Result};
use crate::render::Theme;

/// Environment variable naming the database file
pub const DB_ENV_VAR: &str = "REQTREE_DB";
/// Environment variable naming the settings file
pub const SETTINGS_ENV_VAR: &str = "REQTREE_SETTINGS";

const APP_DIR: &str = "reqtree";
const DEFAULT_DB_FILE: &str = "requirements.db";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,

    /// Database used when neither `--db` nor `REQTREE_DB` is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_db: Option<PathBuf>,

    /// Version label of the most recent snapshot export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot_version: Option<String>,
}

impl Settings {
    /// Default location of the settings file
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = env::var(SETTINGS_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        let dir = dirs::config_dir()
            .ok_or_else(|| ReqError::Config("cannot determine config directory".to_string()))?;
        Ok(dir.join(APP_DIR).join("settings.yaml"))
    }

    /// Loads settings, falling back to defaults when the file is absent or
    /// does not parse
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_yaml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Writes the settings atomically (temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(self)?;
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Picks the database file: `--db` flag, then `REQTREE_DB`, then the
/// settings default, then `<data dir>/reqtree/requirements.db`
pub fn resolve_db_path(flag: Option<&Path>, settings: &Settings) -> Result<PathBuf> {
    resolve_db_path_from(flag, env::var(DB_ENV_VAR).ok(), settings)
}

fn resolve_db_path_from(
    flag: Option<&Path>,
    env_value: Option<String>,
    settings: &Settings,
) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(value));
    }
    if let Some(path) = &settings.default_db {
        return Ok(path.clone());
    }
    let dir = dirs::data_dir()
        .ok_or_else(|| ReqError::Config("cannot determine data directory".to_string()))?;
    Ok(dir.join(APP_DIR).join(DEFAULT_DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");

        let settings = Settings {
            theme: Theme::Dark,
            default_db: Some(PathBuf::from("/srv/reqs.ReqDB")),
            last_snapshot_version: Some("1.4".to_string()),
        };
        settings.save(&path).unwrap();
        assert!(!dir.path().join("nested").join("settings.yaml.tmp").exists());
        assert_eq!(Settings::load(&path), settings);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("theme: dark"));
    }

    #[test]
    fn test_missing_or_broken_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Settings::load(&dir.path().join("absent.yaml")), Settings::default());

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "theme: [not, a, theme").unwrap();
        assert_eq!(Settings::load(&broken), Settings::default());
    }

    #[test]
    fn test_db_path_precedence() {
        let settings = Settings {
            default_db: Some(PathBuf::from("from-settings.db")),
            ..Default::default()
        };
        let flag = Path::new("from-flag.db");

        assert_eq!(
            resolve_db_path_from(Some(flag), Some("from-env.db".into()), &settings).unwrap(),
            PathBuf::from("from-flag.db")
        );
        assert_eq!(
            resolve_db_path_from(None, Some("from-env.db".into()), &settings).unwrap(),
            PathBuf::from("from-env.db")
        );
        assert_eq!(
            resolve_db_path_from(None, Some("  ".into()), &settings).unwrap(),
            PathBuf::from("from-settings.db")
        );
        if dirs::data_dir().is_some() {
            let fallback = resolve_db_path_from(None, None, &Settings::default()).unwrap();
            assert!(fallback.ends_with("reqtree/requirements.db"));
        }
    }
}

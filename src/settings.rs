use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::mirrors::Mirror;

pub const LEDGER_FILE: &str = "db.json";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub lazer_files_dir: PathBuf,
    #[serde(default = "AppConfig::default_mirror")]
    pub mirror: Mirror,
    #[serde(default)]
    pub osu_executable: Option<PathBuf>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "AppConfig::default_redirect_port")]
    pub redirect_port: u16,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl AppConfig {
    pub fn default_mirror() -> Mirror {
        Mirror::Nerinyan
    }

    pub fn default_redirect_port() -> u16 {
        8080
    }

    pub fn session(&self) -> Session {
        Session {
            access_token: self.access_token.clone().filter(|t| !t.is_empty()),
            osu_executable: self.osu_executable.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|u| u.download_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("downloads"));
        Self {
            download_dir,
            lazer_files_dir: default_lazer_files_dir(),
            mirror: Self::default_mirror(),
            osu_executable: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_port: Self::default_redirect_port(),
            access_token: None,
        }
    }
}

/// Per-run state handed to the components that talk to osu! or the game.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub osu_executable: Option<PathBuf>,
}

impl Session {
    pub fn token(&self) -> Result<&str, ValidationError> {
        self.access_token
            .as_deref()
            .ok_or(ValidationError::MissingToken)
    }
}

fn os_data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// osu!lazer keeps its hashed file store under the platform data directory.
fn default_lazer_files_dir() -> PathBuf {
    os_data_dir().join("osu").join("files")
}

pub fn base_dir() -> PathBuf {
    os_data_dir().join("domd")
}

pub fn logs_dir() -> PathBuf {
    base_dir().join("logs")
}

pub fn ledger_path() -> PathBuf {
    base_dir().join(LEDGER_FILE)
}

pub fn settings_path() -> PathBuf {
    base_dir().join(SETTINGS_FILE)
}

pub fn load_config() -> AppConfig {
    load_config_from(&settings_path())
}

pub fn load_config_from(path: &Path) -> AppConfig {
    let Ok(text) = fs::read_to_string(path) else {
        return AppConfig::default();
    };
    match serde_json::from_str(&text) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!("{} is not valid, using defaults: {err}", path.display());
            AppConfig::default()
        }
    }
}

pub fn save_config(cfg: &AppConfig) -> Result<()> {
    save_config_to(cfg, &settings_path())
}

pub fn save_config_to(cfg: &AppConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("creating directory {}", path.display()))?;
    }
    Ok(())
}

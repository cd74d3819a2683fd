use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};

pub const APP_DIR: &str = "yt-music-downloader";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Private scratch space the engine downloads into
    pub working_dir: PathBuf,
    pub database_path: PathBuf,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit yt-dlp path; otherwise common locations and PATH are tried
    pub binary: Option<PathBuf>,
    pub proxy: Option<String>,
    pub cookies_path: Option<PathBuf>,
    /// Browser name passed to `--cookies-from-browser`
    pub cookies_from_browser: Option<String>,
    pub search_limit: usize,
    pub audio_format: String,
    pub audio_quality: String,
    pub video_container: String,
    pub max_video_height: u32,
    /// Applies to search/resolve only. `None` waits indefinitely.
    pub query_timeout_secs: Option<u64>,
    pub update_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageRegimeSetting {
    Auto,
    Legacy,
    Scoped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub regime: StorageRegimeSetting,
    pub music_dir: PathBuf,
    pub video_dir: PathBuf,
    /// Sub-folder created inside each collection
    pub collection_folder: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let cache = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        let data = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            working_dir: cache.join(APP_DIR).join("work"),
            database_path: data.join(APP_DIR).join("history.sqlite3"),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: None,
            proxy: None,
            cookies_path: None,
            cookies_from_browser: None,
            search_limit: 10,
            audio_format: "mp3".to_string(),
            audio_quality: "0".to_string(),
            video_container: "mp4".to_string(),
            max_video_height: 1080,
            query_timeout_secs: None,
            update_check: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            regime: StorageRegimeSetting::Auto,
            music_dir: dirs::audio_dir().unwrap_or_else(|| home.join("Music")),
            video_dir: dirs::video_dir().unwrap_or_else(|| home.join("Videos")),
            collection_folder: "YTMusicDownloader".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (if present), then `YTMD_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_config_path(),
        };

        let mut builder = Config::builder();
        if let Some(file_path) = &file_path {
            // An explicitly given file must exist
            builder = builder.add_source(
                File::from(file_path.as_path())
                    .format(FileFormat::Toml)
                    .required(path.is_some()),
            );
        }
        builder = builder.add_source(
            Environment::with_prefix("YTMD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.engine.search_limit == 0 {
            return Err(AppError::InvalidConfig(
                "engine.search_limit must be at least 1".to_string(),
            ));
        }
        if self.engine.max_video_height == 0 {
            return Err(AppError::InvalidConfig(
                "engine.max_video_height must be positive".to_string(),
            ));
        }
        if self.storage.collection_folder.contains(['/', '\\']) {
            return Err(AppError::InvalidConfig(
                "storage.collection_folder must be a single folder name".to_string(),
            ));
        }
        Ok(())
    }
}

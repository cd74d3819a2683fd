use thiserror::Error;

use crate::downloader::DownloadError;
use crate::storage::StorageError;

/// Failures as seen at the orchestration boundary
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Engine setup failed: {0}")]
    Init(#[source] DownloadError),

    #[error("Lookup failed: {0}")]
    Resolve(#[source] DownloadError),

    #[error("Download failed: {0}")]
    Download(#[source] DownloadError),

    #[error("Could not locate downloaded file")]
    FileNotLocated,

    #[error("Could not save to library: {0}")]
    Relocation(#[from] StorageError),

    #[error("History error: {0}")]
    History(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl AppError {
    /// Status-line text with the diagnosis hint appended when there is one
    pub fn user_message(&self) -> String {
        let engine_error = match self {
            Self::Init(e) | Self::Resolve(e) | Self::Download(e) => Some(e),
            _ => None,
        };
        let hint = engine_error
            .and_then(|e| e.reason())
            .and_then(|r| r.hint());

        match hint {
            Some(hint) => format!("{} {}", self, hint),
            None => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

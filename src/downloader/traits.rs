// Engine trait definition

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::DownloadError;
use super::models::{
    DownloadProgress, EngineInfo, EngineOutput, EngineRequest, SearchResult, VideoDetail,
};

/// Extraction/download engine seam
#[async_trait]
pub trait Engine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Locate the engine and confirm it runs
    async fn init(&self) -> Result<EngineInfo, DownloadError>;

    /// Multi-result search, at most `limit` entries
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, DownloadError>;

    /// Resolve one URL or id to its full format list
    async fn resolve(&self, target: &str) -> Result<VideoDetail, DownloadError>;

    /// Download into `request.output_dir`, reporting progress as it happens
    async fn download(
        &self,
        request: &EngineRequest,
        progress: &ProgressEmitter,
    ) -> Result<EngineOutput, DownloadError>;

    /// Self-update; returns the engine's own summary line
    async fn update(&self) -> Result<String, DownloadError>;
}

/// Progress callback handed to the engine for one download
#[derive(Clone)]
pub struct ProgressEmitter {
    callback: Arc<dyn Fn(DownloadProgress) + Send + Sync>,
}

impl ProgressEmitter {
    pub fn new(callback: impl Fn(DownloadProgress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, progress: DownloadProgress) {
        (self.callback)(progress);
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter").finish_non_exhaustive()
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use yt_music_downloader_lib::config::{AppConfig, StorageRegimeSetting};
use yt_music_downloader_lib::downloader::utils::format_duration;
use yt_music_downloader_lib::downloader::{
    DownloadError, DownloadProgress, Engine, EngineInfo, EngineOutput, EngineRequest,
    ProgressEmitter, SearchResult, VideoDetail, VideoFormat,
};
use yt_music_downloader_lib::history::HistoryStore;
use yt_music_downloader_lib::state::StateHolder;
use yt_music_downloader_lib::storage::{self, PublicStorageWriter};
use yt_music_downloader_lib::Orchestrator;

/// Scripted engine: writes a small file per download and reports it.
#[derive(Default)]
pub struct FakeEngine {
    pub fail_init: bool,
    pub fail_search: bool,
    pub fail_download: bool,
    /// Leave `reported_path` empty to force the newest-file fallback
    pub silent_path: bool,
    /// Fixed file stem for every download instead of `Track {n}`
    pub file_stem: Option<String>,
    pub search_results: usize,
    pub search_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
    pub downloads: AtomicUsize,
    pub requests: Mutex<Vec<EngineRequest>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            search_results: 15,
            ..Default::default()
        }
    }

    pub fn detail(target: &str) -> VideoDetail {
        VideoDetail {
            id: "dQw4w9WgXcQ".to_string(),
            title: format!("Resolved {}", target.len()),
            thumbnail_url: None,
            duration: format_duration(213.0),
            uploader: "Channel".to_string(),
            formats: vec![
                VideoFormat {
                    format_id: "251".to_string(),
                    ext: "webm".to_string(),
                    resolution: Some("audio only".to_string()),
                    file_size: Some(3_500_000),
                    acodec: Some("opus".to_string()),
                    vcodec: Some("none".to_string()),
                    note: Some("medium".to_string()),
                },
                VideoFormat {
                    format_id: "137".to_string(),
                    ext: "mp4".to_string(),
                    resolution: Some("1920x1080".to_string()),
                    file_size: Some(80_000_000),
                    acodec: Some("none".to_string()),
                    vcodec: Some("avc1.640028".to_string()),
                    note: Some("1080p".to_string()),
                },
            ],
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn init(&self) -> Result<EngineInfo, DownloadError> {
        if self.fail_init {
            return Err(DownloadError::ToolNotFound("yt-dlp".to_string()));
        }
        Ok(EngineInfo {
            path: "/usr/bin/fake".to_string(),
            version: "2024.10.22".to_string(),
        })
    }

    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SearchResult>, DownloadError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(DownloadError::from_engine_output(
                "ERROR: Unable to download API page: HTTP Error 429: Too Many Requests",
            ));
        }
        // ignores the limit on purpose
        Ok((0..self.search_results)
            .map(|i| SearchResult {
                video_id: format!("id{:09}", i),
                title: format!("{} #{}", query, i + 1),
                thumbnail_url: None,
                duration: format_duration((i * 61 + 5) as f64),
                channel: "Lofi Girl".to_string(),
            })
            .collect())
    }

    async fn resolve(&self, target: &str) -> Result<VideoDetail, DownloadError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if target.contains("missing") {
            return Err(DownloadError::from_engine_output(
                "ERROR: [youtube] missing: Video unavailable",
            ));
        }
        Ok(Self::detail(target))
    }

    async fn download(
        &self,
        request: &EngineRequest,
        progress: &ProgressEmitter,
    ) -> Result<EngineOutput, DownloadError> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.downloads.fetch_add(1, Ordering::SeqCst);

        for percent in [0.0, 25.0, 50.0, 75.0, 100.0] {
            progress.emit(DownloadProgress {
                percent,
                eta_seconds: Some(((100.0 - percent) / 10.0) as u64),
                line: format!("[download] {:>5.1}% of {}", percent, request.target),
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        if self.fail_download {
            return Err(DownloadError::from_engine_output(
                "ERROR: unable to download video data: HTTP Error 403: Forbidden",
            ));
        }

        let ext = if request.extract_audio {
            request.audio_format.clone().unwrap_or_else(|| "mp3".to_string())
        } else {
            request.merge_container.clone().unwrap_or_else(|| "mp4".to_string())
        };
        let stem = self
            .file_stem
            .clone()
            .unwrap_or_else(|| format!("Track {}", n));
        let path = request.output_dir.join(format!("{}.{}", stem, ext));
        tokio::fs::write(&path, format!("media bytes {}", n))
            .await
            .map_err(|e| DownloadError::ExecutionError(e.to_string()))?;

        Ok(EngineOutput {
            reported_path: if self.silent_path { None } else { Some(path) },
        })
    }

    async fn update(&self) -> Result<String, DownloadError> {
        Ok("Updated yt-dlp to 2024.10.22".to_string())
    }
}

pub struct Harness {
    pub root: TempDir,
    pub config: AppConfig,
    pub engine: Arc<FakeEngine>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn music_dir(&self) -> PathBuf {
        self.config
            .storage
            .music_dir
            .join(&self.config.storage.collection_folder)
    }

    pub fn video_dir(&self) -> PathBuf {
        self.config
            .storage
            .video_dir
            .join(&self.config.storage.collection_folder)
    }
}

pub fn test_config(root: &Path, regime: StorageRegimeSetting) -> AppConfig {
    let mut config = AppConfig::default();
    config.working_dir = root.join("work");
    config.database_path = root.join("history.sqlite3");
    config.engine.update_check = false;
    config.storage.regime = regime;
    config.storage.music_dir = root.join("Music");
    config.storage.video_dir = root.join("Videos");
    std::fs::create_dir_all(&config.working_dir).unwrap();
    config
}

/// Must be called from inside a tokio runtime.
pub fn harness(engine: FakeEngine, regime: StorageRegimeSetting) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path(), regime);
    let storage = storage::select_writer(&config.storage, &config.working_dir);
    harness_with_storage(root, config, engine, storage)
}

pub fn harness_with_storage(
    root: TempDir,
    config: AppConfig,
    engine: FakeEngine,
    storage: Arc<dyn PublicStorageWriter>,
) -> Harness {
    let engine = Arc::new(engine);
    let history = Arc::new(HistoryStore::open(&config.database_path).unwrap());
    let orchestrator = Orchestrator::new(
        engine.clone(),
        storage,
        history,
        StateHolder::spawn(),
        config.clone(),
    );
    Harness {
        root,
        config,
        engine,
        orchestrator,
    }
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

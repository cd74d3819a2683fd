// Turns user intents into engine calls and drives the download lifecycle:
// engine -> locate file -> public storage -> history.
//
// Every state change goes through the state holder's queue; nothing here
// touches UiState directly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::downloader::format_selector::build_choices;
use crate::downloader::tools::spawn_background_update;
use crate::downloader::utils::{is_media_url, newest_file};
use crate::downloader::diagnostics::BlockingReason;
use crate::downloader::{
    DownloadError, Engine, EngineInfo, EngineRequest, FormatChoice, FormatOption, MediaKind,
    ProgressEmitter, SearchResult, VideoDetail,
};
use crate::errors::{AppError, Result};
use crate::history::{DownloadItem, HistoryStore};
use crate::state::{DownloadPhase, StateHandle, StateHolder, StateUpdate, TaskId};
use crate::storage::{self, mime_for_path, MediaRef, PublicStorageWriter};
use crate::ytdlp::YtDlpEngine;

pub const STATUS_STARTING: &str = "Starting download...";
pub const STATUS_RELOCATING: &str = "Saving to library...";
pub const STATUS_SAVED: &str = "Saved to library";

/// A resolved item waiting for the user's format choice
#[derive(Debug, Clone)]
pub struct FormatPrompt {
    pub task: TaskId,
    pub target: String,
    pub detail: VideoDetail,
    pub options: Vec<FormatOption>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    storage: Arc<dyn PublicStorageWriter>,
    history: Arc<HistoryStore>,
    state: StateHandle,
    config: AppConfig,
    next_task: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn Engine>,
        storage: Arc<dyn PublicStorageWriter>,
        history: Arc<HistoryStore>,
        state: StateHandle,
        config: AppConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                storage,
                history,
                state,
                config,
                next_task: AtomicU64::new(1),
            }),
        }
    }

    /// Production wiring: yt-dlp, storage regime probe, on-disk history.
    /// Must run inside a tokio runtime.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.working_dir)?;
        let engine: Arc<dyn Engine> = Arc::new(YtDlpEngine::new(config.engine.clone()));
        let storage = storage::select_writer(&config.storage, &config.working_dir);
        let history = Arc::new(HistoryStore::open(&config.database_path)?);
        let state = StateHolder::spawn();
        Ok(Self::new(engine, storage, history, state, config))
    }

    pub fn state(&self) -> &StateHandle {
        &self.inner.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    fn send(&self, update: StateUpdate) {
        self.inner.state.send(update);
    }

    fn next_task_id(&self) -> TaskId {
        self.inner.next_task.fetch_add(1, Ordering::Relaxed)
    }

    /// Confirm the engine runs, then kick off the silent update check.
    pub async fn initialize(&self) -> Result<EngineInfo> {
        match self.inner.engine.init().await {
            Ok(info) => {
                self.send(StateUpdate::InitFinished { error: None });
                if self.inner.config.engine.update_check {
                    spawn_background_update(
                        self.inner.engine.clone(),
                        info.version.clone(),
                        self.inner.config.engine.proxy.clone(),
                    );
                }
                Ok(info)
            }
            Err(e) => {
                log::error!("[orchestrator] Engine init failed: {}", e);
                self.send(StateUpdate::InitFinished {
                    error: Some(format!("INIT FAILED: {}", e)),
                });
                Err(AppError::Init(e))
            }
        }
    }

    /// URL → one resolved result; anything else → engine search.
    /// Blank queries are ignored.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.send(StateUpdate::OperationStarted {
            label: "Searching...".to_string(),
        });
        self.send(StateUpdate::SearchStarted);

        let limit = self.inner.config.engine.search_limit;
        let outcome = if is_media_url(query) {
            log::info!("[orchestrator] '{}' looks like a URL, resolving directly", query);
            self.inner
                .engine
                .resolve(query)
                .await
                .map(|detail| vec![detail.to_search_result()])
        } else {
            self.inner.engine.search(query, limit).await.map(|mut results| {
                results.truncate(limit);
                results
            })
        };

        match outcome {
            Ok(results) => {
                self.send(StateUpdate::SearchResults(results.clone()));
                self.send(StateUpdate::OperationFinished { outcome: None });
                Ok(results)
            }
            Err(e) => {
                let err = AppError::Resolve(e);
                let message = format!("Error: {}", err.user_message());
                log::warn!("[orchestrator] Search for '{}' failed: {}", query, err);
                self.send(StateUpdate::Status(message.clone()));
                self.send(StateUpdate::OperationFinished {
                    outcome: Some(message),
                });
                Err(err)
            }
        }
    }

    /// Resolve one item and raise the format-selection prompt.
    pub async fn fetch_info(&self, target: &str) -> Result<FormatPrompt> {
        let target = target.trim().to_string();
        let task = self.next_task_id();
        self.send(StateUpdate::TaskCreated {
            id: task,
            target: target.clone(),
        });
        self.send(StateUpdate::TaskPhase {
            id: task,
            phase: DownloadPhase::Resolving,
            status: None,
        });
        self.send(StateUpdate::OperationStarted {
            label: "Fetching info...".to_string(),
        });

        match self.inner.engine.resolve(&target).await {
            Ok(detail) => {
                self.send(StateUpdate::TaskTitle {
                    id: task,
                    title: detail.title.clone(),
                });
                self.send(StateUpdate::TaskPhase {
                    id: task,
                    phase: DownloadPhase::AwaitingFormatChoice,
                    status: None,
                });
                self.send(StateUpdate::FormatPrompt(Some(detail.clone())));
                self.send(StateUpdate::OperationFinished { outcome: None });

                let options = build_choices(&detail, self.inner.config.engine.max_video_height);
                Ok(FormatPrompt {
                    task,
                    target,
                    detail,
                    options,
                })
            }
            Err(e) => {
                let err = AppError::Resolve(e);
                let message = format!("Error: {}", err.user_message());
                log::warn!("[orchestrator] Resolving {} failed: {}", target, err);
                self.send(StateUpdate::TaskPhase {
                    id: task,
                    phase: DownloadPhase::Failed,
                    status: Some(message.clone()),
                });
                self.send(StateUpdate::OperationFinished {
                    outcome: Some(message),
                });
                Err(err)
            }
        }
    }

    /// Download with a curated alias or a literal id, no prompt.
    pub async fn download(&self, target: &str, choice: FormatChoice) -> Result<DownloadItem> {
        let target = target.trim().to_string();
        let task = self.next_task_id();
        self.send(StateUpdate::TaskCreated {
            id: task,
            target: target.clone(),
        });
        self.run_download(task, &target, None, choice).await
    }

    /// Download a search result, keeping its title for the library entry.
    pub async fn download_result(
        &self,
        result: &SearchResult,
        choice: FormatChoice,
    ) -> Result<DownloadItem> {
        let task = self.next_task_id();
        self.send(StateUpdate::TaskCreated {
            id: task,
            target: result.video_id.clone(),
        });
        self.send(StateUpdate::TaskTitle {
            id: task,
            title: result.title.clone(),
        });
        self.run_download(task, &result.video_id, Some(result.title.clone()), choice)
            .await
    }

    /// Continue a task that is waiting on its format prompt.
    pub async fn download_prompted(
        &self,
        prompt: &FormatPrompt,
        choice: FormatChoice,
    ) -> Result<DownloadItem> {
        self.send(StateUpdate::FormatPrompt(None));
        self.run_download(
            prompt.task,
            &prompt.target,
            Some(prompt.detail.title.clone()),
            choice,
        )
        .await
    }

    /// Download by a user-typed format: a curated alias goes straight to the
    /// engine; a format id is looked up on the resolved item first so its
    /// media kind comes from the format itself.
    pub async fn download_format(&self, target: &str, format: &str) -> Result<DownloadItem> {
        let max_height = self.inner.config.engine.max_video_height;
        if let Some(choice) = FormatChoice::parse_alias(format, max_height) {
            return self.download(target, choice).await;
        }

        let prompt = self.fetch_info(target).await?;
        let format_id = format.trim();
        if let Some(found) = prompt.detail.find_format(format_id) {
            let choice = FormatChoice::for_format(found);
            return self.download_prompted(&prompt, choice).await;
        }

        let err = AppError::Resolve(DownloadError::EngineFailed {
            reason: BlockingReason::FormatUnavailable,
            message: format!("format {} is not offered for {}", format_id, prompt.target),
        });
        log::warn!("[orchestrator] {}", err);
        self.send(StateUpdate::FormatPrompt(None));
        self.send(StateUpdate::TaskPhase {
            id: prompt.task,
            phase: DownloadPhase::Failed,
            status: Some(format!("Failed: {}", err.user_message())),
        });
        Err(err)
    }

    /// Independent background download; no queueing or deduplication.
    pub fn spawn_download(
        &self,
        target: impl Into<String>,
        choice: FormatChoice,
    ) -> tokio::task::JoinHandle<Result<DownloadItem>> {
        let this = self.clone();
        let target = target.into();
        tokio::spawn(async move { this.download(&target, choice).await })
    }

    /// `spawn_download` for a user-typed format.
    pub fn spawn_download_format(
        &self,
        target: impl Into<String>,
        format: impl Into<String>,
    ) -> tokio::task::JoinHandle<Result<DownloadItem>> {
        let this = self.clone();
        let target = target.into();
        let format = format.into();
        tokio::spawn(async move { this.download_format(&target, &format).await })
    }

    async fn run_download(
        &self,
        task: TaskId,
        target: &str,
        title: Option<String>,
        choice: FormatChoice,
    ) -> Result<DownloadItem> {
        let label = title.as_deref().unwrap_or(target);
        self.send(StateUpdate::OperationStarted {
            label: format!("Downloading {}", label),
        });
        self.send(StateUpdate::TaskPhase {
            id: task,
            phase: DownloadPhase::Downloading,
            status: Some(STATUS_STARTING.to_string()),
        });

        let scratch = self.scratch_dir(task);
        let outcome = self.download_into(task, target, title, &choice, &scratch).await;

        match outcome {
            Ok(item) => {
                if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
                    log::warn!(
                        "[orchestrator] Failed to remove scratch dir {}: {}",
                        scratch.display(),
                        e
                    );
                }
                self.send(StateUpdate::TaskPhase {
                    id: task,
                    phase: DownloadPhase::Recorded,
                    status: Some(STATUS_SAVED.to_string()),
                });
                self.send(StateUpdate::OperationFinished { outcome: None });
                Ok(item)
            }
            Err(err) => {
                log::warn!("[orchestrator] Download of {} failed: {}", target, err);
                if scratch.exists() {
                    // Left for inspection; nothing prunes these yet.
                    log::warn!(
                        "[orchestrator] Keeping scratch dir {} after failure",
                        scratch.display()
                    );
                }
                self.send(StateUpdate::TaskPhase {
                    id: task,
                    phase: DownloadPhase::Failed,
                    status: Some(format!("Failed: {}", err.user_message())),
                });
                self.send(StateUpdate::OperationFinished { outcome: None });
                Err(err)
            }
        }
    }

    async fn download_into(
        &self,
        task: TaskId,
        target: &str,
        title: Option<String>,
        choice: &FormatChoice,
        scratch: &Path,
    ) -> Result<DownloadItem> {
        tokio::fs::create_dir_all(scratch).await?;

        let request = self.engine_request(target, choice, scratch);
        let state = self.inner.state.clone();
        let emitter = ProgressEmitter::new(move |progress| {
            state.send(StateUpdate::TaskProgress { id: task, progress });
        });

        let output = self
            .inner
            .engine
            .download(&request, &emitter)
            .await
            .map_err(AppError::Download)?;

        let file = locate_output(output.reported_path, scratch).ok_or(AppError::FileNotLocated)?;
        log::debug!("[orchestrator] Task {} produced {}", task, file.display());

        let title = title.unwrap_or_else(|| {
            file.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| target.to_string())
        });
        self.send(StateUpdate::TaskTitle {
            id: task,
            title: title.clone(),
        });
        self.send(StateUpdate::TaskPhase {
            id: task,
            phase: DownloadPhase::Relocating,
            status: Some(STATUS_RELOCATING.to_string()),
        });

        let kind = choice.media_kind();
        let media = self.relocate(file, title.clone(), kind).await?;
        self.send(StateUpdate::TaskSaved {
            id: task,
            file_path: media.path.clone(),
        });

        let item = self.inner.history.insert(&title, kind.label(), &media.path)?;
        Ok(item)
    }

    /// Storage copy is blocking I/O; keep it off the async workers.
    async fn relocate(&self, file: PathBuf, title: String, kind: MediaKind) -> Result<MediaRef> {
        let storage = self.inner.storage.clone();
        let mime = mime_for_path(&file, kind.fallback_mime());
        let media = tokio::task::spawn_blocking(move || storage.publish(&file, &title, &mime))
            .await
            .map_err(|e| AppError::Task(e.to_string()))??;
        Ok(media)
    }

    fn engine_request(&self, target: &str, choice: &FormatChoice, scratch: &Path) -> EngineRequest {
        let engine = &self.inner.config.engine;
        let mut request = EngineRequest::new(target, choice.selector(), scratch.to_path_buf());
        if choice.extract_audio() {
            request.extract_audio = true;
            request.audio_format = Some(engine.audio_format.clone());
            request.audio_quality = Some(engine.audio_quality.clone());
        } else {
            request.merge_container = Some(engine.video_container.clone());
        }
        request
    }

    fn scratch_dir(&self, task: TaskId) -> PathBuf {
        self.inner
            .config
            .working_dir
            .join(format!("task-{}-{}", task, uuid::Uuid::new_v4().simple()))
    }

    pub async fn update_engine(&self) -> Result<String> {
        self.inner.engine.update().await.map_err(AppError::Download)
    }

    pub fn history(&self) -> Result<Vec<DownloadItem>> {
        self.inner.history.all()
    }

    pub fn delete_history(&self, id: i64) -> Result<bool> {
        self.inner.history.delete(id)
    }

    pub fn clear_history(&self) -> Result<usize> {
        self.inner.history.clear_all()
    }
}

/// Engine-reported path if it exists, else the newest file in the task's
/// own scratch directory.
fn locate_output(reported: Option<PathBuf>, scratch: &Path) -> Option<PathBuf> {
    if let Some(path) = reported {
        if path.is_file() {
            return Some(path);
        }
        log::warn!(
            "[orchestrator] Engine reported {} but it does not exist",
            path.display()
        );
    }
    let fallback = newest_file(scratch);
    if let Some(path) = &fallback {
        log::info!("[orchestrator] Using newest file {}", path.display());
    }
    fallback
}

// UI state holder. Every mutation is a `StateUpdate` pushed onto one queue;
// a single consumer task applies them in arrival order and publishes the
// resulting snapshot. Readers only ever see whole snapshots.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};

use crate::downloader::{DownloadProgress, SearchResult, VideoDetail};

pub type TaskId = u64;

/// Finished tasks kept in `UiState::downloads`; older ones are dropped first.
pub const MAX_FINISHED_TASKS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadPhase {
    Idle,
    Resolving,
    AwaitingFormatChoice,
    Downloading,
    Relocating,
    Recorded,
    Failed,
}

impl DownloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Recorded | Self::Failed)
    }

    pub fn can_transition_to(self, next: DownloadPhase) -> bool {
        use DownloadPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Resolving)
            | (Resolving, AwaitingFormatChoice)
            | (AwaitingFormatChoice, Downloading)
            | (Idle, Downloading)
            | (Downloading, Relocating)
            | (Relocating, Recorded) => true,
            _ => false,
        }
    }
}

/// Progress of one task, isolated from every other task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadTaskView {
    pub id: TaskId,
    pub target: String,
    pub title: Option<String>,
    pub phase: DownloadPhase,
    /// Fraction in [0, 1]
    pub progress: f32,
    pub eta_seconds: Option<u64>,
    pub status: Option<String>,
    pub file_path: Option<PathBuf>,
}

impl DownloadTaskView {
    fn new(id: TaskId, target: String) -> Self {
        Self {
            id,
            target,
            title: None,
            phase: DownloadPhase::Idle,
            progress: 0.0,
            eta_seconds: None,
            status: None,
            file_path: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiState {
    pub is_initializing: bool,
    pub init_error: Option<String>,
    pub is_loading: bool,
    pub current_operation: Option<String>,
    pub search_results: Vec<SearchResult>,
    /// Most recent progress from any download, in [0, 1]
    pub download_progress: f32,
    pub download_status: Option<String>,
    pub format_prompt: Option<VideoDetail>,
    pub downloads: Vec<DownloadTaskView>,
    in_flight: usize,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            is_initializing: true,
            init_error: None,
            is_loading: false,
            current_operation: None,
            search_results: Vec::new(),
            download_progress: 0.0,
            download_status: None,
            format_prompt: None,
            downloads: Vec::new(),
            in_flight: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StateUpdate {
    InitFinished { error: Option<String> },
    OperationStarted { label: String },
    /// `outcome` replaces the current-operation text (an error, or nothing)
    OperationFinished { outcome: Option<String> },
    SearchStarted,
    SearchResults(Vec<SearchResult>),
    FormatPrompt(Option<VideoDetail>),
    Status(String),
    TaskCreated { id: TaskId, target: String },
    TaskTitle { id: TaskId, title: String },
    TaskPhase {
        id: TaskId,
        phase: DownloadPhase,
        status: Option<String>,
    },
    TaskProgress { id: TaskId, progress: DownloadProgress },
    TaskSaved { id: TaskId, file_path: PathBuf },
}

impl UiState {
    pub fn task(&self, id: TaskId) -> Option<&DownloadTaskView> {
        self.downloads.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut DownloadTaskView> {
        let found = self.downloads.iter_mut().find(|t| t.id == id);
        if found.is_none() {
            log::warn!("[state] Update for unknown task {}", id);
        }
        found
    }

    fn prune_finished(&mut self) {
        let finished = self.downloads.iter().filter(|t| t.phase.is_terminal()).count();
        let mut excess = finished.saturating_sub(MAX_FINISHED_TASKS);
        if excess == 0 {
            return;
        }
        self.downloads.retain(|t| {
            if excess > 0 && t.phase.is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::InitFinished { error } => {
                self.is_initializing = false;
                self.init_error = error;
            }
            StateUpdate::OperationStarted { label } => {
                self.in_flight += 1;
                self.is_loading = true;
                self.current_operation = Some(label);
            }
            StateUpdate::OperationFinished { outcome } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.is_loading = self.in_flight > 0;
                self.current_operation = outcome;
            }
            StateUpdate::SearchStarted => self.search_results.clear(),
            StateUpdate::SearchResults(results) => self.search_results = results,
            StateUpdate::FormatPrompt(prompt) => self.format_prompt = prompt,
            StateUpdate::Status(status) => self.download_status = Some(status),
            StateUpdate::TaskCreated { id, target } => {
                self.downloads.push(DownloadTaskView::new(id, target));
            }
            StateUpdate::TaskTitle { id, title } => {
                if let Some(task) = self.task_mut(id) {
                    task.title = Some(title);
                }
            }
            StateUpdate::TaskPhase { id, phase, status } => {
                let Some(task) = self.task_mut(id) else {
                    return;
                };
                if !task.phase.can_transition_to(phase) {
                    log::warn!(
                        "[state] Ignoring task {} transition {:?} -> {:?}",
                        id,
                        task.phase,
                        phase
                    );
                    return;
                }
                task.phase = phase;
                match phase {
                    DownloadPhase::Downloading => {
                        task.progress = 0.0;
                        task.eta_seconds = None;
                    }
                    DownloadPhase::Recorded => task.progress = 1.0,
                    _ => {}
                }
                if let Some(status) = status {
                    task.status = Some(status.clone());
                    self.download_status = Some(status);
                }
                if phase == DownloadPhase::Downloading {
                    self.download_progress = 0.0;
                } else if phase == DownloadPhase::Recorded {
                    self.download_progress = 1.0;
                }
                if phase.is_terminal() {
                    self.prune_finished();
                }
            }
            StateUpdate::TaskProgress { id, progress } => {
                let fraction = (progress.percent / 100.0).clamp(0.0, 1.0);
                let Some(task) = self.task_mut(id) else {
                    return;
                };
                task.progress = fraction;
                task.eta_seconds = progress.eta_seconds;
                if !progress.line.is_empty() {
                    task.status = Some(progress.line.clone());
                    self.download_status = Some(progress.line);
                }
                self.download_progress = fraction;
            }
            StateUpdate::TaskSaved { id, file_path } => {
                if let Some(task) = self.task_mut(id) {
                    task.file_path = Some(file_path);
                }
            }
        }
    }
}

enum Message {
    Update(StateUpdate),
    Flush(oneshot::Sender<UiState>),
}

pub struct StateHolder;

impl StateHolder {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn spawn() -> StateHandle {
        Self::spawn_with(UiState::default())
    }

    pub fn spawn_with(initial: UiState) -> StateHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (snapshot_tx, snapshot_rx) = watch::channel(initial.clone());

        tokio::spawn(async move {
            let mut state = initial;
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Update(update) => {
                        state.apply(update);
                        snapshot_tx.send_replace(state.clone());
                    }
                    Message::Flush(reply) => {
                        let _ = reply.send(state.clone());
                    }
                }
            }
            log::debug!("[state] Update queue closed");
        });

        StateHandle {
            tx,
            snapshots: snapshot_rx,
        }
    }
}

#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<Message>,
    snapshots: watch::Receiver<UiState>,
}

impl StateHandle {
    /// Never blocks; safe to call from progress callbacks.
    pub fn send(&self, update: StateUpdate) {
        if self.tx.send(Message::Update(update)).is_err() {
            log::debug!("[state] Dropped update, consumer gone");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.snapshots.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> UiState {
        self.snapshots.borrow().clone()
    }

    /// State after every update sent before this call has been applied.
    pub async fn flush(&self) -> UiState {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(reply_tx)).is_err() {
            return self.snapshot();
        }
        match reply_rx.await {
            Ok(state) => state,
            Err(_) => self.snapshot(),
        }
    }
}

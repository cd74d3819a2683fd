mod common;

use regex::Regex;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{dir_entries, harness, harness_with_storage, test_config, FakeEngine};
use yt_music_downloader_lib::config::StorageRegimeSetting;
use yt_music_downloader_lib::downloader::{FormatChoice, MediaKind};
use yt_music_downloader_lib::orchestrator::STATUS_SAVED;
use yt_music_downloader_lib::state::DownloadPhase;
use yt_music_downloader_lib::storage::{
    self, MediaRef, PublicStorageWriter, StorageError, StorageRegime,
};
use yt_music_downloader_lib::AppError;

#[tokio::test]
async fn url_query_resolves_single_item() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    let results = h.orchestrator.search(url).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].video_id, "dQw4w9WgXcQ");
    assert_eq!(h.engine.search_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.resolve_calls.load(Ordering::SeqCst), 1);

    let prompt = h.orchestrator.fetch_info(url).await.unwrap();
    assert!(!prompt.detail.formats.is_empty());
    // curated aliases plus one row per format
    assert_eq!(prompt.options.len(), 2 + prompt.detail.formats.len());
}

#[tokio::test]
async fn text_search_is_capped_at_ten() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    let mm_ss = Regex::new(r"^\d{2,}:\d{2}$").unwrap();

    let results = h.orchestrator.search("lofi hip hop").await.unwrap();
    assert!(results.len() <= 10);
    assert_eq!(results.len(), 10);
    for r in &results {
        assert!(!r.title.is_empty());
        assert!(mm_ss.is_match(&r.duration), "bad duration {}", r.duration);
    }

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert_eq!(state.search_results, results);
    assert_eq!(state.current_operation, None);
}

#[tokio::test]
async fn blank_query_is_ignored() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    assert!(h.orchestrator.search("   ").await.unwrap().is_empty());
    assert_eq!(h.engine.search_calls.load(Ordering::SeqCst), 0);

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert!(state.current_operation.is_none());
}

#[tokio::test]
async fn failed_search_clears_loading_with_message() {
    let engine = FakeEngine {
        fail_search: true,
        ..FakeEngine::new()
    };
    let h = harness(engine, StorageRegimeSetting::Scoped);

    let err = h.orchestrator.search("anything").await.unwrap_err();
    assert!(matches!(err, AppError::Resolve(_)));

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    let status = state.download_status.unwrap();
    assert!(status.starts_with("Error: "), "{}", status);
    assert_eq!(state.current_operation.as_deref(), Some(status.as_str()));
}

#[tokio::test]
async fn failed_resolve_marks_task_failed() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    assert!(h.orchestrator.fetch_info("missing").await.is_err());

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert_eq!(state.downloads.len(), 1);
    assert_eq!(state.downloads[0].phase, DownloadPhase::Failed);
    assert!(state.format_prompt.is_none());
}

#[tokio::test]
async fn init_failure_is_reported() {
    let engine = FakeEngine {
        fail_init: true,
        ..FakeEngine::new()
    };
    let h = harness(engine, StorageRegimeSetting::Scoped);
    assert!(matches!(
        h.orchestrator.initialize().await,
        Err(AppError::Init(_))
    ));

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_initializing);
    assert!(state.init_error.unwrap().starts_with("INIT FAILED: "));
}

#[tokio::test]
async fn init_success_clears_flags() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    let info = h.orchestrator.initialize().await.unwrap();
    assert_eq!(info.version, "2024.10.22");

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_initializing);
    assert!(state.init_error.is_none());
}

#[tokio::test]
async fn audio_download_is_recorded() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);

    let item = h
        .orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::BestAudio)
        .await
        .unwrap();

    assert_eq!(item.format, "MP3");
    assert!(item.file_path.starts_with(h.music_dir()));
    assert!(item.file_path.is_file());

    let request = h.engine.requests.lock().unwrap()[0].clone();
    assert!(request.extract_audio);
    assert_eq!(request.selector, "bestaudio/best");
    assert_eq!(request.audio_format.as_deref(), Some("mp3"));

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert_eq!(state.download_status.as_deref(), Some(STATUS_SAVED));
    assert_eq!(state.download_progress, 1.0);
    let task = &state.downloads[0];
    assert_eq!(task.phase, DownloadPhase::Recorded);
    assert_eq!(task.file_path.as_deref(), Some(item.file_path.as_path()));

    // scratch directory is gone after success
    assert!(dir_entries(&h.config.working_dir).is_empty());
    assert_eq!(h.orchestrator.history().unwrap(), vec![item]);
}

#[tokio::test]
async fn prompted_download_walks_every_phase() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    let mut rx = h.orchestrator.state().subscribe();

    let prompt = h.orchestrator.fetch_info("dQw4w9WgXcQ").await.unwrap();
    let state = h.orchestrator.state().flush().await;
    assert_eq!(state.task(prompt.task).unwrap().phase, DownloadPhase::AwaitingFormatChoice);
    assert_eq!(state.format_prompt.as_ref(), Some(&prompt.detail));

    let video_only = prompt.detail.find_format("137").unwrap();
    let choice = FormatChoice::for_format(video_only);
    let item = h.orchestrator.download_prompted(&prompt, choice).await.unwrap();
    assert_eq!(item.format, "MP4");
    assert_eq!(item.title, prompt.detail.title);
    assert!(item.file_path.starts_with(h.video_dir()));

    let request = h.engine.requests.lock().unwrap()[0].clone();
    assert_eq!(request.selector, "137+bestaudio");
    assert!(!request.extract_audio);
    assert_eq!(request.merge_container.as_deref(), Some("mp4"));

    let state = h.orchestrator.state().flush().await;
    assert!(state.format_prompt.is_none());
    assert_eq!(state.downloads.len(), 1);
    assert_eq!(state.downloads[0].phase, DownloadPhase::Recorded);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), state);
}

#[tokio::test]
async fn concurrent_downloads_both_recorded() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);

    let a = h.orchestrator.spawn_download("aaaaaaaaaaa", FormatChoice::BestAudio);
    let b = h.orchestrator.spawn_download("bbbbbbbbbbb", FormatChoice::BestAudio);
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.file_path, b.file_path);
    assert_eq!(h.orchestrator.history().unwrap().len(), 2);

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert_eq!(state.downloads.len(), 2);
    for task in &state.downloads {
        assert_eq!(task.phase, DownloadPhase::Recorded);
        assert_eq!(task.progress, 1.0);
    }
    assert_eq!(dir_entries(&h.music_dir()).len(), 2);
}

async fn same_title_downloads_race(regime: StorageRegimeSetting) {
    let engine = FakeEngine {
        file_stem: Some("Same Song".to_string()),
        ..FakeEngine::new()
    };
    let h = harness(engine, regime);

    let rounds = 10;
    for round in 0..rounds {
        let a = h
            .orchestrator
            .spawn_download(&format!("aaaaaaaaa{:02}", round), FormatChoice::BestAudio);
        let b = h
            .orchestrator
            .spawn_download(&format!("bbbbbbbbb{:02}", round), FormatChoice::BestAudio);
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_ne!(a.file_path, b.file_path);
    }

    let names = dir_entries(&h.music_dir());
    assert_eq!(names.len(), rounds * 2, "{:?}", names);
    assert!(names.iter().any(|n| n == "Same Song.mp3"));
    let history = h.orchestrator.history().unwrap();
    assert_eq!(history.len(), rounds * 2);
    for item in &history {
        assert!(item.file_path.is_file());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_title_downloads_never_overwrite_scoped() {
    same_title_downloads_race(StorageRegimeSetting::Scoped).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_title_downloads_never_overwrite_legacy() {
    same_title_downloads_race(StorageRegimeSetting::Legacy).await;
}

#[tokio::test]
async fn newest_file_fallback_when_path_not_reported() {
    let engine = FakeEngine {
        silent_path: true,
        ..FakeEngine::new()
    };
    let h = harness(engine, StorageRegimeSetting::Scoped);

    let item = h
        .orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::best_video())
        .await
        .unwrap();
    assert_eq!(item.title, "Track 0");
    assert!(item.file_path.starts_with(h.video_dir()));
}

#[tokio::test]
async fn failed_download_records_nothing() {
    let engine = FakeEngine {
        fail_download: true,
        ..FakeEngine::new()
    };
    let h = harness(engine, StorageRegimeSetting::Scoped);

    let err = h
        .orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::BestAudio)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Download(_)));
    assert!(h.orchestrator.history().unwrap().is_empty());

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    let status = state.download_status.unwrap();
    assert!(status.starts_with("Failed: "), "{}", status);
    assert_eq!(state.downloads[0].phase, DownloadPhase::Failed);

    // scratch directory is kept for inspection
    assert_eq!(dir_entries(&h.config.working_dir).len(), 1);
}

/// Accepts nothing; every publish fails.
struct RejectingStorage;

impl PublicStorageWriter for RejectingStorage {
    fn regime(&self) -> StorageRegime {
        StorageRegime::Scoped
    }

    fn publish(&self, source: &Path, _title: &str, _mime: &str) -> Result<MediaRef, StorageError> {
        Err(StorageError::Write {
            path: source.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}

#[tokio::test]
async fn history_written_only_after_relocation() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path(), StorageRegimeSetting::Scoped);
    let h = harness_with_storage(root, config, FakeEngine::new(), Arc::new(RejectingStorage));

    let err = h
        .orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::BestAudio)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Relocation(_)));
    assert!(h.orchestrator.history().unwrap().is_empty());

    let state = h.orchestrator.state().flush().await;
    assert_eq!(state.downloads[0].phase, DownloadPhase::Failed);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn legacy_regime_places_file_directly() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Legacy);

    let item = h
        .orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::BestAudio)
        .await
        .unwrap();

    assert_eq!(item.file_path, h.music_dir().join("Track 0.mp3"));
    assert_eq!(dir_entries(&h.music_dir()), vec!["Track 0.mp3".to_string()]);
    assert_eq!(
        std::fs::read_to_string(&item.file_path).unwrap(),
        "media bytes 0"
    );
}

#[tokio::test]
async fn clearing_history_twice_is_harmless() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    h.orchestrator
        .download("dQw4w9WgXcQ", FormatChoice::BestAudio)
        .await
        .unwrap();

    assert_eq!(h.orchestrator.clear_history().unwrap(), 1);
    assert!(h.orchestrator.history().unwrap().is_empty());
    assert_eq!(h.orchestrator.clear_history().unwrap(), 0);
    assert!(h.orchestrator.history().unwrap().is_empty());
}

#[tokio::test]
async fn literal_audio_format_keeps_audio_label() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);
    let detail = FakeEngine::detail("x");
    let choice = FormatChoice::for_format(detail.find_format("251").unwrap());
    assert_eq!(choice.media_kind(), MediaKind::Audio);

    let item = h.orchestrator.download("x", choice).await.unwrap();
    assert_eq!(item.format, "MP3");
    assert!(item.file_path.starts_with(h.music_dir()));
}

#[tokio::test]
async fn typed_numeric_audio_id_downloads_as_audio() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);

    let item = h.orchestrator.download_format("dQw4w9WgXcQ", "251").await.unwrap();
    assert_eq!(item.format, "MP3");
    assert!(item.file_path.starts_with(h.music_dir()));

    let requests = h.engine.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].selector, "251");
    assert!(requests[0].extract_audio);

    let state = h.orchestrator.state().flush().await;
    assert!(state.format_prompt.is_none());
    assert_eq!(state.downloads[0].phase, DownloadPhase::Recorded);
}

#[tokio::test]
async fn typed_video_only_id_merges_audio() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);

    let item = h.orchestrator.download_format("dQw4w9WgXcQ", "137").await.unwrap();
    assert_eq!(item.format, "MP4");
    assert!(item.file_path.starts_with(h.video_dir()));
    let requests = h.engine.requests.lock().unwrap().clone();
    assert_eq!(requests[0].selector, "137+bestaudio");
    assert!(!requests[0].extract_audio);
}

#[tokio::test]
async fn typed_unknown_id_fails_without_downloading() {
    let h = harness(FakeEngine::new(), StorageRegimeSetting::Scoped);

    let err = h
        .orchestrator
        .download_format("dQw4w9WgXcQ", "999")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("999"), "{}", err);
    assert_eq!(h.engine.downloads.load(Ordering::SeqCst), 0);
    assert!(h.orchestrator.history().unwrap().is_empty());

    let state = h.orchestrator.state().flush().await;
    assert!(!state.is_loading);
    assert!(state.format_prompt.is_none());
    assert_eq!(state.downloads[0].phase, DownloadPhase::Failed);
}

#[tokio::test]
async fn typed_video_alias_uses_configured_height() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path(), StorageRegimeSetting::Scoped);
    config.engine.max_video_height = 720;
    let storage = storage::select_writer(&config.storage, &config.working_dir);
    let h = harness_with_storage(root, config, FakeEngine::new(), storage);

    h.orchestrator.download_format("dQw4w9WgXcQ", "video").await.unwrap();
    let requests = h.engine.requests.lock().unwrap().clone();
    assert_eq!(
        requests[0].selector,
        "bestvideo[height<=720]+bestaudio/best[height<=720]"
    );
    // aliases skip the lookup
    assert_eq!(h.engine.resolve_calls.load(Ordering::SeqCst), 0);
}

// Helper functions for the engine adapter and orchestration

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::errors::DownloadError;

lazy_static! {
    static ref MEDIA_URL_RE: Regex = Regex::new(
        r"(?i)^(?:https?://)?(?:[\w-]+\.)*(?:youtube\.com|youtu\.be|youtube-nocookie\.com)/\S*$"
    )
    .unwrap();
    static ref HTTP_URL_RE: Regex = Regex::new(r"(?i)^https?://[^\s/]+\.[^\s/]+\S*$").unwrap();
}

/// True when the input should be resolved directly instead of searched.
pub fn is_media_url(input: &str) -> bool {
    let trimmed = input.trim();
    MEDIA_URL_RE.is_match(trimmed) || HTTP_URL_RE.is_match(trimmed)
}

/// Seconds to `MM:SS`; minutes keep counting past the hour
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Most recently modified regular file in `dir`.
///
/// Only used when the engine did not report an output path: a leftover or
/// concurrently written file can win here.
pub fn newest_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // yt-dlp scratch artefacts
            if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
                return None;
            }
            Some((meta.modified().ok()?, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Run a command to completion and capture its output.
///
/// With `timeout_secs = None` the call waits for as long as the process runs.
pub async fn run_captured(
    program: &str,
    args: Vec<String>,
    timeout_secs: Option<u64>,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let waited = match timeout_secs {
        Some(secs) => {
            let waited = timeout(Duration::from_secs(secs), child.wait()).await;
            match waited {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(DownloadError::Timeout(secs));
                }
            }
        }
        None => child.wait().await,
    };
    let status = waited.map_err(|e| {
        DownloadError::ExecutionError(format!("Failed to wait for {}: {}", program, e))
    })?;

    let stdout = join_pipe(stdout_task, "stdout").await?;
    let stderr = join_pipe(stderr_task, "stderr").await?;

    Ok(std::process::Output {
        status,
        stdout,
        stderr,
    })
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("{} task failed: {}", name, e)))?
        .map_err(|e| DownloadError::ExecutionError(format!("Failed to read {}: {}", name, e)))
}

pub(crate) fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e))
    }
}

/// `--proxy` arguments for yt-dlp
pub fn proxy_args(proxy: Option<&str>) -> Vec<String> {
    match proxy {
        Some(p) if !p.trim().is_empty() => vec!["--proxy".to_string(), p.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Cookie arguments; an explicit file wins over the browser store.
pub fn cookie_args(cookies_path: Option<&Path>, from_browser: Option<&str>) -> Vec<String> {
    if let Some(path) = cookies_path {
        return vec![
            "--cookies".to_string(),
            path.to_string_lossy().to_string(),
        ];
    }
    match from_browser {
        Some(browser) if !browser.is_empty() => {
            vec!["--cookies-from-browser".to_string(), browser.to_string()]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    #[test]
    fn recognises_media_urls() {
        assert!(is_media_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_media_url("youtu.be/dQw4w9WgXcQ"));
        assert!(is_media_url("https://music.youtube.com/watch?v=abc"));
        assert!(is_media_url("https://vimeo.com/12345"));
        assert!(!is_media_url("lofi hip hop"));
        assert!(!is_media_url("youtube tutorial"));
        assert!(!is_media_url("dQw4w9WgXcQ"));
    }

    #[test]
    fn durations_are_mm_ss() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(65.4), "01:05");
        assert_eq!(format_duration(3725.0), "62:05");
        assert_eq!(format_duration(f64::NAN), "00:00");
    }

    #[test]
    fn newest_file_picks_latest_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp3");
        let new = dir.path().join("new.mp3");
        std::fs::write(&old, b"a").unwrap();
        std::fs::write(&new, b"b").unwrap();
        set_file_mtime(&old, FileTime::from_unix_time(1_000, 0)).unwrap();
        set_file_mtime(&new, FileTime::from_unix_time(2_000, 0)).unwrap();

        // scratch artefacts never win
        let part = dir.path().join("partial.webm.part");
        std::fs::write(&part, b"c").unwrap();
        set_file_mtime(&part, FileTime::from_unix_time(3_000, 0)).unwrap();

        assert_eq!(newest_file(dir.path()), Some(new));
    }

    #[test]
    fn newest_file_empty_or_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(newest_file(dir.path()), None);
        assert_eq!(newest_file(&dir.path().join("missing")), None);
    }

    #[test]
    fn argument_helpers() {
        assert!(proxy_args(None).is_empty());
        assert!(proxy_args(Some("  ")).is_empty());
        assert_eq!(
            proxy_args(Some("socks5://127.0.0.1:1080")),
            vec!["--proxy", "socks5://127.0.0.1:1080"]
        );
        assert_eq!(
            cookie_args(Some(Path::new("/tmp/c.txt")), Some("chrome")),
            vec!["--cookies", "/tmp/c.txt"]
        );
        assert_eq!(
            cookie_args(None, Some("firefox")),
            vec!["--cookies-from-browser", "firefox"]
        );
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let err = run_captured("definitely-not-a-real-binary-ytmd", vec![], Some(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}

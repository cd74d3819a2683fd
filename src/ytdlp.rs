use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::config::EngineConfig;
use crate::downloader::progress::ProgressTracker;
use crate::downloader::utils::{self, format_duration, run_captured, spawn_error};
use crate::downloader::{
    DownloadError, Engine, EngineInfo, EngineOutput, EngineRequest, ProgressEmitter,
    SearchResult, VideoDetail, VideoFormat,
};

/// Prefix of the line yt-dlp prints once the final file is in place
const FILEPATH_MARKER: &str = "[filepath] ";

/// Lines of stderr kept around for error reporting
const STDERR_TAIL: usize = 50;

/// yt-dlp driven as a child process
pub struct YtDlpEngine {
    ytdlp_path: String,
    config: EngineConfig,
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        let ytdlp_path = match &config.binary {
            Some(path) => path.to_string_lossy().to_string(),
            None => find_ytdlp(),
        };
        Self { ytdlp_path, config }
    }

    /// Network/auth flags shared by every invocation
    fn network_args(&self) -> Vec<String> {
        let mut args = utils::proxy_args(self.config.proxy.as_deref());
        args.extend(utils::cookie_args(
            self.config.cookies_path.as_deref(),
            self.config.cookies_from_browser.as_deref(),
        ));
        args
    }

    fn search_args(&self, query: &str, limit: usize) -> Vec<String> {
        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.network_args());
        args.push(format!("ytsearch{}:{}", limit, query));
        args
    }

    fn resolve_args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.network_args());
        args.push(target.to_string());
        args
    }

    fn download_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            request.selector.clone(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            // --print implies --quiet; keep progress lines coming
            "--progress".to_string(),
            "--no-simulate".to_string(),
            "--no-update".to_string(),
            "-P".to_string(),
            request.output_dir.to_string_lossy().to_string(),
            "-o".to_string(),
            request.output_template.clone(),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", FILEPATH_MARKER),
        ];

        if request.extract_audio {
            args.push("-x".to_string());
            if let Some(format) = &request.audio_format {
                args.push("--audio-format".to_string());
                args.push(format.clone());
            }
            if let Some(quality) = &request.audio_quality {
                args.push("--audio-quality".to_string());
                args.push(quality.clone());
            }
        } else if let Some(container) = &request.merge_container {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }

        args.extend(self.network_args());
        args.push(request.target.clone());
        args
    }
}

#[async_trait]
impl Engine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn init(&self) -> Result<EngineInfo, DownloadError> {
        let timeout = self.config.query_timeout_secs.or(Some(30));
        let output = run_captured(&self.ytdlp_path, vec!["--version".to_string()], timeout).await?;
        if !output.status.success() {
            return Err(DownloadError::ToolNotFound(format!(
                "{} --version failed: {}",
                self.ytdlp_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        log::info!("[yt-dlp] Using {} (version {})", self.ytdlp_path, version);
        Ok(EngineInfo {
            path: self.ytdlp_path.clone(),
            version,
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, DownloadError> {
        let args = self.search_args(query, limit);
        log::debug!("[yt-dlp] search: {} {}", self.ytdlp_path, args.join(" "));

        let output = run_captured(&self.ytdlp_path, args, self.config.query_timeout_secs).await?;
        if !output.status.success() {
            return Err(DownloadError::from_engine_output(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        let results = parse_search_output(&output.stdout, limit)?;
        log::info!("[yt-dlp] search '{}' returned {} results", query, results.len());
        Ok(results)
    }

    async fn resolve(&self, target: &str) -> Result<VideoDetail, DownloadError> {
        let args = self.resolve_args(target);
        log::debug!("[yt-dlp] resolve: {} {}", self.ytdlp_path, args.join(" "));

        let output = run_captured(&self.ytdlp_path, args, self.config.query_timeout_secs).await?;
        if !output.status.success() {
            return Err(DownloadError::from_engine_output(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        parse_video_detail(&output.stdout)
    }

    async fn download(
        &self,
        request: &EngineRequest,
        progress: &ProgressEmitter,
    ) -> Result<EngineOutput, DownloadError> {
        let args = self.download_args(request);
        log::info!(
            "[yt-dlp] download {} -f {} into {}",
            request.target,
            request.selector,
            request.output_dir.display()
        );

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.ytdlp_path, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        let mut tracker = ProgressTracker::new();
        let mut output = EngineOutput::default();
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

        while !(out_done && err_done) {
            let (line, from_stderr) = tokio::select! {
                line = out_lines.next_line(), if !out_done => (line, false),
                line = err_lines.next_line(), if !err_done => (line, true),
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    if from_stderr { err_done = true } else { out_done = true }
                    continue;
                }
                Err(e) => {
                    log::warn!("[yt-dlp] Failed to read engine output: {}", e);
                    if from_stderr { err_done = true } else { out_done = true }
                    continue;
                }
            };

            if let Some(path) = line.strip_prefix(FILEPATH_MARKER) {
                log::debug!("[yt-dlp] Engine reported output file {}", path);
                output.reported_path = Some(PathBuf::from(path.trim_end()));
                continue;
            }

            if from_stderr {
                if stderr_tail.len() == STDERR_TAIL {
                    stderr_tail.pop_front();
                }
                stderr_tail.push_back(line.clone());
            }
            progress.emit(tracker.observe(&line));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::ExecutionError(format!("Process error: {}", e)))?;

        if !status.success() {
            let stderr = Vec::from(stderr_tail).join("\n");
            log::warn!("[yt-dlp] download of {} failed ({}): {}", request.target, status, stderr);
            return Err(DownloadError::from_engine_output(&stderr));
        }

        log::info!("[yt-dlp] download of {} finished", request.target);
        Ok(output)
    }

    async fn update(&self) -> Result<String, DownloadError> {
        let output = run_captured(&self.ytdlp_path, vec!["-U".to_string()], None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DownloadError::from_engine_output(&format!("{}\n{}", stdout, stderr)));
        }
        Ok(stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("yt-dlp updated")
            .trim()
            .to_string())
    }
}

/// Find yt-dlp in common install locations, then on PATH.
pub fn find_ytdlp() -> String {
    let binary = if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" };

    let common_paths = [
        "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
        "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
        "/usr/bin/yt-dlp",          // System installation
    ];
    for path in common_paths {
        if Path::new(path).exists() {
            return path.to_string();
        }
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return candidate.to_string_lossy().to_string();
            }
        }
    }

    // Last resort: let the OS resolve it and fail loudly on init
    binary.to_string()
}

/// One JSON object per line, as printed by `--flat-playlist --dump-json`.
pub fn parse_search_output(stdout: &[u8], limit: usize) -> Result<Vec<SearchResult>, DownloadError> {
    let text = String::from_utf8_lossy(stdout);
    let mut results = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let json: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

        let Some(id) = json["id"].as_str().filter(|id| !id.is_empty()) else {
            continue;
        };

        results.push(SearchResult {
            video_id: id.to_string(),
            title: non_empty(&json["title"]).unwrap_or("Unknown").to_string(),
            thumbnail_url: thumbnail_of(&json),
            duration: format_duration(json["duration"].as_f64().unwrap_or(0.0)),
            channel: non_empty(&json["channel"])
                .or_else(|| non_empty(&json["uploader"]))
                .unwrap_or("Unknown")
                .to_string(),
        });

        if results.len() >= limit {
            break;
        }
    }

    Ok(results)
}

/// Single `--dump-json` object to a VideoDetail.
pub fn parse_video_detail(stdout: &[u8]) -> Result<VideoDetail, DownloadError> {
    let json_str = String::from_utf8_lossy(stdout);
    let json: serde_json::Value = serde_json::from_str(json_str.trim())
        .map_err(|e| DownloadError::ParseError(format!("Failed to parse JSON: {}", e)))?;

    let id = non_empty(&json["id"])
        .ok_or_else(|| DownloadError::ParseError("Missing id in engine output".to_string()))?;

    let formats: Vec<VideoFormat> = json["formats"]
        .as_array()
        .map(|formats| formats.iter().filter_map(parse_format).collect())
        .unwrap_or_default();

    if formats.is_empty() {
        return Err(DownloadError::ParseError(format!(
            "No downloadable formats for {}",
            id
        )));
    }

    Ok(VideoDetail {
        id: id.to_string(),
        title: non_empty(&json["title"]).unwrap_or("Unknown").to_string(),
        thumbnail_url: thumbnail_of(&json),
        duration: format_duration(json["duration"].as_f64().unwrap_or(0.0)),
        uploader: non_empty(&json["uploader"])
            .or_else(|| non_empty(&json["channel"]))
            .unwrap_or("Unknown")
            .to_string(),
        formats,
    })
}

fn parse_format(f: &serde_json::Value) -> Option<VideoFormat> {
    let format_id = non_empty(&f["format_id"])?;
    let ext = f["ext"].as_str().unwrap_or("");
    // storyboards
    if ext == "mhtml" {
        return None;
    }

    Some(VideoFormat {
        format_id: format_id.to_string(),
        ext: ext.to_string(),
        resolution: non_empty(&f["resolution"]).map(str::to_string),
        file_size: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
        acodec: non_empty(&f["acodec"]).map(str::to_string),
        vcodec: non_empty(&f["vcodec"]).map(str::to_string),
        note: non_empty(&f["format_note"]).map(str::to_string),
    })
}

fn thumbnail_of(json: &serde_json::Value) -> Option<String> {
    non_empty(&json["thumbnail"])
        .map(str::to_string)
        .or_else(|| {
            json["thumbnails"]
                .as_array()
                .and_then(|thumbs| thumbs.iter().rev().find_map(|t| non_empty(&t["url"])))
                .map(str::to_string)
        })
}

fn non_empty(value: &serde_json::Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

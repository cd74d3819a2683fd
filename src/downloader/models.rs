// Common data models for the engine adapter

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of a search result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    /// `MM:SS`
    pub duration: String,
    pub channel: String,
}

/// Fully resolved item with its stream list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetail {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration: String,
    pub uploader: String,
    pub formats: Vec<VideoFormat>,
}

impl VideoDetail {
    /// Collapse to the list-row shape used by search results
    pub fn to_search_result(&self) -> SearchResult {
        SearchResult {
            video_id: self.id.clone(),
            title: self.title.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            duration: self.duration.clone(),
            channel: self.uploader.clone(),
        }
    }

    pub fn find_format(&self, format_id: &str) -> Option<&VideoFormat> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }
}

/// Video format details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub file_size: Option<u64>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub note: Option<String>,
}

impl VideoFormat {
    /// Label shown in the format-selection prompt
    pub fn description(&self) -> String {
        if self.vcodec.as_deref() == Some("none") {
            format!("Audio Only ({})", self.ext)
        } else {
            format!(
                "{} ({})",
                self.resolution.as_deref().unwrap_or("Unknown"),
                self.ext
            )
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none")
    }

    /// Has a video stream but no audio track
    pub fn is_video_only(&self) -> bool {
        self.vcodec.as_deref().map_or(false, |v| v != "none")
            && self.acodec.as_deref() == Some("none")
    }

    pub fn size_label(&self) -> Option<String> {
        self.file_size.and_then(format_size)
    }
}

/// Human readable size, `None` for unknown/zero
pub fn format_size(bytes: u64) -> Option<String> {
    if bytes == 0 {
        return None;
    }
    let mb = bytes as f64 / 1_048_576.0;
    if mb >= 1024.0 {
        Some(format!("{:.1} GB", mb / 1024.0))
    } else if mb >= 1.0 {
        Some(format!("{:.0} MB", mb))
    } else {
        Some(format!("{:.0} KB", bytes as f64 / 1024.0))
    }
}

/// What ends up in the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Format label stored in the history
    pub fn label(&self) -> &'static str {
        match self {
            Self::Audio => "MP3",
            Self::Video => "MP4",
        }
    }

    /// MIME type used when the extension is not recognised
    pub fn fallback_mime(&self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// Progress report from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// 0..=100
    pub percent: f32,
    pub eta_seconds: Option<u64>,
    /// Raw engine output line, forwarded untouched
    pub line: String,
}

/// Everything the engine needs for one download
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// URL or bare video id
    pub target: String,
    /// yt-dlp format selector expression
    pub selector: String,
    pub extract_audio: bool,
    pub audio_format: Option<String>,
    pub audio_quality: Option<String>,
    pub merge_container: Option<String>,
    pub output_dir: PathBuf,
    pub output_template: String,
}

impl EngineRequest {
    pub fn new(target: impl Into<String>, selector: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            target: target.into(),
            selector: selector.into(),
            extract_audio: false,
            audio_format: None,
            audio_quality: None,
            merge_container: None,
            output_dir,
            output_template: "%(title)s.%(ext)s".to_string(),
        }
    }
}

/// What the engine reports back after a download
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Final file path as printed by the engine after post-processing
    pub reported_path: Option<PathBuf>,
}

/// Engine identity gathered on init
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub path: String,
    pub version: String,
}

// FormatChoice - what the user asked for, turned into a yt-dlp selector
//
// Two families:
// - curated aliases ("best audio", "best video up to N p")
// - a literal format id picked from a resolved VideoDetail

use serde::{Deserialize, Serialize};

use super::models::{MediaKind, VideoDetail, VideoFormat};

pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatChoice {
    /// Best audio stream, converted to the configured audio format
    BestAudio,
    /// Best video no taller than `max_height`, merged with best audio
    BestVideo { max_height: u32 },
    /// A specific format id from a resolved item
    Literal {
        format_id: String,
        kind: MediaKind,
        /// Video-only stream that needs an audio track merged in
        merge_audio: bool,
    },
}

impl FormatChoice {
    pub fn best_video() -> Self {
        Self::BestVideo {
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }

    /// Curated alias: `audio`, `video` (capped at `max_height`) or `<N>p`.
    /// Anything else is a format id and needs a resolved item to classify.
    pub fn parse_alias(alias: &str, max_height: u32) -> Option<Self> {
        match alias.trim().to_lowercase().as_str() {
            "audio" | "mp3" | "bestaudio" => Some(Self::BestAudio),
            "video" | "mp4" | "best" => Some(Self::BestVideo { max_height }),
            other => other
                .strip_suffix('p')
                .and_then(|h| h.parse::<u32>().ok())
                .filter(|h| *h > 0)
                .map(|max_height| Self::BestVideo { max_height }),
        }
    }

    /// Literal choice for a format the user picked from a prompt
    pub fn for_format(format: &VideoFormat) -> Self {
        let kind = if format.is_audio_only() {
            MediaKind::Audio
        } else {
            MediaKind::Video
        };
        Self::Literal {
            format_id: format.format_id.clone(),
            kind,
            merge_audio: format.is_video_only(),
        }
    }

    /// yt-dlp `-f` expression
    pub fn selector(&self) -> String {
        match self {
            Self::BestAudio => "bestaudio/best".to_string(),
            Self::BestVideo { max_height } => format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]",
                h = max_height
            ),
            Self::Literal {
                format_id,
                merge_audio: true,
                ..
            } => format!("{}+bestaudio", format_id),
            Self::Literal { format_id, .. } => format_id.clone(),
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::BestAudio => MediaKind::Audio,
            Self::BestVideo { .. } => MediaKind::Video,
            Self::Literal { kind, .. } => *kind,
        }
    }

    /// Audio choices go through the engine's audio extraction
    pub fn extract_audio(&self) -> bool {
        self.media_kind() == MediaKind::Audio
    }

    pub fn label(&self) -> String {
        match self {
            Self::BestAudio => "Best audio (MP3)".to_string(),
            Self::BestVideo { max_height } => format!("Best video ≤{}p (MP4)", max_height),
            Self::Literal { format_id, .. } => format!("Format {}", format_id),
        }
    }
}

/// One row of the format-selection prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatOption {
    pub label: String,
    pub size: Option<String>,
    pub note: Option<String>,
    pub choice: FormatChoice,
}

/// Curated aliases first, then every resolved format.
pub fn build_choices(detail: &VideoDetail, max_height: u32) -> Vec<FormatOption> {
    let best_audio_size = detail
        .formats
        .iter()
        .filter(|f| f.is_audio_only())
        .filter_map(|f| f.file_size)
        .max();

    let mut options = vec![
        FormatOption {
            label: FormatChoice::BestAudio.label(),
            size: best_audio_size.and_then(super::models::format_size),
            note: None,
            choice: FormatChoice::BestAudio,
        },
        FormatOption {
            label: FormatChoice::BestVideo { max_height }.label(),
            size: None,
            note: None,
            choice: FormatChoice::BestVideo { max_height },
        },
    ];

    options.extend(detail.formats.iter().map(|f| FormatOption {
        label: format!("{} [{}]", f.description(), f.format_id),
        size: f.size_label(),
        note: f.note.clone(),
        choice: FormatChoice::for_format(f),
    }));

    options
}

// Engine failure diagnostics
//
// Classifies yt-dlp stderr into a short reason so that status strings
// explain what went wrong instead of dumping the raw log.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// HTTP 403 Forbidden
    Http403Forbidden,
    /// Age-restricted content requiring login
    AgeRestricted,
    /// Geographic restriction
    GeoBlocked,
    /// Network timeout or unreachable host
    NetworkTimeout,
    /// Rate limiting (429 or similar)
    RateLimited,
    /// Bot check / captcha
    BotDetection,
    /// Private video
    PrivateVideo,
    /// Deleted or otherwise unavailable
    VideoUnavailable,
    /// DRM-protected, paid or Premium-only content
    DrmProtected,
    /// No extractor for the given target
    UnsupportedUrl,
    /// Requested format missing from the resolved streams
    FormatUnavailable,
    /// Post-processing (ffmpeg) failed
    PostProcessing,
    Unknown,
}

impl BlockingReason {
    pub fn proxy_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::GeoBlocked
                | Self::NetworkTimeout
                | Self::RateLimited
                | Self::BotDetection
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::AgeRestricted => "Age-restricted content",
            Self::GeoBlocked => "Not available in your region",
            Self::NetworkTimeout => "Network timeout",
            Self::RateLimited => "Rate limited",
            Self::BotDetection => "Bot check triggered",
            Self::PrivateVideo => "Private video",
            Self::VideoUnavailable => "Video unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::UnsupportedUrl => "Unsupported URL",
            Self::FormatUnavailable => "Requested format is not available",
            Self::PostProcessing => "Post-processing failed",
            Self::Unknown => "Engine error",
        }
    }

    /// One-line hint appended to user-facing failures
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AgeRestricted | Self::PrivateVideo => {
                Some("Configure cookies from a signed-in browser and try again.")
            }
            Self::FormatUnavailable => Some("Pick another format or use the audio/video presets."),
            Self::PostProcessing => Some("Make sure ffmpeg is installed and on PATH."),
            r if r.proxy_might_help() => Some("Try again later or configure a proxy."),
            _ => None,
        }
    }
}

/// Analyze an engine error message and return the most specific reason.
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    if error.trim().is_empty() {
        return None;
    }

    let lower = error.to_lowercase();

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("youtube premium")
        || lower.contains("requires purchase")
        || lower.contains("requires payment")
    {
        return Some(BlockingReason::DrmProtected);
    }

    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        return Some(BlockingReason::UnsupportedUrl);
    }

    if lower.contains("requested format is not available") {
        return Some(BlockingReason::FormatUnavailable);
    }

    if lower.contains("age-restricted") || lower.contains("sign in to confirm your age") {
        return Some(BlockingReason::AgeRestricted);
    }

    if lower.contains("private video") || lower.contains("video is private") {
        return Some(BlockingReason::PrivateVideo);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("no longer available")
    {
        return Some(BlockingReason::VideoUnavailable);
    }

    if lower.contains("not available in your country") || lower.contains("blocked in your country") {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("not a bot") || lower.contains("captcha") || lower.contains("unusual traffic") {
        return Some(BlockingReason::BotDetection);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Http403Forbidden);
    }

    if lower.contains("postprocessing") || lower.contains("ffmpeg not found") || lower.contains("ffprobe") {
        return Some(BlockingReason::PostProcessing);
    }

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("network is unreachable")
        || lower.contains("name or service not known")
    {
        return Some(BlockingReason::NetworkTimeout);
    }

    Some(BlockingReason::Unknown)
}

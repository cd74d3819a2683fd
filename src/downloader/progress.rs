// yt-dlp progress line parsing

use lazy_static::lazy_static;
use regex::Regex;

use super::models::DownloadProgress;

lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    // [download] 100% of   10.00MiB in 00:00:03 at 2.90MiB/s
    static ref PERCENT_RE: Regex = Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").unwrap();
    static ref ETA_RE: Regex = Regex::new(r"\bETA\s+(\S+)").unwrap();
}

/// Percent and ETA pulled out of a single `[download]` line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedProgress {
    pub percent: f32,
    pub eta_seconds: Option<u64>,
}

pub fn parse_progress_line(line: &str) -> Option<ParsedProgress> {
    let caps = PERCENT_RE.captures(line.trim_start())?;
    let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
    let eta_seconds = ETA_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_eta(m.as_str()));

    Some(ParsedProgress {
        percent: percent.clamp(0.0, 100.0),
        eta_seconds,
    })
}

/// `SS`, `MM:SS` or `HH:MM:SS` to seconds; `Unknown` and garbage yield `None`
pub fn parse_eta(eta: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut parts = 0;
    for part in eta.split(':') {
        let value: u64 = part.parse().ok()?;
        total = total * 60 + value;
        parts += 1;
    }
    if parts == 0 || parts > 3 {
        return None;
    }
    Some(total)
}

/// Carries the last known percent/ETA so that every engine line can be
/// forwarded, not only the ones that contain a percentage.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    percent: f32,
    eta_seconds: Option<u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &str) -> DownloadProgress {
        if let Some(parsed) = parse_progress_line(line) {
            self.percent = parsed.percent;
            self.eta_seconds = parsed.eta_seconds;
        }
        DownloadProgress {
            percent: self.percent,
            eta_seconds: self.eta_seconds,
            line: line.to_string(),
        }
    }
}

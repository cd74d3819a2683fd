// Error types for the engine adapter

use thiserror::Error;

use super::diagnostics::{diagnose_error, BlockingReason};

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// yt-dlp not found or not runnable
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Target string the engine cannot handle
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Process could not be spawned, waited on or read
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Engine ran and reported a failure
    #[error("{}: {message}", reason.description())]
    EngineFailed {
        reason: BlockingReason,
        message: String,
    },

    /// Configured query timeout elapsed
    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl DownloadError {
    /// Build an error from the engine's stderr, keeping the lines that matter.
    pub fn from_engine_output(stderr: &str) -> Self {
        let reason = diagnose_error(stderr).unwrap_or(BlockingReason::Unknown);
        let message = summarize_stderr(stderr);

        if reason == BlockingReason::UnsupportedUrl {
            return Self::InvalidUrl(message);
        }
        Self::EngineFailed { reason, message }
    }

    /// Reason behind an engine failure, if the engine got that far
    pub fn reason(&self) -> Option<BlockingReason> {
        match self {
            Self::EngineFailed { reason, .. } => Some(*reason),
            Self::Timeout(_) => Some(BlockingReason::NetworkTimeout),
            _ => None,
        }
    }
}

/// Prefer `ERROR:` lines; otherwise the last non-empty line.
fn summarize_stderr(stderr: &str) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .take(2)
        .collect();

    if !errors.is_empty() {
        return errors
            .iter()
            .map(|l| l.trim_start_matches("ERROR:").trim())
            .collect::<Vec<_>>()
            .join(" | ");
    }

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(200).collect())
        .unwrap_or_else(|| "engine exited without output".to_string())
}

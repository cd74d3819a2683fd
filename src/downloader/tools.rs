// Engine maintenance: release lookup and the silent background update

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::errors::DownloadError;
use super::traits::Engine;

pub const RELEASES_URL: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateCheck {
    UpToDate,
    Available { latest: String },
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
}

/// Latest published engine release tag
pub async fn latest_release(proxy: Option<&str>) -> Result<String, DownloadError> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("yt-music-downloader/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| DownloadError::ExecutionError(format!("Invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    let client = builder
        .build()
        .map_err(|e| DownloadError::ExecutionError(format!("HTTP client: {}", e)))?;

    let release: ReleaseResponse = client
        .get(RELEASES_URL)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| DownloadError::ExecutionError(format!("Release lookup failed: {}", e)))?
        .json()
        .await
        .map_err(|e| DownloadError::ParseError(format!("Release response: {}", e)))?;

    Ok(release.tag_name)
}

/// Compare dotted versions numerically (`2024.08.06` vs `2024.10.22`).
pub fn compare_versions(current: &str, latest: &str) -> UpdateCheck {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split(['.', '-'])
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };

    match parse(latest).cmp(&parse(current)) {
        Ordering::Greater => UpdateCheck::Available {
            latest: latest.trim().to_string(),
        },
        _ => UpdateCheck::UpToDate,
    }
}

pub async fn check_for_update(
    current_version: &str,
    proxy: Option<&str>,
) -> Result<UpdateCheck, DownloadError> {
    let latest = latest_release(proxy).await?;
    Ok(compare_versions(current_version, &latest))
}

/// Fire-and-forget update. Failures are logged and never reach the UI.
pub fn spawn_background_update(
    engine: Arc<dyn Engine>,
    current_version: String,
    proxy: Option<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match check_for_update(&current_version, proxy.as_deref()).await {
            Ok(UpdateCheck::UpToDate) => {
                log::debug!("[update] {} {} is current", engine.name(), current_version);
            }
            Ok(UpdateCheck::Available { latest }) => {
                log::info!(
                    "[update] {} {} available (have {}), updating",
                    engine.name(),
                    latest,
                    current_version
                );
                match engine.update().await {
                    Ok(summary) => log::info!("[update] {}", summary),
                    Err(e) => log::warn!("[update] Background update failed: {}", e),
                }
            }
            Err(e) => log::warn!("[update] Update check failed: {}", e),
        }
    })
}

// Public storage: moves finished downloads from the private working
// directory into the user's Music / Videos collections.
//
// Two writers share one interface and are picked once at startup:
// - LegacyStorageWriter: copies straight into the final name
// - ScopedStorageWriter: writes a hidden pending entry, then publishes it

pub mod legacy;
pub mod scoped;

pub use legacy::LegacyStorageWriter;
pub use scoped::ScopedStorageWriter;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageRegimeSetting};

pub const PENDING_PREFIX: &str = ".pending-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("source file missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("collection folder {} unavailable: {source}", .path.display())]
    CollectionUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageRegime {
    /// Direct placement, no intermediate state
    Legacy,
    /// Pending entry first, published once complete
    Scoped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaCollection {
    Music,
    Video,
}

impl MediaCollection {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.trim().to_ascii_lowercase().starts_with("audio/") {
            Self::Music
        } else {
            Self::Video
        }
    }
}

/// Reference to a published library entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: PathBuf,
    pub collection: MediaCollection,
    pub display_name: String,
    pub mime_type: String,
    pub regime: StorageRegime,
}

/// Where collections live and which files count as private scratch
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub music_dir: PathBuf,
    pub video_dir: PathBuf,
    pub collection_folder: String,
    pub working_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig, working_dir: &Path) -> Self {
        Self {
            music_dir: config.music_dir.clone(),
            video_dir: config.video_dir.clone(),
            collection_folder: config.collection_folder.clone(),
            working_dir: working_dir.to_path_buf(),
        }
    }

    pub fn collection_dir(&self, collection: MediaCollection) -> PathBuf {
        let root = match collection {
            MediaCollection::Music => &self.music_dir,
            MediaCollection::Video => &self.video_dir,
        };
        root.join(&self.collection_folder)
    }

    fn ensure_collection_dir(&self, collection: MediaCollection) -> Result<PathBuf, StorageError> {
        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::CollectionUnavailable {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Delete `source` only when it sits inside the working directory.
    pub fn discard_source(&self, source: &Path) -> bool {
        let (Ok(source), Ok(working)) = (source.canonicalize(), self.working_dir.canonicalize())
        else {
            return false;
        };
        if !source.starts_with(&working) {
            log::debug!(
                "[storage] Keeping {} (outside working directory)",
                source.display()
            );
            return false;
        }
        match std::fs::remove_file(&source) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[storage] Failed to remove {}: {}", source.display(), e);
                false
            }
        }
    }
}

pub trait PublicStorageWriter: Send + Sync {
    fn regime(&self) -> StorageRegime;

    /// Copy `source` into the collection picked by `mime_type`.
    fn publish(&self, source: &Path, title: &str, mime_type: &str) -> Result<MediaRef, StorageError>;
}

/// Pick the writer once. `auto` probes whether a pending entry can be
/// created and linked under a new name inside the music collection.
pub fn select_writer(config: &StorageConfig, working_dir: &Path) -> Arc<dyn PublicStorageWriter> {
    let layout = StorageLayout::new(config, working_dir);
    let regime = match config.regime {
        StorageRegimeSetting::Legacy => StorageRegime::Legacy,
        StorageRegimeSetting::Scoped => StorageRegime::Scoped,
        StorageRegimeSetting::Auto => {
            let dir = layout.collection_dir(MediaCollection::Music);
            match probe_pending_support(&dir) {
                Ok(()) => StorageRegime::Scoped,
                Err(e) => {
                    log::info!(
                        "[storage] Pending entries not supported in {} ({}); using direct placement",
                        dir.display(),
                        e
                    );
                    StorageRegime::Legacy
                }
            }
        }
    };

    log::info!("[storage] Using {:?} storage regime", regime);
    match regime {
        StorageRegime::Legacy => Arc::new(LegacyStorageWriter::new(layout)),
        StorageRegime::Scoped => Arc::new(ScopedStorageWriter::new(layout)),
    }
}

/// Create, link and remove a throwaway pending entry.
pub fn probe_pending_support(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let pending = dir.join(format!("{}check-{}", PENDING_PREFIX, uuid::Uuid::new_v4()));
    let published = dir.join(format!(".check-{}", uuid::Uuid::new_v4()));

    File::create(&pending)?;
    let linked = std::fs::hard_link(&pending, &published);
    let _ = std::fs::remove_file(&pending);
    let _ = std::fs::remove_file(&published);
    linked
}

/// Buffered copy, flushed and synced before returning.
pub(crate) fn copy_into(reader: impl Read, file: File) -> io::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(file);
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()?;
    Ok(copied)
}

/// Title made safe for use as a file name.
pub fn sanitize_display_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    let capped: String = trimmed.chars().take(180).collect();
    if capped.is_empty() {
        "download".to_string()
    } else {
        capped
    }
}

/// Display name plus the source's extension
pub fn target_file_name(title: &str, source: &Path) -> String {
    let base = sanitize_display_name(title);
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", base, ext.to_ascii_lowercase()),
        _ => base,
    }
}

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// `name.ext`, then `name (1).ext`, `name (2).ext`, ...
fn candidate_names<'a>(dir: &'a Path, file_name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    std::iter::once(dir.join(file_name)).chain((1..MAX_NAME_ATTEMPTS).map(move |n| match &ext {
        Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
        None => dir.join(format!("{} ({})", stem, n)),
    }))
}

/// Hand each candidate name to `claim` until one succeeds. `claim` must
/// create the entry atomically and fail with `AlreadyExists` when the name
/// is taken, so concurrent writers never land on the same file.
pub(crate) fn claim_unique<T>(
    dir: &Path,
    file_name: &str,
    mut claim: impl FnMut(&Path) -> io::Result<T>,
) -> io::Result<(PathBuf, T)> {
    for candidate in candidate_names(dir, file_name) {
        match claim(&candidate) {
            Ok(value) => return Ok((candidate, value)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name left for {}", file_name),
    ))
}

/// MIME type from the file extension, `fallback` when unknown.
pub fn mime_for_path(path: &Path, fallback: &str) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let mime = match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("opus") => "audio/opus",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        _ => fallback,
    };
    mime.to_string()
}

pub(crate) fn check_source(source: &Path) -> Result<(), StorageError> {
    if source.is_file() {
        Ok(())
    } else {
        Err(StorageError::SourceMissing(source.to_path_buf()))
    }
}

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

use super::{
    check_source, claim_unique, copy_into, target_file_name, MediaCollection, MediaRef,
    PublicStorageWriter, StorageError, StorageLayout, StorageRegime, PENDING_PREFIX,
};

/// Writes into a hidden pending entry and publishes it under a free name
/// with a hard link once the bytes are synced. Readers of the collection
/// never see a partial file, and a link never replaces an existing entry.
pub struct ScopedStorageWriter {
    layout: StorageLayout,
}

impl ScopedStorageWriter {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub(crate) fn write_entry(
        &self,
        reader: impl Read,
        file_name: &str,
        mime_type: &str,
    ) -> Result<MediaRef, StorageError> {
        let collection = MediaCollection::from_mime(mime_type);
        let dir = self.layout.ensure_collection_dir(collection)?;
        let pending = dir.join(format!(
            "{}{}-{}",
            PENDING_PREFIX,
            uuid::Uuid::new_v4(),
            file_name
        ));

        let file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&pending)
            .map_err(|source| StorageError::Write {
                path: pending.clone(),
                source,
            })?;

        if let Err(source) = copy_into(reader, file) {
            let _ = std::fs::remove_file(&pending);
            return Err(StorageError::Write {
                path: pending,
                source,
            });
        }

        let linked = claim_unique(&dir, file_name, |candidate| {
            std::fs::hard_link(&pending, candidate)
        });
        if let Err(e) = std::fs::remove_file(&pending) {
            log::warn!("[storage] Failed to remove {}: {}", pending.display(), e);
        }
        let (target, ()) = linked.map_err(|source| StorageError::Publish {
            path: dir.join(file_name),
            source,
        })?;

        let display_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.to_string());

        Ok(MediaRef {
            path: target,
            collection,
            display_name,
            mime_type: mime_type.to_string(),
            regime: StorageRegime::Scoped,
        })
    }
}

impl PublicStorageWriter for ScopedStorageWriter {
    fn regime(&self) -> StorageRegime {
        StorageRegime::Scoped
    }

    fn publish(&self, source: &Path, title: &str, mime_type: &str) -> Result<MediaRef, StorageError> {
        check_source(source)?;
        let file = File::open(source).map_err(|_| StorageError::SourceMissing(source.to_path_buf()))?;

        let media = self.write_entry(file, &target_file_name(title, source), mime_type)?;
        log::info!("[storage] Published {}", media.path.display());

        self.layout.discard_source(source);
        Ok(media)
    }
}

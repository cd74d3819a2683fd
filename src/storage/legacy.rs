use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

use super::{
    check_source, claim_unique, copy_into, target_file_name, MediaCollection, MediaRef,
    PublicStorageWriter, StorageError, StorageLayout, StorageRegime,
};

/// Writes directly to the final file name.
pub struct LegacyStorageWriter {
    layout: StorageLayout,
}

impl LegacyStorageWriter {
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
        let (target, file): (_, File) = claim_unique(&dir, file_name, |candidate| {
            OpenOptions::new().write(true).create_new(true).open(candidate)
        })
        .map_err(|source| StorageError::Write {
            path: dir.join(file_name),
            source,
        })?;

        if let Err(source) = copy_into(reader, file) {
            // no half-written file left behind
            let _ = std::fs::remove_file(&target);
            return Err(StorageError::Write {
                path: target,
                source,
            });
        }

        let display_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.to_string());

        Ok(MediaRef {
            path: target,
            collection,
            display_name,
            mime_type: mime_type.to_string(),
            regime: StorageRegime::Legacy,
        })
    }
}

impl PublicStorageWriter for LegacyStorageWriter {
    fn regime(&self) -> StorageRegime {
        StorageRegime::Legacy
    }

    fn publish(&self, source: &Path, title: &str, mime_type: &str) -> Result<MediaRef, StorageError> {
        check_source(source)?;
        let file = File::open(source).map_err(|_| StorageError::SourceMissing(source.to_path_buf()))?;

        let media = self.write_entry(file, &target_file_name(title, source), mime_type)?;
        log::info!("[storage] Saved {}", media.path.display());

        self.layout.discard_source(source);
        Ok(media)
    }
}

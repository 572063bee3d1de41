//! ContentStore: image payloads in one flat directory.
//!
//! Files are named `{public_id}.{extension}`. Writes open the target with
//! create-new semantics, so an existing payload is never overwritten.

use crate::{
    models::image::stored_filename,
    services::error::{ImageError, ImageResult},
};
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, error};

#[derive(Clone, Debug)]
pub struct ContentStore {
    /// Directory holding every stored image.
    pub base_path: PathBuf,
}

/// A file found in the storage directory, split into its naming parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub public_id: String,
    pub extension: String,
}

impl ContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Identifiers come from the allocator, but the path is built from
    /// caller-visible strings, so anything outside `[A-Za-z0-9]` is refused.
    fn ensure_name_safe(public_id: &str, extension: &str) -> ImageResult<()> {
        let safe = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric());
        if safe(public_id) && safe(extension) {
            Ok(())
        } else {
            Err(ImageError::NotFound(format!("{}.{}", public_id, extension)))
        }
    }

    /// Physical location of a payload. Does not check for existence.
    pub fn path_for(&self, public_id: &str, extension: &str) -> PathBuf {
        self.base_path.join(stored_filename(public_id, extension))
    }

    /// Write `bytes` under `(public_id, extension)`.
    ///
    /// Fails with `StoredFileExists` if the name is taken. A failed write
    /// removes whatever partial file it created.
    pub async fn save(&self, public_id: &str, extension: &str, bytes: &Bytes) -> ImageResult<()> {
        Self::ensure_name_safe(public_id, extension)?;
        let path = self.path_for(public_id, extension);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(ImageError::StoredFileExists(stored_filename(
                    public_id, extension,
                )));
            }
            Err(err) => return Err(ImageError::Io(err)),
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            discard_partial(&path).await;
            return Err(ImageError::Io(err));
        }

        debug!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    /// Open a payload for streaming out.
    pub async fn open(&self, public_id: &str, extension: &str) -> ImageResult<File> {
        Self::ensure_name_safe(public_id, extension)?;
        let path = self.path_for(public_id, extension);
        File::open(&path)
            .await
            .map_err(|err| not_found_or_io(err, public_id, extension))
    }

    pub async fn remove(&self, public_id: &str, extension: &str) -> ImageResult<()> {
        Self::ensure_name_safe(public_id, extension)?;
        let path = self.path_for(public_id, extension);
        fs::remove_file(&path)
            .await
            .map_err(|err| not_found_or_io(err, public_id, extension))?;
        debug!("removed physical file {}", path.display());
        Ok(())
    }

    /// Every `{id}.{ext}` regular file in the storage directory.
    ///
    /// Names that do not split into two alphanumeric parts are skipped.
    pub async fn list_stored(&self) -> ImageResult<Vec<StoredFile>> {
        let mut stored = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(stored),
            Err(err) => return Err(ImageError::Io(err)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some((public_id, extension)) = name.to_str().and_then(|n| n.split_once('.'))
            else {
                continue;
            };
            if Self::ensure_name_safe(public_id, extension).is_err() {
                continue;
            }
            stored.push(StoredFile {
                public_id: public_id.to_string(),
                extension: extension.to_string(),
            });
        }

        Ok(stored)
    }
}

/// Remove a payload whose write failed. Returns false, after logging, when
/// the partial file could not be removed.
async fn discard_partial(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            error!(
                "orphaned partial payload {} left on disk: {}",
                path.display(),
                err
            );
            false
        }
    }
}

fn not_found_or_io(err: io::Error, public_id: &str, extension: &str) -> ImageError {
    if err.kind() == ErrorKind::NotFound {
        ImageError::NotFound(stored_filename(public_id, extension))
    } else {
        ImageError::Io(err)
    }
}

//! src/services/image_service.rs
//!
//! ImageService: upload, fetch and delete built on the catalog (SQLite),
//! the content store (flat directory) and the visitor log.
//!
//! Possession of an identifier is the only credential this layer checks:
//! the public id grants reading, the delete id grants deletion. Gating of
//! uploads and listings happens in the HTTP layer before these calls.

use crate::{
    models::{
        image::{Image, ImageExtension, NewImage, stored_filename},
        visitor::{CapturedHeaders, Visitor},
    },
    services::{
        catalog::ImageCatalog,
        content_store::ContentStore,
        error::{ImageError, ImageResult},
        identifier::{IdKind, IdentifierAllocator, random_identifier},
        visitor_log::VisitorLog,
    },
};
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use tokio::fs::{self, File};
use tracing::{debug, error, info, warn};

/// Allocate + store + insert rounds tried before an upload is abandoned.
pub const MAX_UPLOAD_ATTEMPTS: usize = 5;

/// Configured identifier lengths.
#[derive(Clone, Copy, Debug)]
pub struct IdLengths {
    pub public: usize,
    pub delete: usize,
}

impl Default for IdLengths {
    fn default() -> Self {
        Self {
            public: crate::config::DEFAULT_PUBLIC_ID_LEN,
            delete: crate::config::DEFAULT_DELETE_ID_LEN,
        }
    }
}

/// Who is looking at an image, as reported by the HTTP layer.
#[derive(Clone, Debug, Default)]
pub struct Visit {
    pub remote_addr: String,
    pub headers: CapturedHeaders,
}

/// A catalog entry paired with its opened payload.
#[derive(Debug)]
pub struct FetchedImage {
    pub image: Image,
    pub file: File,
}

#[derive(Debug)]
pub enum DeleteOutcome {
    /// The payload and the record are gone.
    Deleted(Image),
    /// Nothing changed; the caller must confirm first.
    Unconfirmed(Image),
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Files with no catalog entry that were removed.
    pub orphans_removed: Vec<String>,
    /// Files with no catalog entry that could not be removed.
    pub orphans_kept: Vec<String>,
    /// Catalog entries whose payload is missing.
    pub missing_files: Vec<String>,
}

#[derive(Clone)]
pub struct ImageService {
    pub catalog: ImageCatalog,
    pub store: ContentStore,
    pub visitors: VisitorLog,
    allocator: IdentifierAllocator,
    id_lengths: IdLengths,
}

impl ImageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, id_lengths: IdLengths) -> Self {
        let catalog = ImageCatalog::new(db.clone());
        Self {
            allocator: IdentifierAllocator::new(catalog.clone()),
            catalog,
            store: ContentStore::new(base_path),
            visitors: VisitorLog::new(db),
            id_lengths,
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.catalog.db
    }

    /// Store an uploaded image and commit its record.
    ///
    /// - Rejects the file type before any identifier or byte is written.
    /// - Allocates both identifiers, writes the payload, then inserts.
    /// - A collision on insert (or on the file name) removes the file just
    ///   written and starts over with fresh identifiers.
    ///
    /// The keyword is written by the same INSERT as the record.
    pub async fn upload(
        &self,
        filename: &str,
        bytes: Bytes,
        keyword: Option<String>,
    ) -> ImageResult<Image> {
        self.upload_with(filename, bytes, keyword, random_identifier).await
    }

    /// `upload` drawing identifier candidates from `next`.
    pub(crate) async fn upload_with<F>(
        &self,
        filename: &str,
        bytes: Bytes,
        keyword: Option<String>,
        mut next: F,
    ) -> ImageResult<Image>
    where
        F: FnMut(usize) -> String,
    {
        let extension =
            ImageExtension::from_filename(filename).map_err(ImageError::RejectedExtension)?;
        if bytes.is_empty() {
            return Err(ImageError::InvalidUpload("file is empty".into()));
        }

        let checksum = format!("{:x}", md5::compute(&bytes));
        let size_bytes = bytes.len() as i64;
        let mut last_collision = IdKind::Public;

        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            let public_id = self
                .allocator
                .allocate_with(IdKind::Public, self.id_lengths.public, &mut next)
                .await?;
            let delete_id = self
                .allocator
                .allocate_with(IdKind::Delete, self.id_lengths.delete, &mut next)
                .await?;

            match self.store.save(&public_id, extension.as_str(), &bytes).await {
                Ok(()) => {}
                Err(ImageError::StoredFileExists(name)) => {
                    warn!(
                        "payload {} already on disk, retrying upload (attempt {})",
                        name, attempt
                    );
                    last_collision = IdKind::Public;
                    continue;
                }
                Err(err) => return Err(err),
            }

            let new = NewImage {
                public_id,
                delete_id,
                extension,
                keyword: keyword.clone(),
                checksum: checksum.clone(),
                size_bytes,
                created_at: Utc::now(),
            };

            match self.catalog.insert(&new).await {
                Ok(image) => {
                    info!(
                        "uploaded {} ({} bytes, {})",
                        image.public_id, image.size_bytes, image.extension
                    );
                    return Ok(image);
                }
                Err(ImageError::DuplicateIdentifier(kind)) => {
                    self.discard_payload(&new.public_id, extension.as_str()).await;
                    warn!(
                        "{} identifier taken at insert, retrying upload (attempt {})",
                        kind, attempt
                    );
                    last_collision = kind;
                }
                Err(err) => {
                    self.discard_payload(&new.public_id, extension.as_str()).await;
                    return Err(err);
                }
            }
        }

        error!(
            "upload abandoned after {} colliding attempts",
            MAX_UPLOAD_ATTEMPTS
        );
        Err(ImageError::IdentifierSpaceExhausted {
            kind: last_collision,
            attempts: MAX_UPLOAD_ATTEMPTS,
        })
    }

    /// Compensating removal of a payload whose record never committed.
    async fn discard_payload(&self, public_id: &str, extension: &str) {
        if let Err(err) = self.store.remove(public_id, extension).await {
            error!(
                "orphaned payload {} left on disk: {}",
                stored_filename(public_id, extension),
                err
            );
        }
    }

    /// Catalog entry for a public identifier.
    pub async fn lookup(&self, public_id: &str) -> ImageResult<Image> {
        self.catalog
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| ImageError::NotFound(public_id.to_string()))
    }

    /// Open an image for reading and, when `should_log` is set, record the
    /// visit.
    ///
    /// The payload is opened before the visit is recorded, so a fetch that
    /// races a delete reports `NotFound` and leaves no visit behind.
    pub async fn fetch(
        &self,
        public_id: &str,
        visit: &Visit,
        should_log: bool,
    ) -> ImageResult<FetchedImage> {
        let image = self.lookup(public_id).await?;
        let file = self.store.open(&image.public_id, &image.extension).await?;

        if should_log {
            self.visitors
                .record(&image, &visit.remote_addr, &visit.headers)
                .await;
        }

        Ok(FetchedImage { image, file })
    }

    /// An entry with its visits, oldest first.
    pub async fn details(&self, public_id: &str) -> ImageResult<(Image, Vec<Visitor>)> {
        let image = self.lookup(public_id).await?;
        let visits = self.visitors.list_for_image(&image).await?;
        Ok((image, visits))
    }

    pub async fn list(&self, keyword: Option<&str>) -> ImageResult<Vec<Image>> {
        self.catalog.list_all(keyword).await
    }

    /// Delete by secret identifier.
    ///
    /// Without `confirmed` nothing is touched and `Unconfirmed` is returned.
    /// With it, the payload is removed first, then the record. A payload that
    /// is already missing is logged and does not block removing the record.
    pub async fn delete(&self, delete_id: &str, confirmed: bool) -> ImageResult<DeleteOutcome> {
        let image = self
            .catalog
            .find_by_delete_id(delete_id)
            .await?
            .ok_or_else(|| ImageError::NotFound("delete identifier".to_string()))?;

        if !confirmed {
            debug!("unconfirmed delete request for {}", image.public_id);
            return Ok(DeleteOutcome::Unconfirmed(image));
        }

        match self.store.remove(&image.public_id, &image.extension).await {
            Ok(()) => {}
            Err(ImageError::NotFound(name)) => {
                warn!("payload {} already missing during delete", name);
            }
            Err(err) => return Err(err),
        }

        if !self.catalog.remove(&image).await? {
            return Err(ImageError::NotFound(image.public_id));
        }

        info!("deleted {}", image.public_id);
        Ok(DeleteOutcome::Deleted(image))
    }

    /// Bring the storage directory and the catalog back in line.
    ///
    /// Files without a record are removed. Records without a file are only
    /// reported. Must run before uploads are accepted: a payload written but
    /// not yet committed looks exactly like an orphan.
    pub async fn reconcile(&self) -> ImageResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for stored in self.store.list_stored().await? {
            let name = stored_filename(&stored.public_id, &stored.extension);
            let owned = match self.catalog.find_by_public_id(&stored.public_id).await? {
                Some(image) => image.extension == stored.extension,
                None => false,
            };
            if owned {
                continue;
            }
            match self.store.remove(&stored.public_id, &stored.extension).await {
                Ok(()) => {
                    warn!("removed orphaned payload {}", name);
                    report.orphans_removed.push(name);
                }
                Err(err) => {
                    error!("could not remove orphaned payload {}: {}", name, err);
                    report.orphans_kept.push(name);
                }
            }
        }

        for image in self.catalog.list_all(None).await? {
            let path = self.store.path_for(&image.public_id, &image.extension);
            if !fs::try_exists(&path).await? {
                warn!("catalog entry {} has no payload at {}", image.public_id, path.display());
                report.missing_files.push(image.filename());
            }
        }

        Ok(report)
    }
}

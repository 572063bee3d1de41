//! Scratch databases and storage directories for unit tests.

use crate::{
    db,
    services::{
        catalog::ImageCatalog,
        image_service::{IdLengths, ImageService},
    },
};
use sqlx::sqlite::SqliteConnectOptions;
use std::sync::Arc;
use tempfile::TempDir;

/// A migrated catalog on a fresh SQLite file. Keep the `TempDir` alive.
pub async fn scratch_catalog() -> (TempDir, ImageCatalog) {
    let dir = TempDir::new().unwrap();
    let options = SqliteConnectOptions::new().filename(dir.path().join("meta.db"));
    let pool = db::connect_with(options).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, ImageCatalog::new(Arc::new(pool)))
}

/// A full service with default identifier lengths, storing under `uploads/`.
pub async fn scratch_service() -> (TempDir, ImageService) {
    let (dir, catalog) = scratch_catalog().await;
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    let service = ImageService::new(catalog.db.clone(), uploads, IdLengths::default());
    (dir, service)
}

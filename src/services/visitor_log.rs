//! VisitorLog: append-only record of image views.
//!
//! Recording is best-effort: a failed write is logged at `warn` and dropped,
//! it never fails the fetch that triggered it.

use crate::{
    models::{
        image::Image,
        visitor::{CapturedHeaders, Visitor, VisitorRow},
    },
    services::error::{ImageError, ImageResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct VisitorLog {
    pub db: Arc<SqlitePool>,
}

impl VisitorLog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Append a visit. Returns whether the row was written.
    pub async fn record(
        &self,
        image: &Image,
        remote_addr: &str,
        headers: &CapturedHeaders,
    ) -> bool {
        match self.try_record(image, remote_addr, headers).await {
            Ok(()) => {
                debug!("recorded visit to {} from {}", image.public_id, remote_addr);
                true
            }
            Err(err) => {
                warn!("dropping visit to {}: {}", image.public_id, err);
                false
            }
        }
    }

    async fn try_record(
        &self,
        image: &Image,
        remote_addr: &str,
        headers: &CapturedHeaders,
    ) -> ImageResult<()> {
        let headers = serde_json::to_string(headers)?;
        sqlx::query(
            "INSERT INTO visitors (image_id, remote_addr, headers, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(image.id)
        .bind(remote_addr)
        .bind(headers)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Visits to one image, oldest first.
    pub async fn list_for_image(&self, image: &Image) -> ImageResult<Vec<Visitor>> {
        let rows = sqlx::query_as::<_, VisitorRow>(
            "SELECT id, image_id, remote_addr, headers, created_at
             FROM visitors WHERE image_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(image.id)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|row| Visitor::try_from(row).map_err(ImageError::from))
            .collect()
    }
}

//! ImageCatalog: SQLite-backed image metadata.
//!
//! The UNIQUE constraints on `public_id` and `delete_id` are the only
//! uniqueness check that counts: the check and the write happen inside the
//! same INSERT statement, so two racing uploads of one identifier can never
//! both commit.

use crate::{
    models::image::{Image, NewImage},
    services::{
        error::{ImageError, ImageResult},
        identifier::IdKind,
    },
};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;

const IMAGE_COLUMNS: &str =
    "id, public_id, delete_id, extension, keyword, checksum, size_bytes, created_at";

/// Longest keyword kept on a record, in characters.
pub const MAX_KEYWORD_CHARS: usize = 255;

#[derive(Clone)]
pub struct ImageCatalog {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
}

impl ImageCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Commit a new record.
    ///
    /// Returns `DuplicateIdentifier` naming the colliding column when either
    /// identifier is already taken.
    pub async fn insert(&self, new: &NewImage) -> ImageResult<Image> {
        let keyword = new.keyword.as_deref().and_then(normalize_keyword);

        sqlx::query_as::<_, Image>(&format!(
            "INSERT INTO images (public_id, delete_id, extension, keyword, checksum, size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(&new.public_id)
        .bind(&new.delete_id)
        .bind(new.extension.as_str())
        .bind(keyword)
        .bind(&new.checksum)
        .bind(new.size_bytes)
        .bind(new.created_at)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match unique_violation_kind(&err) {
            Some(kind) => ImageError::DuplicateIdentifier(kind),
            None => ImageError::Sqlx(err),
        })
    }

    pub async fn find_by_public_id(&self, public_id: &str) -> ImageResult<Option<Image>> {
        self.find_by(IdKind::Public, public_id).await
    }

    pub async fn find_by_delete_id(&self, delete_id: &str) -> ImageResult<Option<Image>> {
        self.find_by(IdKind::Delete, delete_id).await
    }

    async fn find_by(&self, kind: IdKind, value: &str) -> ImageResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE {} = ?",
            kind.column()
        ))
        .bind(value)
        .fetch_optional(&*self.db)
        .await?;
        Ok(image)
    }

    /// Read-only check used by the allocator.
    pub async fn identifier_exists(&self, kind: IdKind, value: &str) -> ImageResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT 1 FROM images WHERE {} = ? LIMIT 1",
            kind.column()
        ))
        .bind(value)
        .fetch_optional(&*self.db)
        .await?;
        Ok(found.is_some())
    }

    /// All records, newest first. `keyword` narrows to an exact label match.
    pub async fn list_all(&self, keyword: Option<&str>) -> ImageResult<Vec<Image>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {IMAGE_COLUMNS} FROM images"));

        if let Some(keyword) = keyword.and_then(normalize_keyword) {
            builder.push(" WHERE keyword = ");
            builder.push_bind(keyword);
        }

        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows: Vec<Image> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// Delete a record together with its visitor rows.
    ///
    /// Returns `false` when the record was already gone; removing an absent
    /// record is never an error.
    pub async fn remove(&self, image: &Image) -> ImageResult<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM visitors WHERE image_id = ?")
            .bind(image.id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(image.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Trim a keyword, drop it when empty, and bound its length.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_KEYWORD_CHARS).collect())
}

/// Map a unique-constraint failure to the identifier column it names.
fn unique_violation_kind(err: &sqlx::Error) -> Option<IdKind> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    let message = db_err.message().to_ascii_lowercase();
    if !message.contains("unique") {
        return None;
    }
    if message.contains("images.delete_id") {
        Some(IdKind::Delete)
    } else {
        Some(IdKind::Public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::image::ImageExtension, services::testing::scratch_catalog};
    use chrono::{Duration, Utc};

    fn record(public_id: &str, delete_id: &str) -> NewImage {
        NewImage {
            public_id: public_id.into(),
            delete_id: delete_id.into(),
            extension: ImageExtension::Jpg,
            keyword: None,
            checksum: "d41d8cd98f00b204e9800998ecf8427e".into(),
            size_bytes: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_both_ways() {
        let (_dir, catalog) = scratch_catalog().await;
        let inserted = catalog.insert(&record("ab12cd34", "xy98zw12ab90")).await.unwrap();

        assert_eq!(inserted.public_id, "ab12cd34");
        assert_eq!(inserted.extension, "jpg");
        assert_eq!(
            catalog.find_by_public_id("ab12cd34").await.unwrap(),
            Some(inserted.clone())
        );
        assert_eq!(
            catalog.find_by_delete_id("xy98zw12ab90").await.unwrap(),
            Some(inserted)
        );
        assert_eq!(catalog.find_by_public_id("xy98zw12ab90").await.unwrap(), None);
        assert_eq!(catalog.find_by_delete_id("ab12cd34").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_identifiers_name_their_column() {
        let (_dir, catalog) = scratch_catalog().await;
        catalog.insert(&record("ab12cd34", "xy98zw12ab90")).await.unwrap();

        let err = catalog
            .insert(&record("ab12cd34", "another12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::DuplicateIdentifier(IdKind::Public)));

        let err = catalog
            .insert(&record("zz99yy88", "xy98zw12ab90"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::DuplicateIdentifier(IdKind::Delete)));

        assert_eq!(catalog.list_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_newest_first_with_keyword_filter() {
        let (_dir, catalog) = scratch_catalog().await;
        let now = Utc::now();

        let mut old = record("old00000", "olddelete000");
        old.created_at = now - Duration::hours(2);
        old.keyword = Some("cats".into());
        let mut mid = record("mid00000", "middelete000");
        mid.created_at = now - Duration::hours(1);
        let mut new = record("new00000", "newdelete000");
        new.created_at = now;
        new.keyword = Some("  cats ".into());

        catalog.insert(&mid).await.unwrap();
        catalog.insert(&new).await.unwrap();
        catalog.insert(&old).await.unwrap();

        let ids: Vec<String> = catalog
            .list_all(None)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.public_id)
            .collect();
        assert_eq!(ids, vec!["new00000", "mid00000", "old00000"]);

        let cats: Vec<String> = catalog
            .list_all(Some("cats"))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.public_id)
            .collect();
        assert_eq!(cats, vec!["new00000", "old00000"]);
    }

    #[tokio::test]
    async fn test_remove_reports_absence() {
        let (_dir, catalog) = scratch_catalog().await;
        let image = catalog.insert(&record("ab12cd34", "xy98zw12ab90")).await.unwrap();

        assert!(catalog.remove(&image).await.unwrap());
        assert!(!catalog.remove(&image).await.unwrap());
        assert!(!catalog.identifier_exists(IdKind::Public, "ab12cd34").await.unwrap());
    }

    #[test]
    fn test_normalize_keyword() {
        assert_eq!(normalize_keyword("   "), None);
        assert_eq!(normalize_keyword(" dog "), Some("dog".into()));
        assert_eq!(
            normalize_keyword(&"k".repeat(MAX_KEYWORD_CHARS + 5)).map(|k| k.len()),
            Some(MAX_KEYWORD_CHARS)
        );
    }
}

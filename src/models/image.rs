//! Represents an uploaded image and the file types the service accepts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A catalog record binding a public identifier to a delete identifier and
/// a stored file.
///
/// The `Image` struct stores metadata only; the bytes live in the content
/// store under `{public_id}.{extension}`.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq)]
pub struct Image {
    /// Internal row id, referenced by visitor rows.
    pub id: i64,

    /// Short handle used to view and share the image.
    pub public_id: String,

    /// Secret handle that authorizes deletion. Never exposed in listings.
    #[serde(skip_serializing)]
    pub delete_id: String,

    /// Lowercase file extension from the allow-list.
    pub extension: String,

    /// Optional free-text label used for search.
    pub keyword: Option<String>,

    /// Hex MD5 of the stored bytes.
    pub checksum: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// When this image was uploaded.
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// File name of the stored payload.
    pub fn filename(&self) -> String {
        stored_filename(&self.public_id, &self.extension)
    }

    pub fn content_type(&self) -> &'static str {
        ImageExtension::parse(&self.extension)
            .map(ImageExtension::content_type)
            .unwrap_or("application/octet-stream")
    }
}

/// Fields supplied by the caller when a new record is committed.
#[derive(Clone, Debug)]
pub struct NewImage {
    pub public_id: String,
    pub delete_id: String,
    pub extension: ImageExtension,
    pub keyword: Option<String>,
    pub checksum: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Persisted naming contract: one flat directory of `{public_id}.{extension}`.
pub fn stored_filename(public_id: &str, extension: &str) -> String {
    format!("{}.{}", public_id, extension)
}

/// File types accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageExtension {
    Png,
    Jpg,
    Jpeg,
    Gif,
}

impl ImageExtension {
    pub const ALL: [ImageExtension; 4] = [Self::Png, Self::Jpg, Self::Jpeg, Self::Gif];

    /// Case-insensitive match against the allow-list.
    pub fn parse(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(ext))
    }

    /// Extension from the substring after the final `.` of an uploaded filename.
    ///
    /// Returns the raw (lowercased) suffix on rejection so callers can report it.
    pub fn from_filename(filename: &str) -> Result<Self, String> {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Err(String::new());
        };
        let ext = ext.to_ascii_lowercase();
        Self::parse(&ext).ok_or(ext)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }
}

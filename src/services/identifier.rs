//! Random public/delete identifier generation with collision checks.

use crate::services::{
    catalog::ImageCatalog,
    error::{ImageError, ImageResult},
};
use rand::{Rng, distributions::Alphanumeric};
use std::fmt;
use tracing::debug;

/// Candidates drawn per `allocate` call before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 32;

/// Which identifier column a string is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdKind {
    Public,
    Delete,
}

impl IdKind {
    pub fn column(self) -> &'static str {
        match self {
            Self::Public => "public_id",
            Self::Delete => "delete_id",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Uniform draw of `length` characters from `[A-Za-z0-9]`.
pub fn random_identifier(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Mints identifiers that are not in use in the catalog at check time.
///
/// Nothing is reserved: the catalog's unique constraints remain the final
/// arbiter, so callers must commit promptly and retry on
/// `DuplicateIdentifier`.
#[derive(Clone)]
pub struct IdentifierAllocator {
    catalog: ImageCatalog,
}

impl IdentifierAllocator {
    pub fn new(catalog: ImageCatalog) -> Self {
        Self { catalog }
    }

    /// Draw candidates from `next` until one is free for `kind`.
    ///
    /// Every attempt asks the source for the originally requested length.
    /// Production callers pass `random_identifier`.
    pub async fn allocate_with<F>(
        &self,
        kind: IdKind,
        length: usize,
        mut next: F,
    ) -> ImageResult<String>
    where
        F: FnMut(usize) -> String,
    {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let candidate = next(length);
            if !self.catalog.identifier_exists(kind, &candidate).await? {
                return Ok(candidate);
            }
            debug!("{} identifier collision on attempt {}", kind, attempt);
        }
        Err(ImageError::IdentifierSpaceExhausted {
            kind,
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}

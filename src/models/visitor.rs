//! Represents a single recorded view of an image.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upper bound on distinct header names captured per visit.
pub const MAX_CAPTURED_HEADERS: usize = 64;

/// Upper bound on the length of each captured header value, in bytes.
pub const MAX_HEADER_VALUE_BYTES: usize = 4096;

/// Raw visitor row as stored in SQLite. `headers` holds JSON text.
#[derive(Clone, FromRow, Debug)]
pub struct VisitorRow {
    pub id: i64,
    pub image_id: i64,
    pub remote_addr: String,
    pub headers: String,
    pub created_at: DateTime<Utc>,
}

/// A recorded access to an image, with decoded headers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Visitor {
    pub id: i64,
    pub image_id: i64,
    pub remote_addr: String,
    pub headers: CapturedHeaders,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<VisitorRow> for Visitor {
    type Error = serde_json::Error;

    fn try_from(row: VisitorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            image_id: row.image_id,
            remote_addr: row.remote_addr,
            headers: serde_json::from_str(&row.headers)?,
            created_at: row.created_at,
        })
    }
}

/// One header value, or several when the header was repeated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

/// Request headers in arrival order, treated as untrusted text.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CapturedHeaders(pub Vec<(String, HeaderValues)>);

impl CapturedHeaders {
    /// Capture a request's headers, bounded in count and value size.
    ///
    /// Repeated headers are folded into one entry. Non-UTF-8 values are
    /// converted lossily.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut captured = Vec::new();
        for name in headers.keys() {
            if captured.len() == MAX_CAPTURED_HEADERS {
                break;
            }
            let mut values: Vec<String> = headers
                .get_all(name)
                .iter()
                .map(|v| truncate_value(String::from_utf8_lossy(v.as_bytes()).into_owned()))
                .collect();
            let entry = if values.len() == 1 {
                HeaderValues::One(values.remove(0))
            } else {
                HeaderValues::Many(values)
            };
            captured.push((name.as_str().to_string(), entry));
        }
        Self(captured)
    }
}

fn truncate_value(mut value: String) -> String {
    if value.len() > MAX_HEADER_VALUE_BYTES {
        let mut cut = MAX_HEADER_VALUE_BYTES;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

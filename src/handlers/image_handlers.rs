//! HTTP handlers for image upload, viewing, listing and deletion.
//! Streams image bodies from disk and delegates catalog and storage
//! concerns to `ImageService`.

use crate::{
    errors::AppError,
    models::{
        image::Image,
        visitor::{CapturedHeaders, Visitor},
    },
    services::{
        error::ImageError,
        image_service::{DeleteOutcome, ImageService, Visit},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Multipart, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio_util::io::ReaderStream;

/// Query params accepted by the listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub keyword: Option<String>,
}

/// Query params accepted by the raw view. `t=No` skips visitor tracking.
#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub t: Option<String>,
}

/// Public view of an image. Never carries the delete identifier.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageSummary {
    pub public_id: String,
    pub extension: String,
    pub keyword: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub raw_url: String,
}

impl From<&Image> for ImageSummary {
    fn from(image: &Image) -> Self {
        Self {
            public_id: image.public_id.clone(),
            extension: image.extension.clone(),
            keyword: image.keyword.clone(),
            size_bytes: image.size_bytes,
            checksum: image.checksum.clone(),
            created_at: image.created_at,
            url: format!("/{}", image.public_id),
            raw_url: format!("/{}/raw", image.public_id),
        }
    }
}

/// Returned once, at upload time. The only place the delete id is shown.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub image: ImageSummary,
    pub delete_id: String,
    pub delete_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageData {
    pub image: ImageSummary,
    pub visitors: Vec<Visitor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub public_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm: Option<ConfirmHint>,
}

/// How to turn a delete prompt into an actual deletion.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmHint {
    pub method: String,
    pub path: String,
}

/// GET `/`: list images, newest first, optionally `?keyword=`.
pub async fn list_images(
    State(service): State<ImageService>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ImageSummary>>, AppError> {
    let images = service.list(q.keyword.as_deref()).await?;
    Ok(Json(images.iter().map(ImageSummary::from).collect()))
}

/// POST `/upload`: multipart form with a `file` part and optional `keyword`.
pub async fn upload_image(
    State(service): State<ImageService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut keyword: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                file = Some((filename, bytes));
            }
            Some("keyword") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                keyword = Some(text);
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(AppError::bad_request("Upload Failed: no file part"));
    };
    if filename.is_empty() {
        return Err(AppError::bad_request("Upload Failed: no file selected"));
    }

    let image = service.upload(&filename, bytes, keyword).await?;
    let body = UploadResponse {
        image: ImageSummary::from(&image),
        delete_url: format!("/delete/{}", image.delete_id),
        delete_id: image.delete_id,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// GET `/{public_id}`: public metadata. Not counted as a visit.
pub async fn image_page(
    State(service): State<ImageService>,
    Path(public_id): Path<String>,
) -> Result<Json<ImageSummary>, AppError> {
    let image = service.lookup(&public_id).await?;
    Ok(Json(ImageSummary::from(&image)))
}

/// GET `/{public_id}/raw`: stream the image and record the visit.
pub async fn image_raw(
    State(service): State<ImageService>,
    Path(public_id): Path<String>,
    Query(q): Query<RawQuery>,
    request: Request,
) -> Result<Response, AppError> {
    let should_log = q.t.as_deref() != Some("No");
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());
    let visit = Visit {
        remote_addr,
        headers: CapturedHeaders::from_header_map(request.headers()),
    };

    let fetched = service.fetch(&public_id, &visit, should_log).await?;
    let len = fetched
        .file
        .metadata()
        .await
        .map_err(ImageError::from)?
        .len();
    let body = Body::from_stream(ReaderStream::new(fetched.file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_image_headers(response.headers_mut(), &fetched.image, len);
    Ok(response)
}

/// GET `/{public_id}/data`: entry plus recorded visits.
pub async fn image_data(
    State(service): State<ImageService>,
    Path(public_id): Path<String>,
) -> Result<Json<ImageData>, AppError> {
    let (image, visitors) = service.details(&public_id).await?;
    Ok(Json(ImageData {
        image: ImageSummary::from(&image),
        visitors,
    }))
}

/// GET `/delete/{delete_id}`: describe the deletion without performing it.
pub async fn delete_prompt(
    State(service): State<ImageService>,
    Path(delete_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = service.delete(&delete_id, false).await?;
    Ok(Json(delete_response(outcome, &delete_id)))
}

/// POST `/delete/{delete_id}`: confirmed deletion.
pub async fn delete_confirm(
    State(service): State<ImageService>,
    Path(delete_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = service.delete(&delete_id, true).await?;
    Ok(Json(delete_response(outcome, &delete_id)))
}

fn delete_response(outcome: DeleteOutcome, delete_id: &str) -> DeleteResponse {
    match outcome {
        DeleteOutcome::Deleted(image) => DeleteResponse {
            status: "deleted".into(),
            public_id: image.public_id,
            confirm: None,
        },
        DeleteOutcome::Unconfirmed(image) => DeleteResponse {
            status: "unconfirmed".into(),
            public_id: image.public_id,
            confirm: Some(ConfirmHint {
                method: "POST".into(),
                path: format!("/delete/{}", delete_id),
            }),
        },
    }
}

/// `len` is the size of the opened file, which is what the body streams.
fn set_image_headers(headers: &mut HeaderMap, image: &Image, len: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(image.content_type()),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    let quoted = format!("\"{}\"", image.checksum);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&image.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness: catalog query plus an upload-directory probe

use crate::services::image_service::ImageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Counts catalog rows (proves the schema is in place, not just the pool).
/// 2. Writes, reads back and removes a probe file in the upload directory.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(service): State<ImageService>) -> impl IntoResponse {
    let catalog = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM images")
        .fetch_one(service.db())
        .await
    {
        Ok(count) => CheckStatus::pass(Some(format!("{} images", count))),
        Err(e) => CheckStatus::fail(format!("error: {}", e)),
    };

    let storage = match probe_storage(&service.store.base_path).await {
        Ok(()) => CheckStatus::pass(None),
        Err(reason) => CheckStatus::fail(reason),
    };

    let overall_ok = catalog.ok && storage.ok;
    let mut checks = BTreeMap::new();
    checks.insert("catalog", catalog);
    checks.insert("storage", storage);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    (status, Json(body))
}

/// Round-trip a small file through the upload directory.
///
/// The probe name starts with a dot so the reconcile sweep never mistakes
/// it for an image.
async fn probe_storage(dir: &Path) -> Result<(), String> {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));

    fs::write(&tmp_path, PROBE_BYTES)
        .await
        .map_err(|e| format!("could not write probe file: {}", e))?;

    let read_back = fs::read(&tmp_path).await;
    let _ = fs::remove_file(&tmp_path).await;

    match read_back {
        Ok(bytes) if bytes == PROBE_BYTES => Ok(()),
        Ok(_) => Err("probe file content mismatch".into()),
        Err(e) => Err(format!("could not read probe file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn pass(detail: Option<String>) -> Self {
        Self {
            ok: true,
            detail,
            error: None,
        }
    }

    fn fail(error: String) -> Self {
        Self {
            ok: false,
            detail: None,
            error: Some(error),
        }
    }
}

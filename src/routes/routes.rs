//! Defines routes for the image hosting service.
//!
//! ## Structure
//! - **Gated endpoints** (shared password, see `gate`)
//!   - `GET    /`                    list images (supports `?keyword=`)
//!   - `POST   /upload`              upload an image (multipart `file`, `keyword`)
//!   - `GET    /{public_id}/data`    image metadata plus recorded visits
//!
//! - **Capability endpoints** (the identifier in the path is the credential)
//!   - `GET    /{public_id}`         public metadata
//!   - `GET    /{public_id}/raw`     image bytes; records a visit unless `?t=No`
//!   - `GET    /delete/{delete_id}`  deletion prompt, changes nothing
//!   - `POST   /delete/{delete_id}`  confirmed deletion

use crate::{
    gate::{AccessGate, require_password},
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            delete_confirm, delete_prompt, image_data, image_page, image_raw, list_images,
            upload_image,
        },
    },
    services::image_service::ImageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

/// Build and return the router for all image routes.
///
/// The router carries shared state (`ImageService`) to all handlers; the
/// gated subset additionally runs `require_password`.
pub fn routes(gate: AccessGate, max_upload_bytes: usize) -> Router<ImageService> {
    let gated = Router::new()
        .route("/", get(list_images))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/{public_id}/data", get(image_data))
        .route_layer(middleware::from_fn_with_state(gate, require_password));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/delete/{delete_id}", get(delete_prompt).post(delete_confirm))
        .route("/{public_id}", get(image_page))
        .route("/{public_id}/raw", get(image_raw))
        .merge(gated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::scratch_service;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    const PASSWORD: &str = "Panasonic";
    const BOUNDARY: &str = "imgdrop-test-boundary";

    fn app(service: ImageService) -> Router {
        routes(AccessGate::new(PASSWORD), 1024 * 1024).with_state(service)
    }

    fn multipart_body(filename: &str, bytes: &[u8], keyword: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
        if let Some(keyword) = keyword {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"keyword\"\r\n\r\n{keyword}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(filename: &str, bytes: &[u8], auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder
            .body(Body::from(multipart_body(filename, bytes, Some("cats"))))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn authed_get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {PASSWORD}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload(app: &Router, filename: &str, bytes: &[u8]) -> Value {
        let bearer = format!("Bearer {PASSWORD}");
        let response = app
            .clone()
            .oneshot(upload_request(filename, bytes, Some(&bearer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json(response).await
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_dir, service) = scratch_service().await;
        let response = app(service).oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_checks_catalog_and_storage() {
        let (_dir, service) = scratch_service().await;
        let response = app(service).oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["checks"]["catalog"]["ok"], true);
        assert_eq!(body["checks"]["storage"]["ok"], true);
    }

    #[tokio::test]
    async fn test_gated_routes_require_password() {
        let (_dir, service) = scratch_service().await;
        let app = app(service);

        let response = app
            .clone()
            .oneshot(upload_request("cat.png", &[0xFF, 0xD8, 0xFF], None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let response = app
            .clone()
            .oneshot(upload_request("cat.png", &[0xFF], Some("Bearer wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(authed_get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_view_and_two_step_delete() {
        let (_dir, service) = scratch_service().await;
        let app = app(service);

        let uploaded = upload(&app, "cat.png", &[0xFF, 0xD8, 0xFF]).await;
        let public_id = uploaded["public_id"].as_str().unwrap().to_string();
        let delete_id = uploaded["delete_id"].as_str().unwrap().to_string();
        assert_eq!(public_id.len(), 8);
        assert_eq!(delete_id.len(), 12);
        assert_eq!(uploaded["keyword"], "cats");
        assert_eq!(uploaded["delete_url"], format!("/delete/{delete_id}"));

        let response = app
            .clone()
            .oneshot(get(&format!("/{public_id}/raw")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &[0xFF, 0xD8, 0xFF]);

        let page = json(
            app.clone()
                .oneshot(get(&format!("/{public_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(page["public_id"], public_id.as_str());
        assert!(page.get("delete_id").is_none());

        // Visiting the prompt twice changes nothing.
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get(&format!("/delete/{delete_id}")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json(response).await;
            assert_eq!(body["status"], "unconfirmed");
            assert_eq!(body["confirm"]["method"], "POST");
        }
        let response = app
            .clone()
            .oneshot(get(&format!("/{public_id}/raw?t=No")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let confirm = Request::builder()
            .method("POST")
            .uri(format!("/delete/{delete_id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(confirm).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "deleted");

        let response = app
            .clone()
            .oneshot(get(&format!("/{public_id}/raw")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app
            .oneshot(get(&format!("/delete/{delete_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_raw_length_follows_file_on_disk() {
        let (_dir, service) = scratch_service().await;
        let store = service.store.clone();
        let app = app(service);

        let uploaded = upload(&app, "cat.png", &[0xFF, 0xD8, 0xFF]).await;
        let public_id = uploaded["public_id"].as_str().unwrap().to_string();
        let replaced = vec![0x89u8; 40];
        std::fs::write(store.path_for(&public_id, "png"), &replaced).unwrap();

        let response = app
            .oneshot(get(&format!("/{public_id}/raw?t=No")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "40");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &replaced[..]);
    }

    #[tokio::test]
    async fn test_data_view_counts_tracked_visits_only() {
        let (_dir, service) = scratch_service().await;
        let app = app(service);
        let uploaded = upload(&app, "dog.gif", b"GIF89a").await;
        let public_id = uploaded["public_id"].as_str().unwrap().to_string();

        for uri in [
            format!("/{public_id}/raw"),
            format!("/{public_id}/raw"),
            format!("/{public_id}/raw?t=No"),
        ] {
            let request = Request::builder()
                .uri(uri)
                .header(header::USER_AGENT, "test-agent")
                .body(Body::empty())
                .unwrap();
            assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(get(&format!("/{public_id}/data")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let data = json(
            app.oneshot(authed_get(&format!("/{public_id}/data")))
                .await
                .unwrap(),
        )
        .await;
        let visitors = data["visitors"].as_array().unwrap();
        assert_eq!(visitors.len(), 2);
        assert_eq!(visitors[0]["remote_addr"], "unknown");
        let headers = visitors[0]["headers"].as_array().unwrap();
        assert!(
            headers
                .iter()
                .any(|pair| pair[0] == "user-agent" && pair[1] == "test-agent")
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_and_listing() {
        let (_dir, service) = scratch_service().await;
        let app = app(service.clone());

        let bearer = format!("Bearer {PASSWORD}");
        let response = app
            .clone()
            .oneshot(upload_request("setup.exe", b"MZ", Some(&bearer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(service.list(None).await.unwrap().is_empty());

        upload(&app, "a.png", b"one").await;
        upload(&app, "b.jpeg", b"two").await;

        let listed = json(app.oneshot(authed_get("/?keyword=cats")).await.unwrap()).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["extension"], "jpeg");
        assert!(listed.iter().all(|entry| entry.get("delete_id").is_none()));
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_not_found() {
        let (_dir, service) = scratch_service().await;
        let app = app(service);
        for uri in ["/nope1234", "/nope1234/raw", "/delete/nope12345678"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }
}

use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, net::SocketAddr, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod gate;
mod handlers;
mod models;
mod routes;
mod services;

use crate::services::image_service::{IdLengths, ImageService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run flags ---
    let (cfg, args) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting imgdrop with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .await
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if args.migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let service = ImageService::new(
        db.clone(),
        cfg.storage_dir.clone(),
        IdLengths {
            public: cfg.public_id_len,
            delete: cfg.delete_id_len,
        },
    );

    // Runs before the listener exists, so no upload can be mid-flight.
    if args.skip_reconcile {
        tracing::info!("Skipping startup reconcile");
    } else {
        let report = service.reconcile().await?;
        tracing::info!(
            "Reconcile finished: {} orphans removed, {} kept, {} entries missing payloads",
            report.orphans_removed.len(),
            report.orphans_kept.len(),
            report.missing_files.len()
        );
    }

    // --- Build router ---
    let gate = gate::AccessGate::new(cfg.admin_password.clone());
    let app: Router = routes::routes::routes(gate, cfg.max_upload_bytes).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

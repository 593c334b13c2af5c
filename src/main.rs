use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use media_store::config::AppConfig;
use media_store::routes::routes::routes;
use media_store::services::disk_service::DiskService;
use media_store::services::serving_service::ServingServer;
use media_store::services::storage_service::StorageService;
use media_store::services::variant_service::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-store with config: {:?}", cfg);

    // --- Ensure data directory exists ---
    if !Path::new(&cfg.data_dir).exists() {
        fs::create_dir_all(&cfg.data_dir)?;
        tracing::info!("Created data directory at {}", cfg.data_dir);
    }

    // --- Wire the disk backend into the serving core ---
    let public_url = cfg.public_url();
    let service = Arc::new(DiskService::new(
        cfg.data_dir.clone(),
        format!("{}/disk", public_url),
    ));
    let storage = Storage::new(service as Arc<dyn StorageService>);

    let mut builder = ServingServer::builder(format!("{}/serving", public_url), storage);
    if let Some(key) = &cfg.signing_key {
        builder = builder
            .signing_key(key.as_str())
            .signing_expires(Duration::from_secs(cfg.signing_expires_secs));
        tracing::info!("Signed serving URLs enabled");
    }
    let server = Arc::new(builder.build());

    // --- Build router ---
    let app: Router = routes().with_state(server);

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
    axum::serve(listener, app).await?;

    Ok(())
}

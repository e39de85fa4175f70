//! Tethered Camera Capture Server
//!
//! Main entry point for the capture server application.

use std::sync::Arc;
use std::time::Duration;
use tether_camserver::{
    camera_gateway::{CameraGateway, GphotoTransport},
    job_registry::JobRegistry,
    session_store::SessionStore,
    state::{AppConfig, AppState},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_camserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting capture server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        projects_root = %config.projects_root.display(),
        capture_dir = %config.default_capture_dir.display(),
        calibration_dir = %config.calibration_root.display(),
        job_retention_secs = config.job_retention_secs,
        "Configuration loaded"
    );

    // Camera gateway over the gphoto2 CLI transport
    let transport = GphotoTransport::new(config.capture_timeout_secs);
    let gateway = Arc::new(CameraGateway::new(Box::new(transport)));
    tracing::info!("CameraGateway initialized");

    // Try an eager connect so the first capture request does not pay for it;
    // a missing camera is fine at startup
    match gateway.connect().await {
        Ok(_) => tracing::info!("Camera connected at startup"),
        Err(e) => tracing::warn!(error = %e, "No camera at startup, connect later via the API"),
    }

    let sessions = Arc::new(SessionStore::new(config.projects_root.clone()));
    tracing::info!("SessionStore initialized");

    let registry = Arc::new(
        JobRegistry::new(
            gateway.clone(),
            sessions.clone(),
            config.default_capture_dir.clone(),
            config.calibration_root.clone(),
        )
        .with_retention(Duration::from_secs(config.job_retention_secs)),
    );
    tracing::info!("JobRegistry initialized");

    // Create application state
    let state = AppState {
        config: config.clone(),
        gateway,
        sessions,
        registry,
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#![allow(dead_code, unused)]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use dotenvy::dotenv;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod app_state;
mod clients;
mod config;
mod core;
mod db;
mod error;
mod utils;

use crate::api::approval::ApprovalDoc;
use crate::api::map::MapDoc;
use crate::api::submission::SubmissionDoc;
use crate::app_state::AppState;
use crate::config::Config;
use crate::db::pool::get_db_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    Config::init();
    let config = Config::get();

    std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .with_writer(non_blocking)
        .init();

    std::fs::create_dir_all(&config.photo_storage_path)
        .context("Failed to create photo storage directory")?;

    let pool = get_db_pool(&config)
        .await
        .context("Failed to connect to the database")?;

    // one HTTP client for all external services, bounded per request
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let state = AppState::new(pool.clone(), Arc::clone(&config), http);

    let merged_doc = SubmissionDoc::openapi()
        .merge_from(MapDoc::openapi())
        .merge_from(ApprovalDoc::openapi());

    let app = Router::new()
        .merge(api::health::health_routes())
        .merge(api::submission::submission_routes())
        .merge(api::map::map_routes())
        .merge(api::approval::approval_routes())
        .nest_service("/media", ServeDir::new(&config.photo_storage_path))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", merged_doc.clone()))
        .merge(RapiDoc::with_openapi("/api-docs/rapidoc.json", merged_doc).path("/rapidoc"))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    run_server(app, shutdown_tx, pool).await;
    println!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal(mut shutdown_rx: broadcast::Receiver<()>, pool: PgPool) {
    tokio::select! {
        _ = signal::ctrl_c() => println!("Received Ctrl+C, shutting down..."),
        _ = shutdown_rx.recv() => println!("Received shutdown signal."),
    }
    println!("🛠️ Closing database pool...");
    pool.close().await;
    println!("✅ Database pool closed. Server shutting down.");
}

async fn run_server(app: Router, shutdown_tx: broadcast::Sender<()>, pool: PgPool) {
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    println!("Server running at http://{}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    let shutdown = shutdown_signal(shutdown_tx.subscribe(), pool.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server encountered an error");
}

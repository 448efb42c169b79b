use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tripsync_realtime::Hub;
use tripsync_realtime::gateway::{self, GatewayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripsync=debug,tower_http=debug".into()),
        )
        .init();

    let jwt_secret = std::env::var("TRIPSYNC_JWT_SECRET").unwrap_or_else(|_| {
        warn!("TRIPSYNC_JWT_SECRET not set, using the development secret");
        "dev-secret-change-me".into()
    });
    let host = std::env::var("TRIPSYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TRIPSYNC_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let hub = Hub::new();

    let health = Router::new()
        .route("/health", get(health))
        .with_state(hub.clone());

    let app = Router::new()
        .merge(gateway::router(GatewayState { hub, jwt_secret }))
        .merge(health)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("TripSync realtime server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(hub): State<Hub>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "topics": hub.topic_count() }))
}

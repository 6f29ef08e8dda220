use crate::snapshot::SharedSnapshot;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Read-only view of the live snapshot.
pub fn router(snapshot: SharedSnapshot) -> Router {
    Router::new()
        .route("/", get(get_values))
        .with_state(snapshot)
        .layer(CorsLayer::permissive())
}

async fn get_values(State(snapshot): State<SharedSnapshot>) -> Response {
    match serde_json::to_vec(&snapshot.read_all()) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!("Failed to serialise snapshot: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Solar Panels: serialisation failed").into_response()
        }
    }
}

/// Binds the web interface on all addresses.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let socket_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(socket_addr).await?;
    info!("Serving snapshot on http://{socket_addr}/");
    Ok(listener)
}

/// Serves the router until the listener fails.
pub async fn serve(listener: TcpListener, snapshot: SharedSnapshot) -> anyhow::Result<()> {
    axum::serve(listener, router(snapshot)).await?;
    Ok(())
}

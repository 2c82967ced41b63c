//! WebSocket endpoint for notification clients
//!
//! Clients connect to `ws://<host>:<port>/ws` and speak the protocol from
//! [`super::protocol`].

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::client::{handle_socket, ClientDeps};

/// Build the notification router.
pub fn notification_router(deps: ClientDeps) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(deps)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(deps): State<ClientDeps>,
) -> impl IntoResponse {
    info!("New notification WebSocket connection");
    ws.on_upgrade(move |socket| handle_socket(socket, deps))
}

//! Control socket server: the only way an external client affects the
//! simulation. HTTP routes carry control commands, a WebSocket streams
//! world snapshots, and a plain TCP listener on a separate port is the
//! message-bus endpoint agent processes connect to.

pub mod net;
pub mod routes;
pub mod state;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::coordinator::handle::CoordinatorHandle;

use routes::api_router;
use state::{spawn_snapshot_relay, AppState};
use websocket::ws_handler;

/// Run the control server and the bus listener until the process exits
pub async fn run_server(
    config: Config,
    handle: CoordinatorHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = handle.bus();
    let bus_bind = config.runtime.bus_bind.clone();
    let control_bind = config.control.bind.clone();

    let state = Arc::new(AppState::new(handle, config.control.broadcast_capacity));
    spawn_snapshot_relay(Arc::clone(&state));

    tokio::spawn(async move {
        if let Err(e) = net::run_bus_listener(&bus_bind, bus).await {
            log::error!("bus listener failed: {}", e);
        }
    });

    // CORS so a browser-hosted front-end can reach the API directly.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .merge(api_router())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&control_bind).await?;
    log::info!("control server on http://{}", control_bind);
    axum::serve(listener, app).await?;

    Ok(())
}

//! REST routes of the control protocol.
//!
//! Every command route answers with the structured `{status, detail}` reply
//! regardless of outcome; errors are data, not transport failures.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentKind, Position};
use crate::coordinator::CoordinatorState;
use crate::protocol::{CommandReply, ControlCommand};
use crate::store::WorldView;

use super::state::AppState;

/// Create the API router
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sim/start", post(start))
        .route("/api/sim/stop", post(stop))
        .route("/api/agents/spawn", post(spawn_agent))
        .route("/api/params", post(set_parameter))
        .route("/api/food", post(introduce_food))
        .route("/api/state", get(get_state))
        .route("/api/snapshot", get(get_snapshot))
}

async fn start(State(state): State<Arc<AppState>>) -> Json<CommandReply> {
    Json(state.send_command(ControlCommand::Start).await)
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<CommandReply> {
    Json(state.send_command(ControlCommand::Stop).await)
}

#[derive(Debug, Deserialize)]
struct SpawnRequest {
    kind: AgentKind,
    #[serde(default)]
    position: Option<Position>,
}

async fn spawn_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpawnRequest>,
) -> Json<CommandReply> {
    Json(
        state
            .send_command(ControlCommand::SpawnAgent {
                kind: request.kind,
                position: request.position,
            })
            .await,
    )
}

#[derive(Debug, Deserialize)]
struct ParameterRequest {
    name: String,
    value: f64,
}

async fn set_parameter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ParameterRequest>,
) -> Json<CommandReply> {
    Json(
        state
            .send_command(ControlCommand::SetParameter {
                name: request.name,
                value: request.value,
            })
            .await,
    )
}

#[derive(Debug, Deserialize)]
struct FoodRequest {
    position: Position,
    amount: u32,
}

async fn introduce_food(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FoodRequest>,
) -> Json<CommandReply> {
    Json(
        state
            .send_command(ControlCommand::IntroduceFood {
                position: request.position,
                amount: request.amount,
            })
            .await,
    )
}

#[derive(Debug, Serialize)]
struct StateResponse {
    state: CoordinatorState,
}

async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(StateResponse {
        state: state.coordinator_state().await,
    })
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<WorldView>,
}

async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<SnapshotResponse> {
    match state.latest_snapshot().await {
        Some(snapshot) => Json(SnapshotResponse {
            available: true,
            snapshot: Some((*snapshot).clone()),
        }),
        None => Json(SnapshotResponse {
            available: false,
            snapshot: None,
        }),
    }
}

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::actors::RelayStatus;
use crate::errors::RelayError;
use crate::routes::AppState;

/// `GET /api/status`
pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<RelayStatus>, RelayError> {
    state.relay.status().await.map(Json)
}

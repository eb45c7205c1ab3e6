use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use common::types::MeetingId;
use signaling_protocol::TransportConfig;
use tracing::instrument;

use crate::errors::RelayError;
use crate::relay::MeetingInfo;
use crate::routes::AppState;

/// `GET /api/meetings/:meeting_id`
///
/// Lets a client check a meeting exists (and whether it is locked) before
/// opening a socket.
#[instrument(skip_all, name = "relay.api.get_meeting")]
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<MeetingInfo>, RelayError> {
    let meeting_id = MeetingId::parse(&raw_id)
        .map_err(|e| RelayError::Validation(format!("Invalid meeting id: {e}")))?;
    state
        .relay
        .meeting_info(meeting_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| RelayError::MeetingNotFound(meeting_id.to_string()))
}

/// `GET /api/transport-config`
pub async fn get_transport_config(State(state): State<Arc<AppState>>) -> Json<TransportConfig> {
    Json(state.transport.clone())
}

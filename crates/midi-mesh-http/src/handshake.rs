//! `POST /network/handshake` (spec.md §6). Symmetric: the responder mirrors
//! its own identity and device list back to the caller.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use midi_mesh_proto::{HandshakeDeviceView, HandshakeRequest, HandshakeResponse, Owner, PROTOCOL_VERSION};
use tracing::info;

use crate::state::AppState;

pub async fn handshake(
    State(state): State<AppState>,
    Json(request): Json<HandshakeRequest>,
) -> Result<Json<HandshakeResponse>, StatusCode> {
    info!(peer = %request.node_id, peer_name = %request.node_name, "Received handshake request");

    let devices = state.inner.registry.all_devices().await;
    let devices: Vec<HandshakeDeviceView> = devices
        .into_iter()
        .filter(|d| d.owner == Owner::Local)
        .map(|d| HandshakeDeviceView {
            id: d.id,
            name: d.name,
            device_type: d.device_type,
        })
        .collect();

    Ok(Json(HandshakeResponse {
        node_id: state.inner.node_id,
        node_name: state.inner.node_name.clone(),
        udp_endpoint: state.inner.udp_endpoint.clone(),
        version: PROTOCOL_VERSION.to_string(),
        devices,
    }))
}

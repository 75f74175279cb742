//! Read-only JSON views over core state (spec.md §6). Every handler reads
//! through async-aware locks only — none of this blocks a worker thread.

use axum::extract::State;
use axum::Json;
use midi_mesh_proto::Owner;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn node_info(State(state): State<AppState>) -> Json<Value> {
    let devices = state.inner.registry.all_devices().await;
    let local_devices = devices.iter().filter(|d| d.owner == Owner::Local).count();

    Json(json!({
        "uuid": state.inner.node_id,
        "name": state.inner.node_name,
        "hostname": state.inner.hostname,
        "http_port": state.inner.http_port,
        "udp_port": state.inner.udp_port,
        "local_devices": local_devices,
        "total_devices": devices.len(),
    }))
}

pub async fn midi_devices(State(state): State<AppState>) -> Json<Value> {
    let devices = state.inner.registry.all_devices().await;
    let devices: Vec<Value> = devices
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "type": d.device_type,
                "is_local": d.owner == Owner::Local,
                "owner_node": d.owner.node_id(),
            })
        })
        .collect();
    Json(json!({ "devices": devices }))
}

pub async fn network_mesh(State(state): State<AppState>) -> Json<Value> {
    let connections = state.inner.pool.all().await;
    let connected_nodes = connections
        .iter()
        .filter(|c| c.state() == midi_mesh_core::ConnectionState::Connected)
        .count();

    let nodes: Vec<Value> = connections
        .iter()
        .map(|c| {
            let info = c.peer_info();
            json!({
                "uuid": info.uuid,
                "name": info.name,
                "ip": info.ip,
                "http_port": info.http_port,
                "udp_port": info.udp_port,
                "devices": c.devices(),
            })
        })
        .collect();

    Json(json!({
        "connected_nodes": connected_nodes,
        "total_nodes": connections.len(),
        "total_devices": state.inner.registry.len().await,
        "nodes": nodes,
    }))
}

pub async fn network_stats(State(state): State<AppState>) -> Json<Value> {
    let router_stats = state.inner.router.statistics();
    let mesh_stats = state.inner.mesh.statistics();

    Json(json!({
        "router": {
            "local_sent": router_stats.local_sent,
            "local_received": router_stats.local_received,
            "network_sent": router_stats.network_sent,
            "network_received": router_stats.network_received,
            "routing_errors": router_stats.routing_errors,
            "unknown_device": router_stats.unknown_device,
        },
        "mesh": {
            "peers_appeared": mesh_stats.peers_appeared,
            "peers_gone": mesh_stats.peers_gone,
            "self_connects_suppressed": mesh_stats.self_connects_suppressed,
        },
        "uptime_seconds": state.uptime_secs(),
    }))
}

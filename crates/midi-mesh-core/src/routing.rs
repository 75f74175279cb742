//! Fast device → owner lookup, denormalised from the registry (spec.md §4.13).

use std::collections::HashMap;

use midi_mesh_proto::{DeviceId, DeviceType, Owner};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device_id: DeviceId,
    pub owner: Owner,
    pub name: String,
    pub device_type: DeviceType,
}

#[derive(Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<DeviceId, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the route for `route.device_id` (I6: at most one
    /// route per device id — a second add simply overwrites the first).
    pub async fn add_route(&self, route: Route) {
        self.routes.write().await.insert(route.device_id, route);
    }

    pub async fn remove_route(&self, id: DeviceId) -> bool {
        self.routes.write().await.remove(&id).is_some()
    }

    pub async fn get_route(&self, id: DeviceId) -> Option<Route> {
        self.routes.read().await.get(&id).cloned()
    }

    pub async fn all_routes(&self) -> Vec<Route> {
        self.routes.read().await.values().cloned().collect()
    }
}

//! Unified local + remote MIDI device catalogue (spec.md §4.12).

use std::collections::HashMap;

use midi_mesh_backend::OpaqueToken;
use midi_mesh_proto::{DeviceId, DeviceType, NodeId, Owner};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub owner: Owner,
    pub backend_handle: Option<OpaqueToken>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_local(&self, id: DeviceId, name: String, device_type: DeviceType, handle: Option<OpaqueToken>) {
        self.devices.write().await.insert(
            id,
            DeviceRecord {
                id,
                name,
                device_type,
                owner: Owner::Local,
                backend_handle: handle,
            },
        );
    }

    pub async fn add_remote(&self, owner: NodeId, id: DeviceId, name: String, device_type: DeviceType) {
        self.devices.write().await.insert(
            id,
            DeviceRecord {
                id,
                name,
                device_type,
                owner: Owner::Remote(owner),
                backend_handle: None,
            },
        );
    }

    pub async fn remove_device(&self, id: DeviceId) -> bool {
        self.devices.write().await.remove(&id).is_some()
    }

    /// Removes every device owned by `owner` (used when a peer drops out of
    /// Connected, upholding I5) and returns the removed ids.
    pub async fn remove_all_from(&self, owner: NodeId) -> Vec<DeviceId> {
        let mut devices = self.devices.write().await;
        let removed: Vec<DeviceId> = devices
            .values()
            .filter(|d| d.owner == Owner::Remote(owner))
            .map(|d| d.id)
            .collect();
        for id in &removed {
            devices.remove(id);
        }
        removed
    }

    pub async fn get(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.devices.read().await.get(&id).cloned()
    }

    pub async fn all_devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }
}

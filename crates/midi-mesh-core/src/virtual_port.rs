//! Wraps a remote device behind the same interface a local port uses, so
//! the router (and anything iterating "all outputs") stays source-agnostic
//! (spec.md §4.15).

use std::sync::Arc;

use midi_mesh_backend::{BackendError, OutputPort};
use midi_mesh_proto::DeviceId;

use crate::router::MidiRouter;

/// `send(bytes)` on this port is equivalent to `MidiRouter.send(device_id, bytes)`.
pub struct VirtualMidiPort {
    device_id: DeviceId,
    router: Arc<MidiRouter>,
    runtime: tokio::runtime::Handle,
}

impl VirtualMidiPort {
    pub fn new(device_id: DeviceId, router: Arc<MidiRouter>, runtime: tokio::runtime::Handle) -> Self {
        Self { device_id, router, runtime }
    }
}

impl OutputPort for VirtualMidiPort {
    fn send(&self, bytes: &[u8]) -> Result<(), BackendError> {
        let router = Arc::clone(&self.router);
        let device_id = self.device_id;
        let bytes = bytes.to_vec();
        self.runtime.block_on(async move {
            router.send(device_id, &bytes).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::routing::{Route, RoutingTable};
    use midi_mesh_proto::{DeviceType, NodeId, Owner};

    #[tokio::test]
    async fn send_dispatches_through_router() {
        let self_id = NodeId::new_v4();
        let peer = NodeId::new_v4();
        let registry = Arc::new(DeviceRegistry::new());
        let routing = Arc::new(RoutingTable::new());
        registry.add_remote(peer, DeviceId(3), "Remote".into(), DeviceType::Output).await;
        routing
            .add_route(Route {
                device_id: DeviceId(3),
                owner: Owner::Remote(peer),
                name: "Remote".into(),
                device_type: DeviceType::Output,
            })
            .await;
        let router = Arc::new(MidiRouter::new(self_id, routing, registry));

        let handle = tokio::runtime::Handle::current();
        let port = VirtualMidiPort::new(DeviceId(3), Arc::clone(&router), handle);

        // send() blocks on the current runtime; spawn_blocking avoids
        // deadlocking the single-threaded test runtime on block_on.
        tokio::task::spawn_blocking(move || port.send(&[0x90, 0x40, 0x7F]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(router.statistics().network_sent, 1);
    }
}

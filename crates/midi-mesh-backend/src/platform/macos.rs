//! CoreMIDI integration point (unimplemented — see module docs).

use tracing::warn;

use crate::{BackendDeviceInfo, BackendError, InputCallback, InputSubscription, MidiBackend, OpaqueToken, OutputPort};

pub struct CoreMidiBackend;

impl CoreMidiBackend {
    pub fn new() -> Self {
        warn!("CoreMIDI backend not built in this mesh — devices will not enumerate");
        Self
    }
}

impl Default for CoreMidiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for CoreMidiBackend {
    fn enumerate(&self) -> Vec<BackendDeviceInfo> {
        Vec::new()
    }

    fn open_output(&self, _token: OpaqueToken) -> Result<Box<dyn OutputPort>, BackendError> {
        Err(BackendError::Unsupported)
    }

    fn open_input(&self, _token: OpaqueToken, _callback: InputCallback) -> Result<Box<dyn InputSubscription>, BackendError> {
        Err(BackendError::Unsupported)
    }
}

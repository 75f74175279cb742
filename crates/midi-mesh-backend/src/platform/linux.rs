//! ALSA sequencer integration point (unimplemented — see module docs).

use tracing::warn;

use crate::{BackendDeviceInfo, BackendError, InputCallback, InputSubscription, MidiBackend, OpaqueToken, OutputPort};

pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        warn!("ALSA MIDI backend not built in this mesh — devices will not enumerate");
        Self
    }
}

impl Default for AlsaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for AlsaBackend {
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

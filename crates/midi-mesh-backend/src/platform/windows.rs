//! WinMM/teVirtualMIDI integration point (unimplemented — see module docs).

use tracing::warn;

use crate::{BackendDeviceInfo, BackendError, InputCallback, InputSubscription, MidiBackend, OpaqueToken, OutputPort};

pub struct WinMmBackend;

impl WinMmBackend {
    pub fn new() -> Self {
        warn!("WinMM/teVirtualMIDI backend not built in this mesh — devices will not enumerate");
        Self
    }
}

impl Default for WinMmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for WinMmBackend {
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

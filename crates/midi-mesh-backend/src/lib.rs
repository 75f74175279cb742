//! `MidiBackend` — the host OS MIDI subsystem, abstracted (spec.md §1).
//!
//! This is deliberately out of the specification's scope: the real
//! platform modules below are thin stubs documenting where ALSA/CoreMIDI/
//! WinMM integration would live. `MockMidiBackend` is the implementation
//! actually exercised by `midi-mesh-core`'s tests and by nodes running
//! with no attached hardware.

pub mod platform;

use std::sync::{Arc, Mutex};

use midi_mesh_proto::DeviceType;

/// Opaque platform handle correlating a `DeviceRecord` to backend-internal
/// state (an ALSA port address, a CoreMIDI endpoint ref, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDeviceInfo {
    pub token: OpaqueToken,
    pub name: String,
    pub device_type: DeviceType,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("device not found")]
    NotFound,
    #[error("backend unsupported on this platform")]
    Unsupported,
    #[error("I/O error: {0}")]
    Io(String),
}

/// A callback invoked on the backend's real-time input thread. Per
/// spec.md §5 it must not allocate, block, or be called while holding a
/// lock — implementations should do nothing but hand the bytes off to a
/// lock-free or short-critical-section queue.
pub type InputCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A live output port; `send` pushes raw MIDI bytes (including SysEx framing).
pub trait OutputPort: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<(), BackendError>;
}

/// A live input subscription; dropping it (or calling `close`) stops delivery.
pub trait InputSubscription: Send + Sync {
    fn close(&self);
}

/// Capability set {enumerate devices, open input, open output} (spec.md §9).
pub trait MidiBackend: Send + Sync {
    fn enumerate(&self) -> Vec<BackendDeviceInfo>;
    fn open_output(&self, token: OpaqueToken) -> Result<Box<dyn OutputPort>, BackendError>;
    fn open_input(
        &self,
        token: OpaqueToken,
        callback: InputCallback,
    ) -> Result<Box<dyn InputSubscription>, BackendError>;
}

/// Returns the platform-appropriate backend, or the mock if none is built
/// for this target (mirrors the teacher's `create_virtual_device` fallback).
pub fn create_backend() -> Box<dyn MidiBackend> {
    #[cfg(target_os = "linux")]
    {
        Box::new(platform::linux::AlsaBackend::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(platform::macos::CoreMidiBackend::new())
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(platform::windows::WinMmBackend::new())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Box::new(MockMidiBackend::new())
    }
}

struct MockOutput {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl OutputPort for MockOutput {
    fn send(&self, bytes: &[u8]) -> Result<(), BackendError> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

struct MockInputSubscription;

impl InputSubscription for MockInputSubscription {
    fn close(&self) {}
}

/// In-memory backend for tests and headless nodes. Devices are
/// preconfigured via `with_device`; `deliver` simulates hardware pushing
/// bytes into a registered input callback.
pub struct MockMidiBackend {
    devices: Mutex<Vec<BackendDeviceInfo>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    callbacks: Mutex<Vec<(OpaqueToken, InputCallback)>>,
}

impl Default for MockMidiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMidiBackend {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device(self, token: OpaqueToken, name: impl Into<String>, device_type: DeviceType) -> Self {
        self.devices.lock().unwrap().push(BackendDeviceInfo {
            token,
            name: name.into(),
            device_type,
        });
        self
    }

    /// Simulates hardware delivering `bytes` on the input port identified by `token`.
    pub fn deliver(&self, token: OpaqueToken, bytes: &[u8]) {
        for (t, cb) in self.callbacks.lock().unwrap().iter() {
            if *t == token {
                cb(bytes);
            }
        }
    }

    /// All bytes ever sent to any output port opened on this backend.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl MidiBackend for MockMidiBackend {
    fn enumerate(&self) -> Vec<BackendDeviceInfo> {
        self.devices.lock().unwrap().clone()
    }

    fn open_output(&self, token: OpaqueToken) -> Result<Box<dyn OutputPort>, BackendError> {
        if !self.devices.lock().unwrap().iter().any(|d| d.token == token) {
            return Err(BackendError::NotFound);
        }
        Ok(Box::new(MockOutput {
            sent: Arc::clone(&self.sent),
        }))
    }

    fn open_input(
        &self,
        token: OpaqueToken,
        callback: InputCallback,
    ) -> Result<Box<dyn InputSubscription>, BackendError> {
        if !self.devices.lock().unwrap().iter().any(|d| d.token == token) {
            return Err(BackendError::NotFound);
        }
        self.callbacks.lock().unwrap().push((token, callback));
        Ok(Box::new(MockInputSubscription))
    }
}

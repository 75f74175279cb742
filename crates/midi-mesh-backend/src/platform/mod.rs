//! Real platform MIDI I/O is out of scope for this specification
//! (spec.md §1 names `MidiBackend` an external collaborator). These
//! modules are stubs marking the integration points a full build would
//! fill in with ALSA / CoreMIDI / WinMM, matching the shape of the
//! teacher's per-OS `midi-device` implementations.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

//! rf-audio: the realtime I/O boundary (spec §4.6/§4.7).
//!
//! - `midi_ring`: the lock-free SPSC MIDI event ring between the device
//!   thread and the render thread.
//! - `device_sink`: the pull-model `Sink` the platform audio backend
//!   drives — a live `cpal` stream or an offline, explicitly-serviced
//!   renderer for file export.
//! - `device`: output device/host enumeration.
//! - `thread_priority`: platform real-time thread priority elevation for
//!   the audio callback thread.

mod device;
pub mod device_sink;
mod error;
pub mod midi_ring;
pub mod thread_priority;

pub use device::*;
pub use device_sink::{slice_frames_for, DeviceSink, FillCallback, OfflineSink, Sink};
pub use error::*;
pub use midi_ring::{MidiMessage, MidiRing, MAX_MSG};

//! audio - ALSA playback path for the virtual microphone sink.

mod alsa_device;
pub mod sink;

pub use alsa_device::AlsaParams;
pub use sink::{DeviceFactory, PcmDevice, PlaybackSink, SinkConfig, WriteError};

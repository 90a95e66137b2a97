//! Single-period blocking playback sink for inbound stream audio.
//!
//! Frames pushed by the router are copied into one period-sized buffer
//! and written synchronously. There is no queueing and no backpressure;
//! recovery is limited to re-preparing the device after an underrun or a
//! busy condition. Device errors never propagate past this module.

use alsa::pcm::PCM;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::alsa_device::{self, AlsaParams};
use crate::error::VmicError;

/// Playback device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// ALSA playback device name (e.g. "default", "hw:0,1,4")
    pub device: String,
    /// Desired sample rate (may be negotiated by hardware)
    pub sample_rate: u32,
    /// Desired channel count
    pub channels: u32,
    /// Desired period size in frames
    pub period_frames: usize,
    /// Periods to buffer before the device actually starts playing
    pub start_threshold_periods: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            device: "hw:0,1,4".to_string(),
            sample_rate: 16000,
            channels: 1,
            period_frames: 1870,
            start_threshold_periods: 20,
        }
    }
}

/// Classified outcome of a failed interleaved write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("underrun")]
    Underrun,
    #[error("device busy")]
    Busy,
    #[error("{0}")]
    Other(String),
}

/// The seam between the sink and the PCM device, so tests can stand in
/// for ALSA hardware.
pub trait PcmDevice {
    /// One blocking interleaved write. Returns frames written.
    fn writei(&mut self, buf: &[i16]) -> std::result::Result<usize, WriteError>;
    /// Re-prepare the device after an xrun.
    fn prepare(&mut self) -> Result<()>;
    /// Drain pending samples before close.
    fn drain(&mut self) -> Result<()>;
}

/// Production device: an open, configured, started ALSA PCM handle.
pub struct AlsaDevice {
    pcm: PCM,
}

impl PcmDevice for AlsaDevice {
    fn writei(&mut self, buf: &[i16]) -> std::result::Result<usize, WriteError> {
        let io = self
            .pcm
            .io_i16()
            .map_err(|e| WriteError::Other(e.to_string()))?;
        io.writei(buf).map_err(|e| match e.errno() {
            libc::EPIPE => WriteError::Underrun,
            libc::EAGAIN => WriteError::Busy,
            _ => WriteError::Other(e.to_string()),
        })
    }

    fn prepare(&mut self) -> Result<()> {
        Ok(self.pcm.prepare()?)
    }

    fn drain(&mut self) -> Result<()> {
        Ok(self.pcm.drain()?)
    }
}

/// Creates the device a [`PlaybackSink`] plays through. The adapter holds
/// one of these so tests can substitute a mock for real hardware.
pub type DeviceFactory =
    Box<dyn FnMut(&SinkConfig) -> crate::Result<(Box<dyn PcmDevice>, AlsaParams)>>;

/// Open the configured ALSA device. The default [`DeviceFactory`].
pub fn open_device(config: &SinkConfig) -> crate::Result<(Box<dyn PcmDevice>, AlsaParams)> {
    let (pcm, params) = alsa_device::open_playback(config)?;
    Ok((Box::new(AlsaDevice { pcm }) as Box<dyn PcmDevice>, params))
}

/// Session-scoped playback sink: one device, one period buffer.
pub struct PlaybackSink {
    device: Box<dyn PcmDevice>,
    /// Interleaved samples for exactly one period.
    buffer: Vec<i16>,
    closed: bool,
}

impl PlaybackSink {
    pub fn new(device: Box<dyn PcmDevice>, params: &AlsaParams) -> Self {
        let samples = params.period_size * params.channels as usize;
        log::info!(
            "Playback sink ready: rate={}, ch={}, period={} frames",
            params.sample_rate,
            params.channels,
            params.period_size,
        );
        Self {
            device,
            buffer: vec![0i16; samples],
            closed: false,
        }
    }

    /// Capacity of the period buffer in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.buffer.len() * 2
    }

    /// Play one frame of interleaved 16-bit little-endian PCM bytes.
    ///
    /// The frame must fit in one period; shorter frames are zero-padded.
    /// Exactly one blocking write is issued. Write failures are logged and
    /// swallowed: an underrun or busy device gets one re-preparation, a
    /// hard failure just drops the frame.
    pub fn play(&mut self, frame: &[u8]) -> crate::Result<()> {
        if frame.len() > self.capacity_bytes() {
            return Err(VmicError::FrameTooLarge {
                len: frame.len(),
                capacity: self.capacity_bytes(),
            });
        }
        log::debug!("Received buffer size: {}", frame.len());

        let samples = frame.len() / 2;
        for (dst, src) in self.buffer.iter_mut().zip(frame.chunks_exact(2)) {
            *dst = i16::from_le_bytes([src[0], src[1]]);
        }
        for dst in self.buffer.iter_mut().skip(samples) {
            *dst = 0;
        }

        match self.device.writei(&self.buffer) {
            Ok(frames) => log::trace!("Wrote {} frames", frames),
            Err(WriteError::Underrun) => {
                log::warn!("PCM write underrun, re-preparing device");
                if let Err(e) = self.device.prepare() {
                    log::error!("Failed to recover PCM playback: {}", e);
                }
            }
            Err(WriteError::Busy) => {
                log::warn!("PCM device busy, re-preparing device");
                if let Err(e) = self.device.prepare() {
                    log::error!("Failed to recover PCM playback: {}", e);
                }
            }
            Err(WriteError::Other(msg)) => {
                log::error!("Can't write to PCM device: {}", msg);
            }
        }
        Ok(())
    }

    /// Drain pending samples. Idempotent; also invoked on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.device.drain() {
            log::error!("Failed to drain PCM device: {}", e);
        }
        log::info!("Playback sink closed");
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.close();
    }
}

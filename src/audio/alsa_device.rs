//! ALSA PCM device setup for virtual-mic playback.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::sink::SinkConfig;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels x sample width)
    pub period_size: usize,
}

/// Open and fully configure a PCM device for playback.
///
/// Commits hardware parameters (interleaved access, S16LE, channel count,
/// nearest rate, nearest period size), reads back what the hardware
/// actually granted, then sets the software start threshold so playback
/// does not start until `start_threshold_periods` periods are buffered,
/// prepares and starts the device.
///
/// Any failing step propagates its error; the device handle is dropped on
/// the way out, so a failed open never leaves a partially configured
/// device behind.
pub fn open_playback(config: &SinkConfig) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(&config.device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for playback", config.device))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(config.channels)?;
        hwp.set_rate_near(config.sample_rate, ValueOr::Nearest)?;
        hwp.set_period_size_near(config.period_frames as Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    // Hold playback until enough periods are queued
    {
        let swp = pcm.sw_params_current()?;
        let threshold = (config.start_threshold_periods * period_size) as Frames;
        swp.set_start_threshold(threshold)
            .with_context(|| "Failed to set start threshold")?;
        pcm.sw_params(&swp)?;
    }
    pcm.prepare()
        .with_context(|| "Failed to prepare PCM device")?;
    pcm.start().with_context(|| "Failed to start PCM device")?;

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA playback: device={}, rate={}, channels={}, period_size={} (~{}us)",
        config.device,
        actual_rate,
        actual_channels,
        period_size,
        period_size as u64 * 1_000_000 / actual_rate.max(1) as u64,
    );

    Ok((pcm, params))
}

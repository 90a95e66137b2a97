//! Hardware smoke test for the virtual-mic playback path.
//!
//! Simulates the speech router driving a full session and plays two
//! seconds of a 440 Hz tone through the playback device. Pass the ALSA
//! device name as the first argument (defaults to "default").

use uuid::Uuid;

use vmic::{
    AudioSource, SessionEndReason, SessionStats, SinkConfig, SpeechRouterHandler, StreamParams,
    StreamStats, Timestamp, Vmic, VmicHandler, VmicParams,
};

struct LoggingHandler;

impl VmicHandler for LoggingHandler {
    fn session_begin(
        &mut self,
        uuid: Uuid,
        src: AudioSource,
        _dst_index: u32,
        params: &StreamParams,
        _timestamp: Timestamp,
    ) {
        log::info!(
            "session {} begin: src={:?}, keyword samples {}..{}",
            uuid,
            src,
            params.keyword_sample_begin,
            params.keyword_sample_end,
        );
    }

    fn stream_begin(&mut self, uuid: Uuid, _src: AudioSource, _timestamp: Timestamp) {
        log::info!("session {} stream begin", uuid);
    }

    fn stream_end(&mut self, uuid: Uuid, stats: &StreamStats, _timestamp: Timestamp) {
        log::info!(
            "session {} stream end: {} frames, {} bytes",
            uuid,
            stats.audio_frames,
            stats.audio_bytes,
        );
    }

    fn session_end(&mut self, uuid: Uuid, _stats: &SessionStats, _timestamp: Timestamp) {
        log::info!("session {} end", uuid);
    }

    fn disconnected(&mut self, uuid: Uuid, retry: bool, _timestamp: Timestamp) {
        log::info!("session {} disconnected, retry={}", uuid, retry);
    }
}

fn tone_frame(rate: u32, offset: usize, samples: usize) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| {
            let t = (offset + i) as f32 / rate as f32;
            let s = (t * 440.0 * std::f32::consts::TAU).sin();
            ((s * 8000.0) as i16).to_le_bytes()
        })
        .collect()
}

fn main() {
    env_logger::init();

    let device = std::env::args().nth(1).unwrap_or_else(|| "default".to_string());
    let config = SinkConfig {
        device,
        ..SinkConfig::default()
    };

    let mut vmic = Vmic::new();
    let handle = vmic.create(VmicParams {
        mask_pii: false,
        sink: config.clone(),
    });
    if !vmic.install_handlers(handle, Box::new(LoggingHandler)) {
        log::error!("failed to install handlers");
        return;
    }

    let uuid = Uuid::new_v4();
    vmic.connected(uuid, Timestamp::now());
    vmic.session_begin(uuid, AudioSource::Microphone, 0, None, None, Timestamp::now());
    vmic.stream_begin(uuid, AudioSource::Microphone, Timestamp::now());

    let total = config.sample_rate as usize * 2;
    let mut sent = 0usize;
    let mut frames = 0u32;
    while sent < total {
        let n = config.period_frames.min(total - sent);
        vmic.stream_audio(&tone_frame(config.sample_rate, sent, n));
        sent += n;
        frames += 1;
    }

    vmic.stream_end(
        uuid,
        &StreamStats {
            audio_frames: frames,
            audio_bytes: (sent * 2) as u32,
        },
        Timestamp::now(),
    );
    vmic.session_end(uuid, &SessionStats::default(), Timestamp::now());

    let mut detect_resume = false;
    vmic.disconnected(
        uuid,
        SessionEndReason::EndOfSpeech,
        false,
        &mut detect_resume,
        Timestamp::now(),
    );
    vmic.destroy(handle);
}

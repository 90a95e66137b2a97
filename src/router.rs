//! Types and the handler interface on the speech-router boundary.
//!
//! The external router owns session and stream state; this module only
//! defines the shapes it hands us. One trait method per router event.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, as stamped by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Read the system clock. Logs and returns 0 if the clock is unreadable.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(d.as_millis() as u64),
            Err(e) => {
                log::error!("unable to get clock: {}", e);
                Timestamp(0)
            }
        }
    }
}

/// Origin of the audio feeding a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    Microphone,
    Handset,
    Text,
}

/// Why the router ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionEndReason {
    #[default]
    EndOfSpeech,
    Terminated,
    Timeout,
    Error,
}

/// Keyword-detection metadata delivered at session begin.
///
/// Offsets are absolute sample positions within the detector's audio
/// buffer; consumers want them relative to `offset_buf_begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordDetectorResult {
    /// First buffered sample the detector retained.
    pub offset_buf_begin: i32,
    /// Absolute sample offset of the keyword start.
    pub offset_kwd_begin: i32,
    /// Absolute sample offset of the keyword end.
    pub offset_kwd_end: i32,
    /// Direction of arrival in degrees (0-359).
    pub doa: u16,
}

/// Session statistics, forwarded to the application untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub reason: SessionEndReason,
    pub ret_code_protocol: i32,
    pub ret_code_internal: i32,
}

/// Stream statistics, forwarded to the application untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub audio_frames: u32,
    pub audio_bytes: u32,
}

/// The interface the speech router invokes on its event thread.
///
/// Implemented by [`crate::Vmic`], which validates the target handle,
/// translates parameters and delegates to the application's
/// [`crate::VmicHandler`]. All methods are synchronous; the router calls
/// them sequentially for the single active session.
pub trait SpeechRouterHandler {
    /// A voice session has started. `detector` is present when a keyword
    /// detector triggered the session; `transcription` carries inbound
    /// text for text-sourced sessions.
    fn session_begin(
        &mut self,
        uuid: Uuid,
        src: AudioSource,
        dst_index: u32,
        detector: Option<&KeywordDetectorResult>,
        transcription: Option<&str>,
        timestamp: Timestamp,
    );

    /// The session has ended.
    fn session_end(&mut self, uuid: Uuid, stats: &SessionStats, timestamp: Timestamp);

    /// The audio transport within the session has started.
    fn stream_begin(&mut self, uuid: Uuid, src: AudioSource, timestamp: Timestamp);

    /// The keyword has passed in the stream.
    fn stream_keyword(&mut self, uuid: Uuid, timestamp: Timestamp);

    /// The audio transport has ended.
    fn stream_end(&mut self, uuid: Uuid, stats: &StreamStats, timestamp: Timestamp);

    /// The session transport has connected. Returns false to refuse it.
    fn connected(&mut self, uuid: Uuid, timestamp: Timestamp) -> bool;

    /// The session transport has disconnected. `retry` tells whether the
    /// router will attempt to reconnect; setting `detect_resume` asks the
    /// keyword detector to resume (left untouched here).
    fn disconnected(
        &mut self,
        uuid: Uuid,
        reason: SessionEndReason,
        retry: bool,
        detect_resume: &mut bool,
        timestamp: Timestamp,
    );

    /// One frame of raw audio: interleaved 16-bit little-endian PCM bytes.
    fn stream_audio(&mut self, frame: &[u8]);
}

//! The simplified handler set consumed by the application.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::{
    AudioSource, KeywordDetectorResult, SessionStats, StreamStats, Timestamp,
};

/// Stream parameters handed to the application at session begin.
///
/// Only the keyword offsets and direction of arrival are derived from the
/// detector result. The remaining fields are fixed placeholders the
/// detector does not report through this path; they keep their slots so
/// the application-facing shape is stable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    /// Samples from the start of buffered audio to the keyword start.
    pub keyword_sample_begin: u32,
    /// Samples from the start of buffered audio to the keyword end.
    pub keyword_sample_end: u32,
    /// Direction of arrival in degrees (0-359).
    pub keyword_doa: u16,
    pub keyword_sensitivity: u16,
    pub keyword_sensitivity_triggered: bool,
    pub keyword_sensitivity_high: u16,
    pub keyword_sensitivity_high_support: bool,
    pub keyword_sensitivity_high_triggered: bool,
    pub dynamic_gain: f64,
    pub linear_confidence: f64,
    pub nonlinear_confidence: i32,
    pub signal_noise_ratio: f64,
    /// True if the session was started by a button press.
    pub push_to_talk: bool,
}

impl StreamParams {
    /// Derive stream parameters from an optional detector result.
    ///
    /// Keyword offsets are rebased from absolute buffer positions to the
    /// start of the buffered audio, wrapping like the underlying counters;
    /// no independent clamping is applied.
    pub fn from_detector(detector: Option<&KeywordDetectorResult>) -> Self {
        let (begin, end, doa) = match detector {
            Some(d) => (
                d.offset_kwd_begin.wrapping_sub(d.offset_buf_begin) as u32,
                d.offset_kwd_end.wrapping_sub(d.offset_buf_begin) as u32,
                d.doa,
            ),
            None => (0, 0, 0),
        };
        StreamParams {
            keyword_sample_begin: begin,
            keyword_sample_end: end,
            keyword_doa: doa,
            keyword_sensitivity: 0,
            keyword_sensitivity_triggered: false,
            keyword_sensitivity_high: 0,
            keyword_sensitivity_high_support: false,
            keyword_sensitivity_high_triggered: false,
            dynamic_gain: 0.0,
            linear_confidence: 0.0,
            nonlinear_confidence: 0,
            signal_noise_ratio: 255.0, // 255 = not reported
            push_to_talk: false,
        }
    }
}

/// Callbacks the application registers through
/// [`crate::Vmic::install_handlers`].
///
/// Every method has a no-op default body, so an application implements
/// only the events it cares about.
pub trait VmicHandler {
    /// A voice session has started.
    fn session_begin(
        &mut self,
        _uuid: Uuid,
        _src: AudioSource,
        _dst_index: u32,
        _params: &StreamParams,
        _timestamp: Timestamp,
    ) {
    }

    /// The session has ended.
    fn session_end(&mut self, _uuid: Uuid, _stats: &SessionStats, _timestamp: Timestamp) {}

    /// An audio stream has started.
    fn stream_begin(&mut self, _uuid: Uuid, _src: AudioSource, _timestamp: Timestamp) {}

    /// The keyword has passed in the stream.
    fn stream_keyword(&mut self, _uuid: Uuid, _timestamp: Timestamp) {}

    /// The audio stream has ended.
    fn stream_end(&mut self, _uuid: Uuid, _stats: &StreamStats, _timestamp: Timestamp) {}

    /// The session has connected.
    fn connected(&mut self, _uuid: Uuid, _timestamp: Timestamp) {}

    /// The session has disconnected. `retry` tells whether the router
    /// will attempt to reconnect.
    fn disconnected(&mut self, _uuid: Uuid, _retry: bool, _timestamp: Timestamp) {}
}

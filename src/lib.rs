//! vmic - virtual microphone handler adapter for a speech router.
//!
//! Translates the router's session/stream lifecycle events into the
//! simplified [`VmicHandler`] callback set an application implements, and
//! plays inbound stream audio out through an ALSA PCM device so the
//! stream is audible as a diagnostic "virtual microphone".
//!
//! The router drives everything: it calls the [`SpeechRouterHandler`]
//! methods on [`Vmic`] sequentially for the single active session, and
//! `Vmic` forwards each event to the installed application handlers.

mod adapter;
pub mod audio;
mod error;
mod handler;
mod router;

pub use adapter::{Vmic, VmicHandle, VmicParams};
pub use audio::{PlaybackSink, SinkConfig};
pub use error::{Result, VmicError};
pub use handler::{StreamParams, VmicHandler};
pub use router::{
    AudioSource, KeywordDetectorResult, SessionEndReason, SessionStats, SpeechRouterHandler,
    StreamStats, Timestamp,
};

//! Handler adapter between the speech router and the application.
//!
//! [`Vmic`] owns a slot arena of handler objects addressed by
//! generation-tagged [`VmicHandle`]s, and implements
//! [`SpeechRouterHandler`] by validating the active handle, translating
//! parameters and delegating to the application's [`VmicHandler`]. A
//! destroyed handle bumps its slot generation, so every outstanding copy
//! of it is rejected afterwards.

use uuid::Uuid;

use crate::audio::sink::{self, DeviceFactory, SinkConfig};
use crate::audio::PlaybackSink;
use crate::handler::{StreamParams, VmicHandler};
use crate::router::{
    AudioSource, KeywordDetectorResult, SessionEndReason, SessionStats, SpeechRouterHandler,
    StreamStats, Timestamp,
};

/// Opaque reference to a handler object inside a [`Vmic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmicHandle {
    index: u32,
    generation: u32,
}

/// Creation parameters for a handler object.
pub struct VmicParams {
    /// Mask personally identifiable content (inbound transcriptions) from
    /// the log.
    pub mask_pii: bool,
    /// Playback device configuration for this handler's sink.
    pub sink: SinkConfig,
}

impl Default for VmicParams {
    fn default() -> Self {
        Self {
            mask_pii: true,
            sink: SinkConfig::default(),
        }
    }
}

struct HandlerEntry {
    mask_pii: bool,
    handlers: Option<Box<dyn VmicHandler>>,
    /// Open between stream begin and disconnect.
    sink: Option<PlaybackSink>,
    sink_config: SinkConfig,
}

struct Slot {
    generation: u32,
    entry: Option<HandlerEntry>,
}

/// The virtual-microphone adapter.
///
/// Create handler objects with [`create`](Vmic::create), register the
/// application callbacks with
/// [`install_handlers`](Vmic::install_handlers), then hand the `Vmic` to
/// the speech router as its [`SpeechRouterHandler`].
pub struct Vmic {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Dispatch target for router events; set by `install_handlers`.
    active: Option<VmicHandle>,
    device_factory: DeviceFactory,
}

fn entry_mut(slots: &mut [Slot], handle: VmicHandle) -> Option<&mut HandlerEntry> {
    let slot = slots.get_mut(handle.index as usize)?;
    if slot.generation != handle.generation {
        return None;
    }
    slot.entry.as_mut()
}

/// Look up the active dispatch target, logging when there is none.
fn active_entry(slots: &mut [Slot], active: Option<VmicHandle>) -> Option<&mut HandlerEntry> {
    let Some(handle) = active else {
        log::error!("no handlers installed");
        return None;
    };
    let entry = entry_mut(slots, handle);
    if entry.is_none() {
        log::error!("invalid handle");
    }
    entry
}

impl Default for Vmic {
    fn default() -> Self {
        Self::new()
    }
}

impl Vmic {
    /// An adapter playing through the real ALSA device.
    pub fn new() -> Self {
        Self::with_device_factory(Box::new(sink::open_device))
    }

    /// An adapter with a custom playback device factory.
    pub fn with_device_factory(device_factory: DeviceFactory) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: None,
            device_factory,
        }
    }

    /// Allocate a handler object. Freed slots are reused under a fresh
    /// generation.
    pub fn create(&mut self, params: VmicParams) -> VmicHandle {
        let entry = HandlerEntry {
            mask_pii: params.mask_pii,
            handlers: None,
            sink: None,
            sink_config: params.sink,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let generation = self.slots[index as usize].generation;
        log::debug!("created handler object {}:{}", index, generation);
        VmicHandle { index, generation }
    }

    /// Update the PII mask of a handler object. Returns false and logs on
    /// an invalid handle.
    pub fn update_mask_pii(&mut self, handle: VmicHandle, enable: bool) -> bool {
        match entry_mut(&mut self.slots, handle) {
            Some(entry) => {
                entry.mask_pii = enable;
                true
            }
            None => {
                log::error!("invalid handle");
                false
            }
        }
    }

    /// Register the application's callbacks and make `handle` the dispatch
    /// target for router events delivered through the
    /// [`SpeechRouterHandler`] impl. Returns false and logs on an invalid
    /// handle.
    pub fn install_handlers(&mut self, handle: VmicHandle, handlers: Box<dyn VmicHandler>) -> bool {
        match entry_mut(&mut self.slots, handle) {
            Some(entry) => {
                entry.handlers = Some(handlers);
                self.active = Some(handle);
                true
            }
            None => {
                log::error!("invalid handle");
                false
            }
        }
    }

    /// Tear down a handler object. Any open sink is drained and closed,
    /// and the handle (all copies of it) becomes permanently invalid.
    pub fn destroy(&mut self, handle: VmicHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            log::error!("invalid handle");
            return false;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            log::error!("invalid handle");
            return false;
        }
        if let Some(mut entry) = slot.entry.take() {
            if let Some(mut sink) = entry.sink.take() {
                sink.close();
            }
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        if self.active == Some(handle) {
            self.active = None;
        }
        log::info!("destroyed handler object {}:{}", handle.index, handle.generation);
        true
    }
}

impl SpeechRouterHandler for Vmic {
    fn session_begin(
        &mut self,
        uuid: Uuid,
        src: AudioSource,
        dst_index: u32,
        detector: Option<&KeywordDetectorResult>,
        transcription: Option<&str>,
        timestamp: Timestamp,
    ) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        let params = StreamParams::from_detector(detector);
        match transcription {
            Some(_) if entry.mask_pii => log::info!("session {} transcription in: ***", uuid),
            Some(text) => log::info!("session {} transcription in: \"{}\"", uuid, text),
            None => {}
        }
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.session_begin(uuid, src, dst_index, &params, timestamp);
        }
    }

    fn session_end(&mut self, uuid: Uuid, stats: &SessionStats, timestamp: Timestamp) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.session_end(uuid, stats, timestamp);
        }
    }

    fn stream_begin(&mut self, uuid: Uuid, src: AudioSource, timestamp: Timestamp) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        if entry.sink.is_none() {
            match (self.device_factory)(&entry.sink_config) {
                Ok((device, params)) => {
                    entry.sink = Some(PlaybackSink::new(device, &params));
                }
                // Playback stays silently non-functional for the stream.
                Err(e) => log::error!("failed to open playback device: {}", e),
            }
        }
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.stream_begin(uuid, src, timestamp);
        }
    }

    fn stream_keyword(&mut self, uuid: Uuid, timestamp: Timestamp) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.stream_keyword(uuid, timestamp);
        }
    }

    fn stream_end(&mut self, uuid: Uuid, stats: &StreamStats, timestamp: Timestamp) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.stream_end(uuid, stats, timestamp);
        }
    }

    fn connected(&mut self, uuid: Uuid, timestamp: Timestamp) -> bool {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return false;
        };
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.connected(uuid, timestamp);
        }
        true
    }

    fn disconnected(
        &mut self,
        uuid: Uuid,
        reason: SessionEndReason,
        retry: bool,
        _detect_resume: &mut bool,
        timestamp: Timestamp,
    ) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        if let Some(mut sink) = entry.sink.take() {
            sink.close();
        }
        log::info!(
            "session {} disconnected: {:?}, retry={}",
            uuid,
            reason,
            retry
        );
        if let Some(handlers) = entry.handlers.as_mut() {
            handlers.disconnected(uuid, retry, timestamp);
        }
    }

    fn stream_audio(&mut self, frame: &[u8]) {
        let Some(entry) = active_entry(&mut self.slots, self.active) else {
            return;
        };
        match entry.sink.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.play(frame) {
                    log::error!("dropping audio frame: {}", e);
                }
            }
            None => log::debug!("audio frame dropped, no playback sink"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::{failing_factory, mock_factory, MockState};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        SessionBegin { begin: u32, end: u32, doa: u16 },
        SessionEnd,
        StreamBegin,
        Keyword,
        StreamEnd,
        Connected,
        Disconnected { retry: bool },
    }

    struct Recorder {
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl VmicHandler for Recorder {
        fn session_begin(
            &mut self,
            _uuid: Uuid,
            _src: AudioSource,
            _dst_index: u32,
            params: &StreamParams,
            _timestamp: Timestamp,
        ) {
            self.events.borrow_mut().push(Event::SessionBegin {
                begin: params.keyword_sample_begin,
                end: params.keyword_sample_end,
                doa: params.keyword_doa,
            });
        }

        fn session_end(&mut self, _uuid: Uuid, _stats: &SessionStats, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::SessionEnd);
        }

        fn stream_begin(&mut self, _uuid: Uuid, _src: AudioSource, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::StreamBegin);
        }

        fn stream_keyword(&mut self, _uuid: Uuid, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::Keyword);
        }

        fn stream_end(&mut self, _uuid: Uuid, _stats: &StreamStats, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::StreamEnd);
        }

        fn connected(&mut self, _uuid: Uuid, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::Connected);
        }

        fn disconnected(&mut self, _uuid: Uuid, retry: bool, _timestamp: Timestamp) {
            self.events.borrow_mut().push(Event::Disconnected { retry });
        }
    }

    fn adapter() -> (Vmic, Rc<RefCell<MockState>>) {
        let (factory, state) = mock_factory();
        (Vmic::with_device_factory(factory), state)
    }

    fn installed_adapter() -> (Vmic, VmicHandle, Rc<RefCell<MockState>>, Rc<RefCell<Vec<Event>>>) {
        let (mut vmic, state) = adapter();
        let handle = vmic.create(VmicParams::default());
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorder = Recorder {
            events: events.clone(),
        };
        assert!(vmic.install_handlers(handle, Box::new(recorder)));
        (vmic, handle, state, events)
    }

    fn le_frame(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn update_mask_pii_toggles_the_stored_flag() {
        let (mut vmic, _) = adapter();
        let handle = vmic.create(VmicParams {
            mask_pii: false,
            sink: SinkConfig::default(),
        });

        assert!(vmic.update_mask_pii(handle, true));
        assert!(vmic.slots[0].entry.as_ref().unwrap().mask_pii);
        assert!(vmic.update_mask_pii(handle, false));
        assert!(!vmic.slots[0].entry.as_ref().unwrap().mask_pii);
    }

    #[test]
    fn operations_on_a_destroyed_handle_are_rejected() {
        let (mut vmic, _) = adapter();
        let handle = vmic.create(VmicParams::default());
        assert!(vmic.destroy(handle));

        assert!(!vmic.update_mask_pii(handle, true));
        assert!(!vmic.install_handlers(handle, Box::new(Recorder {
            events: Rc::new(RefCell::new(Vec::new())),
        })));
        assert!(!vmic.destroy(handle));
    }

    #[test]
    fn slot_reuse_does_not_revive_a_stale_handle() {
        let (mut vmic, _) = adapter();
        let old = vmic.create(VmicParams::default());
        vmic.destroy(old);

        let new = vmic.create(VmicParams::default());
        assert_ne!(old, new);
        assert!(!vmic.update_mask_pii(old, true));
        assert!(vmic.update_mask_pii(new, true));
    }

    #[test]
    fn session_begin_derives_keyword_offsets() {
        let (mut vmic, _, _, events) = installed_adapter();
        let detector = KeywordDetectorResult {
            offset_buf_begin: 1000,
            offset_kwd_begin: 1600,
            offset_kwd_end: 2400,
            doa: 45,
        };
        vmic.session_begin(
            Uuid::new_v4(),
            AudioSource::Microphone,
            0,
            Some(&detector),
            None,
            Timestamp::now(),
        );

        assert_eq!(
            events.borrow().as_slice(),
            &[Event::SessionBegin {
                begin: 600,
                end: 1400,
                doa: 45
            }]
        );
    }

    #[test]
    fn session_begin_without_detector_forwards_zero_offsets() {
        let (mut vmic, _, _, events) = installed_adapter();
        vmic.session_begin(
            Uuid::new_v4(),
            AudioSource::Text,
            0,
            None,
            Some("turn on the lights"),
            Timestamp::now(),
        );

        assert_eq!(
            events.borrow().as_slice(),
            &[Event::SessionBegin {
                begin: 0,
                end: 0,
                doa: 0
            }]
        );
    }

    #[test]
    fn connected_reports_success_only_for_a_live_target() {
        let (mut vmic, _, _, events) = installed_adapter();
        assert!(vmic.connected(Uuid::new_v4(), Timestamp::now()));
        assert_eq!(events.borrow().as_slice(), &[Event::Connected]);

        let (mut bare, _) = adapter();
        assert!(!bare.connected(Uuid::new_v4(), Timestamp::now()));
    }

    #[test]
    fn stream_begin_opens_the_device_once() {
        let (mut vmic, _, state, events) = installed_adapter();
        let uuid = Uuid::new_v4();
        vmic.stream_begin(uuid, AudioSource::Microphone, Timestamp::now());
        vmic.stream_begin(uuid, AudioSource::Microphone, Timestamp::now());

        assert_eq!(state.borrow().opens, 1);
        assert_eq!(
            events.borrow().as_slice(),
            &[Event::StreamBegin, Event::StreamBegin]
        );
    }

    #[test]
    fn device_open_failure_leaves_playback_non_functional() {
        let mut vmic = Vmic::with_device_factory(failing_factory());
        let handle = vmic.create(VmicParams::default());
        let events = Rc::new(RefCell::new(Vec::new()));
        vmic.install_handlers(
            handle,
            Box::new(Recorder {
                events: events.clone(),
            }),
        );

        vmic.stream_begin(Uuid::new_v4(), AudioSource::Microphone, Timestamp::now());
        // Frames are dropped without a sink; events still flow.
        vmic.stream_audio(&le_frame(&[1, 2, 3]));
        vmic.stream_keyword(Uuid::new_v4(), Timestamp::now());

        assert_eq!(
            events.borrow().as_slice(),
            &[Event::StreamBegin, Event::Keyword]
        );
    }

    #[test]
    fn events_after_destroy_are_dropped() {
        let (mut vmic, handle, state, events) = installed_adapter();
        vmic.destroy(handle);

        vmic.stream_begin(Uuid::new_v4(), AudioSource::Microphone, Timestamp::now());
        vmic.stream_audio(&le_frame(&[1]));

        assert_eq!(state.borrow().opens, 0);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn destroy_closes_an_open_sink() {
        let (mut vmic, handle, state, _) = installed_adapter();
        vmic.stream_begin(Uuid::new_v4(), AudioSource::Microphone, Timestamp::now());
        vmic.destroy(handle);

        assert_eq!(state.borrow().drains, 1);
    }

    #[test]
    fn full_session_round_trip() {
        let (mut vmic, _, state, events) = installed_adapter();
        let uuid = Uuid::new_v4();
        let ts = Timestamp::now();

        assert!(vmic.connected(uuid, ts));
        vmic.session_begin(uuid, AudioSource::Microphone, 0, None, None, ts);
        vmic.stream_begin(uuid, AudioSource::Microphone, ts);
        {
            let s = state.borrow();
            let opened = s.opened_with.as_ref().unwrap();
            assert_eq!(opened.sample_rate, 16000);
            assert_eq!(opened.channels, 1);
            assert_eq!(opened.period_frames, 1870);
        }

        vmic.stream_audio(&le_frame(&[10, 20, 30, 40]));
        {
            let s = state.borrow();
            assert_eq!(s.writes.len(), 1);
            assert_eq!(s.writes[0].len(), 1870);
            assert_eq!(&s.writes[0][..4], &[10, 20, 30, 40]);
        }

        vmic.stream_keyword(uuid, ts);
        vmic.stream_end(uuid, &StreamStats::default(), ts);
        vmic.session_end(uuid, &SessionStats::default(), ts);

        let mut detect_resume = false;
        vmic.disconnected(uuid, SessionEndReason::EndOfSpeech, true, &mut detect_resume, ts);
        assert!(!detect_resume);
        assert_eq!(state.borrow().drains, 1);

        assert_eq!(
            events.borrow().as_slice(),
            &[
                Event::Connected,
                Event::SessionBegin {
                    begin: 0,
                    end: 0,
                    doa: 0
                },
                Event::StreamBegin,
                Event::Keyword,
                Event::StreamEnd,
                Event::SessionEnd,
                Event::Disconnected { retry: true },
            ]
        );
    }
}

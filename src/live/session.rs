//! # Live Session Lifecycle
//!
//! One `LiveSession` per browser socket. It owns every resource of a voice
//! conversation and is only ever touched from the socket actor, so none of
//! its state needs locking.
//!
//! ## State Machine:
//! ```text
//! Idle --start--> Connecting --setupComplete--> Active
//!  ^                  |                           |
//!  |                  +------ error ------+       +-- stop / close / error
//!  |                                      v       v
//!  +------------------------------------ Closing (teardown)
//! ```
//!
//! Every path out of `Connecting` or `Active` goes through [`LiveSession::teardown`],
//! which is safe to call in any state, any number of times.
//!
//! ## Stale connects:
//! Connecting happens off the actor. Each `begin` bumps an attempt counter;
//! a connect that completes for an older attempt (the user stopped, or
//! started again) is closed on arrival instead of being attached.

use crate::audio::capture::{AudioFrame, CaptureEncoder, CaptureError, PushOutcome};
use crate::audio::pcm::PlaybackChunk;
use crate::audio::playback::{ChunkId, OutputClock, PlaybackContext};
use crate::audio::transcript::{Role, TurnAccumulator, TurnTranscript};
use crate::config::LiveConfig;
use crate::live::protocol::{LiveEvent, ServerContent};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Error(String),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Error(_) => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Microphone unavailable or capture format unusable
    Device(String),
    /// Upstream connect or socket failure
    Transport(String),
    /// Upstream closed the session
    Closed(Option<String>),
    /// Server is missing configuration (API key)
    Config(String),
    /// Too many concurrent live sessions
    Limit(usize),
    /// A session is already running on this socket
    Busy,
}

impl LiveError {
    /// Machine-readable code sent to the browser.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::Device(_) => "capture_unavailable",
            LiveError::Transport(_) => "transport_error",
            LiveError::Closed(_) => "connection_closed",
            LiveError::Config(_) => "config_error",
            LiveError::Limit(_) => "session_limit",
            LiveError::Busy => "session_busy",
        }
    }
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveError::Device(msg) => write!(f, "audio capture unavailable: {}", msg),
            LiveError::Transport(msg) => write!(f, "connection error: {}", msg),
            LiveError::Closed(Some(reason)) => write!(f, "session closed by remote: {}", reason),
            LiveError::Closed(None) => write!(f, "session closed by remote"),
            LiveError::Config(msg) => write!(f, "server configuration error: {}", msg),
            LiveError::Limit(max) => write!(f, "maximum concurrent live sessions ({}) reached", max),
            LiveError::Busy => write!(f, "a live session is already running"),
        }
    }
}

impl std::error::Error for LiveError {}

/// Capture format the client declares in its `start` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Sending half of an open upstream connection.
pub trait UpstreamLink: Send {
    /// Hand a frame to the link without waiting.
    fn send_frame(&self, frame: AudioFrame) -> PushOutcome;

    /// Release the connection. Must be idempotent.
    fn close(&mut self);
}

pub struct LiveSession {
    id: String,
    settings: LiveConfig,
    clock: Arc<dyn OutputClock>,
    state: SessionState,
    attempt: u64,
    link: Option<Box<dyn UpstreamLink>>,
    capture: Option<CaptureEncoder>,
    playback: Option<PlaybackContext>,
    turn: TurnAccumulator,
    transcript: Vec<TurnTranscript>,
    next_chunk_id: u64,
}

impl LiveSession {
    pub fn new(id: String, settings: LiveConfig, clock: Arc<dyn OutputClock>) -> Self {
        Self {
            id,
            settings,
            clock,
            state: SessionState::Idle,
            attempt: 0,
            link: None,
            capture: None,
            playback: None,
            turn: TurnAccumulator::new(),
            transcript: Vec::new(),
            next_chunk_id: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcript(&self) -> &[TurnTranscript] {
        &self.transcript
    }

    #[cfg(test)]
    pub fn active_chunks(&self) -> usize {
        self.playback.as_ref().map_or(0, |p| p.scheduler().active_len())
    }

    /// Current position of the output timeline, if playback is open.
    pub fn playback_time(&self) -> Option<f64> {
        self.playback.as_ref().map(PlaybackContext::current_time)
    }

    pub fn status_event(&self) -> LiveEvent {
        LiveEvent::SessionStatus {
            session_id: self.id.clone(),
            status: self.state.as_str().to_string(),
        }
    }

    /// Idle → Connecting. Opens capture and playback and returns the attempt
    /// number the pending connect must present to [`attach`](Self::attach).
    pub fn begin(&mut self, request: StartRequest) -> Result<u64, LiveError> {
        if self.state.is_running() {
            return Err(LiveError::Busy);
        }
        if request.sample_rate != self.settings.input_sample_rate || request.channels != 1 {
            return Err(LiveError::Device(format!(
                "capture must be {} Hz mono, got {} Hz with {} channel(s)",
                self.settings.input_sample_rate, request.sample_rate, request.channels
            )));
        }

        self.attempt += 1;
        self.capture = Some(CaptureEncoder::new(
            self.settings.input_sample_rate,
            self.settings.capture_block_samples,
        ));
        self.playback = Some(PlaybackContext::open(
            self.clock.clone(),
            self.settings.output_sample_rate,
        ));
        self.turn.clear();
        self.state = SessionState::Connecting;

        info!(session_id = %self.id, attempt = self.attempt, "Live session connecting");
        Ok(self.attempt)
    }

    /// Whether events tagged with `attempt` still belong to this session.
    pub fn owns(&self, attempt: u64) -> bool {
        attempt == self.attempt && self.state.is_running()
    }

    /// Attach the link produced by a connect. Stale links are closed and rejected.
    pub fn attach(&mut self, attempt: u64, mut link: Box<dyn UpstreamLink>) -> bool {
        if attempt != self.attempt || self.state != SessionState::Connecting {
            debug!(
                session_id = %self.id,
                attempt,
                current = self.attempt,
                "Discarding stale upstream connection"
            );
            link.close();
            return false;
        }
        self.link = Some(link);
        true
    }

    /// Connecting → Active, once the upstream confirmed the setup.
    pub fn activate(&mut self) -> Option<LiveEvent> {
        if self.state != SessionState::Connecting || self.link.is_none() {
            return None;
        }
        self.state = SessionState::Active;
        info!(session_id = %self.id, "Live session active");
        Some(self.status_event())
    }

    /// Encode one capture block and hand it to the link.
    ///
    /// Blocks arriving outside `Active` are discarded (`Ok(None)`).
    pub fn on_capture_block(&mut self, samples: &[f32]) -> Result<Option<PushOutcome>, CaptureError> {
        if self.state != SessionState::Active {
            return Ok(None);
        }
        let (Some(capture), Some(link)) = (self.capture.as_mut(), self.link.as_ref()) else {
            return Ok(None);
        };
        let frame = capture.encode_block(samples)?;
        Ok(Some(link.send_frame(frame)))
    }

    /// Apply one `serverContent` message: audio, then transcription, then
    /// turn completion, then interruption.
    pub fn on_server_content(&mut self, content: ServerContent) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        if self.state != SessionState::Active {
            return events;
        }
        let Some(playback) = self.playback.as_mut() else {
            return events;
        };

        for blob in content.audio_payloads() {
            let chunk = match PlaybackChunk::from_base64(&blob.data, playback.sample_rate()) {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(session_id = %self.id, error = %err, "Skipping undecodable audio chunk");
                    continue;
                }
            };
            let id = ChunkId(self.next_chunk_id);
            self.next_chunk_id += 1;

            let scheduled = playback.enqueue(id, &chunk);
            events.push(LiveEvent::PlaybackStart {
                chunk_id: id,
                start_at: scheduled.start_at,
                duration: scheduled.duration,
                sample_rate: chunk.sample_rate,
                data: blob.data.clone(),
            });
        }

        if let Some(text) = content.input_transcription.as_ref().and_then(|t| t.text.as_deref()) {
            self.turn.push(Some(Role::User), text);
        }
        if let Some(text) = content.output_transcription.as_ref().and_then(|t| t.text.as_deref()) {
            self.turn.push(Some(Role::Model), text);
        }

        if content.turn_complete {
            let turn = self.turn.flush();
            self.transcript.push(turn.clone());
            events.push(turn.into());
        }

        if content.interrupted {
            let chunk_ids = playback.interrupt();
            debug!(session_id = %self.id, stopped = chunk_ids.len(), "Playback interrupted");
            events.push(LiveEvent::PlaybackStop { chunk_ids });
        }

        events
    }

    /// A chunk reached its scheduled end.
    pub fn on_chunk_finished(&mut self, id: ChunkId) -> bool {
        self.playback.as_mut().is_some_and(|p| p.finish(id))
    }

    /// Report an error to the client and tear everything down.
    pub fn fail(&mut self, err: LiveError) -> Vec<LiveEvent> {
        warn!(session_id = %self.id, code = err.code(), error = %err, "Live session failed");
        if self.state.is_running() {
            self.state = SessionState::Error(err.to_string());
        }
        let mut events = vec![LiveEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }];
        events.extend(self.teardown());
        events
    }

    /// Release the link, capture and playback, stopping every scheduled chunk.
    ///
    /// Works from any state, including a half-initialised `Connecting`.
    /// A second call finds nothing to release and returns no events.
    pub fn teardown(&mut self) -> Vec<LiveEvent> {
        let holds_resources = self.link.is_some() || self.capture.is_some() || self.playback.is_some();
        if self.state == SessionState::Idle && !holds_resources {
            return Vec::new();
        }

        self.state = SessionState::Closing;
        let mut events = Vec::new();

        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if let Some(capture) = self.capture.take() {
            debug!(session_id = %self.id, frames = capture.frames_encoded(), "Capture closed");
        }
        if let Some(mut playback) = self.playback.take() {
            let chunk_ids = playback.interrupt();
            if !chunk_ids.is_empty() {
                events.push(LiveEvent::PlaybackStop { chunk_ids });
            }
        }
        self.turn.clear();

        self.state = SessionState::Idle;
        events.push(self.status_event());
        info!(session_id = %self.id, turns = self.transcript.len(), "Live session closed");
        events
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::pcm16_to_le_bytes;
    use crate::audio::playback::testing::ManualClock;
    use crate::config::AppConfig;
    use crate::gemini::types::{Content, Part};
    use crate::live::protocol::Transcription;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        frames: Vec<AudioFrame>,
        closes: usize,
    }

    struct FakeLink(Arc<Mutex<Recorded>>);

    impl UpstreamLink for FakeLink {
        fn send_frame(&self, frame: AudioFrame) -> PushOutcome {
            self.0.lock().unwrap().frames.push(frame);
            PushOutcome::Queued
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closes += 1;
        }
    }

    fn start() -> StartRequest {
        StartRequest { sample_rate: 16_000, channels: 1 }
    }

    fn session(clock: Arc<ManualClock>) -> LiveSession {
        LiveSession::new("s1".to_string(), AppConfig::default().live, clock)
    }

    fn active_session() -> (LiveSession, Arc<ManualClock>, Arc<Mutex<Recorded>>) {
        let clock = Arc::new(ManualClock::at(0.0));
        let mut session = session(clock.clone());
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let attempt = session.begin(start()).unwrap();
        assert!(session.attach(attempt, Box::new(FakeLink(recorded.clone()))));
        assert!(session.activate().is_some());
        (session, clock, recorded)
    }

    /// `seconds` of silence at 24 kHz as a base64 payload.
    fn audio_part(seconds: f64) -> Part {
        let samples = vec![0i16; (24_000.0 * seconds) as usize];
        Part::inline("audio/pcm;rate=24000", STANDARD.encode(pcm16_to_le_bytes(&samples)))
    }

    fn model_audio(parts: Vec<Part>) -> ServerContent {
        ServerContent {
            model_turn: Some(Content { role: Some("model".into()), parts }),
            ..Default::default()
        }
    }

    fn starts(events: &[LiveEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                LiveEvent::PlaybackStart { start_at, .. } => Some(*start_at),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_lifecycle_to_active() {
        let clock = Arc::new(ManualClock::at(0.0));
        let mut session = session(clock);
        assert_eq!(session.state(), &SessionState::Idle);

        let attempt = session.begin(start()).unwrap();
        assert_eq!(session.state(), &SessionState::Connecting);
        // No setupComplete without a link
        assert!(session.activate().is_none());

        let recorded = Arc::new(Mutex::new(Recorded::default()));
        assert!(session.attach(attempt, Box::new(FakeLink(recorded))));
        assert_eq!(
            session.activate(),
            Some(LiveEvent::SessionStatus { session_id: "s1".into(), status: "active".into() })
        );
        assert_eq!(session.begin(start()), Err(LiveError::Busy));
    }

    #[test]
    fn test_wrong_capture_format_is_a_device_error() {
        let mut session = session(Arc::new(ManualClock::at(0.0)));
        let err = session.begin(StartRequest { sample_rate: 48_000, channels: 1 }).unwrap_err();
        assert_eq!(err.code(), "capture_unavailable");
        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.begin(StartRequest { sample_rate: 16_000, channels: 2 }).is_err());
    }

    #[test]
    fn test_capture_blocks_reach_the_link_only_when_active() {
        let clock = Arc::new(ManualClock::at(0.0));
        let mut session = session(clock);
        assert_eq!(session.on_capture_block(&[0.5; 4]), Ok(None));

        let (mut session, _clock, recorded) = active_session();
        assert_eq!(session.on_capture_block(&[0.5; 4096]), Ok(Some(PushOutcome::Queued)));
        assert_eq!(session.on_capture_block(&[0.25; 10]), Ok(Some(PushOutcome::Queued)));
        assert_eq!(session.on_capture_block(&[]), Err(CaptureError::EmptyBlock));

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.frames.len(), 2);
        assert_eq!(recorded.frames[0].seq, 0);
        assert_eq!(recorded.frames[1].seq, 1);
        assert_eq!(recorded.frames[0].sample_count(), 4096);
    }

    #[test]
    fn test_model_audio_is_scheduled_back_to_back() {
        let (mut session, _clock, _) = active_session();
        let events = session.on_server_content(model_audio(vec![audio_part(1.0), audio_part(0.5)]));

        assert_eq!(starts(&events), vec![0.0, 1.0]);
        assert_eq!(session.active_chunks(), 2);
    }

    #[test]
    fn test_all_audio_parts_are_played_in_order() {
        let (mut session, clock, _) = active_session();
        session.on_server_content(model_audio(vec![audio_part(0.5)]));

        clock.set(2.0);
        let events = session.on_server_content(model_audio(vec![
            audio_part(0.25),
            Part::text("ignored"),
            audio_part(0.25),
        ]));
        assert_eq!(starts(&events), vec![2.0, 2.25]);

        let ids: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LiveEvent::PlaybackStart { chunk_id, .. } => Some(*chunk_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![ChunkId(1), ChunkId(2)]);
    }

    #[test]
    fn test_interrupt_stops_everything_and_rewinds() {
        let (mut session, clock, _) = active_session();
        session.on_server_content(model_audio(vec![audio_part(2.0), audio_part(2.0)]));

        clock.set(0.5);
        let events = session.on_server_content(ServerContent { interrupted: true, ..Default::default() });
        assert_eq!(
            events,
            vec![LiveEvent::PlaybackStop { chunk_ids: vec![ChunkId(0), ChunkId(1)] }]
        );
        assert_eq!(session.active_chunks(), 0);

        // Next chunk starts at the clock, not at the old 4.0 cursor
        let events = session.on_server_content(model_audio(vec![audio_part(1.0)]));
        assert_eq!(starts(&events), vec![0.5]);
    }

    #[test]
    fn test_processing_order_within_one_message() {
        let (mut session, _clock, _) = active_session();
        let mut content = model_audio(vec![audio_part(0.5)]);
        content.input_transcription = Some(Transcription { text: Some("oi".into()) });
        content.output_transcription = Some(Transcription { text: Some("olá".into()) });
        content.turn_complete = true;
        content.interrupted = true;

        let events = session.on_server_content(content);
        assert!(matches!(events[0], LiveEvent::PlaybackStart { .. }));
        assert_eq!(events[1], LiveEvent::Transcript { user: "oi".into(), model: "olá".into() });
        assert_eq!(events[2], LiveEvent::PlaybackStop { chunk_ids: vec![ChunkId(0)] });
    }

    #[test]
    fn test_turn_complete_flushes_one_pair() {
        let (mut session, _clock, _) = active_session();
        session.on_server_content(ServerContent {
            input_transcription: Some(Transcription { text: Some("Qual é ".into()) }),
            ..Default::default()
        });
        session.on_server_content(ServerContent {
            input_transcription: Some(Transcription { text: Some("a capital?".into()) }),
            ..Default::default()
        });
        let events = session.on_server_content(ServerContent { turn_complete: true, ..Default::default() });

        assert_eq!(events, vec![LiveEvent::Transcript { user: "Qual é a capital?".into(), model: String::new() }]);
        assert_eq!(session.transcript().len(), 1);

        let events = session.on_server_content(ServerContent { turn_complete: true, ..Default::default() });
        assert_eq!(events, vec![LiveEvent::Transcript { user: String::new(), model: String::new() }]);
    }

    #[test]
    fn test_finished_chunks_leave_the_active_set() {
        let (mut session, _clock, _) = active_session();
        session.on_server_content(model_audio(vec![audio_part(0.5), audio_part(0.5)]));

        assert!(session.on_chunk_finished(ChunkId(0)));
        assert!(!session.on_chunk_finished(ChunkId(0)));
        assert_eq!(session.active_chunks(), 1);
    }

    #[test]
    fn test_teardown_is_idempotent_from_any_state() {
        // Idle: nothing to release
        let mut idle = session(Arc::new(ManualClock::at(0.0)));
        assert!(idle.teardown().is_empty());

        // Connecting without a link yet
        let mut connecting = session(Arc::new(ManualClock::at(0.0)));
        connecting.begin(start()).unwrap();
        let events = connecting.teardown();
        assert_eq!(events, vec![connecting.status_event()]);
        assert_eq!(connecting.state(), &SessionState::Idle);
        assert!(connecting.teardown().is_empty());

        // Active with playing chunks
        let (mut active, _clock, recorded) = active_session();
        active.on_server_content(model_audio(vec![audio_part(1.0)]));
        let events = active.teardown();
        assert_eq!(events[0], LiveEvent::PlaybackStop { chunk_ids: vec![ChunkId(0)] });
        assert_eq!(active.active_chunks(), 0);
        assert!(active.teardown().is_empty());
        drop(active);
        assert_eq!(recorded.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_stale_connect_is_closed() {
        let clock = Arc::new(ManualClock::at(0.0));
        let mut session = session(clock);
        let first = session.begin(start()).unwrap();
        session.teardown();
        let second = session.begin(start()).unwrap();

        let stale = Arc::new(Mutex::new(Recorded::default()));
        assert!(!session.attach(first, Box::new(FakeLink(stale.clone()))));
        assert_eq!(stale.lock().unwrap().closes, 1);
        assert!(!session.owns(first));
        assert!(session.owns(second));

        // Connect finishing after the user stopped
        session.teardown();
        let late = Arc::new(Mutex::new(Recorded::default()));
        assert!(!session.attach(second, Box::new(FakeLink(late.clone()))));
        assert_eq!(late.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_fail_reports_and_tears_down() {
        let (mut session, _clock, recorded) = active_session();
        let events = session.fail(LiveError::Closed(None));

        assert_eq!(
            events[0],
            LiveEvent::Error { code: "connection_closed".into(), message: "session closed by remote".into() }
        );
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(recorded.lock().unwrap().closes, 1);

        // Capture failure before anything started only reports
        let mut idle = LiveSession::new("s2".into(), AppConfig::default().live, Arc::new(ManualClock::at(0.0)));
        let events = idle.fail(LiveError::Device("NotAllowedError".into()));
        assert_eq!(events.len(), 1);
        assert_eq!(idle.state(), &SessionState::Idle);
    }

    #[test]
    fn test_content_before_active_is_ignored() {
        let mut session = session(Arc::new(ManualClock::at(0.0)));
        session.begin(start()).unwrap();
        assert!(session.on_server_content(model_audio(vec![audio_part(1.0)])).is_empty());
    }
}

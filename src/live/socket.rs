//! # Live Socket Actor
//!
//! Browsers connect to `/ws/live`; each connection gets one `LiveSocket`
//! actor owning one [`LiveSession`]. The actor mailbox is the only place the
//! session is mutated: client messages, upstream events, connect results
//! and chunk-end timers all arrive as actor messages.
//!
//! ## Message Flow:
//! 1. **Client `start`**: validate, register, spawn the upstream connect
//! 2. **Connect result**: attached if still current (attempt counter), else closed
//! 3. **Upstream events**: added as a stream on the actor, tagged with the attempt
//! 4. **Binary blocks**: encoded and queued to the upstream without waiting
//! 5. **Client `stop`, disconnect, heartbeat timeout**: single teardown

use crate::audio::capture::PushOutcome;
use crate::audio::pcm::le_bytes_to_f32;
use crate::audio::playback::{ChunkId, MonotonicClock};
use crate::live::protocol::{ClientMessage, LiveEvent};
use crate::live::session::{LiveError, LiveSession, StartRequest};
use crate::live::upstream::{self, GeminiLink, UpstreamEvent, UpstreamSettings};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub struct LiveSocket {
    session: LiveSession,
    state: AppState,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

/// A connect finished; the link belongs to `attempt`.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamReady {
    attempt: u64,
    link: GeminiLink,
    events: UnboundedReceiver<UpstreamEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamFailed {
    attempt: u64,
    error: LiveError,
}

struct UpstreamEnvelope {
    attempt: u64,
    event: UpstreamEvent,
}

/// Time from `now` until a chunk scheduled to end at `end_at` finishes.
fn chunk_end_delay(end_at: f64, now: f64) -> Duration {
    Duration::from_secs_f64((end_at - now).max(0.0))
}

impl LiveSocket {
    pub fn new(state: AppState) -> Self {
        let config = state.get_config();
        let session = LiveSession::new(
            Uuid::new_v4().to_string(),
            config.live.clone(),
            Arc::new(MonotonicClock::new()),
        );

        Self {
            session,
            state,
            heartbeat_interval: Duration::from_secs(config.live.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.live.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &LiveEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "Failed to serialize live event"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: String) {
        warn!(session_id = %self.session.id(), code, %message, "Live socket error");
        self.send_event(ctx, &LiveEvent::Error { code: code.to_string(), message });
    }

    /// Forward session events to the client, arming an end timer for every
    /// newly scheduled chunk, then mirror the session state into the registry.
    fn dispatch(&mut self, events: Vec<LiveEvent>, ctx: &mut ws::WebsocketContext<Self>) {
        for event in &events {
            if let LiveEvent::PlaybackStart { chunk_id, start_at, duration, .. } = event {
                self.arm_chunk_timer(*chunk_id, start_at + duration, ctx);
            }
            self.send_event(ctx, event);
        }
        self.sync_registry();
    }

    fn arm_chunk_timer(&self, id: ChunkId, end_at: f64, ctx: &mut ws::WebsocketContext<Self>) {
        let now = self.session.playback_time().unwrap_or(0.0);
        ctx.run_later(chunk_end_delay(end_at, now), move |act, _ctx| {
            if act.session.on_chunk_finished(id) {
                trace!(chunk_id = id.0, "Chunk finished");
            }
        });
    }

    fn sync_registry(&self) {
        let state = self.session.state();
        if state.is_running() {
            self.state.live.set_state(self.session.id(), state.as_str());
        } else {
            self.state.live.remove(self.session.id());
        }
    }

    fn start_session(&mut self, request: StartRequest, ctx: &mut ws::WebsocketContext<Self>) {
        if self.session.state().is_running() {
            let err = LiveError::Busy;
            self.send_error(ctx, err.code(), err.to_string());
            return;
        }

        let config = self.state.get_config();
        if !config.has_api_key() {
            let events = self.session.fail(LiveError::Config("API key is not configured".to_string()));
            self.dispatch(events, ctx);
            return;
        }

        let attempt = match self.session.begin(request) {
            Ok(attempt) => attempt,
            Err(err) => {
                let events = self.session.fail(err);
                self.dispatch(events, ctx);
                return;
            }
        };

        let limit = config.live.max_concurrent_sessions;
        if let Err(err) = self.state.live.register(self.session.id(), "connecting", limit) {
            let events = self.session.fail(err);
            self.dispatch(events, ctx);
            return;
        }
        self.state.record_live_session_started();
        let status = self.session.status_event();
        self.send_event(ctx, &status);

        let settings = UpstreamSettings::from_config(&config);
        let addr = ctx.address();
        tokio::spawn(async move {
            match upstream::connect(settings).await {
                Ok((link, events)) => addr.do_send(UpstreamReady { attempt, link, events }),
                Err(error) => addr.do_send(UpstreamFailed { attempt, error }),
            }
        });
    }

    fn handle_client_message(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ClientMessage::Start { sample_rate, channels } => {
                self.start_session(StartRequest { sample_rate, channels }, ctx);
            }
            ClientMessage::Stop => {
                let events = self.session.teardown();
                self.dispatch(events, ctx);
            }
            ClientMessage::CaptureFailed { reason } => {
                let events = self.session.fail(LiveError::Device(reason));
                self.dispatch(events, ctx);
            }
            ClientMessage::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
        }
    }

    fn handle_capture_block(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let samples = match le_bytes_to_f32(data) {
            Ok(samples) => samples,
            Err(err) => {
                self.send_error(ctx, "invalid_audio", err.to_string());
                return;
            }
        };

        match self.session.on_capture_block(&samples) {
            Ok(Some(PushOutcome::Queued)) => {}
            Ok(Some(PushOutcome::DroppedOldest)) => {
                debug!(session_id = %self.session.id(), "Upstream is behind, dropped oldest frame");
            }
            Ok(Some(PushOutcome::Closed)) | Ok(None) => {
                trace!(session_id = %self.session.id(), "Capture block outside an active session discarded");
            }
            Err(err) => self.send_error(ctx, "invalid_audio", err.to_string()),
        }
    }
}

impl Actor for LiveSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id(), "Live socket connected");

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session.id(), "Live socket heartbeat timeout, closing");
                ctx.stop();
                return;
            }
            let ping = LiveEvent::Ping { timestamp: chrono::Utc::now().timestamp_millis() as u64 };
            act.send_event(ctx, &ping);
        });

        let status = self.session.status_event();
        self.send_event(ctx, &status);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.teardown();
        self.state.live.remove(self.session.id());
        info!(
            session_id = %self.session.id(),
            turns = self.session.transcript().len(),
            "Live socket closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(err) => self.send_error(ctx, "invalid_message", format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(data)) => self.handle_capture_block(&data, ctx),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id(), ?reason, "Live socket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "Live socket protocol error");
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<UpstreamEnvelope> for LiveSocket {
    fn handle(&mut self, envelope: UpstreamEnvelope, ctx: &mut Self::Context) {
        if !self.session.owns(envelope.attempt) {
            trace!(attempt = envelope.attempt, "Ignoring event from a previous upstream");
            return;
        }

        let events = match envelope.event {
            UpstreamEvent::Opened => self.session.activate().into_iter().collect(),
            UpstreamEvent::Content(content) => self.session.on_server_content(content),
            UpstreamEvent::Closed(reason) => self.session.fail(LiveError::Closed(reason)),
            UpstreamEvent::Failed(message) => self.session.fail(LiveError::Transport(message)),
        };
        self.dispatch(events, ctx);
    }

    // The default stops the actor; the browser socket outlives any one upstream.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(session_id = %self.session.id(), "Upstream event stream ended");
    }
}

impl Handler<UpstreamReady> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamReady, ctx: &mut Self::Context) {
        let UpstreamReady { attempt, link, events } = msg;
        if !self.session.attach(attempt, Box::new(link)) {
            return;
        }
        ctx.add_stream(
            UnboundedReceiverStream::new(events).map(move |event| UpstreamEnvelope { attempt, event }),
        );
    }
}

impl Handler<UpstreamFailed> for LiveSocket {
    type Result = ();

    fn handle(&mut self, msg: UpstreamFailed, ctx: &mut Self::Context) {
        if !self.session.owns(msg.attempt) {
            debug!(attempt = msg.attempt, error = %msg.error, "Ignoring failure of a stale connect");
            return;
        }
        let events = self.session.fail(msg.error);
        self.dispatch(events, ctx);
    }
}

/// `GET /ws/live`: upgrade to a live socket.
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "New live socket request");
    ws::start(LiveSocket::new(state.get_ref().clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_chunk_end_delay() {
        assert_eq!(chunk_end_delay(1.5, 1.0), Duration::from_millis(500));
        // Already past its end (timer armed late)
        assert_eq!(chunk_end_delay(1.0, 2.0), Duration::ZERO);
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_not_upgraded() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

//! # Upstream Connection
//!
//! Opens the streaming duplex WebSocket, sends the `setup` message and
//! splits the socket into two tasks:
//! - **Writer**: drains the session's [`FrameQueue`] into `realtimeInput`
//!   messages until the queue is closed
//! - **Reader**: decodes server messages into [`UpstreamEvent`]s for the
//!   socket actor until the remote side closes or the link is shut down
//!
//! No connect or idle timeout is applied. The session ends when the remote
//! side closes, the socket errors, or the user stops.

use crate::audio::capture::{AudioFrame, FrameQueue, PushOutcome};
use crate::config::AppConfig;
use crate::gemini::prompts::LIVE_SYSTEM_INSTRUCTION;
use crate::live::protocol::{RealtimeInputMessage, ServerContent, ServerMessage, SetupMessage};
use crate::live::session::{LiveError, UpstreamLink};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// What the reader task reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// `setupComplete` arrived
    Opened,
    Content(ServerContent),
    /// Remote closed the socket, with its close reason if any
    Closed(Option<String>),
    Failed(String),
}

/// Everything needed to open one upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub frame_queue_capacity: usize,
}

impl UpstreamSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            url: config.gemini.live_url.clone(),
            api_key: config.gemini.api_key.trim().to_string(),
            model: config.gemini.live_model.clone(),
            voice: config.gemini.live_voice.clone(),
            system_instruction: LIVE_SYSTEM_INSTRUCTION.to_string(),
            frame_queue_capacity: config.live.frame_queue_capacity,
        }
    }
}

/// Sending half of an open upstream session.
///
/// Dropping the link closes it.
pub struct GeminiLink {
    frames: Arc<FrameQueue>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl UpstreamLink for GeminiLink {
    fn send_frame(&self, frame: AudioFrame) -> PushOutcome {
        self.frames.push(frame)
    }

    fn close(&mut self) {
        self.frames.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!(dropped_frames = self.frames.dropped(), "Upstream link closed");
        }
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, send `setup` and start the reader and writer tasks.
pub async fn connect(
    settings: UpstreamSettings,
) -> Result<(GeminiLink, mpsc::UnboundedReceiver<UpstreamEvent>), LiveError> {
    if settings.api_key.is_empty() {
        return Err(LiveError::Config("API key is not configured".to_string()));
    }

    // The key travels in the query string; never log this URL.
    let url = format!("{}?key={}", settings.url, settings.api_key);
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| LiveError::Transport(e.to_string()))?;
    info!(model = %settings.model, "Upstream live socket connected");

    let (mut sink, stream) = ws_stream.split();

    let setup = SetupMessage::new(&settings.model, &settings.voice, &settings.system_instruction);
    let setup = serde_json::to_string(&setup).map_err(|e| LiveError::Transport(e.to_string()))?;
    sink.send(Message::Text(setup))
        .await
        .map_err(|e| LiveError::Transport(e.to_string()))?;

    let frames = Arc::new(FrameQueue::new(settings.frame_queue_capacity));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(writer_loop(sink, frames.clone(), events_tx.clone()));
    tokio::spawn(reader_loop(stream, events_tx, shutdown_rx));

    Ok((
        GeminiLink { frames, shutdown: Some(shutdown_tx) },
        events_rx,
    ))
}

async fn writer_loop(
    mut sink: WsSink,
    frames: Arc<FrameQueue>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
) {
    while let Some(frame) = frames.pop().await {
        let message = match serde_json::to_string(&RealtimeInputMessage::from(&frame)) {
            Ok(message) => message,
            Err(err) => {
                warn!(seq = frame.seq, error = %err, "Failed to encode capture frame");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(message)).await {
            let _ = events.send(UpstreamEvent::Failed(err.to_string()));
            break;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    debug!("Upstream writer finished");
}

async fn reader_loop(
    mut stream: WsStream,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            _ = &mut shutdown => break,
            message = stream.next() => message,
        };

        let event = match message {
            Some(Ok(Message::Text(text))) => parse_server_message(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => parse_server_message(&data),
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                let _ = events.send(UpstreamEvent::Closed(reason));
                break;
            }
            // Pings are answered by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                let _ = events.send(UpstreamEvent::Failed(err.to_string()));
                break;
            }
            None => {
                let _ = events.send(UpstreamEvent::Closed(None));
                break;
            }
        };

        for event in event {
            if events.send(event).is_err() {
                return;
            }
        }
    }
    debug!("Upstream reader finished");
}

/// Decode one server message. Unknown or malformed messages yield nothing.
pub fn parse_server_message(data: &[u8]) -> Vec<UpstreamEvent> {
    let message: ServerMessage = match serde_json::from_slice(data) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "Ignoring malformed upstream message");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(UpstreamEvent::Opened);
    }
    if let Some(content) = message.server_content {
        events.push(UpstreamEvent::Content(content));
    }
    if message.go_away.is_some() {
        debug!("Upstream announced it will close soon");
    }
    events
}

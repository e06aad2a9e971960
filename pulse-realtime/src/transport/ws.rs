//! WebSocket transport built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use pulse_core::error::NetworkError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message as TungsteniteMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use super::{CloseCause, Connector, Frame, Transport, TransportEvent, TransportLink};
use crate::config::RealtimeConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, TungsteniteMessage>;
type WsSource = SplitStream<WsStream>;

const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// Opens WebSocket transports.
#[derive(Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    headers: HashMap<String, String>,
    next_id: AtomicU64,
}

impl WsConnector {
    /// Creates a connector using the timing and headers from `config`.
    #[must_use]
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
            headers: config.headers.clone(),
            next_id: AtomicU64::new(1),
        }
    }

    fn request(
        &self,
        url: &Url,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, NetworkError> {
        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|e| NetworkError::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                NetworkError::ConnectionFailed {
                    reason: format!("invalid header name '{key}': {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                NetworkError::ConnectionFailed {
                    reason: format!("invalid value for header '{key}': {e}"),
                }
            })?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, NetworkError> {
        let request = self.request(url)?;

        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| NetworkError::Timeout {
                timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| NetworkError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, stream) = ws_stream.split();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(run_connection(
            id,
            sink,
            stream,
            command_rx,
            event_tx,
            self.heartbeat_interval,
            self.pong_timeout,
        ));

        info!(transport_id = id, url = %url, "WebSocket connected");

        Ok(TransportLink {
            transport: Arc::new(WsTransport {
                id,
                commands: command_tx,
                closed: AtomicBool::new(false),
            }),
            events: event_rx,
        })
    }
}

enum Command {
    Send {
        text: String,
        ack: oneshot::Sender<Result<(), NetworkError>>,
    },
    Close,
}

/// Send half of an open WebSocket.
#[derive(Debug)]
pub struct WsTransport {
    id: u64,
    commands: mpsc::Sender<Command>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send(&self, frame: Frame) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::closed("transport closed"));
        }
        let text = frame.encode().map_err(|e| NetworkError::WebSocket {
            reason: e.to_string(),
        })?;

        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Send { text, ack })
            .await
            .map_err(|_| NetworkError::closed("connection task stopped"))?;
        done.await
            .map_err(|_| NetworkError::closed("connection task stopped"))?
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close).await;
        }
    }
}

fn close_cause(frame: Option<CloseFrame<'_>>) -> CloseCause {
    CloseCause::Server {
        reason: frame
            .map(|f| f.reason.to_string())
            .filter(|reason| !reason.is_empty()),
    }
}

async fn run_connection(
    id: u64,
    mut sink: WsSink,
    mut stream: WsSource,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<TransportEvent>,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut awaiting_pong: Option<Instant> = None;

    let cause = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { text, ack }) => {
                    let result = sink
                        .send(TungsteniteMessage::Text(text))
                        .await
                        .map_err(|e| NetworkError::WebSocket { reason: e.to_string() });
                    let failure = result.as_ref().err().map(ToString::to_string);
                    let _ = ack.send(result);
                    if let Some(reason) = failure {
                        break CloseCause::Network { reason };
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.close().await;
                    break CloseCause::Client;
                }
            },

            inbound = stream.next() => match inbound {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    awaiting_pong = None;
                    match Frame::decode(&text) {
                        Ok(frame) => {
                            if events.send(TransportEvent::Frame(frame)).await.is_err() {
                                let _ = sink.close().await;
                                break CloseCause::Client;
                            }
                        }
                        Err(e) => warn!(transport_id = id, error = %e, "Dropping malformed frame"),
                    }
                }
                Some(Ok(TungsteniteMessage::Ping(data))) => {
                    if let Err(e) = sink.send(TungsteniteMessage::Pong(data)).await {
                        warn!(transport_id = id, error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(TungsteniteMessage::Pong(_))) => {
                    awaiting_pong = None;
                    debug!(transport_id = id, "Pong received");
                }
                Some(Ok(TungsteniteMessage::Close(frame))) => {
                    info!(transport_id = id, "Server sent close frame");
                    break close_cause(frame);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseCause::Network { reason: e.to_string() },
                None => break CloseCause::Network { reason: "stream ended".to_string() },
            },

            _ = heartbeat.tick() => {
                if let Some(since) = awaiting_pong {
                    if since.elapsed() >= pong_timeout {
                        warn!(transport_id = id, "Heartbeat timed out");
                        break CloseCause::Network { reason: "pong timeout".to_string() };
                    }
                } else {
                    awaiting_pong = Some(Instant::now());
                }
                if let Err(e) = sink.send(TungsteniteMessage::Ping(Vec::new())).await {
                    warn!(transport_id = id, error = %e, "Failed to send ping");
                }
            }
        }
    };

    debug!(transport_id = id, reason = %cause.reason(), "WebSocket connection task finished");
    let _ = events.send(TransportEvent::Closed(cause)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_close_frame_reason() {
        let cause = close_cause(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "server restart".into(),
        }));
        assert_eq!(
            cause,
            CloseCause::Server {
                reason: Some("server restart".to_string())
            }
        );
        assert_eq!(close_cause(None), CloseCause::Server { reason: None });
    }

    #[test]
    fn test_request_carries_headers() {
        let config = RealtimeConfig::builder()
            .header("X-Client", "pulse")
            .build();
        let connector = WsConnector::new(&config);
        let url = Url::parse("ws://localhost:5000/ws").unwrap();
        let request = connector.request(&url).unwrap();
        assert_eq!(request.headers()["x-client"], "pulse");
    }

    #[tokio::test]
    async fn test_open_refused_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(&RealtimeConfig::default());
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let err = connector.open(&url).await.unwrap_err();
        assert!(matches!(
            err,
            NetworkError::ConnectionFailed { .. } | NetworkError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_unanswered_pings_close_the_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Pongs are only written while the server reads, so this one never answers.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ws);
        });

        let config = RealtimeConfig::builder()
            .heartbeat_interval(Duration::from_millis(50))
            .pong_timeout(Duration::from_millis(100))
            .build();
        let connector = WsConnector::new(&config);
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let mut link = connector.open(&url).await.unwrap();

        let event = timeout(Duration::from_secs(5), link.events.recv())
            .await
            .expect("heartbeat should time out")
            .unwrap();
        assert_eq!(
            event,
            TransportEvent::Closed(CloseCause::Network {
                reason: "pong timeout".to_string()
            })
        );
        assert!(link.transport.send(Frame::new("late", json!(null))).await.is_err());
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let TungsteniteMessage::Text(text) = message {
                    let frame = Frame::decode(&text).unwrap();
                    let reply = Frame::new("echo", frame.data).encode().unwrap();
                    ws.send(TungsteniteMessage::Text(reply)).await.unwrap();
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "bye".into(),
                        }))
                        .await;
                }
            }
        });

        let connector = WsConnector::new(&RealtimeConfig::default());
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let mut link = connector.open(&url).await.unwrap();

        link.transport
            .send(Frame::new("ping", json!({"n": 1})))
            .await
            .unwrap();

        let first = link.events.recv().await.unwrap();
        assert_eq!(
            first,
            TransportEvent::Frame(Frame::new("echo", json!({"n": 1})))
        );

        let second = link.events.recv().await.unwrap();
        assert_eq!(
            second,
            TransportEvent::Closed(CloseCause::Server {
                reason: Some("bye".to_string())
            })
        );

        link.transport.close().await;
        assert!(link.transport.send(Frame::new("late", json!(null))).await.is_err());
    }
}

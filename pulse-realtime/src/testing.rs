//! In-memory collaborators for tests.
//!
//! [`MockConnector`] hands out transports whose traffic the test controls:
//! outbound frames are recorded, inbound frames and closes are pushed by the
//! test. The recording cache, notifier and probe capture what the client did.

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::error::NetworkError;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::health::HealthProbe;
use crate::invalidation::QueryCache;
use crate::notify::{Notification, Notifier};
use crate::transport::{
    CloseCause, Connector, Frame, Transport, TransportEvent, TransportLink, events,
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const POLL_LIMIT: usize = 60_000;

/// Polls `condition` until it holds, panicking after about a minute.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..POLL_LIMIT {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("condition not met in time");
}

/// Connector producing [`MockLink`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    links: Mutex<Vec<Arc<MockLink>>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    close_on_open: AtomicBool,
}

impl MockConnector {
    /// Creates a connector that accepts every open.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Makes every following link close from the server side as soon as
    /// it opens, before any handshake.
    pub fn close_on_open(&self, close: bool) {
        self.close_on_open.store(close, Ordering::SeqCst);
    }

    /// Number of transports successfully opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Number of open attempts, failed ones included.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every link opened so far.
    #[must_use]
    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().clone()
    }

    /// Number of links not yet closed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.links.lock().iter().filter(|l| !l.is_closed()).count()
    }

    /// Waits until `n` links were opened and returns the `n`th (1-based).
    pub async fn wait_for_link(&self, n: usize) -> Arc<MockLink> {
        eventually(|| self.open_count() >= n).await;
        Arc::clone(&self.links.lock()[n - 1])
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &Url) -> Result<TransportLink, NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(NetworkError::ConnectionFailed {
                reason: "mock connection refused".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let mut links = self.links.lock();
        let link = Arc::new(MockLink {
            id: links.len() as u64 + 1,
            sent: Mutex::new(Vec::new()),
            inbound: tx,
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            send_budget: AtomicUsize::new(usize::MAX),
        });
        links.push(Arc::clone(&link));
        drop(links);

        if self.close_on_open.load(Ordering::SeqCst) {
            let _ = link.inbound.try_send(TransportEvent::Closed(CloseCause::Server {
                reason: Some("session rejected".to_string()),
            }));
        }

        Ok(TransportLink {
            transport: Arc::new(MockTransport(link)),
            events: rx,
        })
    }
}

/// Test-side view of one mock transport.
#[derive(Debug)]
pub struct MockLink {
    id: u64,
    sent: Mutex<Vec<Frame>>,
    inbound: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    send_budget: AtomicUsize,
}

impl MockLink {
    /// Transport id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every frame the client sent, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Names of the frames sent, in order.
    #[must_use]
    pub fn sent_events(&self) -> Vec<String> {
        self.sent.lock().iter().map(|f| f.event.clone()).collect()
    }

    /// Payloads of the frames sent under `event`, in order.
    #[must_use]
    pub fn sent_payloads(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|f| f.event == event)
            .map(|f| f.data.clone())
            .collect()
    }

    /// Whether the client closed this transport (or the test dropped it).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes every following send fail. Clearing it also lifts any limit
    /// set by [`MockLink::fail_sends_after`].
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
        if !fail {
            self.send_budget.store(usize::MAX, Ordering::SeqCst);
        }
    }

    /// Lets the next `count` sends through, then fails every send after them.
    pub fn fail_sends_after(&self, count: usize) {
        self.fail_sends.store(false, Ordering::SeqCst);
        self.send_budget.store(count, Ordering::SeqCst);
    }

    /// Delivers an inbound frame.
    pub async fn push(&self, frame: Frame) {
        let _ = self.inbound.send(TransportEvent::Frame(frame)).await;
    }

    /// Delivers a successful handshake response.
    pub async fn authenticate_ok(&self) {
        self.push(Frame::new(events::AUTHENTICATED, json!({"success": true})))
            .await;
    }

    /// Delivers a rejected handshake response.
    pub async fn authenticate_fail(&self, reason: &str) {
        self.push(Frame::new(
            events::AUTHENTICATED,
            json!({"success": false, "error": reason}),
        ))
        .await;
    }

    /// Simulates a network drop.
    pub async fn drop_connection(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self
            .inbound
            .send(TransportEvent::Closed(CloseCause::Network {
                reason: reason.to_string(),
            }))
            .await;
    }

    /// Simulates the server closing the connection.
    pub async fn server_close(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self
            .inbound
            .send(TransportEvent::Closed(CloseCause::Server {
                reason: Some(reason.to_string()),
            }))
            .await;
    }
}

struct MockTransport(Arc<MockLink>);

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> u64 {
        self.0.id
    }

    async fn send(&self, frame: Frame) -> Result<(), NetworkError> {
        if self.0.is_closed() {
            return Err(NetworkError::closed("mock transport closed"));
        }
        let within_budget = self
            .0
            .send_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == usize::MAX { Some(n) } else { n.checked_sub(1) }
            })
            .is_ok();
        if self.0.fail_sends.load(Ordering::SeqCst) || !within_budget {
            return Err(NetworkError::WebSocket {
                reason: "mock send failure".to_string(),
            });
        }
        self.0.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Query cache recording invalidated prefixes.
#[derive(Debug, Default)]
pub struct RecordingCache {
    keys: Mutex<Vec<String>>,
}

impl RecordingCache {
    /// Invalidated prefixes, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, prefix: &str) {
        self.keys.lock().push(prefix.to_string());
    }
}

/// Notifier recording every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Notifications received, in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Titles of the notifications received, in order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

/// Health probe with a switchable answer.
#[derive(Debug)]
pub struct StaticProbe {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl StaticProbe {
    /// Creates a probe answering `healthy`.
    #[must_use]
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicUsize::new(0),
        })
    }

    /// Changes the answer.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of checks run.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn check(&self) -> Result<(), NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NetworkError::Http {
                status_code: 503,
                reason: "Service Unavailable".to_string(),
            })
        }
    }
}

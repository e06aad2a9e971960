//! Bounded outbound queue for events emitted while offline.
//!
//! Entries are replayed FIFO on reconnect. Entries older than the TTL are
//! dropped instead of sent, and when the bound is reached the oldest entry
//! is evicted to make room.

use parking_lot::Mutex;
use pulse_telemetry::metrics::PulseMetrics;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::Frame;

/// One buffered outbound event.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Frame to send.
    pub frame: Frame,
    /// When it was queued.
    pub enqueued_at: Instant,
}

impl QueuedEvent {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.enqueued_at) >= ttl
    }
}

/// Counters describing queue activity since creation.
///
/// The same events are recorded as `pulse_queue_*` metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries currently queued.
    pub queued: usize,
    /// Entries ever queued.
    pub total_enqueued: u64,
    /// Entries evicted because the queue was full.
    pub total_evicted: u64,
    /// Entries discarded because they outlived the TTL.
    pub total_expired: u64,
}

/// Bounded FIFO of outbound events with per-entry TTL.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: Mutex<VecDeque<QueuedEvent>>,
    max_size: usize,
    ttl: Duration,
    total_enqueued: AtomicU64,
    total_evicted: AtomicU64,
    total_expired: AtomicU64,
}

impl OutboundQueue {
    /// Creates a queue holding at most `max_size` entries for at most `ttl`.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size: max_size.max(1),
            ttl,
            total_enqueued: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            total_expired: AtomicU64::new(0),
        }
    }

    /// Appends a frame. Returns the entry evicted to make room, if any.
    pub fn push(&self, frame: Frame) -> Option<QueuedEvent> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.max_size {
            entries.pop_front()
        } else {
            None
        };
        if let Some(removed) = &evicted {
            self.add_evicted(1);
            warn!(
                event = %removed.frame.event,
                max_size = self.max_size,
                "Outbound queue full, evicting oldest entry"
            );
        }

        debug!(event = %frame.event, queue_size = entries.len() + 1, "Event queued");
        entries.push_back(QueuedEvent {
            frame,
            enqueued_at: Instant::now(),
        });
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        PulseMetrics::queue_enqueued();
        PulseMetrics::queue_depth(entries.len());
        evicted
    }

    /// Removes the oldest entry still within its TTL, discarding expired
    /// entries in front of it.
    ///
    /// Returns the entry (if any) and how many expired entries were dropped.
    pub fn pop_ready(&self) -> (Option<QueuedEvent>, usize) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut expired = 0;

        while let Some(entry) = entries.pop_front() {
            if entry.is_expired(now, self.ttl) {
                expired += 1;
                debug!(event = %entry.frame.event, "Dropping expired queued event");
                continue;
            }
            self.add_expired(expired);
            PulseMetrics::queue_depth(entries.len());
            return (Some(entry), expired);
        }
        self.add_expired(expired);
        PulseMetrics::queue_depth(0);
        (None, expired)
    }

    /// Puts an entry back at the head after a failed send.
    ///
    /// If the queue filled up in the meantime the entry is dropped, since it
    /// would be the oldest and therefore the first evicted.
    pub fn push_front(&self, entry: QueuedEvent) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_size {
            self.add_evicted(1);
            warn!(event = %entry.frame.event, "Outbound queue full, dropping requeued entry");
            return;
        }
        entries.push_front(entry);
        PulseMetrics::queue_depth(entries.len());
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !entry.is_expired(now, self.ttl));
        let removed = before - entries.len();
        self.add_expired(removed);
        PulseMetrics::queue_depth(entries.len());
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Purged expired queued events");
        }
        removed
    }

    /// Number of queued entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Queued frames in send order.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.entries.lock().iter().map(|e| e.frame.clone()).collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
        PulseMetrics::queue_depth(0);
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
        }
    }

    fn add_evicted(&self, count: u64) {
        self.total_evicted.fetch_add(count, Ordering::Relaxed);
        PulseMetrics::queue_evicted(count);
    }

    fn add_expired(&self, count: usize) {
        if count > 0 {
            let count = u64::try_from(count).unwrap_or(u64::MAX);
            self.total_expired.fetch_add(count, Ordering::Relaxed);
            PulseMetrics::queue_expired(count);
        }
    }
}

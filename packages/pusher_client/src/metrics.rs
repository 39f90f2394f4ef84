//! Client metrics for observability
//!
//! Counters are updated with relaxed atomics from both the application and
//! the inbound delivery path; read them through [`ClientMetrics::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Connection metrics
    /// Transport opens, including retries
    pub connect_attempts: AtomicU64,
    /// `pusher:connection_established` frames accepted
    pub connections_established: AtomicU64,
    /// Transport errors and closes observed on the live socket
    pub connection_losses: AtomicU64,
    /// Reconnect attempts started by the retry policy
    pub reconnect_attempts: AtomicU64,

    // Frame metrics
    /// Inbound frames accepted from the current socket
    pub frames_received: AtomicU64,
    /// Inbound frames that failed to decode
    pub frames_malformed: AtomicU64,
    /// Outbound frames handed to the transport
    pub frames_sent: AtomicU64,
    /// Outbound frames the transport refused
    pub send_failures: AtomicU64,

    // Subscription metrics
    /// Subscribe requests sent, including reconciliation replays
    pub subscribe_requests: AtomicU64,
    /// Unsubscribe requests sent
    pub unsubscribe_requests: AtomicU64,
    /// Subscription errors from the service or the authorizer
    pub subscription_errors: AtomicU64,

    // Dispatch metrics
    /// Channel events delivered to a registered channel
    pub events_dispatched: AtomicU64,
    /// Channel events for channels not in the registry
    pub events_dropped: AtomicU64,
    /// Listener callbacks that panicked
    pub listener_panics: AtomicU64,

    start_time: Option<Instant>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connect_attempted(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_requested(&self) {
        self.subscribe_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsubscribe_requested(&self) {
        self.unsubscribe_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_failed(&self) {
        self.subscription_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_panicked(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_losses: self.connection_losses.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            subscribe_requests: self.subscribe_requests.load(Ordering::Relaxed),
            unsubscribe_requests: self.unsubscribe_requests.load(Ordering::Relaxed),
            subscription_errors: self.subscription_errors.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
        }
    }
}

/// Serializable point-in-time view of [`ClientMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_losses: u64,
    pub reconnect_attempts: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub subscribe_requests: u64,
    pub unsubscribe_requests: u64,
    pub subscription_errors: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub listener_panics: u64,
}

//! In-memory transport and recording listeners for unit tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::listener::{ChannelEventListener, ConnectionEventListener};
use crate::protocol::ChannelEvent;
use crate::state::ConnectionStateChange;
use crate::transport::{Transport, TransportEvents, TransportHandle};

pub(crate) fn event(channel: &str, event: &str, data: &str) -> ChannelEvent {
    ChannelEvent {
        channel: channel.to_string(),
        event: event.to_string(),
        data: data.to_string(),
        user_id: None,
    }
}

/// Poll `condition` until it holds. Fails the test after two seconds.
pub(crate) fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Default)]
struct TransportLog {
    next_handle: u64,
    opened: Vec<TransportEvents>,
    sent: Vec<String>,
    closed: Vec<TransportHandle>,
    fail_next_open: Option<TransportError>,
    fail_sends: bool,
}

/// Transport that records every call and lets the test play the server.
///
/// Server-side helpers release the internal lock before calling into the
/// connection, the same way a real reader task would.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    log: Mutex<TransportLog>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next_open(&self, err: TransportError) {
        self.log.lock().fail_next_open = Some(err);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.log.lock().fail_sends = fail;
    }

    pub(crate) fn open_count(&self) -> usize {
        self.log.lock().opened.len()
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.log.lock().closed.len()
    }

    /// Sink handed to the most recent `open`.
    pub(crate) fn last_events(&self) -> TransportEvents {
        self.log
            .lock()
            .opened
            .last()
            .cloned()
            .expect("transport was never opened")
    }

    pub(crate) fn established_frame(socket_id: &str) -> String {
        serde_json::json!({
            "event": "pusher:connection_established",
            "data": serde_json::json!({ "socket_id": socket_id, "activity_timeout": 120 }).to_string(),
        })
        .to_string()
    }

    pub(crate) fn deliver(&self, raw: &str) {
        self.last_events().on_frame(raw);
    }

    pub(crate) fn establish(&self, socket_id: &str) {
        self.deliver(&Self::established_frame(socket_id));
    }

    pub(crate) fn acknowledge(&self, channel: &str) {
        let frame = serde_json::json!({
            "event": "pusher_internal:subscription_succeeded",
            "channel": channel,
            "data": "{}",
        });
        self.deliver(&frame.to_string());
    }

    pub(crate) fn drop_connection(&self) {
        self.last_events().on_closed();
    }

    pub(crate) fn fail(&self, cause: TransportError) {
        self.last_events().on_error(cause);
    }

    pub(crate) fn sent_frames(&self) -> Vec<String> {
        self.log.lock().sent.clone()
    }

    /// `(event, data.channel)` for every frame sent so far.
    pub(crate) fn sent_events(&self) -> Vec<(String, Option<String>)> {
        self.sent_frames()
            .iter()
            .map(|frame| {
                let value: serde_json::Value =
                    serde_json::from_str(frame).expect("sent frame is JSON");
                let event = value["event"].as_str().unwrap_or_default().to_string();
                let channel = value["data"]["channel"].as_str().map(str::to_string);
                (event, channel)
            })
            .collect()
    }

    pub(crate) fn clear_sent(&self) {
        self.log.lock().sent.clear();
    }
}

impl Transport for RecordingTransport {
    fn open(&self, events: TransportEvents) -> Result<TransportHandle, TransportError> {
        let mut log = self.log.lock();
        if let Some(err) = log.fail_next_open.take() {
            return Err(err);
        }
        log.next_handle += 1;
        log.opened.push(events);
        Ok(TransportHandle(log.next_handle))
    }

    fn send(&self, _handle: TransportHandle, frame: String) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if log.fail_sends {
            return Err(TransportError::Send("broken pipe".into()));
        }
        log.sent.push(frame);
        Ok(())
    }

    fn close(&self, handle: TransportHandle) {
        self.log.lock().closed.push(handle);
    }
}

#[derive(Default)]
struct Recorded {
    events: Vec<String>,
    states: Vec<String>,
    errors: Vec<String>,
    succeeded: Vec<String>,
}

/// Listener for both connection and channel callbacks.
///
/// Optionally appends `name:event` / `name:state` to a log shared between
/// listeners, for ordering assertions.
pub(crate) struct RecordingListener {
    name: String,
    shared: Arc<Mutex<Vec<String>>>,
    recorded: Mutex<Recorded>,
}

impl RecordingListener {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with_log(name, &Self::shared_log())
    }

    pub(crate) fn with_log(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            shared: log.clone(),
            recorded: Mutex::new(Recorded::default()),
        })
    }

    pub(crate) fn shared_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Channel events received.
    pub(crate) fn count(&self) -> usize {
        self.recorded.lock().events.len()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.recorded.lock().events.clone()
    }

    pub(crate) fn states(&self) -> Vec<String> {
        self.recorded.lock().states.clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.recorded.lock().errors.clone()
    }

    pub(crate) fn succeeded(&self) -> Vec<String> {
        self.recorded.lock().succeeded.clone()
    }
}

impl ConnectionEventListener for RecordingListener {
    fn on_connection_state_change(&self, change: &ConnectionStateChange) {
        self.shared
            .lock()
            .push(format!("{}:{}", self.name, change.current));
        self.recorded.lock().states.push(change.current.to_string());
    }

    fn on_error(&self, message: &str, _code: Option<i64>, _cause: Option<&TransportError>) {
        self.recorded.lock().errors.push(message.to_string());
    }
}

impl ChannelEventListener for RecordingListener {
    fn on_event(&self, event: &ChannelEvent) {
        let entry = format!("{}:{}", self.name, event.event);
        self.shared.lock().push(entry.clone());
        self.recorded.lock().events.push(entry);
    }

    fn on_subscription_succeeded(&self, channel: &str) {
        self.recorded.lock().succeeded.push(channel.to_string());
    }
}

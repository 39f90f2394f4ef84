//! Fake service shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pusher_client::{
    ChannelEvent, ChannelEventListener, ConnectionEventListener, ConnectionStateChange, Transport,
    TransportError, TransportEvents, TransportHandle,
};

/// Poll `condition` until it holds. Fails the test after two seconds.
pub fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

struct Sent {
    socket: u64,
    frame: serde_json::Value,
}

#[derive(Default)]
struct Wire {
    sinks: Vec<TransportEvents>,
    sent: Vec<Sent>,
    /// Subscribe requests on the newest socket already answered.
    answered: usize,
    closed: usize,
}

/// Transport whose far end is driven by the test.
#[derive(Default)]
pub struct FakeService {
    wire: Mutex<Wire>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sink(&self) -> TransportEvents {
        self.wire
            .lock()
            .sinks
            .last()
            .cloned()
            .expect("no socket opened")
    }

    pub fn opens(&self) -> usize {
        self.wire.lock().sinks.len()
    }

    pub fn closes(&self) -> usize {
        self.wire.lock().closed
    }

    pub fn establish(&self, socket_id: &str) {
        let data = serde_json::json!({ "socket_id": socket_id, "activity_timeout": 120 });
        self.push(serde_json::json!({
            "event": "pusher:connection_established",
            "data": data.to_string(),
        }));
    }

    pub fn acknowledge(&self, channel: &str) {
        self.push(serde_json::json!({
            "event": "pusher_internal:subscription_succeeded",
            "channel": channel,
            "data": "{}",
        }));
    }

    /// Answer every unanswered subscribe on the newest socket, in the order
    /// the requests arrived.
    pub fn acknowledge_pending(&self) {
        let pending: Vec<String> = {
            let mut wire = self.wire.lock();
            let socket = wire.sinks.len() as u64;
            let requests: Vec<String> = wire
                .sent
                .iter()
                .filter(|sent| sent.socket == socket && sent.frame["event"] == "pusher:subscribe")
                .filter_map(|sent| sent.frame["data"]["channel"].as_str().map(str::to_string))
                .collect();
            let pending = requests[wire.answered..].to_vec();
            wire.answered = requests.len();
            pending
        };
        for channel in pending {
            self.acknowledge(&channel);
        }
    }

    pub fn publish(&self, channel: &str, event: &str, data: &str) {
        self.push(serde_json::json!({ "event": event, "channel": channel, "data": data }));
    }

    pub fn push(&self, frame: serde_json::Value) {
        self.sink().on_frame(&frame.to_string());
    }

    pub fn drop_socket(&self) {
        self.sink().on_closed();
    }

    pub fn subscribe_requests(&self) -> Vec<String> {
        self.requests("pusher:subscribe")
    }

    pub fn unsubscribe_requests(&self) -> Vec<String> {
        self.requests("pusher:unsubscribe")
    }

    fn requests(&self, kind: &str) -> Vec<String> {
        self.wire
            .lock()
            .sent
            .iter()
            .filter(|sent| sent.frame["event"] == kind)
            .filter_map(|sent| sent.frame["data"]["channel"].as_str().map(str::to_string))
            .collect()
    }

    /// `(socket, event, channel)` for every subscribe and unsubscribe sent.
    pub fn subscription_traffic(&self) -> Vec<(u64, String, String)> {
        self.wire
            .lock()
            .sent
            .iter()
            .filter_map(|sent| {
                let event = sent.frame["event"].as_str()?;
                if event != "pusher:subscribe" && event != "pusher:unsubscribe" {
                    return None;
                }
                let channel = sent.frame["data"]["channel"].as_str()?;
                Some((sent.socket, event.to_string(), channel.to_string()))
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.wire.lock().sent.len()
    }

    pub fn clear(&self) {
        let mut wire = self.wire.lock();
        wire.sent.clear();
        wire.answered = 0;
    }
}

impl Transport for FakeService {
    fn open(&self, events: TransportEvents) -> Result<TransportHandle, TransportError> {
        let mut wire = self.wire.lock();
        wire.sinks.push(events);
        wire.answered = 0;
        Ok(TransportHandle(wire.sinks.len() as u64))
    }

    fn send(&self, handle: TransportHandle, frame: String) -> Result<(), TransportError> {
        let frame = serde_json::from_str(&frame).map_err(|e| TransportError::Send(e.to_string()))?;
        self.wire.lock().sent.push(Sent {
            socket: handle.0,
            frame,
        });
        Ok(())
    }

    fn close(&self, _handle: TransportHandle) {
        self.wire.lock().closed += 1;
    }
}

/// Records state changes and channel events in arrival order.
#[derive(Default)]
pub struct Recorder {
    pub changes: Mutex<Vec<ConnectionStateChange>>,
    pub events: Mutex<Vec<ChannelEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<String> {
        self.changes
            .lock()
            .iter()
            .map(|c| c.current.to_string())
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }
}

impl ConnectionEventListener for Recorder {
    fn on_connection_state_change(&self, change: &ConnectionStateChange) {
        self.changes.lock().push(*change);
    }
}

impl ChannelEventListener for Recorder {
    fn on_event(&self, event: &ChannelEvent) {
        self.events.lock().push(event.clone());
    }
}

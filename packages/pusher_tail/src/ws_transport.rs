//! WebSocket transport over tokio-tungstenite.
//!
//! Each `open` spawns one socket task. The task owns the stream, forwards
//! queued outbound frames, reports inbound text frames to the connection and
//! watches for inactivity with a `pusher:ping` / pong timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pusher_client::protocol::OutboundMessage;
use pusher_client::{Transport, TransportError, TransportEvents, TransportHandle};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Socket {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

pub struct WsTransport {
    url: String,
    activity_timeout: Duration,
    pong_timeout: Duration,
    runtime: Handle,
    next_id: AtomicU64,
    sockets: Mutex<HashMap<u64, Socket>>,
}

impl WsTransport {
    /// Must be created inside a tokio runtime; socket tasks are spawned on it.
    pub fn new(
        url: String,
        activity_timeout: Duration,
        pong_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            url,
            activity_timeout,
            pong_timeout,
            runtime: Handle::try_current()?,
            next_id: AtomicU64::new(1),
            sockets: Mutex::new(HashMap::new()),
        })
    }
}

impl Transport for WsTransport {
    fn open(&self, events: TransportEvents) -> Result<TransportHandle, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.sockets.lock().insert(
            id,
            Socket {
                outbound,
                cancel: cancel.clone(),
            },
        );

        let session = SocketSession {
            url: self.url.clone(),
            events,
            outbound: rx,
            cancel,
            activity_timeout: self.activity_timeout,
            pong_timeout: self.pong_timeout,
        };
        self.runtime.spawn(session.run());
        Ok(TransportHandle(id))
    }

    fn send(&self, handle: TransportHandle, frame: String) -> Result<(), TransportError> {
        let sockets = self.sockets.lock();
        let socket = sockets.get(&handle.0).ok_or(TransportError::Closed)?;
        socket
            .outbound
            .send(frame)
            .map_err(|_| TransportError::Send("socket task has exited".into()))
    }

    fn close(&self, handle: TransportHandle) {
        if let Some(socket) = self.sockets.lock().remove(&handle.0) {
            socket.cancel.cancel();
        }
    }
}

struct SocketSession {
    url: String,
    events: TransportEvents,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    activity_timeout: Duration,
    pong_timeout: Duration,
}

impl SocketSession {
    async fn run(mut self) {
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
        };
        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                warn!(url = %self.url, error = %e, "websocket connect failed");
                self.events.on_error(TransportError::Open(e.to_string()));
                return;
            }
        };
        info!(url = %self.url, epoch = self.events.epoch(), "websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let idle = tokio::time::sleep(self.activity_timeout);
        tokio::pin!(idle);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    debug!(epoch = self.events.epoch(), "websocket closed by client");
                    return;
                }

                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                        self.events.on_error(TransportError::Send(e.to_string()));
                        return;
                    }
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            awaiting_pong = false;
                            idle.as_mut().reset(tokio::time::Instant::now() + self.activity_timeout);
                            self.events.on_frame(&text);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "server closed websocket");
                            self.events.on_closed();
                            return;
                        }
                        None => {
                            self.events.on_closed();
                            return;
                        }
                        Some(Err(e)) => {
                            self.events.on_error(TransportError::Protocol(e.to_string()));
                            return;
                        }
                        Some(Ok(_)) => {
                            // Control frames also count as activity.
                            idle.as_mut().reset(tokio::time::Instant::now() + self.activity_timeout);
                        }
                    }
                }

                () = &mut idle => {
                    if awaiting_pong {
                        warn!(timeout_secs = self.pong_timeout.as_secs(), "no pong from server");
                        self.events.on_error(TransportError::Protocol("pong timeout".into()));
                        return;
                    }
                    let ping = match (OutboundMessage::Ping {}).encode() {
                        Ok(ping) => ping,
                        Err(e) => {
                            self.events.on_error(TransportError::Protocol(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) = ws_write.send(Message::Text(ping.into())).await {
                        self.events.on_error(TransportError::Send(e.to_string()));
                        return;
                    }
                    awaiting_pong = true;
                    idle.as_mut().reset(tokio::time::Instant::now() + self.pong_timeout);
                }
            }
        }
    }
}

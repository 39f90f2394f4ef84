//! Transport seam: the socket layer the connection drives.
//!
//! A transport owns the real socket (WebSocket, TLS, framing). The connection
//! hands it a [`TransportEvents`] sink on every `open`; the transport reports
//! inbound text frames, errors and closure through it from its own reader task.

use std::sync::Weak;

use crate::connection::Shared;
use crate::error::TransportError;

/// Identifier for one opened socket, chosen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// The socket layer.
///
/// Implementations must not block: `open` starts connecting and returns,
/// `send` enqueues. They are called with the connection lock held, so they
/// must never invoke a [`TransportEvents`] method synchronously from inside
/// `open`, `send` or `close`.
pub trait Transport: Send + Sync {
    fn open(&self, events: TransportEvents) -> Result<TransportHandle, TransportError>;

    fn send(&self, handle: TransportHandle, frame: String) -> Result<(), TransportError>;

    fn close(&self, handle: TransportHandle);
}

/// Inbound notification sink for one opened socket.
///
/// Each sink is tagged with the epoch of the `open` that produced it; once the
/// connection has moved on (disconnect, loss, retry), notifications from an
/// older sink are ignored.
#[derive(Clone)]
pub struct TransportEvents {
    shared: Weak<Shared>,
    epoch: u64,
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl TransportEvents {
    pub(crate) fn new(shared: Weak<Shared>, epoch: u64) -> Self {
        Self { shared, epoch }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// A text frame arrived.
    pub fn on_frame(&self, raw: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_frame(self.epoch, raw);
        }
    }

    /// The socket failed; the transport will send nothing more on it.
    pub fn on_error(&self, cause: TransportError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_loss_event(self.epoch, cause);
        }
    }

    /// The socket closed.
    pub fn on_closed(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_loss_event(self.epoch, TransportError::Closed);
        }
    }
}

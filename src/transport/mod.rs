//! Opaque duplex transport used by a [`Connection`](crate::Connection).
//!
//! A transport is driven with non-blocking calls and reports back through an
//! [`EventEmitter`] handed to it at creation time. The connection only reacts
//! to these events, never to the calls themselves.

mod ws;

#[cfg(test)]
pub(crate) mod stub;

pub use ws::{WebsocketConnector, WebsocketTransport};

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use tokio::sync::mpsc;
use url::Url;

/// Why a transport closed
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum CloseReason {
    /// requested by [`Connection::stop`](crate::Connection::stop), never reconnect
    Manual,
    /// requested by connection itself after registration timeout
    Restart,
    /// everything else: network failure, server close, connect error
    Abnormal(String),
}

impl CloseReason {
    /// true if a reconnect should follow this close
    pub fn wants_reconnect(&self) -> bool {
        !self.is_manual()
    }
}

/// Raw frame exchanged by transport
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Frame {
    /// text frame, carries encoded envelopes
    Text(String),
    /// binary frame, not used by push protocol
    Binary(Bytes),
}

/// Event reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// transport is open and can send frames
    Open,
    /// transport closed, always the last event of a connect attempt
    Close(CloseReason),
    /// transport level error, a `Close` follows if it is fatal
    Error(String),
    /// frame received
    Frame(Frame),
}

/// Sending half of transport events, given to transport at creation
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventEmitter {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("Transport event dropped, connection is gone");
        }
    }

    /// report transport open
    pub fn open(&self) {
        self.emit(TransportEvent::Open)
    }

    /// report transport close
    pub fn close(&self, reason: CloseReason) {
        self.emit(TransportEvent::Close(reason))
    }

    /// report transport error
    pub fn error<S: Into<String>>(&self, detail: S) {
        self.emit(TransportEvent::Error(detail.into()))
    }

    /// report a received frame
    pub fn frame(&self, frame: Frame) {
        self.emit(TransportEvent::Frame(frame))
    }
}

/// Options passed to transport at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// base address of server
    pub base: Url,
    /// request path
    pub path: String,
    /// log raw frames
    pub log: bool,
    /// do not upgrade to raw socket, keep polling style transport
    pub force_polling: bool,
    /// use encrypted connection
    pub secure: bool,
}

impl TransportOptions {
    /// Socket request url: base address with path replaced and a ws/wss scheme
    pub fn socket_url(&self) -> Url {
        let mut url = self.base.clone();
        let scheme = if self.secure { "wss" } else { "ws" };
        if url.set_scheme(scheme).is_err() {
            log::warn!("Can't change scheme of {} to {}, keep it", url, scheme);
        }
        url.set_path(&self.path);
        url
    }
}

/// Duplex channel to push server.
///
/// All calls must return immediately, results are reported by events.
/// Every [`disconnect`](Transport::disconnect) call must lead to exactly one
/// [`TransportEvent::Close`] carrying the same reason, even if already closed.
pub trait Transport: Send + 'static {
    /// start connecting, `Open` or `Close` will be reported later
    fn connect(&mut self);
    /// close connection with reason
    fn disconnect(&mut self, reason: CloseReason);
    /// send a frame, dropped silently if not connected
    fn send(&mut self, frame: Frame);
    /// whether transport is open now
    fn is_connected(&self) -> bool;
}

/// Create transports for a connection, one per [`Connection::start`](crate::Connection::start)
pub trait TransportFactory: Send + 'static {
    /// created transport type
    type Transport: Transport;

    /// Create a new transport, it must not connect until asked
    fn create(&self, options: TransportOptions, events: EventEmitter) -> Self::Transport;
}

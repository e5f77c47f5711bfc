//! Long-lived push connection with registration handshake and auto reconnect.

mod inner;

pub use inner::ConnectionState;

use std::sync::{Arc, Weak};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::Config,
    message::Envelope,
    sink::NotificationSink,
    transport::{TransportFactory, WebsocketConnector},
};
use inner::{Command, Controller};

/// Handle of a push connection.
///
/// The connection runs in a background task, every method here only queues a
/// request to it and returns immediately. Dropping the handle disconnects the
/// transport and stops the task, use [`Connection::shutdown`] to wait for it.
///
/// Creating a connection needs a running tokio runtime.
#[derive(Debug)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Create a connection using websocket transport
    pub fn new<S>(config: Config, sink: &Arc<S>) -> Self
    where
        S: NotificationSink + 'static,
    {
        Self::with_transport(config, WebsocketConnector, sink)
    }

    /// Create a connection using transports made by `factory`
    pub fn with_transport<F, S>(config: Config, factory: F, sink: &Arc<S>) -> Self
    where
        F: TransportFactory,
        S: NotificationSink + 'static,
    {
        let sink = Arc::downgrade(sink);
        let sink: Weak<dyn NotificationSink> = sink;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);

        log::debug!(
            "Create connection to {} for user {}",
            config.base_address(),
            config.identity()
        );

        let task = Controller::new(config, factory, sink, commands_rx, state_tx).controller_start();

        Self {
            commands,
            state,
            task,
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Connection controller task is gone, command dropped");
        }
    }

    /// Create transport and connect, no-op if a transport already exists.
    ///
    /// After [`stop`](Self::stop) the transport is kept until its close is
    /// handled, a `start` before that is ignored too. Wait for
    /// [`ConnectionState::Idle`] on [`state_changes`](Self::state_changes) to
    /// restart right after a stop.
    pub fn start(&self) {
        self.command(Command::Start)
    }

    /// Disconnect without reconnect, no-op if no transport exists
    pub fn stop(&self) {
        self.command(Command::Stop)
    }

    /// Send an envelope, best effort.
    ///
    /// Envelope is dropped silently when connection is not registered, when
    /// transport is not open, or when it can't be encoded. Nothing is queued.
    pub fn send(&self, envelope: Envelope) {
        self.command(Command::Send(envelope))
    }

    /// current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// true if registration is acknowledged and not closed since
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// watch state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disconnect, release transport and wait background task to stop
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;

        drop(commands);

        if let Err(err) = task.await {
            log::warn!("Connection controller task failed: {}", err);
        }
    }
}

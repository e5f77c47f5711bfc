use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite as websocket;
use url::Url;
use websocket::tungstenite::Message;

use super::{CloseReason, EventEmitter, Frame, Transport, TransportFactory, TransportOptions};

type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

/// Create [`WebsocketTransport`]s, the default transport factory
#[derive(Debug, Default, Copy, Clone)]
pub struct WebsocketConnector;

impl TransportFactory for WebsocketConnector {
    type Transport = WebsocketTransport;

    fn create(&self, options: TransportOptions, events: EventEmitter) -> WebsocketTransport {
        WebsocketTransport {
            options,
            events,
            commands: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(Frame),
    Disconnect(CloseReason),
}

/// Transport over a websocket connection.
///
/// Each [`connect`](Transport::connect) spawns a socket worker task, which
/// lives until the socket closes or the transport is dropped.
#[derive(Debug)]
pub struct WebsocketTransport {
    options: TransportOptions,
    events: EventEmitter,
    commands: Option<mpsc::UnboundedSender<Command>>,
    connected: Arc<AtomicBool>,
}

impl WebsocketTransport {
    fn worker_alive(&self) -> bool {
        self.commands.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Transport for WebsocketTransport {
    fn connect(&mut self) {
        if self.worker_alive() {
            log::debug!("Socket worker still running, ignore connect");
            return;
        }

        if self.options.force_polling {
            log::warn!("Polling transport is not available, use websocket anyway");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);

        let worker = SocketWorker {
            url: self.options.socket_url(),
            log: self.options.log,
            commands: rx,
            events: self.events.clone(),
            connected: Arc::clone(&self.connected),
        };

        tokio::spawn(worker.run());
    }

    fn disconnect(&mut self, reason: CloseReason) {
        let command = Command::Disconnect(reason);

        let unsent = match self.commands.take() {
            Some(tx) => tx.send(command).err().map(|e| e.0),
            None => Some(command),
        };

        // no worker to report the close, report it here
        if let Some(Command::Disconnect(reason)) = unsent {
            log::debug!("Socket already closed, report close {:?} directly", reason);
            self.events.close(reason);
        }
    }

    fn send(&mut self, frame: Frame) {
        match self.commands {
            Some(ref tx) if self.is_connected() => {
                if tx.send(Command::Send(frame)).is_err() {
                    log::trace!("Socket worker stopped, drop frame");
                }
            }
            _ => log::trace!("Socket not open, drop frame"),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct SocketWorker {
    url: Url,
    log: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventEmitter,
    connected: Arc<AtomicBool>,
}

impl SocketWorker {
    async fn run(mut self) {
        log::debug!("Connecting socket: {}", self.url);

        let connecting = websocket::connect_async(self.url.to_string());
        tokio::pin!(connecting);

        let ws = loop {
            tokio::select! {
                result = &mut connecting => match result {
                    Ok((ws, _)) => break ws,
                    Err(err) => {
                        log::debug!("Connect socket {} failed: {}", self.url, err);
                        self.events.error(format!("connect failed: {}", err));
                        self.events.close(CloseReason::Abnormal(err.to_string()));
                        return;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => log::trace!("Socket still connecting, drop frame"),
                    Some(Command::Disconnect(reason)) => {
                        log::debug!("Disconnect requested while connecting: {:?}", reason);
                        self.events.close(reason);
                        return;
                    }
                    None => {
                        log::debug!("Transport dropped while connecting, stop");
                        return;
                    }
                },
            }
        };

        log::debug!("Socket connected");

        self.connected.store(true, Ordering::SeqCst);
        self.events.open();

        let reason = self.serve(ws).await;

        self.connected.store(false, Ordering::SeqCst);

        if let Some(reason) = reason {
            log::debug!("Socket closed: {:?}", reason);
            self.events.close(reason);
        }
    }

    /// Pump frames until socket closes. `None` means the transport was dropped
    /// and nobody is listening for the close.
    async fn serve(&mut self, mut ws: WebsocketClient) -> Option<CloseReason> {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        let msg = match frame {
                            Frame::Text(text) => {
                                self.log_frame("sent", &text);
                                Message::Text(text)
                            }
                            Frame::Binary(data) => Message::Binary(data.to_vec()),
                        };
                        if let Err(err) = ws.send(msg).await {
                            self.events.error(format!("send failed: {}", err));
                            return Some(CloseReason::Abnormal(err.to_string()));
                        }
                    }
                    Some(Command::Disconnect(reason)) => {
                        if let Err(err) = ws.close(None).await {
                            log::debug!("Close socket gracefully failed: {}", err);
                        }
                        return Some(reason);
                    }
                    None => {
                        log::debug!("Transport dropped, close socket");
                        if let Err(err) = ws.close(None).await {
                            log::debug!("Close socket gracefully failed: {}", err);
                        }
                        return None;
                    }
                },

                item = ws.next() => match item {
                    Some(Ok(Message::Text(text))) => {
                        self.log_frame("received", &text);
                        self.events.frame(Frame::Text(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.events.frame(Frame::Binary(data.into()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let detail = frame
                            .map(|f| format!("server closed: {} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "server closed".to_string());
                        return Some(CloseReason::Abnormal(detail));
                    }
                    // ping and pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        self.events.error(format!("receive failed: {}", err));
                        return Some(CloseReason::Abnormal(err.to_string()));
                    }
                    None => {
                        return Some(CloseReason::Abnormal("socket stream ended".to_string()));
                    }
                },
            }
        }
    }

    fn log_frame(&self, direction: &str, text: &str) {
        if self.log {
            log::debug!("Socket {} frame: {}", direction, text);
        } else {
            log::trace!("Socket {} frame: {}", direction, text);
        }
    }
}

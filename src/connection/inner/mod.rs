mod machine;

pub use machine::ConnectionState;

use std::{sync::Weak, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::Config,
    message::Envelope,
    sink::NotificationSink,
    transport::{
        CloseReason, EventEmitter, Frame, Transport, TransportEvent, TransportFactory,
        TransportOptions,
    },
};
use machine::{Effect, Input, Machine};

/// Request from connection handle
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Send(Envelope),
}

#[derive(Debug)]
enum Timer {
    Registration(u64),
    Reconnect(u64),
}

/// Owner of transport, timers and state machine of one connection.
///
/// Commands, transport events and timer firings are all handled by one
/// background task, so state is never mutated concurrently.
pub(crate) struct Controller<F: TransportFactory> {
    machine: Machine,
    factory: F,
    transport: Option<F::Transport>,
    options: TransportOptions,
    registration_timeout: Duration,
    reconnect_delay: Duration,
    debug: bool,
    sink: Weak<dyn NotificationSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    emitter: EventEmitter,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
    registration_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    state: watch::Sender<ConnectionState>,
}

impl<F: TransportFactory> Controller<F> {
    pub fn new(
        config: Config,
        factory: F,
        sink: Weak<dyn NotificationSink>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let (emitter, events) = EventEmitter::new();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            options: config.transport_options(),
            machine: Machine::new(config.identity, config.credential),
            factory,
            transport: None,
            registration_timeout: config.registration_timeout,
            reconnect_delay: config.reconnect_delay,
            debug: config.debug,
            sink,
            commands,
            emitter,
            events,
            timer_tx,
            timer_rx,
            registration_timer: None,
            reconnect_timer: None,
            state,
        }
    }

    pub fn controller_start(self) -> JoinHandle<()> {
        tokio::spawn(self.controller_background())
    }

    async fn controller_background(mut self) {
        log::debug!("Connection controller task start");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        log::debug!("Connection handle dropped, stop");
                        break;
                    }
                },

                Some(event) = self.events.recv() => self.on_transport_event(event).await,

                Some(timer) = self.timer_rx.recv() => self.on_timer(timer).await,
            }
        }

        self.teardown();
    }

    async fn on_command(&mut self, command: Command) {
        log::trace!("Received {:?} command", command);

        match command {
            Command::Start => self.apply(Input::Start).await,
            Command::Stop => self.apply(Input::Stop).await,
            Command::Send(envelope) => self.send(envelope),
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.apply(Input::Opened).await,
            TransportEvent::Close(reason) => self.apply(Input::Closed(reason)).await,
            TransportEvent::Error(detail) => {
                if self.debug {
                    log::warn!("Transport error: {}", detail);
                }
            }
            TransportEvent::Frame(Frame::Text(text)) => match Envelope::decode(&text) {
                Ok(envelope) => self.apply(Input::Received(envelope)).await,
                Err(err) => log::debug!("Drop frame can't be decoded: {}", err),
            },
            TransportEvent::Frame(Frame::Binary(data)) => {
                log::trace!("Ignore binary frame of {} bytes", data.len());
            }
        }
    }

    async fn on_timer(&mut self, timer: Timer) {
        log::trace!("{:?} timer fired", timer);

        match timer {
            Timer::Registration(generation) => {
                self.apply(Input::RegistrationTimeout(generation)).await
            }
            Timer::Reconnect(generation) => self.apply(Input::ReconnectTimer(generation)).await,
        }
    }

    async fn apply(&mut self, input: Input) {
        let effects = self.machine.handle(input);

        // publish before running effects, sink must see the new state
        self.publish_state();

        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::CreateTransport => {
                log::debug!("Create transport for {}", self.options.socket_url());
                let transport = self
                    .factory
                    .create(self.options.clone(), self.emitter.clone());
                self.transport = Some(transport);
            }
            Effect::Connect => match self.transport {
                Some(ref mut transport) => transport.connect(),
                None => log::warn!("No transport to connect"),
            },
            Effect::Disconnect(reason) => match self.transport {
                Some(ref mut transport) => transport.disconnect(reason),
                None => log::warn!("No transport to disconnect"),
            },
            Effect::ReleaseTransport => {
                log::debug!("Release transport");
                self.transport = None;
                for timer in [self.registration_timer.take(), self.reconnect_timer.take()]
                    .into_iter()
                    .flatten()
                {
                    timer.abort();
                }
            }
            Effect::Send(envelope) => self.write(envelope),
            Effect::ArmRegistrationTimer(generation) => {
                if let Some(timer) = self.registration_timer.take() {
                    timer.abort();
                }
                let timer =
                    self.spawn_timer(self.registration_timeout, Timer::Registration(generation));
                self.registration_timer = Some(timer);
            }
            Effect::ArmReconnectTimer(generation) => {
                log::info!("Reconnect in {:?}", self.reconnect_delay);
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                let timer = self.spawn_timer(self.reconnect_delay, Timer::Reconnect(generation));
                self.reconnect_timer = Some(timer);
            }
            Effect::ConnectivityChanged(connected) => match self.sink.upgrade() {
                Some(sink) => sink.on_connectivity_changed(connected).await,
                None => log::trace!("Sink dropped, skip connectivity notification"),
            },
            Effect::DeliverMessage(payload) => match self.sink.upgrade() {
                Some(sink) => sink.on_message(payload).await,
                None => log::trace!("Sink dropped, skip message"),
            },
            Effect::DeliverAggregation(payload) => match self.sink.upgrade() {
                Some(sink) => sink.on_aggregation(payload).await,
                None => log::trace!("Sink dropped, skip aggregation"),
            },
        }
    }

    fn spawn_timer(&self, delay: Duration, timer: Timer) -> JoinHandle<()> {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(timer).is_err() {
                log::trace!("Controller stopped, drop timer");
            }
        })
    }

    /// Fire-and-forget send of application envelope, only when registered
    fn send(&mut self, envelope: Envelope) {
        if !self.machine.state().is_connected() {
            log::debug!(
                "Drop {} envelope, connection in {:?} state",
                envelope.channel(),
                self.machine.state()
            );
            return;
        }

        let open = self
            .transport
            .as_ref()
            .is_some_and(|transport| transport.is_connected());

        if open {
            self.write(envelope)
        } else {
            log::debug!("Drop {} envelope, transport not open", envelope.channel());
        }
    }

    fn write(&mut self, envelope: Envelope) {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                log::debug!("Drop envelope: {}", err);
                return;
            }
        };

        match self.transport {
            Some(ref mut transport) => transport.send(Frame::Text(text)),
            None => log::debug!("No transport, drop {} envelope", envelope.channel()),
        }
    }

    fn teardown(&mut self) {
        for timer in [self.registration_timer.take(), self.reconnect_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }

        if let Some(mut transport) = self.transport.take() {
            log::debug!("Disconnect and release transport on teardown");
            transport.disconnect(CloseReason::Manual);
        }

        self.state.send_replace(ConnectionState::Idle);

        log::debug!("Connection controller task stop");
    }
}

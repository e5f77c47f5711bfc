//! Connection lifecycle state machine.
//!
//! [`Machine::handle`] is a pure transition function: it updates state and
//! returns the side effects the controller must run, in order. It never
//! touches transport, timers or sink by itself.

use enum_as_inner::EnumAsInner;

use crate::{
    message::{Envelope, Payload},
    transport::CloseReason,
};

/// Observable state of a connection
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, EnumAsInner)]
pub enum ConnectionState {
    /// no transport, the only resting state
    #[default]
    Idle,
    /// transport connecting
    Connecting,
    /// transport open, registration sent, waiting server acknowledgment
    AwaitingRegistrationAck,
    /// registration acknowledged, messages can be sent
    Connected,
    /// manual stop requested, waiting transport close
    Disconnecting,
    /// transport closed abnormally, waiting reconnect timer
    Reconnecting,
}

/// Input of state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Start,
    Stop,
    Opened,
    Closed(CloseReason),
    Received(Envelope),
    /// registration timer armed at the open of given generation fired
    RegistrationTimeout(u64),
    /// reconnect timer of given generation fired
    ReconnectTimer(u64),
}

/// Side effect requested by state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    CreateTransport,
    Connect,
    Disconnect(CloseReason),
    ReleaseTransport,
    Send(Envelope),
    ArmRegistrationTimer(u64),
    ArmReconnectTimer(u64),
    ConnectivityChanged(bool),
    DeliverMessage(Payload),
    DeliverAggregation(Payload),
}

#[derive(Debug)]
pub(crate) struct Machine {
    identity: String,
    credential: String,
    state: ConnectionState,
    has_transport: bool,
    reconnect_in_flight: bool,
    generation: u64,
    reconnect_generation: u64,
}

impl Machine {
    pub fn new(identity: String, credential: String) -> Self {
        Self {
            identity,
            credential,
            state: ConnectionState::Idle,
            has_transport: false,
            reconnect_in_flight: false,
            generation: 0,
            reconnect_generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn has_transport(&self) -> bool {
        self.has_transport
    }

    #[cfg(test)]
    pub fn reconnect_in_flight(&self) -> bool {
        self.reconnect_in_flight
    }

    fn move_to(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("Move from {:?} to {:?} state", self.state, state);
            self.state = state;
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        log::trace!("Handle {:?} in {:?} state", input, self.state);

        match input {
            Input::Start => self.on_start(),
            Input::Stop => self.on_stop(),
            Input::Opened => self.on_opened(),
            Input::Closed(reason) => self.on_closed(reason),
            Input::Received(envelope) => self.on_received(envelope),
            Input::RegistrationTimeout(generation) => self.on_registration_timeout(generation),
            Input::ReconnectTimer(generation) => self.on_reconnect_timer(generation),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.has_transport {
            log::debug!("Transport exists in {:?} state, ignore start", self.state);
            return vec![];
        }

        self.has_transport = true;
        self.move_to(ConnectionState::Connecting);

        vec![Effect::CreateTransport, Effect::Connect]
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if !self.has_transport {
            log::debug!("No transport, ignore stop");
            return vec![];
        }

        if self.state == ConnectionState::Disconnecting {
            log::debug!("Already disconnecting, ignore stop");
            return vec![];
        }

        let mut effects = vec![];
        if self.state == ConnectionState::Connected {
            effects.push(Effect::ConnectivityChanged(false));
        }

        self.move_to(ConnectionState::Disconnecting);
        effects.push(Effect::Disconnect(CloseReason::Manual));

        effects
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            log::debug!("Transport opened in {:?} state, ignore", self.state);
            return vec![];
        }

        self.generation += 1;
        self.move_to(ConnectionState::AwaitingRegistrationAck);

        vec![
            Effect::Send(Envelope::register(&self.identity, &self.credential)),
            Effect::ArmRegistrationTimer(self.generation),
        ]
    }

    fn on_closed(&mut self, reason: CloseReason) -> Vec<Effect> {
        if !self.has_transport {
            log::debug!("Close {:?} without transport, ignore", reason);
            return vec![];
        }

        let mut effects = vec![];

        if self.state == ConnectionState::Connected {
            effects.push(Effect::ConnectivityChanged(false));
        }

        // a manual stop wins over whatever close arrives first
        if !reason.wants_reconnect() || self.state == ConnectionState::Disconnecting {
            log::info!("Transport closed by stop, reason {:?}", reason);
            self.has_transport = false;
            // a fired timer may still be queued, make it stale
            self.reconnect_in_flight = false;
            self.reconnect_generation += 1;
            self.move_to(ConnectionState::Idle);
            effects.push(Effect::ReleaseTransport);
            return effects;
        }

        self.move_to(ConnectionState::Reconnecting);

        if self.reconnect_in_flight {
            log::debug!("Reconnect already scheduled, ignore close {:?}", reason);
        } else {
            log::warn!("Transport closed abnormally: {:?}, schedule reconnect", reason);
            self.reconnect_in_flight = true;
            self.reconnect_generation += 1;
            effects.push(Effect::ArmReconnectTimer(self.reconnect_generation));
        }

        effects
    }

    fn on_received(&mut self, envelope: Envelope) -> Vec<Effect> {
        match envelope {
            Envelope::RegisterOk if self.state == ConnectionState::AwaitingRegistrationAck => {
                log::info!("Registration accepted");
                self.move_to(ConnectionState::Connected);
                vec![Effect::ConnectivityChanged(true)]
            }
            Envelope::RegisterFail if self.state == ConnectionState::AwaitingRegistrationAck => {
                log::warn!("Registration rejected, stop");
                self.on_stop()
            }
            Envelope::ServerMessage(payload) => vec![Effect::DeliverMessage(payload)],
            Envelope::ServerAggregation(payload) => vec![Effect::DeliverAggregation(payload)],
            other => {
                log::debug!(
                    "Ignore {} envelope in {:?} state",
                    other.channel(),
                    self.state
                );
                vec![]
            }
        }
    }

    fn on_registration_timeout(&mut self, generation: u64) -> Vec<Effect> {
        if self.state != ConnectionState::AwaitingRegistrationAck || generation != self.generation
        {
            log::trace!("Stale registration timer {}, ignore", generation);
            return vec![];
        }

        log::warn!("Wait registration acknowledgment timeout, restart transport");

        vec![Effect::Disconnect(CloseReason::Restart)]
    }

    fn on_reconnect_timer(&mut self, generation: u64) -> Vec<Effect> {
        if !self.reconnect_in_flight || generation != self.reconnect_generation {
            log::trace!("Stale reconnect timer {}, ignore", generation);
            return vec![];
        }

        self.reconnect_in_flight = false;

        if self.state != ConnectionState::Reconnecting || !self.has_transport {
            log::debug!("Reconnect timer fired in {:?} state, ignore", self.state);
            return vec![];
        }

        log::info!("Reconnecting");
        self.move_to(ConnectionState::Connecting);

        vec![Effect::Connect]
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn machine() -> Machine {
        Machine::new("u1".to_string(), "t1".to_string())
    }

    fn abnormal() -> CloseReason {
        CloseReason::Abnormal("network down".to_string())
    }

    /// machine in connected state
    fn connected() -> Machine {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);
        m.handle(Input::Received(Envelope::RegisterOk));
        assert_eq!(m.state(), ConnectionState::Connected);
        m
    }

    fn count_reconnect_timers(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::ArmReconnectTimer(_)))
            .count()
    }

    #[test]
    fn test_start_creates_transport_and_connects() {
        let mut m = machine();
        assert_eq!(
            m.handle(Input::Start),
            vec![Effect::CreateTransport, Effect::Connect]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.has_transport());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut m = machine();
        m.handle(Input::Start);
        assert!(m.handle(Input::Start).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_open_sends_registration_and_arms_timer() {
        let mut m = machine();
        m.handle(Input::Start);

        assert_eq!(
            m.handle(Input::Opened),
            vec![
                Effect::Send(Envelope::register("u1", "t1")),
                Effect::ArmRegistrationTimer(1),
            ]
        );
        assert_eq!(m.state(), ConnectionState::AwaitingRegistrationAck);
    }

    #[test]
    fn test_open_alone_is_not_connected() {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);
        assert!(!m.state().is_connected());
    }

    #[test]
    fn test_register_ok_connects_and_notifies() {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);

        assert_eq!(
            m.handle(Input::Received(Envelope::RegisterOk)),
            vec![Effect::ConnectivityChanged(true)]
        );
        assert!(m.state().is_connected());
    }

    #[test]
    fn test_register_ok_outside_handshake_ignored() {
        let mut m = machine();
        m.handle(Input::Start);
        assert!(m.handle(Input::Received(Envelope::RegisterOk)).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);

        let mut m = connected();
        assert!(m.handle(Input::Received(Envelope::RegisterOk)).is_empty());
    }

    #[test]
    fn test_register_fail_stops_manually() {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);

        assert_eq!(
            m.handle(Input::Received(Envelope::RegisterFail)),
            vec![Effect::Disconnect(CloseReason::Manual)]
        );
        assert_eq!(m.state(), ConnectionState::Disconnecting);

        assert_eq!(
            m.handle(Input::Closed(CloseReason::Manual)),
            vec![Effect::ReleaseTransport]
        );
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(!m.reconnect_in_flight());
    }

    #[test]
    fn test_registration_timeout_restarts() {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);

        assert_eq!(
            m.handle(Input::RegistrationTimeout(1)),
            vec![Effect::Disconnect(CloseReason::Restart)]
        );

        assert_eq!(
            m.handle(Input::Closed(CloseReason::Restart)),
            vec![Effect::ArmReconnectTimer(1)]
        );
        assert_eq!(m.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_registration_timeout_after_ack_is_noop() {
        let mut m = connected();
        assert!(m.handle(Input::RegistrationTimeout(1)).is_empty());
        assert!(m.state().is_connected());
    }

    #[test]
    fn test_registration_timeout_of_previous_open_is_noop() {
        let mut m = machine();
        m.handle(Input::Start);
        m.handle(Input::Opened);
        m.handle(Input::Closed(abnormal()));
        m.handle(Input::ReconnectTimer(1));
        m.handle(Input::Opened);

        assert!(m.handle(Input::RegistrationTimeout(1)).is_empty());
        assert_eq!(
            m.handle(Input::RegistrationTimeout(2)),
            vec![Effect::Disconnect(CloseReason::Restart)]
        );
    }

    #[test]
    fn test_abnormal_close_when_connected() {
        let mut m = connected();
        assert_eq!(
            m.handle(Input::Closed(abnormal())),
            vec![Effect::ConnectivityChanged(false), Effect::ArmReconnectTimer(1)]
        );
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert!(m.reconnect_in_flight());
    }

    #[test]
    fn test_close_before_connected_does_not_notify() {
        let mut m = machine();
        m.handle(Input::Start);
        assert_eq!(
            m.handle(Input::Closed(abnormal())),
            vec![Effect::ArmReconnectTimer(1)]
        );
    }

    #[test]
    fn test_only_one_reconnect_timer_in_flight() {
        let mut m = connected();
        let mut effects = m.handle(Input::Closed(abnormal()));
        effects.extend(m.handle(Input::Closed(abnormal())));
        effects.extend(m.handle(Input::Closed(CloseReason::Restart)));

        assert_eq!(count_reconnect_timers(&effects), 1);
    }

    #[test]
    fn test_reconnect_timer_reconnects_on_existing_transport() {
        let mut m = connected();
        m.handle(Input::Closed(abnormal()));

        assert_eq!(m.handle(Input::ReconnectTimer(1)), vec![Effect::Connect]);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(!m.reconnect_in_flight());

        // a failed attempt schedules the next one
        assert_eq!(
            m.handle(Input::Closed(abnormal())),
            vec![Effect::ArmReconnectTimer(2)]
        );
    }

    #[test]
    fn test_manual_stop_never_reconnects() {
        let mut m = connected();
        m.handle(Input::Closed(abnormal()));
        m.handle(Input::Closed(abnormal()));

        assert_eq!(
            m.handle(Input::Stop),
            vec![Effect::Disconnect(CloseReason::Manual)]
        );

        let effects = m.handle(Input::Closed(CloseReason::Manual));
        assert_eq!(count_reconnect_timers(&effects), 0);
        assert_eq!(effects, vec![Effect::ReleaseTransport]);

        // the pending timer fires against an idle machine
        assert!(m.handle(Input::ReconnectTimer(1)).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(!m.has_transport());
    }

    #[test]
    fn test_manual_stop_wins_over_abnormal_close() {
        let mut m = connected();
        assert_eq!(
            m.handle(Input::Stop),
            vec![
                Effect::ConnectivityChanged(false),
                Effect::Disconnect(CloseReason::Manual)
            ]
        );

        assert_eq!(
            m.handle(Input::Closed(abnormal())),
            vec![Effect::ReleaseTransport]
        );
        assert!(!m.reconnect_in_flight());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_stop_without_transport_is_noop() {
        let mut m = machine();
        assert!(m.handle(Input::Stop).is_empty());
    }

    #[test]
    fn test_stop_twice_disconnects_once() {
        let mut m = connected();
        m.handle(Input::Stop);
        assert!(m.handle(Input::Stop).is_empty());
    }

    #[test]
    fn test_start_after_stop_creates_new_transport() {
        let mut m = connected();
        m.handle(Input::Stop);
        m.handle(Input::Closed(CloseReason::Manual));

        assert_eq!(
            m.handle(Input::Start),
            vec![Effect::CreateTransport, Effect::Connect]
        );
    }

    #[test]
    fn test_reconnect_after_restart_from_pending_reconnect() {
        let mut m = connected();
        m.handle(Input::Closed(abnormal()));
        m.handle(Input::Stop);
        m.handle(Input::Closed(CloseReason::Manual));

        m.handle(Input::Start);
        m.handle(Input::Opened);
        m.handle(Input::Received(Envelope::RegisterOk));

        let effects = m.handle(Input::Closed(abnormal()));
        assert_eq!(count_reconnect_timers(&effects), 1);
    }

    #[test]
    fn test_reconnect_timer_of_released_transport_is_stale() {
        let mut m = connected();
        assert_eq!(
            count_reconnect_timers(&m.handle(Input::Closed(abnormal()))),
            1
        );
        m.handle(Input::Stop);
        m.handle(Input::Closed(CloseReason::Manual));

        m.handle(Input::Start);
        assert_eq!(
            m.handle(Input::Closed(abnormal())),
            vec![Effect::ArmReconnectTimer(3)]
        );

        // first timer fired before release but is handled only now
        assert!(m.handle(Input::ReconnectTimer(1)).is_empty());
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert!(m.reconnect_in_flight());

        assert!(m.handle(Input::Closed(abnormal())).is_empty());

        assert_eq!(m.handle(Input::ReconnectTimer(3)), vec![Effect::Connect]);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_server_messages_routed() {
        let payload = json!({"k": "v"}).as_object().unwrap().clone();

        let mut m = connected();
        assert_eq!(
            m.handle(Input::Received(Envelope::ServerMessage(payload.clone()))),
            vec![Effect::DeliverMessage(payload.clone())]
        );
        assert_eq!(
            m.handle(Input::Received(Envelope::ServerAggregation(payload.clone()))),
            vec![Effect::DeliverAggregation(payload)]
        );
    }

    #[test]
    fn test_connected_iff_ack_after_latest_open() {
        let mut m = machine();
        let steps = vec![
            (Input::Start, false),
            (Input::Received(Envelope::RegisterOk), false),
            (Input::Opened, false),
            (Input::Received(Envelope::RegisterOk), true),
            (Input::Closed(abnormal()), false),
            (Input::Received(Envelope::RegisterOk), false),
            (Input::ReconnectTimer(1), false),
            (Input::Received(Envelope::RegisterOk), false),
            (Input::Opened, false),
            (Input::Received(Envelope::RegisterOk), true),
            (Input::Opened, true),
            (Input::Closed(CloseReason::Restart), false),
            (Input::Received(Envelope::RegisterOk), false),
        ];

        for (i, (input, want)) in steps.into_iter().enumerate() {
            m.handle(input);
            assert_eq!(m.state().is_connected(), want, "step {}", i);
        }
    }
}

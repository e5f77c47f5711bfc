//! Recording transport for tests, events are injected by hand.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{CloseReason, EventEmitter, Frame, Transport, TransportFactory, TransportOptions};

#[derive(Debug, Default)]
pub(crate) struct StubRecord {
    pub created: usize,
    pub connects: usize,
    pub disconnects: Vec<CloseReason>,
    pub sent: Vec<Frame>,
    pub connected: bool,
    pub options: Option<TransportOptions>,
    events: Option<EventEmitter>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct StubConnector {
    record: Arc<Mutex<StubRecord>>,
}

impl StubConnector {
    pub fn record(&self) -> MutexGuard<'_, StubRecord> {
        self.record.lock().unwrap()
    }

    fn emitter(&self) -> EventEmitter {
        self.record()
            .events
            .clone()
            .expect("no transport created yet")
    }

    pub fn open(&self) {
        self.record().connected = true;
        self.emitter().open();
    }

    pub fn close(&self, reason: CloseReason) {
        self.record().connected = false;
        self.emitter().close(reason);
    }

    pub fn error(&self, detail: &str) {
        self.emitter().error(detail);
    }

    pub fn receive(&self, frame: Frame) {
        self.emitter().frame(frame);
    }

    pub fn receive_text(&self, text: &str) {
        self.receive(Frame::Text(text.to_string()));
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.record()
            .sent
            .iter()
            .filter_map(|f| f.as_text().cloned())
            .collect()
    }
}

impl TransportFactory for StubConnector {
    type Transport = StubTransport;

    fn create(&self, options: TransportOptions, events: EventEmitter) -> StubTransport {
        let mut record = self.record();
        record.created += 1;
        record.connected = false;
        record.options = Some(options);
        record.events = Some(events);

        StubTransport {
            record: Arc::clone(&self.record),
        }
    }
}

#[derive(Debug)]
pub(crate) struct StubTransport {
    record: Arc<Mutex<StubRecord>>,
}

impl Transport for StubTransport {
    fn connect(&mut self) {
        self.record.lock().unwrap().connects += 1;
    }

    fn disconnect(&mut self, reason: CloseReason) {
        self.record.lock().unwrap().disconnects.push(reason);
    }

    fn send(&mut self, frame: Frame) {
        self.record.lock().unwrap().sent.push(frame);
    }

    fn is_connected(&self) -> bool {
        self.record.lock().unwrap().connected
    }
}

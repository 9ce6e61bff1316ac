//! Shared fixtures for the dispatcher integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use switchyard_core::{Status, Tag};
use switchyard_engine::{
    DispatchConfig, Dispatcher, HandlerDescriptor, StreamResponder, TickMetrics, TimeMode,
    UnaryResponder,
};
use switchyard_test_utils::MockTransport;

pub const TIME: &str = "tempo.Time";
pub const PING: &str = "tempo.Ping";
pub const PORT: u16 = 10001;

/// Time-control service used across the tests.
///
/// - `Now` answers with the current time.
/// - `Watch` streams `request[0]` items, then ends with `OUT_OF_RANGE`.
/// - `Park` keeps its responder so the test decides when to reply.
#[derive(Default)]
pub struct Clock {
    pub now: Cell<u64>,
    sent: RefCell<HashMap<Tag, u8>>,
    pub parked: RefCell<Vec<UnaryResponder>>,
}

impl Clock {
    pub fn at(now: u64) -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(now),
            ..Default::default()
        })
    }

    fn now(&self, _: &[u8], r: UnaryResponder) {
        r.ok(self.now.get().to_le_bytes().to_vec());
    }

    fn watch(&self, request: &[u8], r: StreamResponder) {
        let wanted = request.first().copied().unwrap_or(0);
        let mut sent = self.sent.borrow_mut();
        let n = sent.entry(r.tag()).or_insert(0);
        if *n < wanted {
            *n += 1;
            r.send(vec![*n]);
        } else {
            r.finish(Status::out_of_range("no more data"));
        }
    }

    fn park(&self, _: &[u8], r: UnaryResponder) {
        self.parked.borrow_mut().push(r);
    }

    /// Answer the oldest parked call.
    pub fn release_one(&self) -> bool {
        let next = {
            let mut parked = self.parked.borrow_mut();
            if parked.is_empty() {
                None
            } else {
                Some(parked.remove(0))
            }
        };
        match next {
            Some(r) => {
                r.ok(b"released".to_vec());
                true
            }
            None => false,
        }
    }
}

pub fn time_handlers() -> Vec<HandlerDescriptor> {
    vec![
        HandlerDescriptor::unary("Now", Clock::now),
        HandlerDescriptor::streaming("Watch", Clock::watch),
        HandlerDescriptor::unary("Park", Clock::park),
    ]
}

pub fn ping_handlers() -> Vec<HandlerDescriptor> {
    vec![HandlerDescriptor::unary_fn("Ping", |req, r| {
        r.ok(req.to_vec())
    })]
}

/// A running dispatcher with the time service active on `clock` and the
/// standalone ping service.
pub fn running(clock: &Rc<Clock>) -> (Dispatcher<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let mut d = Dispatcher::new(transport.clone(), DispatchConfig::default()).unwrap();
    d.register(TIME, time_handlers()).unwrap();
    d.register(PING, ping_handlers()).unwrap();
    d.initialize(PORT).unwrap();
    d.activate_service(TIME, clock).unwrap();
    (d, transport)
}

/// One fixed-step pass.
pub fn fixed(d: &mut Dispatcher<MockTransport>) -> TickMetrics {
    d.drain(
        TimeMode::FixedStep,
        Duration::from_micros(1000),
        Duration::from_nanos(1000),
    )
}

/// One wall-clock pass with a budget generous enough that only idle
/// polls end it.
pub fn wall(d: &mut Dispatcher<MockTransport>) -> TickMetrics {
    d.drain(
        TimeMode::WallClock,
        Duration::from_secs(5),
        Duration::from_nanos(1000),
    )
}

/// Every declared method has exactly one armed, waiting manager.
pub fn assert_spare_slots(d: &Dispatcher<MockTransport>) {
    let registry = d.registry().expect("dispatcher is running");
    for service in registry.services() {
        for desc in registry.descriptors(service).unwrap() {
            assert_eq!(
                d.spare_slots(service.as_str(), desc.method().as_str()),
                1,
                "{service}/{} must have exactly one spare slot",
                desc.method()
            );
        }
    }
}

/// Decode a `Now` reply.
pub fn as_time(payload: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(payload);
    u64::from_le_bytes(bytes)
}

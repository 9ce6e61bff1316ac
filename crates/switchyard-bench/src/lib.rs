//! Benchmark workloads and utilities for the Switchyard dispatcher.
//!
//! Provides a reference service and a ready-to-tick dispatcher over the
//! in-memory [`MockTransport`]:
//!
//! - [`reference_handlers`]: one unary echo method and one streaming
//!   counter method
//! - [`reference_dispatcher`]: a running dispatcher serving them
//! - [`serve_unary`] / [`serve_stream`]: drive calls to completion

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use switchyard_core::{Status, Tag};
use switchyard_engine::{DispatchConfig, Dispatcher, HandlerDescriptor, TimeMode};
use switchyard_test_utils::MockTransport;

/// Service name of the reference workload.
pub const REFERENCE_SERVICE: &str = "bench.Reference";

/// Port the reference dispatcher listens on.
pub const REFERENCE_PORT: u16 = 10001;

/// `Echo` (unary, returns the request) and `Count` (streaming, sends
/// `request[0]` one-byte items, then ends with `OUT_OF_RANGE`).
pub fn reference_handlers() -> Vec<HandlerDescriptor> {
    let sent: Rc<RefCell<HashMap<Tag, u8>>> = Rc::default();
    vec![
        HandlerDescriptor::unary_fn("Echo", |request, r| r.ok(request.to_vec())),
        HandlerDescriptor::streaming_fn("Count", move |request, r| {
            let wanted = request.first().copied().unwrap_or(0);
            let mut sent = sent.borrow_mut();
            let n = sent.entry(r.tag()).or_insert(0);
            if *n < wanted {
                *n += 1;
                r.send(vec![*n]);
            } else {
                sent.remove(&r.tag());
                r.finish(Status::out_of_range("no more data"));
            }
        }),
    ]
}

/// A running fixed-step dispatcher serving [`reference_handlers`], and
/// a handle on its transport.
pub fn reference_dispatcher() -> (Dispatcher<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let config = DispatchConfig {
        time_mode: TimeMode::FixedStep,
        ..Default::default()
    };
    let mut d = Dispatcher::new(transport.clone(), config).unwrap();
    d.register(REFERENCE_SERVICE, reference_handlers()).unwrap();
    d.initialize(REFERENCE_PORT).unwrap();
    (d, transport)
}

/// Serve `calls` echo calls, one per tick. Returns the calls finished.
pub fn serve_unary(d: &mut Dispatcher<MockTransport>, t: &MockTransport, calls: usize) -> u64 {
    let mut finished = 0;
    for i in 0..calls {
        t.inject_call(REFERENCE_SERVICE, "Echo", vec![i as u8]);
        finished += d.tick().calls_finished;
    }
    finished
}

/// Serve one counter stream of `items` items. Returns the items written.
pub fn serve_stream(d: &mut Dispatcher<MockTransport>, t: &MockTransport, items: u8) -> u64 {
    t.inject_call(REFERENCE_SERVICE, "Count", vec![items]);
    let mut written = 0;
    loop {
        let m = d.tick();
        written += m.stream_writes;
        if m.stream_finishes > 0 || m.events == 0 {
            break;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_workload_completes() {
        let (mut d, t) = reference_dispatcher();
        assert_eq!(serve_unary(&mut d, &t, 10), 10);
        assert_eq!(d.live_calls(), 2);
    }

    #[test]
    fn stream_workload_writes_every_item() {
        let (mut d, t) = reference_dispatcher();
        assert_eq!(serve_stream(&mut d, &t, 16), 16);
        d.tick();
        assert_eq!(d.live_calls(), 2);
    }
}

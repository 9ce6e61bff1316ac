//! In-memory completion-queue transport.
//!
//! [`MockTransport`] is a cheap-clone handle: the dispatcher owns one
//! copy, the test keeps another to inject calls, abort them, and
//! inspect what was written. Time is counted in polls. An event
//! scheduled `n` polls ahead is returned by the `n`-th call to
//! [`next()`](Transport::next) after it was scheduled; idle polls
//! return [`QueueEvent::Timeout`] immediately.
//!
//! The mock enforces the transport contract on the caller: it panics if
//! a tag is armed twice, or if a write is issued while another
//! operation for the same call is still in flight.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use switchyard_core::{
    CallKind, CompressionLevel, MethodId, QueueEvent, ServiceId, Status, Tag, Transport,
    TransportError,
};

/// One operation the dispatcher issued, in issue order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Accept {
        tag: Tag,
        service: ServiceId,
        method: MethodId,
        kind: CallKind,
    },
    WriteFinal {
        tag: Tag,
        payload: Vec<u8>,
        status: Status,
    },
    Write {
        tag: Tag,
        payload: Vec<u8>,
    },
    Finish {
        tag: Tag,
        status: Status,
    },
}

impl Op {
    pub fn tag(&self) -> Tag {
        match self {
            Op::Accept { tag, .. }
            | Op::WriteFinal { tag, .. }
            | Op::Write { tag, .. }
            | Op::Finish { tag, .. } => *tag,
        }
    }
}

struct Slot {
    tag: Tag,
    service: ServiceId,
    method: MethodId,
}

struct Scheduled {
    event: QueueEvent,
    ready_at: u64,
}

#[derive(Default)]
struct Inner {
    address: Option<String>,
    services: Vec<ServiceId>,
    compression: CompressionLevel,
    running: bool,
    queue_closed: bool,
    starts: usize,
    fail_next_start: Option<TransportError>,
    shutdown_deadline: Option<Duration>,
    polls: u64,
    write_delay: u64,
    slots: Vec<Slot>,
    queue: VecDeque<Scheduled>,
    in_flight: HashSet<Tag>,
    open_calls: HashSet<Tag>,
    aborted: HashSet<Tag>,
    requests: HashMap<Tag, Vec<u8>>,
    ops: Vec<Op>,
}

impl Inner {
    fn schedule(&mut self, tag: Tag, ok: bool, delay: u64) {
        self.queue.push_back(Scheduled {
            event: QueueEvent::GotEvent { tag, ok },
            ready_at: self.polls + 1 + delay,
        });
    }

    fn start_write(&mut self, tag: Tag, op: Op) {
        // Writes to a call the client closed are legal; they complete
        // with `ok = false`.
        assert!(
            self.open_calls.contains(&tag) || self.aborted.contains(&tag),
            "write issued on tag {tag} with no open call"
        );
        assert!(
            self.in_flight.insert(tag),
            "write issued on tag {tag} with an operation in flight"
        );
        self.ops.push(op);
        let ok = !self.aborted.contains(&tag);
        let delay = self.write_delay;
        self.schedule(tag, ok, delay);
    }
}

/// Scripted completion-queue transport for tests and benchmarks.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Rc<RefCell<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls a write takes to complete, beyond the next one. Default 0:
    /// a write completes on the first poll after it was issued.
    pub fn set_write_delay(&self, polls: u64) {
        self.inner.borrow_mut().write_delay = polls;
    }

    /// Make the next `build_and_start()` fail with `error`.
    pub fn fail_next_start(&self, error: TransportError) {
        self.inner.borrow_mut().fail_next_start = Some(error);
    }

    /// Deliver a call to the oldest armed slot of `service`/`method`.
    ///
    /// Returns the tag of the slot that took the call, or `None` if no
    /// slot is armed for the method.
    pub fn inject_call(&self, service: &str, method: &str, payload: Vec<u8>) -> Option<Tag> {
        let mut inner = self.inner.borrow_mut();
        let pos = inner
            .slots
            .iter()
            .position(|s| s.service.as_str() == service && s.method.as_str() == method)?;
        let slot = inner.slots.remove(pos);
        inner.requests.insert(slot.tag, payload);
        inner.open_calls.insert(slot.tag);
        inner.schedule(slot.tag, true, 0);
        Some(slot.tag)
    }

    /// Simulate the client closing the call owning `tag`.
    ///
    /// A pending completion for the call turns into `ok = false` and is
    /// delivered on the next poll. With nothing in flight, an `ok = false`
    /// event is scheduled directly. Later writes on the call complete
    /// with `ok = false`.
    pub fn abort(&self, tag: Tag) {
        let mut inner = self.inner.borrow_mut();
        inner.aborted.insert(tag);
        inner.open_calls.remove(&tag);
        let ready_at = inner.polls + 1;
        let mut found = false;
        for s in inner.queue.iter_mut() {
            if let QueueEvent::GotEvent { tag: t, ok } = &mut s.event {
                if *t == tag {
                    *ok = false;
                    s.ready_at = ready_at;
                    found = true;
                }
            }
        }
        if !found {
            inner.schedule(tag, false, 0);
        }
    }

    /// Queue a raw event for the next poll, bypassing the bookkeeping.
    pub fn push_event(&self, event: QueueEvent) {
        let mut inner = self.inner.borrow_mut();
        let ready_at = inner.polls + 1;
        inner.queue.push_back(Scheduled { event, ready_at });
    }

    /// Every operation issued so far.
    pub fn ops(&self) -> Vec<Op> {
        self.inner.borrow().ops.clone()
    }

    /// Operations issued so far, clearing the log.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut self.inner.borrow_mut().ops)
    }

    /// Operations issued for one tag.
    pub fn ops_for(&self, tag: Tag) -> Vec<Op> {
        self.inner
            .borrow()
            .ops
            .iter()
            .filter(|op| op.tag() == tag)
            .cloned()
            .collect()
    }

    /// Armed slots waiting for a call of `service`/`method`.
    pub fn armed(&self, service: &str, method: &str) -> usize {
        self.inner
            .borrow()
            .slots
            .iter()
            .filter(|s| s.service.as_str() == service && s.method.as_str() == method)
            .count()
    }

    /// Armed slots across all methods.
    pub fn armed_total(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    /// Tags with an operation whose completion has not been delivered.
    pub fn in_flight(&self) -> usize {
        self.inner.borrow().in_flight.len()
    }

    /// Events scheduled but not yet delivered.
    pub fn pending_events(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    pub fn address(&self) -> Option<String> {
        self.inner.borrow().address.clone()
    }

    pub fn compression(&self) -> CompressionLevel {
        self.inner.borrow().compression
    }

    /// Services registered on the most recent server build.
    pub fn registered_services(&self) -> Vec<ServiceId> {
        self.inner.borrow().services.clone()
    }

    /// Successful `build_and_start()` calls.
    pub fn starts(&self) -> usize {
        self.inner.borrow().starts
    }

    /// Deadline passed to the most recent `shutdown()`.
    pub fn shutdown_deadline(&self) -> Option<Duration> {
        self.inner.borrow().shutdown_deadline
    }

    pub fn polls(&self) -> u64 {
        self.inner.borrow().polls
    }
}

impl Transport for MockTransport {
    fn add_listening_port(&mut self, address: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.address = Some(address.to_string());
        inner.services.clear();
    }

    fn register_service(&mut self, service: &ServiceId) {
        self.inner.borrow_mut().services.push(service.clone());
    }

    fn set_compression(&mut self, level: CompressionLevel) {
        self.inner.borrow_mut().compression = level;
    }

    fn build_and_start(&mut self) -> Result<(), TransportError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(e) = inner.fail_next_start.take() {
            return Err(e);
        }
        inner.running = true;
        inner.queue_closed = false;
        inner.starts += 1;
        Ok(())
    }

    fn shutdown(&mut self, deadline: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.running = false;
        inner.shutdown_deadline = Some(deadline);
        let ready_at = inner.polls + 1;
        for s in inner.queue.iter_mut() {
            if let QueueEvent::GotEvent { ok, .. } = &mut s.event {
                *ok = false;
            }
            s.ready_at = ready_at;
        }
        let slots = std::mem::take(&mut inner.slots);
        for slot in slots {
            inner.schedule(slot.tag, false, 0);
        }
        inner.open_calls.clear();
    }

    fn shutdown_queue(&mut self) {
        self.inner.borrow_mut().queue_closed = true;
    }

    fn next(&mut self, _timeout: Duration) -> QueueEvent {
        let mut inner = self.inner.borrow_mut();
        inner.polls += 1;
        let now = inner.polls;
        if let Some(pos) = inner.queue.iter().position(|s| s.ready_at <= now) {
            if let Some(s) = inner.queue.remove(pos) {
                if let QueueEvent::GotEvent { tag, .. } = s.event {
                    inner.in_flight.remove(&tag);
                }
                return s.event;
            }
        }
        if inner.queue_closed && inner.queue.is_empty() {
            QueueEvent::Shutdown
        } else {
            QueueEvent::Timeout
        }
    }

    fn accept(&mut self, service: &ServiceId, method: &MethodId, kind: CallKind, tag: Tag) {
        let mut inner = self.inner.borrow_mut();
        assert!(
            inner.services.contains(service),
            "accept for service {service} that the server was not built with"
        );
        assert!(inner.in_flight.insert(tag), "tag {tag} armed twice");
        inner.slots.push(Slot {
            tag,
            service: service.clone(),
            method: method.clone(),
        });
        inner.ops.push(Op::Accept {
            tag,
            service: service.clone(),
            method: method.clone(),
            kind,
        });
    }

    fn take_request(&mut self, tag: Tag) -> Vec<u8> {
        self.inner
            .borrow_mut()
            .requests
            .remove(&tag)
            .unwrap_or_default()
    }

    fn write_final(&mut self, tag: Tag, payload: Vec<u8>, status: Status) {
        let mut inner = self.inner.borrow_mut();
        inner.start_write(
            tag,
            Op::WriteFinal {
                tag,
                payload,
                status,
            },
        );
        inner.open_calls.remove(&tag);
    }

    fn write(&mut self, tag: Tag, payload: Vec<u8>) {
        self.inner
            .borrow_mut()
            .start_write(tag, Op::Write { tag, payload });
    }

    fn finish(&mut self, tag: Tag, status: Status) {
        let mut inner = self.inner.borrow_mut();
        inner.start_write(tag, Op::Finish { tag, status });
        inner.open_calls.remove(&tag);
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MockTransport")
            .field("running", &inner.running)
            .field("polls", &inner.polls)
            .field("armed", &inner.slots.len())
            .field("pending", &inner.queue.len())
            .finish()
    }
}

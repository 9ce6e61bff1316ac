//! The per-call state machine.
//!
//! A [`RequestManager`] owns one call from the moment its accept slot
//! is armed until the transport confirms the terminal operation:
//!
//! ```text
//! UNINITIALIZED → REQUESTED → HANDLING → (RESPONDING ⇄ HANDLING)* → FINISHING
//! ```
//!
//! Unary and streaming calls share the machine. The call's shape is
//! fixed by its [`HandlerDescriptor`] and decides which replies are
//! legal in `HANDLING`: a unary call accepts one
//! [`Reply::Response`], a streaming call accepts any number of
//! [`Reply::StreamItem`]s followed by a [`Reply::StreamEnd`].

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use switchyard_core::{CallKind, MethodId, ServiceId, Status, Tag, Transport};

use crate::handler::{HandlerDescriptor, Reply, ReplySink};

/// Lifecycle state of one request manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Constructed, not yet armed on the transport.
    Uninitialized,
    /// Armed; waiting for an inbound call.
    Requested,
    /// The handler has been invoked and has not yet replied.
    Handling,
    /// Streaming only: one item written, write in flight.
    Responding,
    /// Terminal response or stream close in flight.
    Finishing,
}

impl RequestState {
    /// Whether a transport write is in flight for the call.
    pub fn has_write_in_flight(self) -> bool {
        matches!(self, Self::Responding | Self::Finishing)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Requested => write!(f, "REQUESTED"),
            Self::Handling => write!(f, "HANDLING"),
            Self::Responding => write!(f, "RESPONDING"),
            Self::Finishing => write!(f, "FINISHING"),
        }
    }
}

/// Why a handler reply was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReplyRejected {
    /// The call is no longer waiting on its handler.
    NotHandling(RequestState),
    /// The reply does not fit the call's shape, e.g. a stream item for a
    /// unary call.
    WrongShape(CallKind),
}

impl fmt::Display for ReplyRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHandling(state) => write!(f, "call is {state}, not HANDLING"),
            Self::WrongShape(kind) => write!(f, "reply does not fit a {kind} call"),
        }
    }
}

/// One call and its accept slot.
pub struct RequestManager {
    tag: Tag,
    state: RequestState,
    service: ServiceId,
    descriptor: Rc<HandlerDescriptor>,
    request: Vec<u8>,
    writes: u64,
}

impl RequestManager {
    pub(crate) fn new(tag: Tag, service: ServiceId, descriptor: Rc<HandlerDescriptor>) -> Self {
        Self {
            tag,
            state: RequestState::Uninitialized,
            service,
            descriptor,
            request: Vec::new(),
            writes: 0,
        }
    }

    /// Correlation tag owned by this manager.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Service the call belongs to.
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Method the call invokes.
    pub fn method(&self) -> &MethodId {
        self.descriptor.method()
    }

    /// Unary or streaming.
    pub fn kind(&self) -> CallKind {
        self.descriptor.kind()
    }

    /// Stream items written so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub(crate) fn descriptor(&self) -> &Rc<HandlerDescriptor> {
        &self.descriptor
    }

    /// Arm the accept slot.
    ///
    /// # Panics
    ///
    /// If the manager was already armed.
    pub(crate) fn init<T: Transport>(&mut self, transport: &mut T) {
        assert_eq!(
            self.state,
            RequestState::Uninitialized,
            "tag {} armed twice",
            self.tag
        );
        transport.accept(&self.service, self.descriptor.method(), self.kind(), self.tag);
        self.state = RequestState::Requested;
    }

    /// A fresh, unarmed manager for the same method.
    pub(crate) fn duplicate(&self, tag: Tag) -> Self {
        Self::new(tag, self.service.clone(), Rc::clone(&self.descriptor))
    }

    /// The call arrived: keep its body and start handling.
    pub(crate) fn begin_handling(&mut self, request: Vec<u8>) {
        debug_assert_eq!(self.state, RequestState::Requested);
        self.request = request;
        self.state = RequestState::Handling;
    }

    /// A stream item's write completed: hand control back to the handler.
    pub(crate) fn resume(&mut self) {
        debug_assert_eq!(self.state, RequestState::Responding);
        self.state = RequestState::Handling;
    }

    /// Run the handler for the current step of the call.
    pub(crate) fn invoke(&self, instance: Option<&dyn Any>, sink: ReplySink) {
        debug_assert_eq!(self.state, RequestState::Handling);
        self.descriptor.invoke(instance, &self.request, sink);
    }

    /// Apply a handler reply, issuing the matching transport operation.
    ///
    /// Returns the state the call moved to.
    pub(crate) fn apply<T: Transport>(
        &mut self,
        reply: Reply,
        transport: &mut T,
    ) -> Result<RequestState, ReplyRejected> {
        if self.state != RequestState::Handling {
            return Err(ReplyRejected::NotHandling(self.state));
        }
        self.state = match (self.kind(), reply) {
            (CallKind::Unary, Reply::Response { payload, status }) => {
                transport.write_final(self.tag, payload, status);
                RequestState::Finishing
            }
            (CallKind::Streaming, Reply::StreamItem(payload)) => {
                transport.write(self.tag, payload);
                self.writes += 1;
                RequestState::Responding
            }
            (CallKind::Streaming, Reply::StreamEnd(status)) => {
                transport.finish(self.tag, status);
                RequestState::Finishing
            }
            (kind, _) => return Err(ReplyRejected::WrongShape(kind)),
        };
        Ok(self.state)
    }

    /// Close a call still waiting on its handler with `status`.
    pub(crate) fn terminate<T: Transport>(&mut self, status: Status, transport: &mut T) {
        debug_assert_eq!(self.state, RequestState::Handling);
        match self.kind() {
            CallKind::Unary => transport.write_final(self.tag, Vec::new(), status),
            CallKind::Streaming => transport.finish(self.tag, status),
        }
        self.state = RequestState::Finishing;
    }
}

impl fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestManager")
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("service", &self.service)
            .field("method", self.method())
            .field("writes", &self.writes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::UnaryResponder;
    use switchyard_core::{CompressionLevel, QueueEvent, TransportError};

    #[derive(Debug, PartialEq)]
    enum Op {
        Accept(Tag, CallKind),
        WriteFinal(Tag, Vec<u8>, Status),
        Write(Tag, Vec<u8>),
        Finish(Tag, Status),
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
    }

    impl Transport for Recorder {
        fn add_listening_port(&mut self, _: &str) {}
        fn register_service(&mut self, _: &ServiceId) {}
        fn set_compression(&mut self, _: CompressionLevel) {}
        fn build_and_start(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn shutdown(&mut self, _: std::time::Duration) {}
        fn shutdown_queue(&mut self) {}
        fn next(&mut self, _: std::time::Duration) -> QueueEvent {
            QueueEvent::Timeout
        }
        fn accept(&mut self, _: &ServiceId, _: &MethodId, kind: CallKind, tag: Tag) {
            self.ops.push(Op::Accept(tag, kind));
        }
        fn take_request(&mut self, _: Tag) -> Vec<u8> {
            Vec::new()
        }
        fn write_final(&mut self, tag: Tag, payload: Vec<u8>, status: Status) {
            self.ops.push(Op::WriteFinal(tag, payload, status));
        }
        fn write(&mut self, tag: Tag, payload: Vec<u8>) {
            self.ops.push(Op::Write(tag, payload));
        }
        fn finish(&mut self, tag: Tag, status: Status) {
            self.ops.push(Op::Finish(tag, status));
        }
    }

    fn unary() -> RequestManager {
        let d = HandlerDescriptor::unary_fn("Get", |_, r: UnaryResponder| r.ok(vec![]));
        RequestManager::new(Tag(1), ServiceId::new("svc"), Rc::new(d))
    }

    fn streaming() -> RequestManager {
        let d = HandlerDescriptor::streaming_fn("Watch", |_, r| r.send(vec![]));
        RequestManager::new(Tag(2), ServiceId::new("svc"), Rc::new(d))
    }

    #[test]
    fn init_arms_the_slot() {
        let mut t = Recorder::default();
        let mut m = unary();
        assert_eq!(m.state(), RequestState::Uninitialized);
        m.init(&mut t);
        assert_eq!(m.state(), RequestState::Requested);
        assert_eq!(t.ops, vec![Op::Accept(Tag(1), CallKind::Unary)]);
    }

    #[test]
    #[should_panic(expected = "armed twice")]
    fn double_init_panics() {
        let mut t = Recorder::default();
        let mut m = unary();
        m.init(&mut t);
        m.init(&mut t);
    }

    #[test]
    fn duplicate_is_fresh_and_shares_descriptor() {
        let mut t = Recorder::default();
        let mut m = unary();
        m.init(&mut t);
        let d = m.duplicate(Tag(9));
        assert_eq!(d.tag(), Tag(9));
        assert_eq!(d.state(), RequestState::Uninitialized);
        assert_eq!(d.method(), m.method());
        assert!(Rc::ptr_eq(d.descriptor(), m.descriptor()));
    }

    #[test]
    fn unary_response_goes_straight_to_finishing() {
        let mut t = Recorder::default();
        let mut m = unary();
        m.init(&mut t);
        m.begin_handling(b"req".to_vec());
        let next = m.apply(
            Reply::Response {
                payload: vec![1],
                status: Status::ok(),
            },
            &mut t,
        );
        assert_eq!(next, Ok(RequestState::Finishing));
        assert_eq!(
            t.ops.last(),
            Some(&Op::WriteFinal(Tag(1), vec![1], Status::ok()))
        );
    }

    #[test]
    fn unary_rejects_stream_replies() {
        let mut t = Recorder::default();
        let mut m = unary();
        m.init(&mut t);
        m.begin_handling(Vec::new());
        assert_eq!(
            m.apply(Reply::StreamItem(vec![]), &mut t),
            Err(ReplyRejected::WrongShape(CallKind::Unary))
        );
        assert_eq!(m.state(), RequestState::Handling);
    }

    #[test]
    fn stream_cycles_then_finishes() {
        let mut t = Recorder::default();
        let mut m = streaming();
        m.init(&mut t);
        m.begin_handling(Vec::new());
        for i in 0..3u8 {
            assert_eq!(
                m.apply(Reply::StreamItem(vec![i]), &mut t),
                Ok(RequestState::Responding)
            );
            assert!(m.state().has_write_in_flight());
            m.resume();
        }
        let end = Status::out_of_range("no more data");
        assert_eq!(
            m.apply(Reply::StreamEnd(end.clone()), &mut t),
            Ok(RequestState::Finishing)
        );
        assert_eq!(m.writes(), 3);
        assert_eq!(t.ops.last(), Some(&Op::Finish(Tag(2), end)));
    }

    #[test]
    fn reply_outside_handling_is_rejected() {
        let mut t = Recorder::default();
        let mut m = streaming();
        m.init(&mut t);
        assert_eq!(
            m.apply(Reply::StreamEnd(Status::ok()), &mut t),
            Err(ReplyRejected::NotHandling(RequestState::Requested))
        );
        m.begin_handling(Vec::new());
        m.apply(Reply::StreamItem(vec![]), &mut t).unwrap();
        assert_eq!(
            m.apply(Reply::StreamItem(vec![]), &mut t),
            Err(ReplyRejected::NotHandling(RequestState::Responding))
        );
    }

    #[test]
    fn terminate_uses_the_call_shape() {
        let mut t = Recorder::default();
        let mut u = unary();
        u.init(&mut t);
        u.begin_handling(Vec::new());
        u.terminate(Status::unavailable("gone"), &mut t);
        assert_eq!(u.state(), RequestState::Finishing);

        let mut s = streaming();
        s.init(&mut t);
        s.begin_handling(Vec::new());
        s.terminate(Status::unavailable("gone"), &mut t);
        assert_eq!(
            t.ops.last(),
            Some(&Op::Finish(Tag(2), Status::unavailable("gone")))
        );
    }
}

//! Handler descriptors and the response continuations handed to them.
//!
//! A [`HandlerDescriptor`] binds one RPC method to a business callback.
//! Callbacks are either declared against a service instance type `S`
//! (bound at runtime by
//! [`Dispatcher::activate_service()`](crate::Dispatcher::activate_service))
//! or are self-contained closures that are always active.
//!
//! # Response continuations
//!
//! Each invocation receives exactly one responder. A [`UnaryResponder`]
//! or [`StreamResponder`] is consumed by whichever reply method is
//! called, so a handler cannot answer twice. Responders are `Send`:
//! the reply travels over a channel and is applied on the dispatcher's
//! thread during the next drain, so business logic may finish a call
//! from any thread.
//!
//! A responder dropped without replying closes the call with
//! [`StatusCode::Internal`](switchyard_core::StatusCode::Internal)
//! instead of leaving the request manager stuck.

use std::any::{type_name, Any, TypeId};
use std::fmt;

use crossbeam_channel::Sender;
use switchyard_core::{CallKind, MethodId, Status, Tag};

/// Message sent to a call whose service has no active instance.
pub const SERVICE_NOT_ACTIVE: &str = "Service is not active";

/// Message sent when a responder is dropped without replying.
pub const CONTINUATION_DROPPED: &str = "response continuation dropped without a reply";

// ── Replies ────────────────────────────────────────────────────────

/// One output of a handler invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Unary: the single response and the call's final status.
    Response {
        /// Encoded response body. Empty on error.
        payload: Vec<u8>,
        /// Final status.
        status: Status,
    },
    /// Streaming: one more item; the handler is invoked again once the
    /// write completes.
    StreamItem(Vec<u8>),
    /// Streaming: no more items; close with this status.
    StreamEnd(Status),
}

/// A reply addressed to the call it answers.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub tag: Tag,
    pub reply: Reply,
}

/// Where a responder delivers its reply.
#[derive(Clone, Debug)]
pub(crate) struct ReplySink {
    tag: Tag,
    tx: Sender<Envelope>,
}

impl ReplySink {
    pub(crate) fn new(tag: Tag, tx: Sender<Envelope>) -> Self {
        Self { tag, tx }
    }

    fn deliver(self, reply: Reply) {
        // The receiver only disappears when the dispatcher was torn
        // down, which abandons every in-flight call anyway.
        if self.tx.send(Envelope { tag: self.tag, reply }).is_err() {
            tracing::trace!(tag = %self.tag, "reply for a torn-down dispatcher dropped");
        }
    }
}

/// Response continuation for a unary call.
pub struct UnaryResponder {
    tag: Tag,
    sink: Option<ReplySink>,
}

impl UnaryResponder {
    pub(crate) fn new(sink: ReplySink) -> Self {
        Self {
            tag: sink.tag,
            sink: Some(sink),
        }
    }

    /// Tag of the call being answered.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Answer with `payload` and OK status.
    pub fn ok(self, payload: Vec<u8>) {
        self.respond(payload, Status::ok());
    }

    /// Fail the call with `status` and an empty body.
    pub fn fail(self, status: Status) {
        self.respond(Vec::new(), status);
    }

    /// Answer with an explicit payload and status.
    pub fn respond(mut self, payload: Vec<u8>, status: Status) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(Reply::Response { payload, status });
        }
    }
}

impl Drop for UnaryResponder {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            tracing::warn!(tag = %sink.tag, "unary responder dropped without a reply");
            sink.deliver(Reply::Response {
                payload: Vec::new(),
                status: Status::internal(CONTINUATION_DROPPED),
            });
        }
    }
}

impl fmt::Debug for UnaryResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryResponder")
            .field("tag", &self.tag)
            .finish()
    }
}

/// Response continuation for one step of a streaming call.
///
/// Each invocation of a streaming handler yields one item or ends the
/// stream. After an item's write completes the handler is invoked
/// again, with a fresh responder, for the next one.
pub struct StreamResponder {
    tag: Tag,
    sink: Option<ReplySink>,
}

impl StreamResponder {
    pub(crate) fn new(sink: ReplySink) -> Self {
        Self {
            tag: sink.tag,
            sink: Some(sink),
        }
    }

    /// Tag of the call being answered.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Write one item; the stream stays open.
    pub fn send(mut self, payload: Vec<u8>) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(Reply::StreamItem(payload));
        }
    }

    /// Close the stream with `status`.
    pub fn finish(mut self, status: Status) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(Reply::StreamEnd(status));
        }
    }

    /// Write `payload` if `status` is OK, otherwise treat the status as
    /// "no more data" and close the stream with it.
    pub fn respond(self, payload: Vec<u8>, status: Status) {
        if status.is_ok() {
            self.send(payload);
        } else {
            self.finish(status);
        }
    }
}

impl Drop for StreamResponder {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            tracing::warn!(tag = %sink.tag, "stream responder dropped without a reply");
            sink.deliver(Reply::StreamEnd(Status::internal(CONTINUATION_DROPPED)));
        }
    }
}

impl fmt::Debug for StreamResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponder")
            .field("tag", &self.tag)
            .finish()
    }
}

// ── HandlerDescriptor ──────────────────────────────────────────────

type UnaryFn = dyn Fn(&dyn Any, &[u8], UnaryResponder);
type StreamFn = dyn Fn(&dyn Any, &[u8], StreamResponder);

/// The callback, tagged by response shape.
enum Callback {
    Unary(Box<UnaryFn>),
    Streaming(Box<StreamFn>),
}

/// What the callback needs in order to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    /// An active instance of the named type.
    Instance {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// Nothing; the closure owns its state.
    Standalone,
}

/// Static binding of one RPC method to its business callback.
///
/// Immutable once registered. Shared by every request manager armed for
/// the method.
pub struct HandlerDescriptor {
    method: MethodId,
    target: Target,
    callback: Callback,
}

impl HandlerDescriptor {
    /// A unary handler invoked on the active instance of `S`.
    ///
    /// ```ignore
    /// HandlerDescriptor::unary("Play", TimeService::play)
    /// ```
    pub fn unary<S, F>(method: impl Into<MethodId>, handle: F) -> Self
    where
        S: 'static,
        F: Fn(&S, &[u8], UnaryResponder) + 'static,
    {
        Self {
            method: method.into(),
            target: Target::instance::<S>(),
            callback: Callback::Unary(Box::new(
                move |obj: &dyn Any, request: &[u8], responder: UnaryResponder| match obj
                    .downcast_ref::<S>()
                {
                    Some(instance) => handle(instance, request, responder),
                    None => responder.fail(Status::internal(wrong_instance::<S>())),
                },
            )),
        }
    }

    /// A streaming handler invoked on the active instance of `S`.
    pub fn streaming<S, F>(method: impl Into<MethodId>, handle: F) -> Self
    where
        S: 'static,
        F: Fn(&S, &[u8], StreamResponder) + 'static,
    {
        Self {
            method: method.into(),
            target: Target::instance::<S>(),
            callback: Callback::Streaming(Box::new(
                move |obj: &dyn Any, request: &[u8], responder: StreamResponder| match obj
                    .downcast_ref::<S>()
                {
                    Some(instance) => handle(instance, request, responder),
                    None => responder.finish(Status::internal(wrong_instance::<S>())),
                },
            )),
        }
    }

    /// A self-contained unary handler. Always active; unaffected by
    /// service activation.
    pub fn unary_fn<F>(method: impl Into<MethodId>, handle: F) -> Self
    where
        F: Fn(&[u8], UnaryResponder) + 'static,
    {
        Self {
            method: method.into(),
            target: Target::Standalone,
            callback: Callback::Unary(Box::new(
                move |_: &dyn Any, request: &[u8], responder: UnaryResponder| {
                    handle(request, responder)
                },
            )),
        }
    }

    /// A self-contained streaming handler. Always active; unaffected by
    /// service activation.
    pub fn streaming_fn<F>(method: impl Into<MethodId>, handle: F) -> Self
    where
        F: Fn(&[u8], StreamResponder) + 'static,
    {
        Self {
            method: method.into(),
            target: Target::Standalone,
            callback: Callback::Streaming(Box::new(
                move |_: &dyn Any, request: &[u8], responder: StreamResponder| {
                    handle(request, responder)
                },
            )),
        }
    }

    /// The method this descriptor handles.
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// Unary or streaming.
    pub fn kind(&self) -> CallKind {
        match self.callback {
            Callback::Unary(_) => CallKind::Unary,
            Callback::Streaming(_) => CallKind::Streaming,
        }
    }

    /// Whether the handler needs an active service instance.
    pub fn needs_instance(&self) -> bool {
        matches!(self.target, Target::Instance { .. })
    }

    /// The instance type the handler expects, if any: `(TypeId, name)`.
    pub(crate) fn instance_type(&self) -> Option<(TypeId, &'static str)> {
        match self.target {
            Target::Instance { type_id, type_name } => Some((type_id, type_name)),
            Target::Standalone => None,
        }
    }

    /// Run the callback for one request.
    ///
    /// With no instance for an instance-bound handler the call is
    /// failed with `Unavailable` instead.
    pub(crate) fn invoke(&self, instance: Option<&dyn Any>, request: &[u8], sink: ReplySink) {
        let obj: &dyn Any = match (self.target, instance) {
            (Target::Standalone, _) => &(),
            (Target::Instance { .. }, Some(obj)) => obj,
            (Target::Instance { .. }, None) => {
                self.unavailable(sink);
                return;
            }
        };
        match &self.callback {
            Callback::Unary(f) => f(obj, request, UnaryResponder::new(sink)),
            Callback::Streaming(f) => f(obj, request, StreamResponder::new(sink)),
        }
    }

    fn unavailable(&self, sink: ReplySink) {
        let status = Status::unavailable(SERVICE_NOT_ACTIVE);
        match self.callback {
            Callback::Unary(_) => UnaryResponder::new(sink).fail(status),
            Callback::Streaming(_) => StreamResponder::new(sink).finish(status),
        }
    }
}

impl Target {
    fn instance<S: 'static>() -> Self {
        Self::Instance {
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
        }
    }
}

fn wrong_instance<S>() -> String {
    format!("handler expects an instance of {}", type_name::<S>())
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("method", &self.method)
            .field("kind", &self.kind())
            .field("target", &self.target)
            .finish()
    }
}

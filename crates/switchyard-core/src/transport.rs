//! The boundary with the completion-queue transport.
//!
//! The transport owns the listening socket, wire framing, and the raw
//! completion queue. The dispatcher never reimplements any of that: it
//! arms accept slots, issues per-call write operations, and polls for
//! completions, identifying everything by [`Tag`].
//!
//! # Event contract
//!
//! Every operation started with a tag eventually produces exactly one
//! [`QueueEvent::GotEvent`] for that tag:
//!
//! - [`accept()`](Transport::accept): an event once a call for the
//!   method has arrived (`ok = true`), or `ok = false` if the slot is
//!   torn down (e.g. server shutdown).
//! - [`write_final()`](Transport::write_final),
//!   [`write()`](Transport::write), [`finish()`](Transport::finish):
//!   an event once the operation completed (`ok = true`) or the call
//!   was abnormally closed, e.g. the client disconnected (`ok = false`).
//!
//! Events for one tag are delivered in the order the operations were
//! issued. No ordering holds across tags.

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;
use crate::id::{CallKind, MethodId, ServiceId, Tag};
use crate::status::Status;

/// Result of one bounded poll of the completion queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// A previously started operation finished.
    GotEvent {
        /// Tag of the operation.
        tag: Tag,
        /// `false` signals abnormal closure of the call owning `tag`.
        ok: bool,
    },
    /// No event arrived within the poll timeout.
    Timeout,
    /// The queue has been shut down and fully drained.
    Shutdown,
}

/// Default message compression applied by the transport.
///
/// No compression is fastest when the client runs on the same machine;
/// otherwise compression trades CPU for bandwidth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompressionLevel {
    /// No compression.
    #[default]
    None,
    /// Low compression.
    Low,
    /// Medium compression.
    Med,
    /// High compression.
    High,
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Med => write!(f, "med"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Required capabilities of the external completion-queue transport.
///
/// Server construction follows the builder sequence
/// `add_listening_port` → `register_service`* → `set_compression` →
/// `build_and_start`. After `shutdown` + `shutdown_queue`, the
/// transport must report one `ok = false` event for every tag with
/// an outstanding operation, then [`QueueEvent::Shutdown`]. A
/// transport may be started again after a full shutdown.
pub trait Transport {
    /// Listen on `address` (`host:port`) once started.
    fn add_listening_port(&mut self, address: &str);

    /// Expose a service on the server being built.
    fn register_service(&mut self, service: &ServiceId);

    /// Set the default compression level for outgoing messages.
    fn set_compression(&mut self, level: CompressionLevel);

    /// Build the server and start listening.
    ///
    /// # Errors
    ///
    /// [`TransportError::PortUnavailable`] if the listening port could
    /// not be bound, [`TransportError::StartFailed`] otherwise.
    fn build_and_start(&mut self) -> Result<(), TransportError>;

    /// Shut the server down, waiting at most `deadline` for in-flight
    /// calls to finish before cancelling them.
    fn shutdown(&mut self, deadline: Duration);

    /// Shut the completion queue down. Remaining events are still
    /// returned by [`next()`](Transport::next) until it reports
    /// [`QueueEvent::Shutdown`].
    fn shutdown_queue(&mut self);

    /// Wait at most `timeout` for the next completion.
    fn next(&mut self, timeout: Duration) -> QueueEvent;

    /// Arm one slot to receive the next inbound call of `method`,
    /// tagged with `tag`.
    fn accept(&mut self, service: &ServiceId, method: &MethodId, kind: CallKind, tag: Tag);

    /// Take the request body of the call accepted under `tag`.
    ///
    /// Valid once the accept event for `tag` has been delivered.
    /// Decoding the body is the handler's concern.
    fn take_request(&mut self, tag: Tag) -> Vec<u8>;

    /// Unary: write the single response and the final status, then
    /// close the call.
    fn write_final(&mut self, tag: Tag, payload: Vec<u8>, status: Status);

    /// Streaming: write one response without closing the stream.
    fn write(&mut self, tag: Tag, payload: Vec<u8>);

    /// Streaming: close the stream with `status`.
    fn finish(&mut self, tag: Tag, status: Status);
}

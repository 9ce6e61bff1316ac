//! Core types for the Switchyard RPC dispatcher.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! correlation tags, service/method identifiers, call status codes,
//! error types, and the [`Transport`] trait that marks the boundary
//! with the external completion-queue transport.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod status;
pub mod transport;

pub use error::{RegistryError, TransportError};
pub use id::{CallKind, MethodId, ServiceId, Tag, TagAllocator};
pub use status::{Status, StatusCode};
pub use transport::{CompressionLevel, QueueEvent, Transport};

//! Switchyard: tick-driven RPC request dispatch over a completion-queue
//! transport.
//!
//! This is the top-level facade crate that re-exports the public API of the
//! Switchyard sub-crates. The host registers services, starts the server,
//! then calls [`engine::Dispatcher::tick`] once per frame; every handler
//! runs on the host thread inside that call.
//!
//! # Quick start
//!
//! ```rust
//! use switchyard::prelude::*;
//! use switchyard_test_utils::MockTransport;
//!
//! let transport = MockTransport::new();
//! let mut dispatcher = Dispatcher::new(transport.clone(), DispatchConfig::default()).unwrap();
//! dispatcher
//!     .register(
//!         "demo.Echo",
//!         vec![HandlerDescriptor::unary_fn("Say", |request, r| r.ok(request.to_vec()))],
//!     )
//!     .unwrap();
//! dispatcher.initialize(10001).unwrap();
//!
//! transport.inject_call("demo.Echo", "Say", b"hi".to_vec());
//! let metrics = dispatcher.tick();
//! assert_eq!(metrics.calls_accepted, 1);
//! assert_eq!(metrics.final_writes, 1);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `switchyard-core` | Tags, service and method ids, statuses, the transport trait |
//! | [`engine`] | `switchyard-engine` | Dispatcher, handlers, registry, request managers, metrics |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and the transport boundary (`switchyard-core`).
///
/// Implement [`types::Transport`] to put the dispatcher on a real network
/// stack.
pub use switchyard_core as types;

/// The dispatcher and everything it drives (`switchyard-engine`).
///
/// [`engine::Dispatcher`] owns the server lifecycle and the per-frame
/// tick; [`engine::HandlerDescriptor`] describes one method of a service.
pub use switchyard_engine as engine;

/// Common imports for typical Switchyard usage.
///
/// ```rust
/// use switchyard::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use switchyard_core::{
        CallKind, CompressionLevel, MethodId, ServiceId, Status, StatusCode, Tag, Transport,
    };

    // Errors
    pub use switchyard_core::{RegistryError, TransportError};

    // Engine
    pub use switchyard_engine::{
        ConfigError, DispatchConfig, DispatchError, Dispatcher, HandlerDescriptor,
        StreamResponder, TickMetrics, TimeMode, UnaryResponder,
    };
}

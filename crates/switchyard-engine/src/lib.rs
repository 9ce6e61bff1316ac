//! Request dispatch engine for Switchyard.
//!
//! Provides the [`Dispatcher`], which drains a completion-queue
//! [`Transport`](switchyard_core::Transport) once per host tick, drives
//! each call through the [`RequestManager`] state machine, and invokes
//! the handlers declared through [`HandlerDescriptor`]s. Ticks are
//! synchronized to the host's [`TimeMode`]: wall-clock ticks honour a
//! processing budget, fixed-step ticks wait for in-flight writes.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod request;

pub use config::{ConfigError, DispatchConfig, TimeMode};
pub use dispatcher::{DispatchError, Dispatcher};
pub use handler::{HandlerDescriptor, Reply, StreamResponder, UnaryResponder};
pub use metrics::{DispatchCounters, TickMetrics};
pub use registry::ServiceRegistry;
pub use request::{RequestManager, RequestState};

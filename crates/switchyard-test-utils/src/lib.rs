//! Test utilities and mock types for Switchyard development.
//!
//! Provides [`MockTransport`], a scripted in-memory implementation of
//! the [`Transport`](switchyard_core::Transport) trait, and its
//! operation log ([`Op`]).

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod mock;

pub use mock::{MockTransport, Op};

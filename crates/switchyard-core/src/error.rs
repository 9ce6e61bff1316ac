//! Error types for the Switchyard dispatcher, organized by subsystem:
//! transport startup and service registration.

use std::error::Error;
use std::fmt;

use crate::id::{MethodId, ServiceId};

/// Errors reported by the transport while building or starting a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The listening port could not be bound.
    PortUnavailable {
        /// The `host:port` that was requested.
        address: String,
    },
    /// The server failed to start for another reason.
    StartFailed {
        /// Human-readable description of the failure.
        reason: String,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortUnavailable { address } => {
                write!(f, "could not listen on {address}, perhaps the port is in use")
            }
            Self::StartFailed { reason } => write!(f, "server failed to start: {reason}"),
        }
    }
}

impl Error for TransportError {}

/// Errors from registering services and binding service instances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A service with this identifier is already registered.
    AlreadyRegistered {
        /// The duplicate service.
        service: ServiceId,
    },
    /// A service was registered with an empty handler list.
    NoHandlers {
        /// The offending service.
        service: ServiceId,
    },
    /// Two handlers of one service share a method name.
    DuplicateMethod {
        /// The service being registered.
        service: ServiceId,
        /// The repeated method.
        method: MethodId,
    },
    /// The service has not been registered.
    NotRegistered {
        /// The unknown service.
        service: ServiceId,
    },
    /// The instance passed to activation is not of the type the
    /// service's handlers were declared against.
    InstanceTypeMismatch {
        /// The service being activated.
        service: ServiceId,
        /// Type name the handlers expect.
        expected: &'static str,
        /// Type name of the instance that was passed.
        found: &'static str,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered { service } => {
                write!(f, "service '{service}' is already registered")
            }
            Self::NoHandlers { service } => {
                write!(f, "service '{service}' registered without any handlers")
            }
            Self::DuplicateMethod { service, method } => {
                write!(f, "service '{service}' declares method '{method}' twice")
            }
            Self::NotRegistered { service } => {
                write!(f, "service '{service}' is not registered")
            }
            Self::InstanceTypeMismatch {
                service,
                expected,
                found,
            } => write!(
                f,
                "service '{service}' expects an instance of {expected}, got {found}"
            ),
        }
    }
}

impl Error for RegistryError {}

//! Dispatcher configuration, validation, and error types.
//!
//! [`DispatchConfig`] carries the host's time policy and the drain-loop
//! budgets. [`validate()`](DispatchConfig::validate) checks every field
//! range before the dispatcher accepts the configuration.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use switchyard_core::CompressionLevel;

// ── TimeMode ───────────────────────────────────────────────────────

/// Host simulation time policy that governs how long a tick may drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TimeMode {
    /// Time advances with the wall clock. Each tick honours the
    /// processing budget; responses may slip to a later tick.
    #[default]
    WallClock,
    /// Time advances in fixed increments. A tick does not return until
    /// every write that was in flight when it started has completed.
    FixedStep,
}

impl fmt::Display for TimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WallClock => write!(f, "wall-clock"),
            Self::FixedStep => write!(f, "fixed-step"),
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`DispatchConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Listening port outside `1024..=65535`.
    InvalidPort {
        /// The rejected port.
        port: u16,
    },
    /// `bind_host` is empty.
    EmptyBindHost,
    /// `max_event_processing_us` outside `1..=10000`.
    InvalidProcessingTime {
        /// The rejected value, in microseconds.
        value: u32,
    },
    /// `max_event_wait_ns` outside `1..=10000`.
    InvalidWaitTime {
        /// The rejected value, in nanoseconds.
        value: u32,
    },
    /// `shutdown_deadline_ms` is zero.
    ZeroShutdownDeadline,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort { port } => {
                write!(f, "port {port} is outside the allowed range 1024..=65535")
            }
            Self::EmptyBindHost => write!(f, "bind_host must not be empty"),
            Self::InvalidProcessingTime { value } => write!(
                f,
                "max_event_processing_us must be in 1..=10000, got {value}"
            ),
            Self::InvalidWaitTime { value } => {
                write!(f, "max_event_wait_ns must be in 1..=10000, got {value}")
            }
            Self::ZeroShutdownDeadline => write!(f, "shutdown_deadline_ms must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

// ── DispatchConfig ─────────────────────────────────────────────────

/// Lowest port the dispatcher will listen on.
pub const MIN_PORT: u16 = 1024;

/// Upper bound for both drain-loop budgets.
const MAX_BUDGET: u32 = 10_000;

/// Complete configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Host time policy. Default: [`TimeMode::WallClock`].
    pub time_mode: TimeMode,
    /// Interface to listen on. Default: `"0.0.0.0"`.
    pub bind_host: String,
    /// Port used by [`Dispatcher::reinitialize()`](crate::Dispatcher::reinitialize)
    /// when no port was given before. Default: 10001.
    pub port: u16,
    /// Default message compression. Default: none.
    pub compression: CompressionLevel,
    /// Time a wall-clock tick may spend draining events, in microseconds.
    /// Ignored in fixed-step mode. Default: 1000.
    pub max_event_processing_us: u32,
    /// Time a single poll may wait for an event, in nanoseconds. Default: 1000.
    pub max_event_wait_ns: u32,
    /// Time the transport may spend finishing in-flight calls on
    /// shutdown, in milliseconds. Default: 50.
    pub shutdown_deadline_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            time_mode: TimeMode::WallClock,
            bind_host: "0.0.0.0".to_string(),
            port: 10001,
            compression: CompressionLevel::None,
            max_event_processing_us: 1000,
            max_event_wait_ns: 1000,
            shutdown_deadline_ms: 50,
        }
    }
}

impl DispatchConfig {
    /// Validate all field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_port(self.port)?;
        if self.bind_host.is_empty() {
            return Err(ConfigError::EmptyBindHost);
        }
        if self.max_event_processing_us == 0 || self.max_event_processing_us > MAX_BUDGET {
            return Err(ConfigError::InvalidProcessingTime {
                value: self.max_event_processing_us,
            });
        }
        if self.max_event_wait_ns == 0 || self.max_event_wait_ns > MAX_BUDGET {
            return Err(ConfigError::InvalidWaitTime {
                value: self.max_event_wait_ns,
            });
        }
        if self.shutdown_deadline_ms == 0 {
            return Err(ConfigError::ZeroShutdownDeadline);
        }
        Ok(())
    }

    /// Check that `port` is a usable listening port.
    pub fn validate_port(port: u16) -> Result<(), ConfigError> {
        if port < MIN_PORT {
            return Err(ConfigError::InvalidPort { port });
        }
        Ok(())
    }

    /// The wall-clock drain budget per tick.
    pub fn max_event_processing(&self) -> Duration {
        Duration::from_micros(u64::from(self.max_event_processing_us))
    }

    /// The per-poll wait.
    pub fn max_event_wait(&self) -> Duration {
        Duration::from_nanos(u64::from(self.max_event_wait_ns))
    }

    /// The server shutdown deadline.
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }

    /// The `host:port` listening address for `port`.
    pub fn address(&self, port: u16) -> String {
        format!("{}:{port}", self.bind_host)
    }

    /// Whether switching from `self` to `other` requires restarting the
    /// server (the listening address or compression changed).
    pub(crate) fn requires_restart(&self, other: &DispatchConfig) -> bool {
        self.port != other.port
            || self.bind_host != other.bind_host
            || self.compression != other.compression
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let c = DispatchConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.time_mode, TimeMode::WallClock);
        assert_eq!(c.address(c.port), "0.0.0.0:10001");
        assert_eq!(c.max_event_processing(), Duration::from_micros(1000));
        assert_eq!(c.max_event_wait(), Duration::from_nanos(1000));
    }

    #[test]
    fn privileged_port_rejected() {
        let c = DispatchConfig {
            port: 80,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::InvalidPort { port: 80 }));
    }

    #[test]
    fn port_range_boundaries() {
        assert!(DispatchConfig::validate_port(1023).is_err());
        assert!(DispatchConfig::validate_port(1024).is_ok());
        assert!(DispatchConfig::validate_port(65535).is_ok());
    }

    #[test]
    fn empty_bind_host_rejected() {
        let c = DispatchConfig {
            bind_host: String::new(),
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::EmptyBindHost));
    }

    #[test]
    fn budgets_must_be_in_range() {
        let zero = DispatchConfig {
            max_event_processing_us: 0,
            ..Default::default()
        };
        assert_eq!(
            zero.validate(),
            Err(ConfigError::InvalidProcessingTime { value: 0 })
        );

        let too_long = DispatchConfig {
            max_event_wait_ns: 10_001,
            ..Default::default()
        };
        assert_eq!(
            too_long.validate(),
            Err(ConfigError::InvalidWaitTime { value: 10_001 })
        );

        let upper = DispatchConfig {
            max_event_processing_us: 10_000,
            max_event_wait_ns: 10_000,
            ..Default::default()
        };
        assert!(upper.validate().is_ok());
    }

    #[test]
    fn zero_shutdown_deadline_rejected() {
        let c = DispatchConfig {
            shutdown_deadline_ms: 0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::ZeroShutdownDeadline));
    }

    #[test]
    fn restart_needed_only_for_address_or_compression() {
        let base = DispatchConfig::default();
        let mode_only = DispatchConfig {
            time_mode: TimeMode::FixedStep,
            max_event_processing_us: 50,
            ..Default::default()
        };
        assert!(!base.requires_restart(&mode_only));

        let new_port = DispatchConfig {
            port: 20002,
            ..Default::default()
        };
        assert!(base.requires_restart(&new_port));

        let compressed = DispatchConfig {
            compression: CompressionLevel::High,
            ..Default::default()
        };
        assert!(base.requires_restart(&compressed));
    }
}

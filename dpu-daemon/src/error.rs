//! Daemon-level error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::plugin::VendorError;

/// Errors that end (or prevent) a daemon run.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A listener could not be bound or a service could not be registered.
    #[error("failed to start {subsystem}: {source}")]
    SubsystemStartup {
        subsystem: String,
        #[source]
        source: io::Error,
    },

    /// A running subsystem terminated with an error.
    #[error("{subsystem} failed: {reason}")]
    Subsystem { subsystem: String, reason: String },

    /// A subsystem did not terminate within the shutdown grace period.
    #[error("{subsystem} did not stop within {grace:?}")]
    ShutdownTimeout { subsystem: String, grace: Duration },

    #[error("vendor plugin failed to start: {0}")]
    Vendor(#[from] VendorError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("daemon is already running")]
    AlreadyRunning,

    #[error("daemon must listen before it can serve")]
    NotListening,
}

impl DaemonError {
    /// Wrap a runtime failure of a named subsystem.
    pub fn subsystem(subsystem: impl Into<String>, reason: impl ToString) -> Self {
        DaemonError::Subsystem {
            subsystem: subsystem.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a bind/registration failure of a named subsystem.
    pub fn startup(subsystem: impl Into<String>, source: io::Error) -> Self {
        DaemonError::SubsystemStartup {
            subsystem: subsystem.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

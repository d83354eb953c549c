//! Daemon configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::{PolicyError, RetryPolicy};

/// Default CNI server socket path.
pub const CNI_SOCKET_PATH: &str = "/var/run/dpu-daemon/cni/server.sock";

/// Default grace period for subsystem shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Default per-attempt deadline for bridge-port RPCs.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace watched by the host-side instance.
pub const HOST_NAMESPACE: &str = "openshift-dpu-operator";

/// Namespace watched by the DPU-side instance.
pub const DPU_NAMESPACE: &str = "dpu-operator-system";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CNI socket path is required")]
    SocketPathRequired,

    #[error("watch namespace is required")]
    NamespaceRequired,

    #[error("shutdown grace period must be greater than zero")]
    ZeroGracePeriod,

    #[error("call timeout must be greater than zero")]
    ZeroCallTimeout,

    #[error("invalid endpoint {0:?}, expected address:port")]
    InvalidEndpoint(String),

    #[error("retry policy: {0}")]
    RetryPolicy(#[from] PolicyError),
}

/// Which side of the host/DPU pair this instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Next to the DPU vendor stack; applies dataplane changes locally.
    #[value(name = "dpu")]
    DpuSide,
    /// On the host; delegates dataplane changes to the DPU-side instance.
    #[value(name = "host")]
    HostSide,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DpuSide => "dpu",
            Role::HostSide => "host",
        }
    }

    pub fn default_namespace(&self) -> &'static str {
        match self {
            Role::DpuSide => DPU_NAMESPACE,
            Role::HostSide => HOST_NAMESPACE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a bridge-port service is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    fn host(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }

    /// URI for a plaintext gRPC channel.
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host(), self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    /// Parses `host:port`, `1.2.3.4:port` and `[::1]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub role: Role,
    pub cni_socket_path: PathBuf,
    /// Overrides the endpoint reported by the vendor plugin (host side).
    pub bridge_port_endpoint: Option<Endpoint>,
    pub namespace: String,
    pub shutdown_grace: Duration,
    pub retry_policy: RetryPolicy,
    /// Per-attempt deadline for remote bridge-port calls.
    pub call_timeout: Option<Duration>,
}

impl DaemonConfig {
    /// Defaults for a role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            cni_socket_path: PathBuf::from(CNI_SOCKET_PATH),
            bridge_port_endpoint: None,
            namespace: role.default_namespace().to_string(),
            shutdown_grace: SHUTDOWN_GRACE,
            retry_policy: RetryPolicy::default(),
            call_timeout: Some(CALL_TIMEOUT),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cni_socket_path.as_os_str().is_empty() {
            return Err(ConfigError::SocketPathRequired);
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::NamespaceRequired);
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::ZeroGracePeriod);
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroCallTimeout);
        }
        self.retry_policy.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let v4: Endpoint = "10.0.0.1:50151".parse().unwrap();
        assert_eq!(v4, Endpoint::new("10.0.0.1", 50151));
        assert_eq!(v4.uri(), "http://10.0.0.1:50151");

        let v6: Endpoint = "[::1]:50151".parse().unwrap();
        assert_eq!(v6.address, "::1");
        assert_eq!(v6.uri(), "http://[::1]:50151");
        assert_eq!(v6.to_string(), "[::1]:50151");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":50151".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_defaults_per_role() {
        let host = DaemonConfig::new(Role::HostSide);
        assert_eq!(host.namespace, HOST_NAMESPACE);
        host.validate().unwrap();

        let dpu = DaemonConfig::new(Role::DpuSide);
        assert_eq!(dpu.namespace, DPU_NAMESPACE);
        assert_eq!(dpu.retry_policy.max_attempts, 40);
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::new(Role::HostSide);
        config.shutdown_grace = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroGracePeriod)));

        let mut config = DaemonConfig::new(Role::HostSide);
        config.cni_socket_path = PathBuf::new();
        assert!(matches!(config.validate(), Err(ConfigError::SocketPathRequired)));

        let mut config = DaemonConfig::new(Role::DpuSide);
        config.retry_policy.backoff_multiplier = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::RetryPolicy(_))));
    }
}

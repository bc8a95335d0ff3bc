//! Daemon configuration
//!
//! Mirrors the surface the host daemon exposes to this protocol: the reply
//! port, the metric ceiling, the reserved timer durations, and the socket
//! endpoints. Endpoints are fixed for the life of a protocol instance; a
//! change requires a full restart (see [`SdnConfig::compatible_with`]).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, SdnError};

/// Default reply-socket port
pub const DEFAULT_PORT: u16 = 5556;
/// Default metric ceiling signaling unreachability
pub const DEFAULT_INFINITY: u32 = 16;
/// Default update period (reserved; unused by the core logic)
pub const DEFAULT_UPDATE_PERIOD_SECS: u64 = 30;
/// Default garbage collection window (reserved for future expiry)
pub const DEFAULT_GARBAGE_TIME_SECS: u64 = 300;
/// Default route timeout; only its half value feeds the comparator
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default stream-socket filesystem path
pub const DEFAULT_UNIX_SOCKET: &str = "/tmp/sdn.sock";
/// Default controller client endpoint
pub const DEFAULT_CONTROLLER_PORT: u16 = 55650;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdnConfig {
    /// Port the reply socket binds on the loopback address
    pub port: u16,
    /// Metric ceiling; decoded metrics are clamped to this
    pub infinity: u32,
    /// Periodic update interval in seconds (reserved)
    pub update_period_secs: u64,
    /// Garbage sweep window in seconds (reserved)
    pub garbage_time_secs: u64,
    /// Route timeout in seconds; half of it feeds route comparison
    pub timeout_secs: u64,
    /// Filesystem path for the local stream socket
    pub unix_socket: PathBuf,
    /// Controller endpoint the client link connects to
    pub controller_addr: SocketAddr,
    /// Interface patterns; consumed only by the interface stub
    pub interfaces: Vec<String>,
}

impl Default for SdnConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            infinity: DEFAULT_INFINITY,
            update_period_secs: DEFAULT_UPDATE_PERIOD_SECS,
            garbage_time_secs: DEFAULT_GARBAGE_TIME_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            unix_socket: PathBuf::from(DEFAULT_UNIX_SOCKET),
            controller_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_CONTROLLER_PORT,
            ),
            interfaces: Vec::new(),
        }
    }
}

impl SdnConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// absent fields.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| SdnError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.infinity == 0 {
            return Err(SdnError::Config("infinity must be non-zero".into()));
        }
        if self.unix_socket.as_os_str().is_empty() {
            return Err(SdnError::Config("unix_socket path must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(SdnError::Config("timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// The loopback endpoint the reply socket binds.
    pub fn reply_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)
    }

    /// Whether `new` can replace this configuration without a restart.
    ///
    /// Endpoints and timers are baked into the running transports, so only
    /// an identical configuration qualifies.
    pub fn compatible_with(&self, new: &SdnConfig) -> bool {
        self == new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = SdnConfig::default();
        assert_eq!(cfg.port, 5556);
        assert_eq!(cfg.infinity, 16);
        assert_eq!(cfg.update_period_secs, 30);
        assert_eq!(cfg.garbage_time_secs, 300);
        assert_eq!(cfg.timeout_secs, 120);
        assert_eq!(cfg.unix_socket, PathBuf::from("/tmp/sdn.sock"));
        assert_eq!(cfg.controller_addr.port(), 55650);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "port = 6000\ninfinity = 32").unwrap();
        let cfg = SdnConfig::load(f.path()).unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.infinity, 32);
        assert_eq!(cfg.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "frobnicate = true").unwrap();
        assert!(SdnConfig::load(f.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_infinity() {
        let cfg = SdnConfig {
            infinity: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_compatible_with_requires_identity() {
        let a = SdnConfig::default();
        let mut b = a.clone();
        assert!(a.compatible_with(&b));
        b.port = 7000;
        assert!(!a.compatible_with(&b));
    }
}

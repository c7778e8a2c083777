//! Destination validation logic.

use super::config::TunnelConfig;
use super::errors::{Result, TunnelError};
use std::net::IpAddr;

/// Validate destination host and port against the tunnel policy.
pub fn validate_destination(host: &str, port: u16, config: &TunnelConfig) -> Result<()> {
    if host.is_empty() {
        return Err(TunnelError::InvalidRequest("Empty hostname".to_string()));
    }

    if config.blocked_ports.contains(&port) {
        return Err(TunnelError::BlockedDestination {
            host: host.to_string(),
            reason: format!("Port {} is blocked", port),
        });
    }

    // Check if port is in allowed list (if allow list is non-empty, enforce it)
    if !config.allowed_ports.is_empty() && !config.allowed_ports.contains(&port) {
        return Err(TunnelError::BlockedDestination {
            host: host.to_string(),
            reason: format!("Port {} not in allowed ports list", port),
        });
    }

    if config.block_private && is_private(host) {
        return Err(TunnelError::BlockedDestination {
            host: host.to_string(),
            reason: "Private/localhost addresses not allowed".to_string(),
        });
    }

    Ok(())
}

fn is_private(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            let seg0 = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg0 & 0xfe00) == 0xfc00 // unique local
                || (seg0 & 0xffc0) == 0xfe80 // link local
                || v6.to_ipv4_mapped().map_or(false, |v4| v4.is_loopback() || v4.is_private())
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> TunnelConfig {
        TunnelConfig { block_private: true, ..TunnelConfig::default() }
    }

    #[test]
    fn test_validate_allowed_port() {
        let mut config = TunnelConfig::default();
        config.allowed_ports = vec![80, 443];

        assert!(validate_destination("example.org", 443, &config).is_ok());
        assert!(validate_destination("example.org", 8080, &config).is_err());
    }

    #[test]
    fn test_validate_blocked_port() {
        let config = TunnelConfig::default();
        assert!(validate_destination("example.org", 25, &config).is_err());
    }

    #[test]
    fn test_loopback_allowed_unless_strict() {
        assert!(validate_destination("127.0.0.1", 443, &TunnelConfig::default()).is_ok());
        assert!(validate_destination("localhost", 443, &strict()).is_err());
        assert!(validate_destination("127.0.0.1", 443, &strict()).is_err());
        assert!(validate_destination("::1", 443, &strict()).is_err());
    }

    #[test]
    fn test_validate_blocks_private_ips() {
        let config = strict();
        assert!(validate_destination("192.168.1.1", 443, &config).is_err());
        assert!(validate_destination("10.0.0.1", 443, &config).is_err());
        assert!(validate_destination("172.31.0.1", 443, &config).is_err());
        assert!(validate_destination("fd00::1", 443, &config).is_err());
        assert!(validate_destination("172.32.0.1", 443, &config).is_ok());
        assert!(validate_destination("example.org", 443, &config).is_ok());
    }
}

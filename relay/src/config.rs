//! Runtime settings of the relay.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address the UDP socket binds to
    pub bind_addr: String,
    /// Backends that stay silent this long are deregistered
    pub server_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:25500".to_string(),
            server_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_default_timeout_outlasts_heartbeats() {
        let config = RelayConfig::default();
        assert!(config.server_timeout > Duration::from_secs(2));
        assert_approx_eq!(config.server_timeout.as_secs_f64(), 10.0);
        assert!(config.bind_addr.ends_with(":25500"));
    }
}

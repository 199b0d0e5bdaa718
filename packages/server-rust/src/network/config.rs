//! Configuration of the operator HTTP surface.

use std::time::Duration;

/// Where and how the operator endpoints are served.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Bearer token required by `/admin/*`. `None` disables those routes.
    pub admin_token: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(30),
            admin_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.admin_token.is_none());
    }
}

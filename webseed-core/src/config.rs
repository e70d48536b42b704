//! Centralized configuration for WebSeed.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Central configuration for all WebSeed components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct WebSeedConfig {
    pub network: NetworkConfig,
    pub seed: SeedConfig,
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// User agent for HTTP requests
    pub user_agent: String,
    /// TCP/TLS connect timeout for range requests
    pub connect_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: "webseed/0.1.0".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-connection piece serving configuration.
#[derive(Debug, Clone)]
pub struct SeedConfig {
    /// Capacity of the command channel feeding a connection actor
    pub command_buffer: usize,
    /// Piece length used when the caller does not supply one
    pub default_piece_length: u32,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            command_buffer: 100,
            default_piece_length: 262_144, // 256 KiB
        }
    }
}

impl WebSeedConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(user_agent) = std::env::var("WEBSEED_USER_AGENT") {
            if !user_agent.is_empty() {
                config.network.user_agent = user_agent;
            }
        }

        if let Ok(timeout) = std::env::var("WEBSEED_CONNECT_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.network.connect_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(buffer) = std::env::var("WEBSEED_COMMAND_BUFFER") {
            if let Ok(capacity) = buffer.parse::<usize>() {
                if capacity > 0 {
                    config.seed.command_buffer = capacity;
                }
            }
        }

        if let Ok(length) = std::env::var("WEBSEED_PIECE_LENGTH") {
            if let Ok(piece_length) = length.parse::<u32>() {
                if piece_length > 0 {
                    config.seed.default_piece_length = piece_length;
                }
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                user_agent: "webseed-test".to_string(),
                connect_timeout: Duration::from_secs(1),
            },
            seed: SeedConfig {
                command_buffer: 16,
                default_piece_length: 100,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = WebSeedConfig::default();

        assert_eq!(config.network.user_agent, "webseed/0.1.0");
        assert_eq!(config.network.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.seed.command_buffer, 100);
        assert_eq!(config.seed.default_piece_length, 262_144);
    }

    #[test]
    fn test_testing_preset() {
        let config = WebSeedConfig::for_testing();
        assert_eq!(config.seed.default_piece_length, 100);
        assert!(config.seed.command_buffer > 0);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("WEBSEED_USER_AGENT", "custom-agent/2.0");
            std::env::set_var("WEBSEED_CONNECT_TIMEOUT", "3");
            std::env::set_var("WEBSEED_COMMAND_BUFFER", "0");
            std::env::set_var("WEBSEED_PIECE_LENGTH", "16384");
        }

        let config = WebSeedConfig::from_env();

        assert_eq!(config.network.user_agent, "custom-agent/2.0");
        assert_eq!(config.network.connect_timeout, Duration::from_secs(3));
        // Zero capacity would make the channel constructor panic
        assert_eq!(config.seed.command_buffer, 100);
        assert_eq!(config.seed.default_piece_length, 16384);

        // Cleanup
        unsafe {
            std::env::remove_var("WEBSEED_USER_AGENT");
            std::env::remove_var("WEBSEED_CONNECT_TIMEOUT");
            std::env::remove_var("WEBSEED_COMMAND_BUFFER");
            std::env::remove_var("WEBSEED_PIECE_LENGTH");
        }
    }
}

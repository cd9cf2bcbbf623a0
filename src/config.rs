//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_BRIDGE_MAX_CONCURRENT_SESSIONS, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are honored without the prefix for deployment platforms
//! that inject them. Secrets (agent API key, Twilio credentials) normally
//! arrive via the environment rather than the file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub auth: AuthConfig,
    pub bridge: BridgeConfig,
    pub twilio: TwilioConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`/`port`: bind address for the HTTP/WebSocket listener
/// - `environment`: "development" or "production"; controls CORS and the
///   scheme of generated media-stream URLs (ws vs wss)
/// - `external_host`: public hostname vendors dial back to; falls back to
///   `host` when unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub external_host: Option<String>,
}

/// Agent platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// API key presented when fetching signed connection URLs
    pub api_key: String,
    /// Base URL of the agent platform REST API
    pub api_base: String,
    /// Agent used when a call carries no agent id of its own
    pub default_agent_id: String,
}

/// Webhook authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Comma-separated list of accepted API keys
    pub api_keys: String,
}

impl AuthConfig {
    /// Parse the comma-separated key list, dropping empty entries.
    pub fn allowed_api_keys(&self) -> Vec<String> {
        self.api_keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Call-bridge tuning parameters.
///
/// ## Tuning guidelines:
/// - `max_concurrent_sessions` is the admission ceiling; one bridge costs two
///   sockets and two relay tasks
/// - `audio_queue_depth` bounds the dialer→agent channel; a stalled agent
///   socket drops frames instead of stalling the dialer read loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Admission ceiling for sessions in a live state
    pub max_concurrent_sessions: usize,

    /// Calls running longer than this are force-ended
    pub max_call_duration_secs: u64,

    /// Window for signed-URL fetch plus agent WebSocket connect
    pub agent_connect_timeout_ms: u64,

    /// Grace given to in-flight frames once either peer signals termination
    pub flush_window_ms: u64,

    /// How long ended sessions stay readable for monitoring
    pub ended_retention_secs: u64,

    /// Depth of the bounded dialer→agent audio channel
    pub audio_queue_depth: usize,
}

/// Twilio REST credentials for outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                environment: "development".to_string(),
                external_host: None,
            },
            agent: AgentConfig {
                api_key: String::new(),
                api_base: "https://api.elevenlabs.io/v1".to_string(),
                default_agent_id: String::new(),
            },
            auth: AuthConfig {
                api_keys: String::new(),
            },
            bridge: BridgeConfig {
                max_concurrent_sessions: 10,
                max_call_duration_secs: 3600,
                agent_connect_timeout_ms: 10_000,
                flush_window_ms: 1_000,
                ended_retention_secs: 300,
                audio_queue_depth: 256,
            },
            twilio: TwilioConfig {
                account_sid: String::new(),
                auth_token: String::new(),
                phone_number: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.bridge.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.bridge.audio_queue_depth == 0 {
            return Err(anyhow::anyhow!("Audio queue depth must be greater than 0"));
        }

        if self.bridge.agent_connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "Agent connect timeout must be greater than 0"
            ));
        }

        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.server.environment.to_lowercase() == "development"
    }

    /// Build the media-stream WebSocket URL vendors are told to dial.
    ///
    /// Production uses wss on the standard port; development uses ws with
    /// the explicit port, matching how the service is actually reachable.
    pub fn media_stream_url(&self, vendor: &str) -> String {
        let host = self
            .server
            .external_host
            .clone()
            .unwrap_or_else(|| {
                if self.server.host == "0.0.0.0" {
                    "localhost".to_string()
                } else {
                    self.server.host.clone()
                }
            });

        if self.is_development() {
            format!(
                "ws://{}:{}/{}/media-stream",
                host, self.server.port, vendor
            )
        } else {
            format!("wss://{}/{}/media-stream", host, vendor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must be valid and carry expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.bridge.max_concurrent_sessions, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bridge.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_list_parsing() {
        let auth = AuthConfig {
            api_keys: "alpha, beta,,gamma ".to_string(),
        };
        assert_eq!(auth.allowed_api_keys(), vec!["alpha", "beta", "gamma"]);

        let empty = AuthConfig {
            api_keys: String::new(),
        };
        assert!(empty.allowed_api_keys().is_empty());
    }

    #[test]
    fn test_media_stream_url_schemes() {
        let mut config = AppConfig::default();
        config.server.host = "0.0.0.0".to_string();
        assert_eq!(
            config.media_stream_url("twilio"),
            "ws://localhost:8080/twilio/media-stream"
        );

        config.server.environment = "production".to_string();
        config.server.external_host = Some("gateway.example.com".to_string());
        assert_eq!(
            config.media_stream_url("twilio"),
            "wss://gateway.example.com/twilio/media-stream"
        );
    }
}

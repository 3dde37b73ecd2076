// Phone configuration.
// Only the relay address is environment-driven; everything else has defaults.

use crate::error::{PhoneError, Result};
use crate::peer::types::{ServerConfig, ServerKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Debug builds log everything, release builds only info and above.
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8088";

pub const RELAY_URL_ENV: &str = "MOQ_PHONE_RELAY_URL";
pub const LOG_FILTER_ENV: &str = "MOQ_PHONE_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    /// WebSocket address of the signaling relay.
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub connect_timeout_secs: u64,
    /// How often the call duration is refreshed while in a call.
    pub duration_tick_ms: u64,
    /// `None` leaves logger setup to the embedding application.
    pub log_filter: Option<String>,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.into(),
            ice_servers: default_ice_servers(),
            connect_timeout_secs: 10,
            duration_tick_ms: 1000,
            log_filter: Some(DEFAULT_LOG_FILTER.into()),
        }
    }
}

impl PhoneConfig {
    /// Defaults with the relay URL and log filter taken from the environment when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                config.relay_url = url.trim().to_string();
            }
        }
        if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
            config.log_filter = Some(filter);
        }
        config
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.relay_url.trim();
        if url.is_empty() {
            return Err(PhoneError::InvalidConfig("relay URL cannot be empty".into()));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(PhoneError::InvalidConfig(format!(
                "relay URL must use ws:// or wss://, got {url}"
            )));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(PhoneError::InvalidConfig(
                    "ICE server URL cannot be empty".into(),
                ));
            }
            if server.kind == ServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(PhoneError::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: ServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: ServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PhoneConfig::default();
        assert_eq!(config.relay_url, "ws://localhost:8088");
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_websocket_relay() {
        let config = PhoneConfig {
            relay_url: "http://localhost:8088".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PhoneError::InvalidConfig(_))
        ));
    }

    #[test]
    fn turn_requires_credentials() {
        let mut config = PhoneConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "turn-1".into(),
            kind: ServerKind::Turn,
            url: "turn.example.org:3478".into(),
            username: Some("user".into()),
            credential: None,
        });
        assert!(config.validate().is_err());

        config.ice_servers[2].credential = Some("secret".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PhoneConfig::from_json(r#"{ "relay_url": "wss://relay.example.org/ws" }"#).unwrap();
        assert_eq!(config.relay_url, "wss://relay.example.org/ws");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.duration_tick(), Duration::from_secs(1));
    }

    #[test]
    fn json_ice_server_kind_uses_type_field() {
        let config = PhoneConfig::from_json(
            r#"{ "ice_servers": [ { "id": "s", "type": "stun", "url": "stun.example.org" } ] }"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers[0].kind, ServerKind::Stun);
    }
}

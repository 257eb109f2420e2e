// Конфигурация peer-сессий
// Логирование можно отключить через LoggingConfig

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено по умолчанию

/// Фильтр tracing по умолчанию, если RUST_LOG не задан
pub const DEFAULT_LOG_FILTER: &str = "ikazuchi_peer=debug,webrtc=warn";

/// Метка keepalive data-channel, согласованная обеими сторонами заранее
pub const KEEPALIVE_LABEL: &str = "mandatory";

/// Идентификатор keepalive data-channel (negotiated, без SDP-согласования)
pub const KEEPALIVE_CHANNEL_ID: u16 = 810;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub keepalive_label: String,
    pub keepalive_channel_id: u16,
    pub logging: LoggingConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            keepalive_label: KEEPALIVE_LABEL.into(),
            keepalive_channel_id: KEEPALIVE_CHANNEL_ID,
            logging: LoggingConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PeerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Валидация серверов
    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "server {} URL cannot be empty",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// Дефолтные публичные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

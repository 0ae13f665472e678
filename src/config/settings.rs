use serde::Deserialize;

use crate::broker::{BrokerPolicy, EmptyTopicPolicy, IdentityPolicy};
use crate::protocol::codec::DEFAULT_MAX_FRAME_LEN;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the broker and logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
}

/// Addresses the server listens on.
///
/// The line protocol is always served over TCP on `host:port`. A WebSocket
/// listener on the same host is started only when `ws_port` is set.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ws_port: Option<u16>,
}

impl ServerSettings {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_addr(&self) -> Option<String> {
        self.ws_port.map(|port| format!("{}:{}", self.host, port))
    }
}

/// Operational limits and policies of the broker.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub max_queue_len: usize,
    pub max_malformed_frames: u32,
    pub max_frame_len: usize,
    pub identity_policy: IdentityPolicy,
    pub empty_topic_policy: EmptyTopicPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ws_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_queue_len: Option<usize>,
    pub max_malformed_frames: Option<u32>,
    pub max_frame_len: Option<usize>,
    pub identity_policy: Option<IdentityPolicy>,
    pub empty_topic_policy: Option<EmptyTopicPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                ws_port: server.ws_port.or(defaults.server.ws_port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(defaults.broker.max_connections),
                max_queue_len: broker
                    .max_queue_len
                    .unwrap_or(defaults.broker.max_queue_len),
                max_malformed_frames: broker
                    .max_malformed_frames
                    .unwrap_or(defaults.broker.max_malformed_frames),
                max_frame_len: broker
                    .max_frame_len
                    .unwrap_or(defaults.broker.max_frame_len),
                identity_policy: broker
                    .identity_policy
                    .unwrap_or(defaults.broker.identity_policy),
                empty_topic_policy: broker
                    .empty_topic_policy
                    .unwrap_or(defaults.broker.empty_topic_policy),
            },
            log: LogSettings {
                level: log.level.unwrap_or(defaults.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        let policy = BrokerPolicy::default();
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 6380,
                ws_port: None,
            },
            broker: BrokerSettings {
                max_connections: policy.max_connections,
                max_queue_len: policy.max_queue_len,
                max_malformed_frames: policy.max_malformed_frames,
                max_frame_len: DEFAULT_MAX_FRAME_LEN,
                identity_policy: policy.identity,
                empty_topic_policy: policy.empty_topic,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl From<&BrokerSettings> for BrokerPolicy {
    fn from(settings: &BrokerSettings) -> Self {
        BrokerPolicy {
            identity: settings.identity_policy,
            empty_topic: settings.empty_topic_policy,
            max_connections: settings.max_connections,
            max_queue_len: settings.max_queue_len,
            max_malformed_frames: settings.max_malformed_frames,
            max_frame_len: settings.max_frame_len,
        }
    }
}

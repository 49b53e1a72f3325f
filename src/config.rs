use crate::error::BridgeError;
use crate::poller::TickPolicy;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.tibber.com/v1-beta/gql";
pub const DEFAULT_WS_URL: &str = "wss://websocket-api.tibber.com/v1-beta/gql/subscriptions";

/// OAuth token bundle as handed over by the platform
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "tibber_fimp_bridge".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Everything the bridge needs to run. Timings default to the production
/// values and are only shrunk by tests.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub token: String,
    pub home_id: String,
    pub api_url: String,
    pub ws_url: String,
    pub mqtt: MqttSettings,
    pub bootstrap_attempts: u32,
    pub bootstrap_delay: Duration,
    pub poll_interval: Duration,
    /// Inclusive clock minute range in which poll ticks are live
    pub poll_window_minutes: (u32, u32),
    pub poll_error_policy: TickPolicy,
    pub poll_window_policy: TickPolicy,
    pub event_queue_size: usize,
    pub state_queue_size: usize,
}

impl BridgeConfig {
    pub fn new(token: impl Into<String>, home_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            home_id: home_id.into(),
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            mqtt: MqttSettings::default(),
            bootstrap_attempts: 10,
            bootstrap_delay: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5 * 60),
            poll_window_minutes: (0, 4),
            poll_error_policy: TickPolicy::Stop,
            poll_window_policy: TickPolicy::Stop,
            event_queue_size: 128,
            state_queue_size: 16,
        }
    }

    /// Reads the configuration from environment variables
    pub fn from_env() -> Result<Self, BridgeError> {
        let token = match env::var("TIBBER_AUTH_JSON").ok().filter(|v| !v.is_empty()) {
            Some(raw) => {
                let auth: AuthData =
                    serde_json::from_str(&raw).map_err(|e| BridgeError::InvalidSetting {
                        name: "TIBBER_AUTH_JSON",
                        reason: e.to_string(),
                    })?;
                auth.access_token
            }
            None => required("TIBBER_TOKEN")?,
        };
        let home_id = required("TIBBER_HOME_ID")?;

        let mut config = Self::new(token, home_id);
        if let Some(url) = optional("TIBBER_API_URL") {
            config.api_url = url;
        }
        if let Some(url) = optional("TIBBER_WS_URL") {
            config.ws_url = url;
        }
        if let Some(host) = optional("MQTT_HOST") {
            config.mqtt.host = host;
        }
        if let Some(port) = optional("MQTT_PORT") {
            config.mqtt.port = port.parse().map_err(|e| BridgeError::InvalidSetting {
                name: "MQTT_PORT",
                reason: format!("{e}"),
            })?;
        }
        if let Some(client_id) = optional("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(stop) = env::var("POLL_STOP_ON_ERROR") {
            config.poll_error_policy = TickPolicy::from_stop_flag(parse_bool_safe(Some(stop)));
        }
        if let Ok(stop) = env::var("POLL_STOP_OUTSIDE_WINDOW") {
            config.poll_window_policy = TickPolicy::from_stop_flag(parse_bool_safe(Some(stop)));
        }
        Ok(config)
    }
}

fn required(name: &'static str) -> Result<String, BridgeError> {
    optional(name).ok_or(BridgeError::MissingSetting(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process wide
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for name in [
            "TIBBER_AUTH_JSON",
            "TIBBER_TOKEN",
            "TIBBER_HOME_ID",
            "TIBBER_API_URL",
            "TIBBER_WS_URL",
            "MQTT_HOST",
            "MQTT_PORT",
            "MQTT_CLIENT_ID",
            "POLL_STOP_ON_ERROR",
            "POLL_STOP_OUTSIDE_WINDOW",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_parse_bool_safe() {
        assert!(!parse_bool_safe(None));
        assert!(!parse_bool_safe(Some("".to_string())));
        assert!(parse_bool_safe(Some("true".to_string())));
        assert!(parse_bool_safe(Some("TrUe".to_string())));
        assert!(!parse_bool_safe(Some("FALSE".to_string())));
        assert!(!parse_bool_safe(Some("yes".to_string())));
        assert!(!parse_bool_safe(Some("1".to_string())));
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::new("token", "H1");
        assert_eq!(config.bootstrap_attempts, 10);
        assert_eq!(config.bootstrap_delay, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.poll_window_minutes, (0, 4));
        assert_eq!(config.poll_error_policy, TickPolicy::Stop);
        assert_eq!(config.poll_window_policy, TickPolicy::Stop);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_from_env_requires_token() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TIBBER_HOME_ID", "H1");

        let err = BridgeConfig::from_env().unwrap_err();
        assert!(matches!(err, BridgeError::MissingSetting("TIBBER_TOKEN")));
        clear_env();
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TIBBER_TOKEN", "abc");
        env::set_var("TIBBER_HOME_ID", "H1");
        env::set_var("MQTT_HOST", "10.0.0.2");
        env::set_var("MQTT_PORT", "1884");
        env::set_var("POLL_STOP_ON_ERROR", "false");

        let config = BridgeConfig::from_env().unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.home_id, "H1");
        assert_eq!(config.mqtt.host, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.poll_error_policy, TickPolicy::Skip);
        assert_eq!(config.poll_window_policy, TickPolicy::Stop);
        clear_env();
    }

    #[test]
    fn test_auth_json_takes_precedence() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TIBBER_TOKEN", "plain");
        env::set_var("TIBBER_HOME_ID", "H1");
        env::set_var(
            "TIBBER_AUTH_JSON",
            r#"{"access_token":"oauth","token_type":"Bearer","expires_in":3600,"refresh_token":"r","scope":"s"}"#,
        );

        let config = BridgeConfig::from_env().unwrap();
        assert_eq!(config.token, "oauth");
        clear_env();
    }

    #[test]
    fn test_invalid_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TIBBER_TOKEN", "abc");
        env::set_var("TIBBER_HOME_ID", "H1");
        env::set_var("MQTT_PORT", "not-a-port");

        let err = BridgeConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidSetting {
                name: "MQTT_PORT",
                ..
            }
        ));
        clear_env();
    }
}

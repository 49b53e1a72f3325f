use thiserror::Error;

/// Failures talking to the Tibber GraphQL API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Home {0} not found")]
    HomeNotFound(String),

    #[error("No current price for home {0}")]
    PriceUnavailable(String),
}

/// Failures inside the live measurement subscription.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by server")]
    Closed,
}

/// Failures handing a message to the outbound bus.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport closed")]
    Closed,

    #[error("Publish timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors that stop the bridge from starting.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Home bootstrap failed after {attempts} attempts: {source}")]
    BootstrapExhausted {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("Missing required setting {0}")]
    MissingSetting(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

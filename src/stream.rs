//! Live measurement subscription over `graphql-transport-ws`.
//!
//! The feed client owns the websocket connection, including reconnection with
//! exponential backoff. Consumers only see an ordered queue of measurements
//! and a queue of connectivity transitions.

use crate::error::StreamError;
use crate::lifecycle::StreamState;
use crate::model::RawMeasurementEvent;
use futures_util::{SinkExt, StreamExt};
use serde_derive::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SUBPROTOCOL: &str = "graphql-transport-ws";
const SUBSCRIPTION_ID: &str = "1";

const LIVE_MEASUREMENT_FIELDS: &str = "timestamp power powerProduction \
    accumulatedConsumption accumulatedProduction accumulatedCost \
    minPower averagePower maxPower powerReactive powerProductionReactive \
    minPowerProduction maxPowerProduction lastMeterConsumption lastMeterProduction \
    voltagePhase1 voltagePhase2 voltagePhase3 currentL1 currentL2 currentL3 \
    powerFactor signalStrength";

/// Fields only sent by meters reporting per-phase data
const EXTENDED_FIELDS: [&str; 8] = [
    "voltagePhase1",
    "voltagePhase2",
    "voltagePhase3",
    "currentL1",
    "currentL2",
    "currentL3",
    "powerFactor",
    "signalStrength",
];

/// Receiving ends of an open subscription.
pub struct Subscription {
    pub events: Receiver<RawMeasurementEvent>,
    pub states: Receiver<StreamState>,
}

/// Source of live measurements for a home.
pub trait MeasurementFeed: Send + Sync + 'static {
    /// Starts the subscription in the background and returns immediately.
    /// Events flow once the handshake has completed; the subscription ends
    /// when `cancel` fires or the event receiver is dropped.
    fn open_subscription(
        &self,
        token: &str,
        home_id: &str,
        cancel: CancellationToken,
    ) -> Subscription;
}

#[derive(Debug, Clone)]
pub struct TibberLiveFeed {
    url: String,
    event_queue_size: usize,
    state_queue_size: usize,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
}

impl TibberLiveFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_queue_size: 128,
            state_queue_size: 16,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }

    pub fn with_queue_sizes(mut self, events: usize, states: usize) -> Self {
        self.event_queue_size = events;
        self.state_queue_size = states;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }

    async fn run(
        self,
        token: String,
        home_id: String,
        events: Sender<RawMeasurementEvent>,
        states: Sender<StreamState>,
        cancel: CancellationToken,
    ) {
        info!(home_id = %home_id, url = %self.url, "Starting live measurement subscription");
        let mut attempt = 0u32;

        loop {
            let _ = states.send(StreamState::Connecting).await;

            let session = self.session(&token, &home_id, &events, &states, &mut attempt);
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = session => result,
            };
            match result {
                Ok(()) => info!(home_id = %home_id, "Live measurement stream closed"),
                Err(e) => warn!(home_id = %home_id, error = %e, "Live measurement stream failed"),
            }
            let _ = states.send(StreamState::Disconnected).await;

            if events.is_closed() {
                debug!("Event consumer gone, not reconnecting");
                break;
            }

            attempt += 1;
            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        let _ = states.send(StreamState::Terminated).await;
        info!(home_id = %home_id, "Live measurement subscription terminated");
    }

    /// One websocket session. Returns `Ok` when the server or consumer ends it.
    async fn session(
        &self,
        token: &str,
        home_id: &str,
        events: &Sender<RawMeasurementEvent>,
        states: &Sender<StreamState>,
        attempt: &mut u32,
    ) -> Result<(), StreamError> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );
        headers.insert(
            "User-Agent",
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let (ws, _) = connect_async(request).await?;
        let (mut write, mut read) = ws.split();

        write
            .send(text(&json!({
                "type": "connection_init",
                "payload": { "token": token },
            })))
            .await?;

        // Wait for the ack before subscribing
        loop {
            let frame = read.next().await.ok_or(StreamError::Closed)??;
            match decode(&frame)? {
                Some(ServerMessage::ConnectionAck) => break,
                Some(ServerMessage::Ping) => write.send(text(&json!({ "type": "pong" }))).await?,
                Some(other) => {
                    return Err(StreamError::Protocol(format!(
                        "expected connection_ack, got {other:?}"
                    )))
                }
                None => {}
            }
        }

        write
            .send(text(&json!({
                "id": SUBSCRIPTION_ID,
                "type": "subscribe",
                "payload": { "query": subscription_query(home_id) },
            })))
            .await?;

        let _ = states.send(StreamState::Connected).await;
        info!(home_id, "Live measurement subscription established");

        while let Some(frame) = read.next().await {
            let frame = frame?;
            if let Message::Close(close) = &frame {
                debug!(?close, "Server closed websocket");
                return Ok(());
            }
            let message = match decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable frame");
                    continue;
                }
            };
            match message {
                Some(ServerMessage::Next { payload }) => {
                    let Some(measurement) = payload.pointer("/data/liveMeasurement") else {
                        warn!(%payload, "Subscription payload without liveMeasurement");
                        continue;
                    };
                    let event = match parse_live_measurement(home_id, measurement) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed measurement");
                            continue;
                        }
                    };
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                    // Backoff resets once data flows
                    *attempt = 0;
                }
                Some(ServerMessage::Ping) => write.send(text(&json!({ "type": "pong" }))).await?,
                Some(ServerMessage::Error { payload }) => {
                    error!(%payload, "Subscription error from Tibber");
                    return Err(StreamError::Protocol(payload.to_string()));
                }
                Some(ServerMessage::Complete) => return Ok(()),
                Some(ServerMessage::ConnectionAck) | Some(ServerMessage::Pong) | None => {}
                Some(ServerMessage::Unknown) => debug!("Ignoring unknown message type"),
            }
        }
        Err(StreamError::Closed)
    }
}

impl MeasurementFeed for TibberLiveFeed {
    fn open_subscription(
        &self,
        token: &str,
        home_id: &str,
        cancel: CancellationToken,
    ) -> Subscription {
        let (events_tx, events_rx) = mpsc::channel(self.event_queue_size);
        let (states_tx, states_rx) = mpsc::channel(self.state_queue_size);
        tokio::spawn(self.clone().run(
            token.to_string(),
            home_id.to_string(),
            events_tx,
            states_tx,
            cancel,
        ));
        Subscription {
            events: events_rx,
            states: states_rx,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Ping,
    Pong,
    Next { payload: Value },
    Error { payload: Value },
    Complete,
    #[serde(other)]
    Unknown,
}

fn decode(frame: &Message) -> Result<Option<ServerMessage>, StreamError> {
    match frame {
        Message::Text(body) => Ok(Some(serde_json::from_str(body)?)),
        Message::Binary(body) => Ok(Some(serde_json::from_slice(body)?)),
        _ => Ok(None),
    }
}

fn text(value: &Value) -> Message {
    Message::Text(value.to_string())
}

fn subscription_query(home_id: &str) -> String {
    format!(
        "subscription {{ liveMeasurement(homeId: \"{home_id}\") {{ {LIVE_MEASUREMENT_FIELDS} }} }}"
    )
}

/// Converts a `liveMeasurement` object into an event for `home_id`.
/// Every numeric field ends up in `fields`; missing power values read as 0.
pub fn parse_live_measurement(
    home_id: &str,
    measurement: &Value,
) -> Result<RawMeasurementEvent, StreamError> {
    let object = measurement.as_object().ok_or_else(|| {
        StreamError::Protocol(format!("liveMeasurement is not an object: {measurement}"))
    })?;

    let fields: BTreeMap<String, f64> = object
        .iter()
        .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
        .collect();
    let extended = EXTENDED_FIELDS.iter().any(|f| fields.contains_key(*f));

    Ok(RawMeasurementEvent {
        home_id: home_id.to_string(),
        power: fields.get("power").copied().unwrap_or_default(),
        power_production: fields.get("powerProduction").copied().unwrap_or_default(),
        extended,
        fields,
    })
}

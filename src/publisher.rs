use crate::config::MqttSettings;
use crate::error::PublishError;
use crate::fimp::{address, FimpMessage};
use crate::model::DomainReport;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on a single publish so a stalled bus never holds up the callers
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound side of the bus. Implementations must tolerate concurrent calls.
pub trait BusTransport: Clone + Send + Sync + 'static {
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// MQTT transport backed by a rumqttc client.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Creates the client and spawns the task driving its event loop
    pub fn connect(settings: &MqttSettings, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        info!(host = %settings.host, port = settings.port, "Connecting to MQTT broker");
        let driver = tokio::spawn(async move {
            loop {
                let polled = tokio::select! {
                    () = cancel.cancelled() => break,
                    polled = event_loop.poll() => polled,
                };
                match polled {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "MQTT connected")
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("MQTT event loop exiting");
        });

        (Self { client }, driver)
    }
}

impl BusTransport for MqttTransport {
    /// Enqueues without waiting. A full request queue (broker unreachable)
    /// is reported as an error instead of blocking.
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

/// The only writer to the bus. Failures are logged and swallowed.
#[derive(Clone)]
pub struct Publisher<T> {
    transport: T,
}

impl<T: BusTransport> Publisher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn publish(&self, report: &DomainReport) {
        if let Err(e) = self.try_publish(report).await {
            error!(error = %e, service = report.service(), "Could not publish MQTT message");
        }
    }

    async fn try_publish(&self, report: &DomainReport) -> Result<(), PublishError> {
        let topic = address(report.service(), report.home_id());
        let payload = FimpMessage::from_report(report).to_bytes()?;
        debug!(%topic, "Publishing {}", report.event_type());
        timeout(PUBLISH_TIMEOUT, self.transport.publish(topic, payload))
            .await
            .map_err(|_| PublishError::Timeout(PUBLISH_TIMEOUT))?
    }
}

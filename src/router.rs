use crate::model::{DomainReport, RawMeasurementEvent};
use crate::publisher::{BusTransport, Publisher};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Signed instantaneous power: consumption counts positive, production negative.
pub fn signed_power(power: f64, power_production: f64) -> f64 {
    if power > 0.0 {
        power
    } else if power_production > 0.0 {
        -power_production
    } else {
        0.0
    }
}

/// Turns raw measurements for the active home into domain reports.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    home_id: String,
}

impl MessageRouter {
    pub fn new(home_id: impl Into<String>) -> Self {
        Self {
            home_id: home_id.into(),
        }
    }

    /// Produces zero, one or two reports. Events for another home yield nothing.
    pub fn route(&self, event: &RawMeasurementEvent) -> Vec<DomainReport> {
        if event.home_id != self.home_id {
            trace!(home_id = %event.home_id, "Dropping measurement for foreign home");
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(2);
        reports.push(DomainReport::MeterReading {
            home_id: event.home_id.clone(),
            value: signed_power(event.power, event.power_production),
            unit: "W".to_string(),
        });
        if event.extended {
            reports.push(DomainReport::ExtendedMeterReading {
                home_id: event.home_id.clone(),
                values: event.fields.clone(),
            });
        }
        reports
    }

    /// Drains `events` in arrival order, publishing every report
    pub async fn run<T: BusTransport>(
        self,
        mut events: Receiver<RawMeasurementEvent>,
        publisher: Publisher<T>,
        cancel: CancellationToken,
    ) {
        info!(home_id = %self.home_id, "Starting measurement router");
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            for report in self.route(&event) {
                publisher.publish(&report).await;
            }
        }
        info!("Measurement router exiting");
    }
}

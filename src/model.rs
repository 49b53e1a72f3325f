use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The metering/pricing account the bridge is subscribed to.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub time_zone: String,
    pub real_time_consumption_enabled: bool,
}

/// Current price for the active home.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub total: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub tax: f64,
    pub currency: String,
    #[serde(default)]
    pub starts_at: String,
    #[serde(default)]
    pub level: String,
}

/// One live measurement as delivered by the stream.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct RawMeasurementEvent {
    pub home_id: String,
    /// Instantaneous consumption in W
    pub power: f64,
    /// Instantaneous production in W
    pub power_production: f64,
    pub extended: bool,
    pub fields: BTreeMap<String, f64>,
}

/// A normalized, publish-ready reading.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainReport {
    SensorReading {
        home_id: String,
        service: String,
        value: f64,
        unit: String,
    },
    MeterReading {
        home_id: String,
        value: f64,
        unit: String,
    },
    ExtendedMeterReading {
        home_id: String,
        values: BTreeMap<String, f64>,
    },
}

impl DomainReport {
    pub fn home_id(&self) -> &str {
        match self {
            DomainReport::SensorReading { home_id, .. }
            | DomainReport::MeterReading { home_id, .. }
            | DomainReport::ExtendedMeterReading { home_id, .. } => home_id,
        }
    }

    /// FIMP service name the report is published under
    pub fn service(&self) -> &str {
        match self {
            DomainReport::SensorReading { service, .. } => service,
            DomainReport::MeterReading { .. } | DomainReport::ExtendedMeterReading { .. } => {
                "meter_elec"
            }
        }
    }

    /// FIMP message type
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainReport::SensorReading { .. } => "evt.sensor.report",
            DomainReport::MeterReading { .. } => "evt.meter.report",
            DomainReport::ExtendedMeterReading { .. } => "evt.meter_ext.report",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names() {
        let sensor = DomainReport::SensorReading {
            home_id: "H1".to_string(),
            service: "sensor_price".to_string(),
            value: 1.2,
            unit: "NOK".to_string(),
        };
        let meter = DomainReport::MeterReading {
            home_id: "H1".to_string(),
            value: 500.0,
            unit: "W".to_string(),
        };
        let extended = DomainReport::ExtendedMeterReading {
            home_id: "H1".to_string(),
            values: BTreeMap::new(),
        };

        assert_eq!(sensor.service(), "sensor_price");
        assert_eq!(meter.service(), "meter_elec");
        assert_eq!(extended.service(), "meter_elec");
        assert_eq!(sensor.event_type(), "evt.sensor.report");
        assert_eq!(meter.event_type(), "evt.meter.report");
        assert_eq!(extended.event_type(), "evt.meter_ext.report");
        assert_eq!(extended.home_id(), "H1");
    }

    #[test]
    fn test_price_quote_deserializes_partial() {
        let quote: PriceQuote =
            serde_json::from_str(r#"{"total": 1.5, "currency": "SEK"}"#).unwrap();
        assert_eq!(quote.total, 1.5);
        assert_eq!(quote.currency, "SEK");
        assert_eq!(quote.level, "");
    }
}

//! FIMP message envelope and addressing.

use crate::model::DomainReport;
use chrono::{Local, SecondsFormat};
use serde_derive::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

const ADDRESS_PREFIX: &str = "pt:j1/mt:evt/rt:dev/rn:tibber/ad:1";

/// Topic a report for `service` on `home_id` is published to
pub fn address(service: &str, home_id: &str) -> String {
    format!("{ADDRESS_PREFIX}/sv:{service}/ad:{home_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FimpMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub serv: String,
    pub val_t: String,
    pub val: Value,
    pub props: Option<BTreeMap<String, String>>,
    pub tags: Option<Vec<String>>,
    pub ctime: String,
    pub uid: String,
    pub ver: String,
}

impl FimpMessage {
    pub fn from_report(report: &DomainReport) -> Self {
        let (val_t, val, props) = match report {
            DomainReport::SensorReading { value, unit, .. }
            | DomainReport::MeterReading { value, unit, .. } => (
                "float",
                Value::from(*value),
                Some(BTreeMap::from([("unit".to_string(), unit.clone())])),
            ),
            DomainReport::ExtendedMeterReading { values, .. } => (
                "float_map",
                Value::Object(
                    values
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(*v)))
                        .collect(),
                ),
                None,
            ),
        };

        Self {
            msg_type: report.event_type().to_string(),
            serv: report.service().to_string(),
            val_t: val_t.to_string(),
            val,
            props,
            tags: None,
            ctime: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            uid: Uuid::new_v4().to_string(),
            ver: "1".to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

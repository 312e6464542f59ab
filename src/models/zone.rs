//! Zone ("area") documents as served by the heating backend.
//!
//! Notes
//! - A zone is an identity (`id`) plus an opaque payload. Only `id` and `hidden` are
//!   interpreted by the client; every other field is kept verbatim in `attributes`.
//! - Push frames are JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ZoneId {
    fn from(value: &str) -> Self {
        ZoneId(value.to_string())
    }
}

impl core::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Feature payload (name, state, temperatures, presets, schedules, ...).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Zone {
    pub fn new(id: impl Into<String>) -> Self {
        Zone {
            id: ZoneId(id.into()),
            hidden: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(self.id.as_str())
    }
}

/// Auxiliary safety-sensor status shown as a banner next to the zone list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyAlertStatus {
    #[serde(default)]
    pub alert_active: bool,
}

/// Full zone collection as returned by the REST endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ZonesResponse {
    List(Vec<Zone>),
    Wrapped {
        #[serde(alias = "areas")]
        zones: Vec<Zone>,
    },
}

impl ZonesResponse {
    pub fn into_zones(self) -> Vec<Zone> {
        match self {
            ZonesResponse::List(zones) => zones,
            ZonesResponse::Wrapped { zones } => zones,
        }
    }
}

/// Inbound push-channel frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    ZonesUpdated { zones: Vec<Zone> },
    ZoneUpdated { zone: Zone },
    ZoneDeleted { zone_id: ZoneId },
    #[serde(other)]
    Unknown,
}

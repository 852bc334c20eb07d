use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cap::{self, MessageType, Reference, Status};
use crate::domain::geo::{Circle, Polygon};

/// Language applied to info blocks that carry none.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// The normalized alert schema persisted to the alert store, as
/// opposed to the raw fetched wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub sender: String,
    pub identifier: String,
    pub sent: DateTime<Utc>,
    pub status: Status,
    pub message_type: MessageType,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub infos: Vec<Info>,
    pub origin_system: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub areas: Vec<Area>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_desc: Option<String>,
    #[serde(default)]
    pub geo_codes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub polygons: Vec<Polygon>,
    #[serde(default)]
    pub circles: Vec<Circle>,
}

impl Alert {
    /// Field-for-field mapping from the wire representation. Wire
    /// fields the canonical schema does not know are ignored.
    pub fn from_wire(wire: &cap::Alert, origin_system: &str) -> Alert {
        Alert {
            id: wire.id(),
            sender: wire.sender.clone(),
            identifier: wire.identifier.clone(),
            sent: wire.sent.with_timezone(&Utc),
            status: wire.status,
            message_type: wire.msg_type,
            references: wire.references.clone(),
            infos: wire.infos.iter().map(Info::from_wire).collect(),
            origin_system: origin_system.to_string(),
        }
    }
}

impl Info {
    fn from_wire(wire: &cap::Info) -> Info {
        Info {
            language: wire
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            event: wire.event.clone(),
            headline: wire.headline.clone(),
            description: wire.description.clone(),
            areas: wire.areas.iter().map(Area::from_wire).collect(),
        }
    }
}

impl Area {
    fn from_wire(wire: &cap::Area) -> Area {
        let mut geo_codes: HashMap<String, Vec<String>> = HashMap::new();
        for named in &wire.geo_codes {
            geo_codes
                .entry(named.value_name.clone())
                .or_default()
                .push(named.value.clone());
        }
        Area {
            area_desc: wire.area_desc.clone(),
            geo_codes,
            polygons: wire.polygons.clone(),
            circles: wire.circles.clone(),
        }
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::error::{IngestError, Result};
use crate::domain::geo::{parse_circle, parse_polygon, Circle, Polygon};

/// Serde adapter for CAP timestamps (RFC 3339 with a numeric offset).
pub mod cap_time {
    use chrono::{DateTime, FixedOffset, SecondsFormat};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let value = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&value).map_err(serde::de::Error::custom)
    }
}

/// A pointer to another alert, identified by sender, identifier and
/// sent time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub sender: String,
    pub identifier: String,
    #[serde(with = "cap_time")]
    pub sent: DateTime<FixedOffset>,
}

impl Reference {
    /// Deterministic identity key: SHA-256 over the canonical
    /// `sender|identifier|sent` string, with the sent time normalized
    /// to UTC so equal instants hash equally regardless of offset.
    pub fn key(&self) -> String {
        let mut canonical = String::new();
        canonical.push_str(&self.sender);
        canonical.push('|');
        canonical.push_str(&self.identifier);
        canonical.push('|');
        canonical.push_str(
            &self
                .sent
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.sender,
            self.identifier,
            self.sent.to_rfc3339_opts(SecondsFormat::Secs, false)
        )
    }
}

/// Parses the CAP `references` text: whitespace-separated
/// `sender,identifier,sent` triplets.
pub fn parse_references(value: &str) -> std::result::Result<Vec<Reference>, String> {
    value
        .split_whitespace()
        .map(|triplet| {
            let mut parts = triplet.splitn(3, ',');
            let sender = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("invalid reference: {triplet}"))?;
            let identifier = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("invalid reference: {triplet}"))?;
            let sent = parts
                .next()
                .ok_or_else(|| format!("invalid reference: {triplet}"))?;
            let sent = DateTime::parse_from_rfc3339(sent)
                .map_err(|e| format!("invalid sent time in reference {triplet}: {e}"))?;
            Ok(Reference {
                sender: sender.to_string(),
                identifier: identifier.to_string(),
                sent,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Actual,
    Exercise,
    Test,
    Draft,
    System,
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Status, String> {
        match s {
            "Actual" => Ok(Status::Actual),
            "Exercise" => Ok(Status::Exercise),
            "Test" => Ok(Status::Test),
            "Draft" => Ok(Status::Draft),
            "System" => Ok(Status::System),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Alert,
    Update,
    Cancel,
    Ack,
    Error,
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<MessageType, String> {
        match s {
            "Alert" => Ok(MessageType::Alert),
            "Update" => Ok(MessageType::Update),
            "Cancel" => Ok(MessageType::Cancel),
            "Ack" => Ok(MessageType::Ack),
            "Error" => Ok(MessageType::Error),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// One `valueName`/`value` pair from a CAP `geocode` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    #[serde(rename = "valueName")]
    pub value_name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(default)]
    pub area_desc: Option<String>,
    #[serde(default)]
    pub geo_codes: Vec<NamedValue>,
    #[serde(default)]
    pub polygons: Vec<Polygon>,
    #[serde(default)]
    pub circles: Vec<Circle>,
}

impl Area {
    /// Geocode values carrying the given name, in document order.
    pub fn geo_code_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.geo_codes
            .iter()
            .filter(move |g| g.value_name == name)
            .map(|g| g.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub areas: Vec<Area>,
}

/// A CAP alert as fetched off the wire. Fields the core does not act
/// on are not modeled; the decoder skips them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub identifier: String,
    pub sender: String,
    #[serde(with = "cap_time")]
    pub sent: DateTime<FixedOffset>,
    pub status: Status,
    pub msg_type: MessageType,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub infos: Vec<Info>,
}

impl Alert {
    /// The alert's own identity triplet.
    pub fn reference(&self) -> Reference {
        Reference {
            sender: self.sender.clone(),
            identifier: self.identifier.clone(),
            sent: self.sent,
        }
    }

    /// Deterministic alert id, identical to the key of its own
    /// reference so store lookups and dedup entries line up.
    pub fn id(&self) -> String {
        self.reference().key()
    }

    /// Decodes a CAP XML document into the typed model.
    pub fn from_xml(body: &[u8]) -> Result<Alert> {
        let text = String::from_utf8_lossy(body);
        let raw: XmlAlert = quick_xml::de::from_str(&text)?;
        raw.into_alert()
    }
}

// XML-facing mirror of the CAP schema. Every text leaf stays a string
// here; `into_alert` applies the CAP text encodings (reference
// triplets, polygon rings, circles, timestamps).

#[derive(Debug, Deserialize)]
struct XmlAlert {
    identifier: String,
    sender: String,
    sent: String,
    status: String,
    #[serde(rename = "msgType")]
    msg_type: String,
    #[serde(default)]
    references: Option<String>,
    #[serde(default, rename = "info")]
    infos: Vec<XmlInfo>,
}

#[derive(Debug, Deserialize)]
struct XmlInfo {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "area")]
    areas: Vec<XmlArea>,
}

#[derive(Debug, Deserialize)]
struct XmlArea {
    #[serde(default, rename = "areaDesc")]
    area_desc: Option<String>,
    #[serde(default, rename = "geocode")]
    geo_codes: Vec<NamedValue>,
    #[serde(default, rename = "polygon")]
    polygons: Vec<String>,
    #[serde(default, rename = "circle")]
    circles: Vec<String>,
}

fn malformed(detail: String) -> IngestError {
    IngestError::Cap(detail)
}

impl XmlAlert {
    fn into_alert(self) -> Result<Alert> {
        let sent = DateTime::parse_from_rfc3339(&self.sent)?;
        let status = self.status.parse().map_err(malformed)?;
        let msg_type = self.msg_type.parse().map_err(malformed)?;
        let references = match self.references.as_deref() {
            Some(text) => parse_references(text).map_err(malformed)?,
            None => Vec::new(),
        };
        let infos = self
            .infos
            .into_iter()
            .map(XmlInfo::into_info)
            .collect::<Result<Vec<_>>>()?;
        Ok(Alert {
            identifier: self.identifier,
            sender: self.sender,
            sent,
            status,
            msg_type,
            references,
            infos,
        })
    }
}

impl XmlInfo {
    fn into_info(self) -> Result<Info> {
        let areas = self
            .areas
            .into_iter()
            .map(XmlArea::into_area)
            .collect::<Result<Vec<_>>>()?;
        Ok(Info {
            language: self.language,
            event: self.event,
            headline: self.headline,
            description: self.description,
            areas,
        })
    }
}

impl XmlArea {
    fn into_area(self) -> Result<Area> {
        let polygons = self
            .polygons
            .iter()
            .map(|text| parse_polygon(text).map_err(malformed))
            .collect::<Result<Vec<_>>>()?;
        let circles = self
            .circles
            .iter()
            .map(|text| parse_circle(text).map_err(malformed))
            .collect::<Result<Vec<_>>>()?;
        Ok(Area {
            area_desc: self.area_desc,
            geo_codes: self.geo_codes,
            polygons,
            circles,
        })
    }
}

//! Discovered device records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Current record layout version
pub const SCHEMA_VERSION: u32 = 2;

/// Model stored for devices no card recognises
pub const UNRECOGNIZED_MODEL: &str = "unrecognized";

fn current_schema() -> u32 {
    SCHEMA_VERSION
}

/// One uplink interface: its alias and reported speed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uplink {
    pub description: String,
    #[serde(default)]
    pub speed_mbps: Option<u64>,
}

impl Uplink {
    pub fn new(description: impl Into<String>, speed_mbps: Option<u64>) -> Self {
        Self {
            description: description.into(),
            speed_mbps,
        }
    }
}

impl fmt::Display for Uplink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.speed_mbps {
            Some(speed) => write!(f, "{} ({} Mb/s)", self.description, speed),
            None => write!(f, "{} (speed unknown)", self.description),
        }
    }
}

/// Value of a wanted attribute without a dedicated field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
    Uplinks(Vec<Uplink>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(text) => f.write_str(text),
            AttributeValue::List(items) => f.write_str(&items.join(", ")),
            AttributeValue::Uplinks(uplinks) => {
                let rendered: Vec<String> = uplinks.iter().map(Uplink::to_string).collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}

/// Everything known about one address.
///
/// Fields added after the first layout default when an older record is
/// read back, so stored records never need migrating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default = "current_schema")]
    pub schema_version: u32,
    pub address: IpAddr,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_name_error: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub location_latin: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub rancid_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub vlans: Vec<String>,
    #[serde(default)]
    pub uplinks: Vec<Uplink>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Device {
    pub fn new(address: IpAddr, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            address,
            first_seen: now,
            last_seen: now,
            domain_name: None,
            domain_name_error: None,
            contact: None,
            location: None,
            location_latin: None,
            vendor: None,
            series: None,
            rancid_type: None,
            model: None,
            firmware: None,
            vlans: Vec::new(),
            uplinks: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Fresh record for a device that answered at `now`, keeping only the
    /// first-seen time of any earlier record
    pub fn observed(address: IpAddr, now: DateTime<Utc>, previous: Option<&Device>) -> Self {
        let mut device = Self::new(address, now);
        if let Some(previous) = previous {
            device.first_seen = previous.first_seen;
        }
        device
    }

    pub fn is_recognized(&self) -> bool {
        self.model.as_deref().map_or(false, |model| model != UNRECOGNIZED_MODEL)
    }

    pub fn mark_unrecognized(&mut self) {
        self.model = Some(UNRECOGNIZED_MODEL.to_string());
    }

    /// Store a scalar attribute
    pub fn set_text(&mut self, name: &str, value: String) {
        match name {
            "model" => self.model = Some(value),
            "firmware" => self.firmware = Some(value),
            "contact" => self.contact = Some(value),
            "location" => self.location = Some(value),
            other => {
                self.attributes.insert(other.to_string(), AttributeValue::Text(value));
            }
        }
    }

    /// Store a list attribute
    pub fn set_list(&mut self, name: &str, values: Vec<String>) {
        match name {
            "vlans" => self.vlans = values,
            other => {
                self.attributes.insert(other.to_string(), AttributeValue::List(values));
            }
        }
    }

    /// Store an uplink list attribute
    pub fn set_uplinks(&mut self, name: &str, uplinks: Vec<Uplink>) {
        match name {
            "uplinks" => self.uplinks = uplinks,
            other => {
                self.attributes.insert(other.to_string(), AttributeValue::Uplinks(uplinks));
            }
        }
    }

    /// Read back a scalar attribute by name
    pub fn text(&self, name: &str) -> Option<&str> {
        match name {
            "model" => self.model.as_deref(),
            "firmware" => self.firmware.as_deref(),
            "contact" => self.contact.as_deref(),
            "location" => self.location.as_deref(),
            "domain_name" => self.domain_name.as_deref(),
            other => match self.attributes.get(other) {
                Some(AttributeValue::Text(text)) => Some(text.as_str()),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.address)?;
        let optional = [
            ("domain name", &self.domain_name),
            ("domain name error", &self.domain_name_error),
            ("model", &self.model),
            ("firmware", &self.firmware),
            ("vendor", &self.vendor),
            ("series", &self.series),
            ("location", &self.location),
            ("location (latin)", &self.location_latin),
            ("contact", &self.contact),
        ];
        for (label, value) in optional {
            if let Some(value) = value {
                writeln!(f, "  {:<18} {}", label, value)?;
            }
        }
        if !self.vlans.is_empty() {
            writeln!(f, "  {:<18} {}", "vlans", self.vlans.join(", "))?;
        }
        for uplink in &self.uplinks {
            writeln!(f, "  {:<18} {}", "uplink", uplink)?;
        }
        for (name, value) in &self.attributes {
            writeln!(f, "  {:<18} {}", name, value)?;
        }
        writeln!(f, "  {:<18} {}", "first seen", self.first_seen.to_rfc3339())?;
        write!(f, "  {:<18} {}", "last seen", self.last_seen.to_rfc3339())
    }
}

//! Inventory queries over stored records

use crate::device::Device;
use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;

/// Default inactivity threshold, in seconds
pub const DEFAULT_INACTIVE_SECS: i64 = 600;

/// Record field searched by [`search`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Address,
    DomainName,
    Contact,
    Location,
    Model,
    Firmware,
    /// Exact VLAN membership rather than substring
    Vlans,
    /// Every text field
    Any,
}

impl Field {
    const TEXT_FIELDS: [Field; 6] = [
        Field::Address,
        Field::DomainName,
        Field::Contact,
        Field::Location,
        Field::Model,
        Field::Firmware,
    ];

    fn matches(&self, device: &Device, needle: &str) -> bool {
        let contains = |value: &Option<String>| value.as_deref().map_or(false, |v| v.contains(needle));
        match self {
            Field::Address => device.address.to_string().contains(needle),
            Field::DomainName => contains(&device.domain_name),
            Field::Contact => contains(&device.contact),
            Field::Location => contains(&device.location) || contains(&device.location_latin),
            Field::Model => contains(&device.model),
            Field::Firmware => contains(&device.firmware),
            Field::Vlans => device.vlans.iter().any(|vlan| vlan == needle),
            Field::Any => Self::TEXT_FIELDS.iter().any(|field| field.matches(device, needle)),
        }
    }
}

impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" | "address" => Ok(Field::Address),
            "dname" | "domain" | "domain_name" => Ok(Field::DomainName),
            "contact" => Ok(Field::Contact),
            "location" => Ok(Field::Location),
            "model" => Ok(Field::Model),
            "firmware" => Ok(Field::Firmware),
            "vlan" | "vlans" => Ok(Field::Vlans),
            "any" | "full" => Ok(Field::Any),
            other => Err(ConfigError::Invalid(format!("unknown search field '{}'", other))),
        }
    }
}

/// Devices not reached within `threshold` of the reference time (normally
/// the time of the last store transaction)
pub fn inactive<'a>(records: &'a [Device], reference: DateTime<Utc>, threshold: Duration) -> Vec<&'a Device> {
    let cutoff = reference - threshold;
    records.iter().filter(|device| device.last_seen < cutoff).collect()
}

pub fn search<'a>(records: &'a [Device], field: Field, needle: &str) -> Vec<&'a Device> {
    records.iter().filter(|device| field.matches(device, needle)).collect()
}

/// Look a device up by address, full domain name, or first label of its
/// domain name
pub fn find_device<'a>(records: &'a [Device], query: &str) -> Option<&'a Device> {
    if let Ok(address) = query.parse::<IpAddr>() {
        return records.iter().find(|device| device.address == address);
    }

    let query = query.trim_end_matches('.');
    records
        .iter()
        .find(|device| device.domain_name.as_deref().map(|d| d.trim_end_matches('.')) == Some(query))
        .or_else(|| {
            records.iter().find(|device| {
                device
                    .domain_name
                    .as_deref()
                    .and_then(|name| name.split('.').next())
                    == Some(query)
            })
        })
}

/// Newest firmware seen for every model
pub fn newest_firmware(records: &[Device]) -> BTreeMap<String, String> {
    let mut newest: BTreeMap<String, String> = BTreeMap::new();
    for device in records {
        let (Some(model), Some(firmware)) = (&device.model, &device.firmware) else {
            continue;
        };
        match newest.get(model) {
            Some(current) if compare_versions(firmware, current) != Ordering::Greater => {}
            _ => {
                newest.insert(model.clone(), firmware.clone());
            }
        }
    }
    newest
}

/// Devices whose firmware is older than the newest seen for their model
pub fn outdated(records: &[Device]) -> Vec<&Device> {
    let newest = newest_firmware(records);
    records
        .iter()
        .filter(|device| match (&device.model, &device.firmware) {
            (Some(model), Some(firmware)) => newest
                .get(model)
                .map_or(false, |best| compare_versions(firmware, best) == Ordering::Less),
            _ => false,
        })
        .collect()
}

/// Devices whose model contains `model` (case-insensitive) and whose
/// firmware is older than `version`, or newer when `older` is false
pub fn software_search<'a>(records: &'a [Device], model: &str, version: &str, older: bool) -> Vec<&'a Device> {
    let model = model.to_uppercase();
    let wanted = if older { Ordering::Less } else { Ordering::Greater };
    records
        .iter()
        .filter(|device| match (&device.model, &device.firmware) {
            (Some(m), Some(firmware)) => {
                m.to_uppercase().contains(&model) && compare_versions(firmware, version) == wanted
            }
            _ => false,
        })
        .collect()
}

/// The device named by `start` followed by every device reachable through
/// its uplinks, depth first. An uplink names its next hop after the last `@`
/// of its description (address or domain name); each device is listed once.
pub fn uplink_chain<'a>(records: &'a [Device], start: &str) -> Vec<&'a Device> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    climb(records, start, &mut seen, &mut chain);
    chain
}

fn climb<'a>(records: &'a [Device], hop: &str, seen: &mut HashSet<IpAddr>, chain: &mut Vec<&'a Device>) {
    let Some(device) = find_device(records, hop) else {
        return;
    };
    if !seen.insert(device.address) {
        return;
    }
    chain.push(device);
    for uplink in &device.uplinks {
        let next = uplink.description.rsplit('@').next().unwrap_or_default().trim();
        if !next.is_empty() {
            climb(records, next, seen, chain);
        }
    }
}

/// Compare version strings chunk by chunk: digit runs numerically, anything
/// else as text
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (left, right) = (chunks(a), chunks(b));
    for (x, y) in left.iter().zip(right.iter()) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn chunks(version: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    let mut digits = false;
    for (i, c) in version.char_indices() {
        if !c.is_alphanumeric() {
            if let Some(s) = start.take() {
                out.push(&version[s..i]);
            }
            continue;
        }
        match start {
            Some(s) if c.is_ascii_digit() != digits => {
                out.push(&version[s..i]);
                start = Some(i);
            }
            Some(_) => {}
            None => start = Some(i),
        }
        digits = c.is_ascii_digit();
    }
    if let Some(s) = start {
        out.push(&version[s..]);
    }
    out
}

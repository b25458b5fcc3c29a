//! Device cards and the matcher that picks one for a device
//!
//! A card says how to recognise a device family from its `sysDescr` and
//! where that family keeps its model, firmware and VLAN data. The catalog is
//! built once before a run and shared read-only between workers.

pub mod loader;

use crate::error::CatalogError;
use crate::snmp::Locator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use loader::load_dir;

/// Suffix marking extra locator entries in a card file
const LOCATOR_SUFFIX: &str = "_oid";

/// A card exactly as written in a card file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardSpec {
    pub info_pattern: String,
    #[serde(default)]
    pub model_oid: Option<String>,
    #[serde(default)]
    pub firmware_oid: Option<String>,
    #[serde(default)]
    pub vlan_tree: Option<String>,
    /// Presence alone matters
    #[serde(default)]
    pub vlan_tree_by_oid: Option<serde_json::Value>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub rancid_type: Option<String>,
    /// Everything else, including `<name>_oid` locators
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Static `(vendor, series)` assignment for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardBinding {
    pub vendor: String,
    pub series: String,
}

/// A compiled, validated card
#[derive(Debug, Clone)]
pub struct DeviceCard {
    name: String,
    pattern: Regex,
    pub model_oid: Option<Locator>,
    pub firmware_oid: Option<Locator>,
    pub vlan_tree: Option<Locator>,
    /// The VLAN id is the last arc of each walked OID, not its value
    pub vlan_index_in_locator: bool,
    pub vendor: Option<String>,
    pub series: Option<String>,
    pub rancid_type: Option<String>,
    extra_locators: BTreeMap<String, Locator>,
}

impl DeviceCard {
    /// Compile a card; `name` only appears in diagnostics
    pub fn from_spec(name: impl Into<String>, spec: CardSpec) -> Result<Self, CatalogError> {
        let name = name.into();
        let pattern = Regex::new(&spec.info_pattern).map_err(|e| CatalogError::InvalidPattern {
            card: name.clone(),
            reason: e.to_string(),
        })?;

        let parse = |field: &str, raw: Option<String>| -> Result<Option<Locator>, CatalogError> {
            raw.map(|raw| {
                raw.parse::<Locator>().map_err(|e| CatalogError::InvalidLocator {
                    card: name.clone(),
                    field: field.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
        };

        let model_oid = parse("model_oid", spec.model_oid)?;
        let firmware_oid = parse("firmware_oid", spec.firmware_oid)?;
        let vlan_tree = parse("vlan_tree", spec.vlan_tree)?;

        let mut extra_locators = BTreeMap::new();
        for (key, value) in spec.extra {
            let Some(attribute) = key.strip_suffix(LOCATOR_SUFFIX) else {
                log::debug!("Card {}: ignoring unknown key '{}'", name, key);
                continue;
            };
            match value {
                serde_json::Value::String(raw) => {
                    if let Some(locator) = parse(&key, Some(raw))? {
                        extra_locators.insert(attribute.to_string(), locator);
                    }
                }
                other => log::warn!("Card {}: '{}' is not a string ({})", name, key, other),
            }
        }

        Ok(Self {
            name,
            pattern,
            model_oid,
            firmware_oid,
            vlan_tree,
            vlan_index_in_locator: spec.vlan_tree_by_oid.is_some(),
            vendor: spec.vendor,
            series: spec.series,
            rancid_type: spec.rancid_type,
            extra_locators,
        })
    }

    /// Parse and compile a card from JSON text
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, CatalogError> {
        let name = name.into();
        let spec: CardSpec = serde_json::from_str(json).map_err(|e| CatalogError::Corrupted {
            path: PathBuf::from(&name),
            reason: e.to_string(),
        })?;
        Self::from_spec(name, spec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Regex search (not a full match) against the identity string
    pub fn matches(&self, sys_descr: &str) -> bool {
        self.pattern.is_match(sys_descr)
    }

    pub fn is_bound_to(&self, binding: &CardBinding) -> bool {
        self.vendor.as_deref() == Some(binding.vendor.as_str())
            && self.series.as_deref() == Some(binding.series.as_str())
    }

    /// Where the card keeps the attribute called `name`
    pub fn locator_for(&self, name: &str) -> Option<&Locator> {
        match name {
            "model" => self.model_oid.as_ref(),
            "firmware" => self.firmware_oid.as_ref(),
            "vlans" => self.vlan_tree.as_ref(),
            other => self.extra_locators.get(other),
        }
    }
}

/// Ordered, immutable list of cards; first match wins
#[derive(Debug, Clone)]
pub struct CardCatalog {
    cards: Vec<DeviceCard>,
}

impl CardCatalog {
    pub fn from_cards(cards: Vec<DeviceCard>) -> Result<Self, CatalogError> {
        if cards.is_empty() {
            return Err(CatalogError::NoCards("the card list".to_string()));
        }
        Ok(Self { cards })
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceCard> {
        self.cards.iter()
    }

    /// Pick the card describing a device.
    ///
    /// A static binding selects the first card with that vendor and series
    /// regardless of its pattern. Without one (or when no card carries the
    /// bound vendor and series) the first card whose pattern is found in
    /// `sys_descr` wins.
    pub fn identify(&self, sys_descr: &str, binding: Option<&CardBinding>) -> Option<&DeviceCard> {
        if let Some(binding) = binding {
            if let Some(card) = self.cards.iter().find(|card| card.is_bound_to(binding)) {
                return Some(card);
            }
            log::warn!(
                "No card for bound vendor '{}' series '{}', falling back to pattern match",
                binding.vendor, binding.series
            );
        }
        self.cards.iter().find(|card| card.matches(sys_descr))
    }
}

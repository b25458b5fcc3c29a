//! Settings for argus runs
//!
//! A settings file has global keys plus any number of `[[groups]]`. Each
//! group may override global keys one by one; [`resolve`] folds a group over
//! the globals into the read-only [`SettingsView`] the engine runs on.

use crate::catalog::CardBinding;
use crate::error::ConfigError;
use crate::snmp::session::{DEFAULT_MAX_CALLS, DEFAULT_MAX_REPETITIONS};
use crate::snmp::transport::TransportOptions;
use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names searched by [`Settings::load_default`]
pub const CONFIG_FILE_NAME: &str = "argus.toml";
pub const HOME_CONFIG_FILE_NAME: &str = ".argus.toml";

/// Name given to the group formed by the global `subnets`/`hosts`
pub const DEFAULT_GROUP: &str = "default";

/// Refuse to expand subnets larger than this
const MAX_SUBNET_HOSTS: u128 = 1 << 24;

/// How a wanted attribute is extracted from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    /// One GET, stored as text
    Equal,
    /// Walk of interface aliases matching the uplink pattern, with speeds
    UplinkList,
    /// Walk of the card's VLAN table
    VlanList,
}

/// SNMP transport and paging parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpSettings {
    pub port: u16,
    pub timeout_ms: u64,
    pub retries: u32,
    pub max_repetitions: u32,
    pub max_calls: u32,
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self {
            port: 161,
            timeout_ms: 1000,
            retries: 1,
            max_repetitions: DEFAULT_MAX_REPETITIONS,
            max_calls: DEFAULT_MAX_CALLS,
        }
    }
}

impl SnmpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            port: self.port,
            timeout: self.timeout(),
            retries: self.retries,
        }
    }
}

/// Location of the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub tree: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("devices.db"),
            tree: "devicedb".to_string(),
        }
    }
}

fn default_wanted() -> BTreeMap<String, ExtractionKind> {
    BTreeMap::from([
        ("model".to_string(), ExtractionKind::Equal),
        ("firmware".to_string(), ExtractionKind::Equal),
        ("uplinks".to_string(), ExtractionKind::UplinkList),
    ])
}

/// Global settings, as read from the settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub threads: usize,
    pub community: String,
    pub uplink_pattern: String,
    pub suppressed_vlans: Vec<String>,
    /// Empty means every VLAN is allowed
    pub allowed_vlans: Vec<String>,
    pub transliteration_schema: Option<String>,
    pub supply_zone: Option<String>,
    pub cards_dir: PathBuf,
    pub subnets: Vec<String>,
    pub hosts: Vec<String>,
    pub store: StoreSettings,
    pub snmp: SnmpSettings,
    pub wanted: BTreeMap<String, ExtractionKind>,
    pub overrides: BTreeMap<String, CardBinding>,
    pub groups: Vec<GroupSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: num_cpus::get() * 4,
            community: "public".to_string(),
            uplink_pattern: "^(up|UP)".to_string(),
            suppressed_vlans: Vec::new(),
            allowed_vlans: Vec::new(),
            transliteration_schema: None,
            supply_zone: None,
            cards_dir: PathBuf::from("dev_cards"),
            subnets: Vec::new(),
            hosts: Vec::new(),
            store: StoreSettings::default(),
            snmp: SnmpSettings::default(),
            wanted: default_wanted(),
            overrides: BTreeMap::new(),
            groups: Vec::new(),
        }
    }
}

/// One target group; every `Option` left unset falls back to the global value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    pub name: String,
    pub subnets: Vec<String>,
    pub hosts: Vec<String>,
    pub threads: Option<usize>,
    pub community: Option<String>,
    pub uplink_pattern: Option<String>,
    pub suppressed_vlans: Option<Vec<String>>,
    pub allowed_vlans: Option<Vec<String>>,
    pub transliteration_schema: Option<String>,
    pub supply_zone: Option<String>,
    pub snmp: Option<SnmpSettings>,
    pub wanted: Option<BTreeMap<String, ExtractionKind>>,
    pub overrides: Option<BTreeMap<String, CardBinding>>,
}

impl GroupSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_subnets(mut self, subnets: Vec<String>) -> Self {
        self.subnets = subnets;
        self
    }

    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community = Some(community.into());
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// Fully resolved settings for one group; what workers read
#[derive(Debug, Clone)]
pub struct SettingsView {
    pub name: String,
    pub threads: usize,
    pub community: String,
    pub uplink_pattern: Regex,
    pub suppressed_vlans: HashSet<String>,
    pub allowed_vlans: Option<HashSet<String>>,
    pub transliteration_schema: Option<String>,
    pub supply_zone: Option<String>,
    pub snmp: SnmpSettings,
    pub wanted: BTreeMap<String, ExtractionKind>,
    pub overrides: HashMap<IpAddr, CardBinding>,
    pub targets: Vec<IpAddr>,
}

impl SettingsView {
    /// Static card binding for an address, if any
    pub fn binding_for(&self, address: &IpAddr) -> Option<&CardBinding> {
        self.overrides.get(address)
    }

    /// Whether a VLAN id survives the suppressed and allowed sets
    pub fn keeps_vlan(&self, vlan: &str) -> bool {
        !self.suppressed_vlans.contains(vlan)
            && self
                .allowed_vlans
                .as_ref()
                .map_or(true, |allowed| allowed.contains(vlan))
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(format!("failed to parse TOML: {}", e)))
    }

    /// Load `./argus.toml`, or `~/.argus.toml` when that is missing
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            log::info!("Loading settings from {}", local.display());
            return Self::from_toml_file(&local);
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let home_config = home.join(HOME_CONFIG_FILE_NAME);
        if home_config.exists() {
            log::info!("Loading settings from {}", home_config.display());
            return Self::from_toml_file(&home_config);
        }

        Err(ConfigError::NotFound(local))
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("thread count must be greater than 0".to_string()));
        }
        if self.store.tree.is_empty() {
            return Err(ConfigError::Invalid("store tree name cannot be empty".to_string()));
        }
        if self.subnets.is_empty() && self.hosts.is_empty() && self.groups.is_empty() {
            return Err(ConfigError::Invalid("no subnets, hosts or groups to poll".to_string()));
        }

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(ConfigError::Invalid("every group needs a name".to_string()));
            }
            if group.name == DEFAULT_GROUP || !names.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate group name '{}'", group.name)));
            }
        }

        for view in self.views()? {
            if view.threads == 0 {
                return Err(ConfigError::Invalid(format!(
                    "group '{}': thread count must be greater than 0",
                    view.name
                )));
            }
            if view.community.is_empty() {
                return Err(ConfigError::Invalid(format!("group '{}': empty community", view.name)));
            }
            if view.snmp.timeout_ms == 0 || view.snmp.max_repetitions == 0 || view.snmp.max_calls == 0 {
                return Err(ConfigError::Invalid(format!(
                    "group '{}': SNMP timeout, max_repetitions and max_calls must be positive",
                    view.name
                )));
            }
        }
        Ok(())
    }

    /// Resolved views: the implicit default group (global subnets and hosts,
    /// when there are any) followed by every configured group
    pub fn views(&self) -> Result<Vec<SettingsView>, ConfigError> {
        let mut views = Vec::with_capacity(self.groups.len() + 1);
        if !self.subnets.is_empty() || !self.hosts.is_empty() {
            let default_group = GroupSettings::new(DEFAULT_GROUP)
                .with_subnets(self.subnets.clone())
                .with_hosts(self.hosts.clone());
            views.push(resolve(&default_group, self)?);
        }
        for group in &self.groups {
            views.push(resolve(group, self)?);
        }
        Ok(views)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community = community.into();
        self
    }
}

/// Fold one group over the global settings; group values win key by key
pub fn resolve(group: &GroupSettings, global: &Settings) -> Result<SettingsView, ConfigError> {
    let uplink_source = group.uplink_pattern.as_ref().unwrap_or(&global.uplink_pattern);
    let uplink_pattern = Regex::new(uplink_source).map_err(|e| ConfigError::InvalidPattern {
        pattern: uplink_source.clone(),
        reason: e.to_string(),
    })?;

    let allowed = group.allowed_vlans.as_ref().unwrap_or(&global.allowed_vlans);
    let allowed_vlans = if allowed.is_empty() {
        None
    } else {
        Some(allowed.iter().cloned().collect())
    };

    let overrides = group
        .overrides
        .as_ref()
        .unwrap_or(&global.overrides)
        .iter()
        .map(|(address, binding)| {
            address
                .parse::<IpAddr>()
                .map(|ip| (ip, binding.clone()))
                .map_err(|e| ConfigError::Invalid(format!("override address '{}': {}", address, e)))
        })
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(SettingsView {
        name: group.name.clone(),
        threads: group.threads.unwrap_or(global.threads),
        community: group.community.clone().unwrap_or_else(|| global.community.clone()),
        uplink_pattern,
        suppressed_vlans: group
            .suppressed_vlans
            .as_ref()
            .unwrap_or(&global.suppressed_vlans)
            .iter()
            .cloned()
            .collect(),
        allowed_vlans,
        transliteration_schema: group
            .transliteration_schema
            .clone()
            .or_else(|| global.transliteration_schema.clone()),
        supply_zone: group.supply_zone.clone().or_else(|| global.supply_zone.clone()),
        snmp: group.snmp.clone().unwrap_or_else(|| global.snmp.clone()),
        wanted: group.wanted.clone().unwrap_or_else(|| global.wanted.clone()),
        overrides,
        targets: expand_targets(&group.subnets, &group.hosts)?,
    })
}

/// Host addresses of every subnet (network and broadcast excluded) followed
/// by the standalone hosts, without duplicates
pub fn expand_targets(subnets: &[String], hosts: &[String]) -> Result<Vec<IpAddr>, ConfigError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for subnet in subnets {
        for address in subnet_hosts(subnet)? {
            if seen.insert(address) {
                targets.push(address);
            }
        }
    }

    for host in hosts {
        let address = host
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::Invalid(format!("host '{}': {}", host, e)))?;
        if seen.insert(address) {
            targets.push(address);
        }
    }

    Ok(targets)
}

fn subnet_hosts(subnet: &str) -> Result<Vec<IpAddr>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSubnet {
        subnet: subnet.to_string(),
        reason,
    };

    let network: IpNetwork = subnet.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if network.ip() != network.network() {
        return Err(invalid("host bits set".to_string()));
    }

    match network {
        IpNetwork::V4(net) => {
            let size = 1u128 << (32 - net.prefix() as u32);
            if size > MAX_SUBNET_HOSTS {
                return Err(invalid(format!("more than {} addresses", MAX_SUBNET_HOSTS)));
            }
            if net.prefix() >= 31 {
                return Ok(net.iter().map(IpAddr::V4).collect());
            }
            let (first, last) = (net.network(), net.broadcast());
            Ok(net
                .iter()
                .filter(|ip| *ip != first && *ip != last)
                .map(IpAddr::V4)
                .collect())
        }
        IpNetwork::V6(net) => {
            let size = 1u128.checked_shl(128 - net.prefix() as u32).unwrap_or(u128::MAX);
            if size > MAX_SUBNET_HOSTS {
                return Err(invalid(format!("more than {} addresses", MAX_SUBNET_HOSTS)));
            }
            if net.prefix() >= 127 {
                return Ok(net.iter().map(IpAddr::V6).collect());
            }
            let anycast = net.network();
            Ok(net.iter().filter(|ip| *ip != anycast).map(IpAddr::V6).collect())
        }
    }
}

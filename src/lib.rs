//! Argus - SNMP discovery and inventory for network devices
//!
//! A pool of worker threads polls every configured address over SNMPv2c,
//! matches the answer against a catalog of device cards, fetches the
//! attributes the card describes and commits the result to a record store.

pub mod catalog;
pub mod config;
pub mod device;
pub mod dns;
pub mod error;
pub mod fetch;
pub mod scanner;
pub mod snmp;
pub mod store;

// Re-export commonly used types
pub use catalog::{CardBinding, CardCatalog, DeviceCard};
pub use config::{Settings, SettingsView};
pub use device::{Device, Uplink};
pub use dns::{DomainChecker, NameResolver, SystemResolver};
pub use error::{CatalogError, ConfigError, DiscoveryError, SnmpError, StoreError};
pub use scanner::{RunReport, RunState, ScanCoordinator, Transliterator};
pub use store::{RecordStore, StoreSession};

pub type Result<T> = std::result::Result<T, DiscoveryError>;

//! Symbolic MIB names used by the discovery engine
//!
//! Only the objects the engine actually queries are known here; cards refer
//! to vendor objects by numeric OID.

use crate::snmp::oid::Oid;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// One known MIB object
#[derive(Debug, Clone)]
pub struct MibObject {
    pub module: &'static str,
    pub name: &'static str,
    pub oid: &'static [u32],
}

const OBJECTS: &[MibObject] = &[
    // SNMPv2-MIB system group
    MibObject { module: "SNMPv2-MIB", name: "sysDescr", oid: &[1, 3, 6, 1, 2, 1, 1, 1] },
    MibObject { module: "SNMPv2-MIB", name: "sysObjectID", oid: &[1, 3, 6, 1, 2, 1, 1, 2] },
    MibObject { module: "SNMPv2-MIB", name: "sysUpTime", oid: &[1, 3, 6, 1, 2, 1, 1, 3] },
    MibObject { module: "SNMPv2-MIB", name: "sysContact", oid: &[1, 3, 6, 1, 2, 1, 1, 4] },
    MibObject { module: "SNMPv2-MIB", name: "sysName", oid: &[1, 3, 6, 1, 2, 1, 1, 5] },
    MibObject { module: "SNMPv2-MIB", name: "sysLocation", oid: &[1, 3, 6, 1, 2, 1, 1, 6] },
    // IF-MIB interfaces
    MibObject { module: "IF-MIB", name: "ifIndex", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1] },
    MibObject { module: "IF-MIB", name: "ifDescr", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2] },
    MibObject { module: "IF-MIB", name: "ifSpeed", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 5] },
    MibObject { module: "IF-MIB", name: "ifAdminStatus", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7] },
    MibObject { module: "IF-MIB", name: "ifOperStatus", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8] },
    MibObject { module: "IF-MIB", name: "ifName", oid: &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1] },
    MibObject { module: "IF-MIB", name: "ifHighSpeed", oid: &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 15] },
    MibObject { module: "IF-MIB", name: "ifAlias", oid: &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18] },
    // Q-BRIDGE-MIB VLANs
    MibObject { module: "Q-BRIDGE-MIB", name: "dot1qVlanStaticName", oid: &[1, 3, 6, 1, 2, 1, 17, 7, 1, 4, 3, 1, 1] },
    MibObject { module: "Q-BRIDGE-MIB", name: "dot1qVlanFdbId", oid: &[1, 3, 6, 1, 2, 1, 17, 7, 1, 4, 2, 1, 3] },
];

/// Lookup table keyed by `(module, name)`, plus a name-only index
static BY_NAME: Lazy<HashMap<(&'static str, &'static str), &'static MibObject>> = Lazy::new(|| {
    OBJECTS.iter().map(|obj| ((obj.module, obj.name), obj)).collect()
});

static BY_BARE_NAME: Lazy<HashMap<&'static str, &'static MibObject>> = Lazy::new(|| {
    OBJECTS.iter().map(|obj| (obj.name, obj)).collect()
});

/// Resolve `module::name` to its numeric OID
pub fn resolve(module: &str, name: &str) -> Option<Oid> {
    BY_NAME
        .get(&(module, name))
        .map(|obj| Oid::from(obj.oid))
}

/// Resolve a bare object name regardless of module
pub fn resolve_name(name: &str) -> Option<Oid> {
    BY_BARE_NAME.get(name).map(|obj| Oid::from(obj.oid))
}

/// Well-known locators
pub mod well_known {
    pub const SNMPV2_MIB: &str = "SNMPv2-MIB";
    pub const IF_MIB: &str = "IF-MIB";
    pub const SYS_DESCR: &str = "sysDescr";
    pub const SYS_CONTACT: &str = "sysContact";
    pub const SYS_LOCATION: &str = "sysLocation";
    pub const IF_ALIAS: &str = "ifAlias";
    pub const IF_HIGH_SPEED: &str = "ifHighSpeed";
}

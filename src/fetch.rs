//! Attribute extraction for identified devices
//!
//! Each wanted attribute is fetched on its own: a failed or missing one is
//! logged and left unset without affecting the others. Nothing here commits.

use crate::catalog::DeviceCard;
use crate::config::{ExtractionKind, SettingsView};
use crate::device::{Device, Uplink};
use crate::snmp::mib::well_known::{IF_ALIAS, IF_HIGH_SPEED, IF_MIB};
use crate::snmp::{Locator, Oid, Outcome, SnmpSession, Value};

/// Populate `device` with every wanted attribute the card knows how to fetch
pub fn fetch(session: &mut SnmpSession<'_>, device: &mut Device, card: &DeviceCard, settings: &SettingsView) {
    for (name, kind) in &settings.wanted {
        match kind {
            ExtractionKind::Equal => fetch_equal(session, device, card, name),
            ExtractionKind::UplinkList => fetch_uplinks(session, device, name, settings),
            ExtractionKind::VlanList => fetch_vlans(session, device, card, name, settings),
        }
    }
}

fn fetch_equal(session: &mut SnmpSession<'_>, device: &mut Device, card: &DeviceCard, name: &str) {
    let Some(locator) = card.locator_for(name) else {
        log::warn!("{}: card {} has no locator for '{}'", device.address, card.name(), name);
        return;
    };

    match session.get(locator) {
        Outcome::Value(value) => {
            if let Some(text) = value.as_text() {
                log::debug!("{}: {} = {}", device.address, name, text);
                device.set_text(name, text);
            }
        }
        Outcome::Empty => log::debug!("{}: no value for {} ({})", device.address, name, locator),
        Outcome::Failed(e) => log::warn!("{}: cannot fetch {}: {}", device.address, name, e),
    }
}

fn fetch_uplinks(session: &mut SnmpSession<'_>, device: &mut Device, name: &str, settings: &SettingsView) {
    let aliases = walk_rows(session, &Locator::symbolic(IF_MIB, IF_ALIAS), settings);

    let mut uplinks = Vec::new();
    for (oid, value) in aliases {
        let Some(alias) = value.as_text() else { continue };
        if !matches_at_start(settings, &alias) {
            continue;
        }
        let Some(index) = oid.last_arc() else { continue };

        let speed_locator = Locator::symbolic(IF_MIB, IF_HIGH_SPEED).with_index(&[index]);
        let speed_mbps = match session.get(&speed_locator) {
            Outcome::Value(speed) => speed.as_u64(),
            Outcome::Empty => None,
            Outcome::Failed(e) => {
                log::warn!("{}: cannot fetch speed of '{}': {}", device.address, alias, e);
                None
            }
        };
        uplinks.push(Uplink::new(alias, speed_mbps));
    }

    log::debug!("{}: {} uplinks", device.address, uplinks.len());
    device.set_uplinks(name, uplinks);
}

fn fetch_vlans(
    session: &mut SnmpSession<'_>,
    device: &mut Device,
    card: &DeviceCard,
    name: &str,
    settings: &SettingsView,
) {
    let Some(locator) = card.locator_for(name).or(card.vlan_tree.as_ref()) else {
        log::warn!("{}: card {} has no VLAN table", device.address, card.name());
        return;
    };

    let vlans: Vec<String> = walk_rows(session, locator, settings)
        .into_iter()
        .filter_map(|(oid, value)| vlan_id(&oid, &value, card.vlan_index_in_locator))
        .filter(|vlan| settings.keeps_vlan(vlan))
        .collect();

    log::debug!("{}: {} VLANs", device.address, vlans.len());
    device.set_list(name, vlans);
}

fn vlan_id(oid: &Oid, value: &Value, index_in_locator: bool) -> Option<String> {
    if index_in_locator {
        oid.last_arc().map(|arc| arc.to_string())
    } else {
        value.as_text()
    }
}

/// Uplink aliases must match at their first character
fn matches_at_start(settings: &SettingsView, alias: &str) -> bool {
    settings
        .uplink_pattern
        .find(alias)
        .map_or(false, |m| m.start() == 0)
}

/// Collect a table, paging with GETBULK unless one row per request is asked
fn walk_rows(session: &mut SnmpSession<'_>, locator: &Locator, settings: &SettingsView) -> Vec<(Oid, Value)> {
    if settings.snmp.max_repetitions > 1 {
        let mut bulk = session.get_bulk(locator, settings.snmp.max_repetitions);
        let rows: Vec<_> = bulk.by_ref().collect();
        if let Some(e) = bulk.error() {
            log::warn!("Bulk walk of {} ended early: {}", locator, e);
        }
        rows
    } else {
        let mut walk = session.walk(locator);
        let rows: Vec<_> = walk.by_ref().collect();
        if let Some(e) = walk.error() {
            log::warn!("Walk of {} ended early: {}", locator, e);
        }
        rows
    }
}

//! Simulated SNMP agents shared by the integration tests

#![allow(dead_code)]

use argus::catalog::{CardCatalog, DeviceCard};
use argus::config::{resolve, ExtractionKind, GroupSettings, Settings, SettingsView};
use argus::error::{ErrorStatus, SnmpError, SnmpResult};
use argus::snmp::{Oid, PduType, Request, Response, Transport, Value, VarBind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const SYS_CONTACT: &str = "1.3.6.1.2.1.1.4.0";
pub const SYS_LOCATION: &str = "1.3.6.1.2.1.1.6.0";
pub const IF_HIGH_SPEED: &str = "1.3.6.1.2.1.31.1.1.1.15";
pub const IF_ALIAS: &str = "1.3.6.1.2.1.31.1.1.1.18";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn text(s: &str) -> Value {
    Value::OctetString(s.as_bytes().to_vec())
}

/// How an agent answers a request for one particular OID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// No reply at all
    Timeout,
    /// Reply carrying `genErr`
    GenErr,
}

/// Every agent of a test network, keyed by address. Addresses without an
/// agent never answer.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    agents: Arc<RwLock<HashMap<IpAddr, BTreeMap<Oid, Value>>>>,
    faults: Arc<RwLock<HashMap<(IpAddr, Oid), Fault>>>,
    requests: Arc<AtomicUsize>,
    bulk_requests: Arc<AtomicUsize>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&self, address: &str, rows: &[(&str, Value)]) {
        let mib = rows
            .iter()
            .map(|(oid, value)| (oid.parse().unwrap(), value.clone()))
            .collect();
        self.agents.write().insert(ip(address), mib);
    }

    /// Requests naming `oid` first on `address` fail with `fault`
    pub fn inject(&self, address: &str, oid: &str, fault: Fault) {
        self.faults.write().insert((ip(address), oid.parse().unwrap()), fault);
    }

    pub fn silence(&self, address: &str) {
        self.agents.write().remove(&ip(address));
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn bulk_requests(&self) -> usize {
        self.bulk_requests.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

fn next_of(mib: &BTreeMap<Oid, Value>, oid: &Oid) -> VarBind {
    mib.range(oid.clone()..)
        .find(|(k, _)| *k > oid)
        .map(|(k, v)| VarBind::new(k.clone(), v.clone()))
        .unwrap_or_else(|| VarBind::new(oid.clone(), Value::EndOfMibView))
}

impl Transport for SimulatedNetwork {
    fn exchange(&mut self, target: IpAddr, community: &str, request: &Request) -> SnmpResult<Response> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if request.pdu_type == PduType::GetBulk {
            self.bulk_requests.fetch_add(1, Ordering::SeqCst);
        }
        let agents = self.agents.read();
        let mib = match agents.get(&target) {
            Some(mib) if community == "public" => mib,
            _ => {
                return Err(SnmpError::Timeout {
                    target,
                    attempts: 1,
                    timeout: Duration::from_millis(10),
                })
            }
        };

        let Some(oid) = request.oids.first() else {
            return Ok(Response::error(ErrorStatus::GenErr, 0));
        };
        match self.faults.read().get(&(target, oid.clone())) {
            Some(Fault::Timeout) => {
                return Err(SnmpError::Timeout {
                    target,
                    attempts: 1,
                    timeout: Duration::from_millis(10),
                })
            }
            Some(Fault::GenErr) => return Ok(Response::error(ErrorStatus::GenErr, 1)),
            None => {}
        }
        let varbinds = match request.pdu_type {
            PduType::Get => vec![VarBind::new(
                oid.clone(),
                mib.get(oid).cloned().unwrap_or(Value::NoSuchInstance),
            )],
            PduType::GetNext => vec![next_of(mib, oid)],
            PduType::GetBulk => {
                let mut out = Vec::new();
                let mut cursor = oid.clone();
                for _ in 0..request.max_repetitions {
                    let varbind = next_of(mib, &cursor);
                    cursor = varbind.oid.clone();
                    let end = varbind.value == Value::EndOfMibView;
                    out.push(varbind);
                    if end {
                        break;
                    }
                }
                out
            }
            PduType::Response => return Ok(Response::error(ErrorStatus::GenErr, 0)),
        };
        Ok(Response::ok(varbinds))
    }
}

/// A switch answering the identity request, a model, a VLAN table with VLAN 1
/// and a duplicate, and two interface aliases of which one is an uplink
pub fn switch_rows(descr: &str) -> Vec<(&'static str, Value)> {
    vec![
        (SYS_DESCR, text(descr)),
        (SYS_CONTACT, text("noc@example.net")),
        (SYS_LOCATION, text("Rack 4, Building A")),
        ("1.1", text("SW-24")),
        ("2.2.1", text("1")),
        ("2.2.2", text("10")),
        ("2.2.3", text("20")),
        ("2.2.4", text("10")),
        ("1.3.6.1.2.1.31.1.1.1.15.1", Value::Gauge32(10_000)),
        ("1.3.6.1.2.1.31.1.1.1.15.2", Value::Gauge32(1_000)),
        ("1.3.6.1.2.1.31.1.1.1.18.1", text("UPLINK to core")),
        ("1.3.6.1.2.1.31.1.1.1.18.2", text("user port")),
    ]
}

/// Replace the value of one row
pub fn with_row(mut rows: Vec<(&'static str, Value)>, oid: &'static str, value: Value) -> Vec<(&'static str, Value)> {
    rows.retain(|(existing, _)| *existing != oid);
    rows.push((oid, value));
    rows
}

pub fn switch_card() -> DeviceCard {
    DeviceCard::from_json(
        "acme/switchos.json",
        r#"{"info_pattern": "SwitchOS v1", "model_oid": "1.1", "vlan_tree": "2.2",
            "vendor": "acme", "series": "switchos"}"#,
    )
    .unwrap()
}

pub fn catalog() -> CardCatalog {
    CardCatalog::from_cards(vec![switch_card()]).unwrap()
}

/// Global settings: VLAN 1 suppressed, VLAN lists wanted
pub fn global_settings() -> Settings {
    let mut global = Settings::default();
    global.suppressed_vlans = vec!["1".to_string()];
    global
        .wanted
        .insert("vlans".to_string(), ExtractionKind::VlanList);
    global
}

pub fn group(hosts: &[&str], threads: usize) -> SettingsView {
    let group = GroupSettings::new("test")
        .with_hosts(hosts.iter().map(|h| h.to_string()).collect())
        .with_threads(threads);
    resolve(&group, &global_settings()).unwrap()
}

pub fn group_with(global: &Settings, hosts: &[&str], threads: usize) -> SettingsView {
    let group = GroupSettings::new("test")
        .with_hosts(hosts.iter().map(|h| h.to_string()).collect())
        .with_threads(threads);
    resolve(&group, global).unwrap()
}

/// Make every write of `address` into the store file fail
pub fn reject_writes_of(store_path: &Path, address: &str) {
    let conn = rusqlite::Connection::open(store_path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TRIGGER reject_write BEFORE INSERT ON records WHEN NEW.key = '{}'
         BEGIN SELECT RAISE(ABORT, 'write rejected'); END;",
        address
    ))
    .unwrap();
}

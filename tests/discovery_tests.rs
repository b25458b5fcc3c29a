//! End-to-end discovery runs against simulated agents

mod common;

use argus::catalog::{CardBinding, CardCatalog, DeviceCard};
use argus::config::{resolve, GroupSettings, SettingsView};
use argus::device::{Uplink, UNRECOGNIZED_MODEL};
use argus::scanner::{RunState, ScanCoordinator, Transliterator};
use argus::store::RecordStore;
use argus::Device;
use common::*;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const TREE: &str = "devicedb";

fn open_store(tmp: &TempDir) -> RecordStore {
    RecordStore::open(tmp.path().join("devices.db"), TREE).unwrap()
}

fn coordinator(tmp: &TempDir, catalog: CardCatalog, network: &SimulatedNetwork) -> ScanCoordinator {
    let network = network.clone();
    ScanCoordinator::new(open_store(tmp), catalog)
        .with_transport_factory(move |_settings: &SettingsView| network.transport())
}

fn stored(tmp: &TempDir) -> Vec<Device> {
    open_store(tmp).records().unwrap()
}

#[test]
fn test_identified_switch_is_stored_with_filtered_vlans() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.5", &switch_rows("SwitchOS v1.2"));

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.5"], 4)])
        .unwrap();
    assert_eq!(report.responding_hosts, 1);
    assert_eq!(report.new_hosts, 1);

    let records = stored(&tmp);
    assert_eq!(records.len(), 1);
    let device = &records[0];
    assert_eq!(device.address, ip("10.0.0.5"));
    assert_eq!(device.model.as_deref(), Some("SW-24"));
    assert_eq!(device.vendor.as_deref(), Some("acme"));
    assert_eq!(device.series.as_deref(), Some("switchos"));
    assert_eq!(device.location.as_deref(), Some("Rack 4, Building A"));
    assert_eq!(device.contact.as_deref(), Some("noc@example.net"));
    assert!(device.is_recognized());

    // VLAN 1 is suppressed; the duplicate 10 is kept as reported
    assert_eq!(device.vlans, vec!["10", "20", "10"]);
    assert!(!device.vlans.contains(&"1".to_string()));

    assert_eq!(device.uplinks, vec![Uplink::new("UPLINK to core", Some(10_000))]);
    assert!(device.firmware.is_none());
}

#[test]
fn test_silent_host_is_counted_out_and_not_stored() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.1", &switch_rows("SwitchOS v1.2"));
    network.add_agent("10.0.0.2", &switch_rows("SwitchOS v1.4"));

    let coordinator = coordinator(&tmp, catalog(), &network);
    let report = coordinator
        .run(vec![group(&["10.0.0.1", "10.0.0.2", "10.0.0.3"], 2)])
        .unwrap();

    assert_eq!(report.targets, 3);
    assert_eq!(report.workers, 2);
    assert_eq!(report.responding_hosts, 2);
    assert_eq!(report.new_hosts, 2);
    assert_eq!(coordinator.state(), RunState::Closed);
    assert!(coordinator.store().is_closed());

    let addresses: Vec<_> = stored(&tmp).iter().map(|d| d.address).collect();
    assert_eq!(addresses, vec![ip("10.0.0.1"), ip("10.0.0.2")]);
}

#[test]
fn test_second_run_keeps_first_seen() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.5", &switch_rows("SwitchOS v1.2"));

    coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.5"], 1)])
        .unwrap();
    let first = stored(&tmp).remove(0);

    thread::sleep(Duration::from_millis(20));
    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.5"], 1)])
        .unwrap();
    let second = stored(&tmp).remove(0);

    assert_eq!(report.responding_hosts, 1);
    assert_eq!(report.new_hosts, 0);
    assert_eq!(second.first_seen, first.first_seen);
    assert!(second.last_seen > first.last_seen);
}

#[test]
fn test_host_gone_silent_keeps_its_record() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.5", &switch_rows("SwitchOS v1.2"));

    coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.5"], 1)])
        .unwrap();
    let before = stored(&tmp);

    network.silence("10.0.0.5");
    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.5"], 1)])
        .unwrap();

    assert_eq!(report.responding_hosts, 0);
    assert_eq!(stored(&tmp), before);
}

#[test]
fn test_unrecognized_device_is_marked() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.9", &switch_rows("Mystery Router 3000"));

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.9"], 1)])
        .unwrap();
    assert_eq!(report.responding_hosts, 1);

    let device = stored(&tmp).remove(0);
    assert_eq!(device.model.as_deref(), Some(UNRECOGNIZED_MODEL));
    assert!(!device.is_recognized());
    assert!(device.vlans.is_empty());
    assert!(device.uplinks.is_empty());
}

#[test]
fn test_binding_override_selects_card() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.7", &switch_rows("Custom firmware build 7"));

    let router = DeviceCard::from_json(
        "other/router.json",
        r#"{"info_pattern": "RouterOS", "model_oid": "1.1", "vendor": "other", "series": "router"}"#,
    )
    .unwrap();
    let catalog = CardCatalog::from_cards(vec![router, switch_card()]).unwrap();

    let mut global = global_settings();
    global.overrides.insert(
        "10.0.0.7".to_string(),
        CardBinding {
            vendor: "acme".to_string(),
            series: "switchos".to_string(),
        },
    );
    let view = resolve(&GroupSettings::new("bound").with_hosts(vec!["10.0.0.7".to_string()]), &global).unwrap();

    coordinator(&tmp, catalog, &network).run(vec![view]).unwrap();

    let device = stored(&tmp).remove(0);
    assert_eq!(device.vendor.as_deref(), Some("acme"));
    assert_eq!(device.model.as_deref(), Some("SW-24"));
    assert_eq!(device.vlans, vec!["10", "20", "10"]);
}

#[test]
fn test_groups_are_polled_in_turn() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.1", &switch_rows("SwitchOS v1.2"));
    network.add_agent("10.1.0.1", &switch_rows("SwitchOS v1.3"));

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.1"], 2), group(&["10.1.0.1", "10.1.0.2"], 2)])
        .unwrap();

    assert_eq!(report.targets, 3);
    assert_eq!(report.responding_hosts, 2);
    assert_eq!(report.workers, 2);
    assert_eq!(stored(&tmp).len(), 2);
}

#[test]
fn test_zero_targets_finishes_cleanly() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();

    let coordinator = coordinator(&tmp, catalog(), &network);
    let report = coordinator.run(vec![group(&[], 8)]).unwrap();

    assert_eq!(report.targets, 0);
    assert_eq!(report.workers, 0);
    assert_eq!(report.responding_hosts, 0);
    assert_eq!(coordinator.state(), RunState::Closed);
    assert_eq!(network.requests(), 0);
}

#[test]
fn test_workers_never_exceed_targets() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    for i in 1..=3 {
        network.add_agent(&format!("10.0.0.{}", i), &switch_rows("SwitchOS v1.2"));
    }

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.1", "10.0.0.2", "10.0.0.3"], 16)])
        .unwrap();

    assert_eq!(report.workers, 3);
    assert_eq!(report.responding_hosts, 3);
}

#[test]
fn test_many_hosts_across_workers() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    let hosts: Vec<String> = (1..=40).map(|i| format!("10.2.0.{}", i)).collect();
    for host in hosts.iter().filter(|h| !h.ends_with('7')) {
        network.add_agent(host, &switch_rows("SwitchOS v1.2"));
    }
    let host_refs: Vec<&str> = hosts.iter().map(String::as_str).collect();

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&host_refs, 6)])
        .unwrap();

    // 10.2.0.7, .17, .27 and .37 stay silent
    assert_eq!(report.responding_hosts, 36);
    assert_eq!(report.new_hosts, 36);
    assert_eq!(stored(&tmp).len(), 36);
}

#[test]
fn test_failed_attribute_leaves_siblings_intact() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.1", &switch_rows("SwitchOS v1.2"));
    network.add_agent("10.0.0.2", &switch_rows("SwitchOS v1.2"));
    // 10.0.0.1: model GET times out; 10.0.0.2: VLAN walk answers genErr
    network.inject("10.0.0.1", "1.1", Fault::Timeout);
    network.inject("10.0.0.2", "2.2", Fault::GenErr);

    let report = coordinator(&tmp, catalog(), &network)
        .run(vec![group(&["10.0.0.1", "10.0.0.2"], 2)])
        .unwrap();
    assert_eq!(report.responding_hosts, 2);

    let records = stored(&tmp);
    let (first, second) = (&records[0], &records[1]);
    assert!(first.model.is_none());
    assert_eq!(first.vlans, vec!["10", "20", "10"]);
    assert_eq!(first.uplinks.len(), 1);

    assert_eq!(second.model.as_deref(), Some("SW-24"));
    assert!(second.vlans.is_empty());
    assert_eq!(second.uplinks.len(), 1);
}

#[test]
fn test_getnext_walks_when_bulk_disabled() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.5", &switch_rows("SwitchOS v1.2"));

    let mut global = global_settings();
    global.snmp.max_repetitions = 1;
    let view = group_with(&global, &["10.0.0.5"], 1);

    coordinator(&tmp, catalog(), &network).run(vec![view]).unwrap();

    let device = stored(&tmp).remove(0);
    assert_eq!(device.vlans, vec!["10", "20", "10"]);
    assert_eq!(device.uplinks, vec![Uplink::new("UPLINK to core", Some(10_000))]);
    assert_eq!(network.bulk_requests(), 0);
}

#[test]
fn test_store_failure_is_contained_to_one_device() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    reject_writes_of(store.path(), "10.0.0.2");

    let network = SimulatedNetwork::new();
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        network.add_agent(host, &switch_rows("SwitchOS v1.2"));
    }

    let report = ScanCoordinator::new(store, catalog())
        .with_transport_factory({
            let network = network.clone();
            move |_settings: &SettingsView| network.transport()
        })
        .run(vec![group(&["10.0.0.1", "10.0.0.2", "10.0.0.3"], 1)])
        .unwrap();

    assert_eq!(report.responding_hosts, 3);
    assert_eq!(report.new_hosts, 2);
    let addresses: Vec<_> = stored(&tmp).iter().map(|d| d.address).collect();
    assert_eq!(addresses, vec![ip("10.0.0.1"), ip("10.0.0.3")]);
}

/// Latin rendering that falls over on one particular location
struct FragileTransliterator;

impl Transliterator for FragileTransliterator {
    fn transliterate(&self, text: &str, _schema: &str) -> Option<String> {
        if text.contains("Building B") {
            panic!("unsupported characters in {}", text);
        }
        Some(text.to_uppercase())
    }
}

#[test]
fn test_pipeline_panic_is_contained() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.1", &switch_rows("SwitchOS v1.2"));
    network.add_agent(
        "10.0.0.2",
        &with_row(switch_rows("SwitchOS v1.2"), SYS_LOCATION, text("Building B")),
    );
    network.add_agent("10.0.0.3", &switch_rows("SwitchOS v1.2"));

    let mut global = global_settings();
    global.transliteration_schema = Some("latin".to_string());
    let view = group_with(&global, &["10.0.0.1", "10.0.0.2", "10.0.0.3"], 1);

    let coordinator = coordinator(&tmp, catalog(), &network).with_transliterator(Arc::new(FragileTransliterator));
    let report = coordinator.run(vec![view]).unwrap();

    assert_eq!(report.responding_hosts, 3);
    assert_eq!(report.new_hosts, 2);
    assert_eq!(coordinator.state(), RunState::Closed);

    let records = stored(&tmp);
    let addresses: Vec<_> = records.iter().map(|d| d.address).collect();
    assert_eq!(addresses, vec![ip("10.0.0.1"), ip("10.0.0.3")]);
    assert_eq!(records[0].location_latin.as_deref(), Some("RACK 4, BUILDING A"));
}

#[test]
fn test_zero_threads_still_polls() {
    let tmp = TempDir::new().unwrap();
    let network = SimulatedNetwork::new();
    network.add_agent("10.0.0.5", &switch_rows("SwitchOS v1.2"));
    let coordinator = coordinator(&tmp, catalog(), &network);

    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        let _ = done.send(coordinator.run(vec![group(&["10.0.0.5"], 0)]));
    });

    let report = finished.recv_timeout(Duration::from_secs(30)).unwrap().unwrap();
    assert_eq!(report.workers, 1);
    assert_eq!(report.responding_hosts, 1);
    assert_eq!(stored(&tmp).len(), 1);
}


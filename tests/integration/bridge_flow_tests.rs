//! End-to-end bridge flows: simulated add, BLE pairing through a scan,
//! link loss and recovery, removal, and restore after a reboot.
//!
//! The bridge is driven exactly as the main loop drives it: one
//! [`WorkItem`] at a time through `process`.

use super::mock_hw::{
    address, lbs_characteristics, CollectingSink, MockFabric, MockRadio, MockStorage, MockTimers, RadioCall,
    BUTTON_CCC, BUTTON_HANDLE, LED_HANDLE,
};
use blebridge::app::commands::BridgeCommand;
use blebridge::app::events::BridgeEvent;
use blebridge::app::service::Bridge;
use blebridge::config::BridgeConfig;
use blebridge::connectivity::{
    BleStatus, CharacteristicList, ConnHandle, DisconnectReason, DiscoveredCharacteristic, RadioEvent, ServiceId,
    ESS_HUMIDITY_UUID, ESS_TEMPERATURE_UUID, MAX_NOTIFICATION_LEN,
};
use blebridge::devices::clusters::{
    ATTR_NODE_LABEL, ATTR_ON_OFF, ATTR_REACHABLE, BRIDGED_DEVICE_BASIC_INFORMATION, ON_OFF,
};
use blebridge::devices::DeviceType;
use blebridge::error::BridgeError;
use blebridge::events::{self, TimerId, WorkItem, WorkQueue};
use blebridge::providers::encode_ble_user_data;
use blebridge::registry::RegistryState;

type TestBridge = Bridge<MockStorage, MockRadio, MockTimers, MockFabric>;

fn bridge_on(storage: MockStorage) -> (TestBridge, CollectingSink) {
    let mut bridge = Bridge::new(
        BridgeConfig::default(),
        storage,
        MockRadio::new(),
        MockTimers::default(),
        MockFabric::new(),
    );
    let mut sink = CollectingSink::new();
    bridge.init(&mut sink).unwrap();
    (bridge, sink)
}

fn bridge() -> (TestBridge, CollectingSink) {
    bridge_on(MockStorage::new())
}

fn command(bridge: &mut TestBridge, sink: &mut CollectingSink, line: &str) {
    let cmd = BridgeCommand::parse(line).unwrap();
    bridge.process(WorkItem::Command(cmd), sink);
}

fn radio(bridge: &mut TestBridge, sink: &mut CollectingSink, event: RadioEvent) {
    bridge.process(WorkItem::Radio(event), sink);
}

fn timer(bridge: &mut TestBridge, sink: &mut CollectingSink, id: TimerId) {
    bridge.process(WorkItem::Timer(id), sink);
}

fn advertise(bridge: &mut TestBridge, sink: &mut CollectingSink, n: u8, service: ServiceId) {
    radio(
        bridge,
        sink,
        RadioEvent::Advertisement {
            address: address(n),
            rssi: -48,
            service: Some(service),
        },
    );
}

/// Scan, see one LED Button accessory, pair it and finish discovery.
fn pair_light(bridge: &mut TestBridge, sink: &mut CollectingSink, n: u8, conn: u16) -> u8 {
    command(bridge, sink, "scan");
    advertise(bridge, sink, n, ServiceId::LedButton);
    timer(bridge, sink, TimerId::ScanWindow);
    command(bridge, sink, "add 0x0100 0 Porch light");
    radio(
        bridge,
        sink,
        RadioEvent::Connected {
            address: address(n),
            conn: ConnHandle(conn),
        },
    );
    radio(
        bridge,
        sink,
        RadioEvent::DiscoveryCompleted {
            conn: ConnHandle(conn),
            result: Ok(lbs_characteristics()),
        },
    );
    let index = bridge
        .registry()
        .find_provider_by_address(&address(n))
        .and_then(|id| bridge.registry().indexes_of_provider(id).first().copied());
    index.expect("paired light is registered")
}

fn added(events: &[BridgeEvent]) -> Vec<(u8, u16, DeviceType)> {
    events
        .iter()
        .filter_map(|e| match e {
            BridgeEvent::DeviceAdded {
                index,
                endpoint_id,
                device_type,
            } => Some((*index, *endpoint_id, *device_type)),
            _ => None,
        })
        .collect()
}

fn notification(handle: u16, byte: u8, conn: u16) -> RadioEvent {
    let mut data: heapless::Vec<u8, MAX_NOTIFICATION_LEN> = heapless::Vec::new();
    data.push(byte).unwrap();
    RadioEvent::Notification {
        conn: ConnHandle(conn),
        handle,
        data,
    }
}

// ── Simulated devices ─────────────────────────────────────────

#[test]
fn simulated_light_is_added_and_persisted() {
    let (mut bridge, mut sink) = bridge();
    assert_eq!(sink.take(), vec![BridgeEvent::Initialized { restored: 0 }]);

    command(&mut bridge, &mut sink, "add 0x0100 Desk lamp");
    assert_eq!(added(&sink.take()), vec![(0, 2, DeviceType::OnOffLight)]);

    let record = bridge.storage().load_record(0).unwrap();
    assert_eq!(record.endpoint_id, 2);
    assert_eq!(record.device_type, 0x0100);
    assert_eq!(record.node_label.as_str(), "Desk lamp");
    assert_eq!(record.unique_id.len(), 32);
    assert!(record.user_data.is_empty());
    assert_eq!(bridge.storage().load_index_list().unwrap().as_slice(), &[0]);
    assert_eq!(bridge.storage().load_count(), Ok(1));
    assert_eq!(bridge.fabric().table.index_of(2), Some(0));
}

#[test]
fn simulated_writes_are_applied_locally() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 256");
    bridge.handle_write(0, ON_OFF, ATTR_ON_OFF, &[1], &mut sink).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(bridge.handle_read(0, ON_OFF, ATTR_ON_OFF, &mut buf), Ok(1));
    assert_eq!(buf[0], 1);
    assert!(bridge.radio().calls.is_empty(), "no radio traffic for simulated nodes");
}

#[test]
fn node_label_write_is_persisted() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0302 Attic");
    bridge
        .handle_write(0, BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_NODE_LABEL, b"\x06Cellar", &mut sink)
        .unwrap();
    assert_eq!(bridge.storage().load_record(0).unwrap().node_label.as_str(), "Cellar");
}

#[test]
fn persistence_failure_keeps_the_device_and_reports() {
    let (mut bridge, mut sink) = bridge();
    sink.take();
    bridge.storage_mut().port_mut().fail_writes = true;
    command(&mut bridge, &mut sink, "add 0x0100");
    let events = sink.take();
    assert!(events.contains(&BridgeEvent::PersistenceFailed {
        index: Some(0),
        error: BridgeError::Internal
    }));
    assert!(events.contains(&BridgeEvent::PersistenceFailed {
        index: None,
        error: BridgeError::Internal
    }));
    assert_eq!(added(&events).len(), 1);
    assert_eq!(bridge.registry().device_count(), 1);
}

#[test]
fn commands_through_the_work_queue_run_in_order() {
    let (mut bridge, mut sink) = bridge();
    let queue = WorkQueue::new();
    for line in ["add 0x0100 One", "add 0x0100 Two", "remove 2"] {
        assert!(events::post(&queue, WorkItem::Command(BridgeCommand::parse(line).unwrap())));
    }
    assert_eq!(bridge.drain(&queue, &mut sink), 3);
    assert_eq!(bridge.registry().indexes(), &[1]);
    assert_eq!(bridge.registry().node(1).unwrap().info().endpoint_id, 3);
}

// ── Pairing ───────────────────────────────────────────────────

#[test]
fn scan_results_are_listed_for_the_cli() {
    let (mut bridge, mut sink) = bridge();
    sink.take();
    command(&mut bridge, &mut sink, "scan");
    assert_eq!(bridge.status(), BleStatus::Scanning);
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    advertise(&mut bridge, &mut sink, 2, ServiceId::EnvironmentalSensing);
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);

    let events = sink.take();
    assert_eq!(events.first(), Some(&BridgeEvent::StatusChanged(BleStatus::Scanning)));
    let results = events
        .iter()
        .find_map(|e| match e {
            BridgeEvent::ScanCompleted { results } => Some(results.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].address, address(1));
    assert_eq!(results[1].service, ServiceId::EnvironmentalSensing);
    assert_eq!(bridge.radio().calls.first(), Some(&RadioCall::StartScan));
}

#[test]
fn ble_light_is_paired_after_discovery() {
    let (mut bridge, mut sink) = bridge();
    sink.take();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);

    let events = sink.take();
    assert!(events.contains(&BridgeEvent::PairingStarted { address: address(1) }));
    assert_eq!(added(&events), vec![(index, 2, DeviceType::OnOffLight)]);
    assert_eq!(bridge.status(), BleStatus::Connected);
    assert!(bridge.radio().subscribed(BUTTON_CCC));

    let record = bridge.storage().load_record(index).unwrap();
    assert_eq!(record.node_label.as_str(), "Porch light");
    assert_eq!(
        record.user_data,
        encode_ble_user_data(ServiceId::LedButton, address(1))
    );
}

#[test]
fn environmental_sensor_pairs_as_two_nodes_on_one_provider() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "scan");
    advertise(&mut bridge, &mut sink, 5, ServiceId::EnvironmentalSensing);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);
    command(&mut bridge, &mut sink, "add 0x0302 0 Garden");
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Connected {
            address: address(5),
            conn: ConnHandle(3),
        },
    );
    let mut characteristics = CharacteristicList::new();
    for (uuid, handle) in [(ESS_TEMPERATURE_UUID, 0x20), (ESS_HUMIDITY_UUID, 0x24)] {
        characteristics
            .push(DiscoveredCharacteristic {
                uuid,
                value_handle: handle,
                ccc_handle: Some(handle + 1),
            })
            .unwrap();
    }
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::DiscoveryCompleted {
            conn: ConnHandle(3),
            result: Ok(characteristics),
        },
    );

    let types: Vec<_> = added(&sink.take()).into_iter().map(|(_, _, t)| t).collect();
    assert_eq!(types, vec![DeviceType::TemperatureSensor, DeviceType::HumiditySensor]);
    let id = bridge.registry().find_provider_by_address(&address(5)).unwrap();
    assert_eq!(bridge.registry().indexes_of_provider(id).len(), 2);
    assert_eq!(bridge.registry().provider_count(), 1);
}

#[test]
fn pairing_requires_the_matching_service() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "scan");
    advertise(&mut bridge, &mut sink, 1, ServiceId::EnvironmentalSensing);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);

    let cmd = BridgeCommand::parse("add 0x0100 0").unwrap();
    assert_eq!(bridge.execute(cmd, &mut sink), Err(BridgeError::InvalidArgument));
    let cmd = BridgeCommand::parse("add 0x0100 4").unwrap();
    assert_eq!(bridge.execute(cmd, &mut sink), Err(BridgeError::NotFound));
    assert_eq!(bridge.radio().connects(), 0);
}

#[test]
fn pairing_an_already_bridged_device_is_conflict() {
    let (mut bridge, mut sink) = bridge();
    pair_light(&mut bridge, &mut sink, 1, 1);
    command(&mut bridge, &mut sink, "scan");
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);
    let cmd = BridgeCommand::parse("add 0x0100 0").unwrap();
    assert_eq!(bridge.execute(cmd, &mut sink), Err(BridgeError::Conflict));
}

#[test]
fn failed_first_connection_reports_and_forgets_the_device() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "scan");
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);
    command(&mut bridge, &mut sink, "add 0x0100 0");
    sink.take();

    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::ConnectFailed {
            address: address(1),
            status: 0x3E,
        },
    );
    assert!(sink.take().contains(&BridgeEvent::PairingFailed {
        address: address(1),
        error: BridgeError::Internal
    }));
    assert!(!bridge.connectivity().is_tracked(&address(1)));
    assert_eq!(bridge.registry().device_count(), 0);
    assert_eq!(bridge.status(), BleStatus::NoDevices);
}

#[test]
fn missing_characteristics_fail_the_pairing() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "scan");
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);
    command(&mut bridge, &mut sink, "add 0x0100 0");
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Connected {
            address: address(1),
            conn: ConnHandle(1),
        },
    );
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::DiscoveryCompleted {
            conn: ConnHandle(1),
            result: Ok(CharacteristicList::new()),
        },
    );
    assert!(sink.take().iter().any(|e| matches!(
        e,
        BridgeEvent::PairingFailed {
            error: BridgeError::NotFound,
            ..
        }
    )));
    assert_eq!(bridge.registry().device_count(), 0);
    assert!(bridge.radio().calls.contains(&RadioCall::Disconnect(ConnHandle(1))));
}

// ── Accessory traffic ─────────────────────────────────────────

#[test]
fn fabric_write_drives_the_led() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    bridge.handle_write(index, ON_OFF, ATTR_ON_OFF, &[1], &mut sink).unwrap();
    assert_eq!(bridge.radio().writes(), vec![(LED_HANDLE, vec![1])]);
}

#[test]
fn button_press_toggles_the_light_and_the_led() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    radio(&mut bridge, &mut sink, notification(BUTTON_HANDLE, 1, 1));

    let mut buf = [0u8; 1];
    bridge.handle_read(index, ON_OFF, ATTR_ON_OFF, &mut buf).unwrap();
    assert_eq!(buf[0], 1);
    assert_eq!(bridge.radio().writes(), vec![(LED_HANDLE, vec![1])]);
    assert_eq!(bridge.fabric().reports.last(), Some(&(2, ON_OFF, ATTR_ON_OFF)));

    // Release is not a press.
    radio(&mut bridge, &mut sink, notification(BUTTON_HANDLE, 0, 1));
    assert_eq!(bridge.radio().writes().len(), 1);
}

// ── Loss and recovery ─────────────────────────────────────────

#[test]
fn lost_light_is_unreachable_until_recovered() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    sink.take();

    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Disconnected {
            conn: ConnHandle(1),
            reason: DisconnectReason::SupervisionTimeout,
        },
    );
    assert!(sink.take().contains(&BridgeEvent::StatusChanged(BleStatus::LostConnection)));
    let mut buf = [0u8; 4];
    assert_eq!(
        bridge.handle_read(index, ON_OFF, ATTR_ON_OFF, &mut buf),
        Err(BridgeError::IncorrectState)
    );
    assert_eq!(
        bridge.handle_read(index, BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_REACHABLE, &mut buf),
        Ok(1)
    );
    assert_eq!(buf[0], 0);
    assert_eq!(bridge.timers().recovery, Some(10_000));

    timer(&mut bridge, &mut sink, TimerId::Recovery);
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);
    assert_eq!(bridge.radio().connects(), 2);
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Connected {
            address: address(1),
            conn: ConnHandle(7),
        },
    );
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::DiscoveryCompleted {
            conn: ConnHandle(7),
            result: Ok(lbs_characteristics()),
        },
    );

    assert_eq!(bridge.status(), BleStatus::Connected);
    assert_eq!(bridge.handle_read(index, ON_OFF, ATTR_ON_OFF, &mut buf), Ok(1));
    assert!(sink.take().contains(&BridgeEvent::StatusChanged(BleStatus::Connected)));
    assert_eq!(bridge.registry().device_count(), 1, "recovery never re-adds nodes");
}

#[test]
fn failed_reconnect_is_queued_again_with_back_off() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Disconnected {
            conn: ConnHandle(1),
            reason: DisconnectReason::RemoteUser,
        },
    );
    timer(&mut bridge, &mut sink, TimerId::Recovery);
    advertise(&mut bridge, &mut sink, 1, ServiceId::LedButton);
    bridge.radio_mut().fail_connect = true;
    timer(&mut bridge, &mut sink, TimerId::ScanWindow);

    assert_eq!(bridge.radio().connects(), 2);
    assert_eq!(bridge.connectivity().recovery_pending(), 1);
    assert_eq!(bridge.timers().recovery, Some(20_000));
    assert_eq!(bridge.status(), BleStatus::LostConnection);
    assert!(!bridge.registry().node(index).unwrap().info().reachable);
}

#[test]
fn lost_light_can_still_be_renamed() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    radio(
        &mut bridge,
        &mut sink,
        RadioEvent::Disconnected {
            conn: ConnHandle(1),
            reason: DisconnectReason::SupervisionTimeout,
        },
    );
    bridge
        .handle_write(index, BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_NODE_LABEL, b"\x04Yard", &mut sink)
        .unwrap();
    assert_eq!(bridge.storage().load_record(index).unwrap().node_label.as_str(), "Yard");
    assert_eq!(
        bridge.handle_write(index, ON_OFF, ATTR_ON_OFF, &[1], &mut sink),
        Err(BridgeError::IncorrectState)
    );
    assert!(bridge.radio().writes().is_empty());
}

// ── Removal ───────────────────────────────────────────────────

#[test]
fn removing_a_ble_light_closes_the_link_and_forgets_it() {
    let (mut bridge, mut sink) = bridge();
    let index = pair_light(&mut bridge, &mut sink, 1, 1);
    sink.take();

    command(&mut bridge, &mut sink, "remove 2");
    assert!(sink.take().contains(&BridgeEvent::DeviceRemoved { index, endpoint_id: 2 }));
    assert!(bridge.radio().calls.contains(&RadioCall::Disconnect(ConnHandle(1))));
    assert!(!bridge.connectivity().is_tracked(&address(1)));
    assert_eq!(bridge.registry().provider_count(), 0);
    assert_eq!(bridge.storage().load_record(index), Err(BridgeError::NotFound));
    assert!(bridge.storage().load_index_list().unwrap().is_empty());
    assert_eq!(bridge.storage().load_count(), Ok(0));
}

#[test]
fn removing_unknown_endpoint_changes_nothing() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0100");
    let cmd = BridgeCommand::parse("remove 0x99").unwrap();
    assert_eq!(bridge.execute(cmd, &mut sink), Err(BridgeError::NotFound));
    assert_eq!(bridge.registry().device_count(), 1);
}

// ── Restore ───────────────────────────────────────────────────

#[test]
fn pairings_survive_a_reboot() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0100 Desk");
    command(&mut bridge, &mut sink, "remove 2");
    command(&mut bridge, &mut sink, "add 0x0302 Attic");
    let light = pair_light(&mut bridge, &mut sink, 1, 1);
    let before: Vec<_> = bridge
        .registry()
        .indexes()
        .iter()
        .map(|&i| {
            let info = bridge.registry().node(i).unwrap().info();
            (i, info.endpoint_id, info.unique_id.clone(), info.node_label.clone())
        })
        .collect();
    let flash = bridge.storage().port().clone();
    drop(bridge);

    let (rebooted, mut sink) = bridge_on(flash);
    assert_eq!(sink.take().first(), Some(&BridgeEvent::Initialized { restored: 2 }));
    let after: Vec<_> = rebooted
        .registry()
        .indexes()
        .iter()
        .map(|&i| {
            let info = rebooted.registry().node(i).unwrap().info();
            (i, info.endpoint_id, info.unique_id.clone(), info.node_label.clone())
        })
        .collect();
    assert_eq!(after, before);

    // Only the BLE-backed node waits for its accessory.
    assert!(!rebooted.registry().node(light).unwrap().info().reachable);
    assert!(rebooted.registry().node(0).unwrap().info().reachable);
    assert_eq!(rebooted.connectivity().recovery_pending(), 1);
    assert!(rebooted.timers().recovery.is_some());
    assert_eq!(rebooted.status(), BleStatus::LostConnection);
    assert_eq!(rebooted.registry().next_endpoint_id(), 5);
}

#[test]
fn new_devices_after_restore_get_fresh_endpoints() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0100");
    command(&mut bridge, &mut sink, "add 0x0100");
    let flash = bridge.storage().port().clone();

    let (mut rebooted, mut sink) = bridge_on(flash);
    sink.take();
    command(&mut rebooted, &mut sink, "add 0x0307");
    assert_eq!(added(&sink.take()), vec![(2, 4, DeviceType::HumiditySensor)]);
}

#[test]
fn failed_migration_leaves_the_bridge_failed() {
    let mut flash = MockStorage::new();
    flash.put("bridge", "br/ver", &[9]);
    let mut bridge: TestBridge = Bridge::new(
        BridgeConfig::default(),
        flash,
        MockRadio::new(),
        MockTimers::default(),
        MockFabric::new(),
    );
    let mut sink = CollectingSink::new();
    assert_eq!(bridge.init(&mut sink), Err(BridgeError::Unsupported));
    assert_eq!(bridge.registry().state(), RegistryState::Failed);
    assert!(bridge.fabric().placeholder_disabled);
    assert_eq!(bridge.init(&mut sink), Err(BridgeError::AlreadyInitialized));
    assert_eq!(
        bridge.execute(BridgeCommand::Scan, &mut sink),
        Err(BridgeError::IncorrectState)
    );
    assert!(sink.events.is_empty());
}

#[test]
fn colliding_restored_indexes_fail_bring_up() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0100");
    let mut flash = bridge.storage().port().clone();
    flash.put("bridge", "br/idx", &[0, 0]);

    let mut rebooted = Bridge::new(
        BridgeConfig::default(),
        flash,
        MockRadio::new(),
        MockTimers::default(),
        MockFabric::new(),
    );
    let mut sink = CollectingSink::new();
    assert!(rebooted.init(&mut sink).is_err());
    assert_eq!(rebooted.registry().state(), RegistryState::Failed);
    assert!(sink.events.is_empty());
}

#[test]
fn unknown_device_type_fails_bring_up() {
    let (mut bridge, mut sink) = bridge();
    command(&mut bridge, &mut sink, "add 0x0100");
    let mut flash = bridge.storage().port().clone();
    let mut record = bridge.storage().load_record(0).unwrap();
    record.device_type = 0x0ABC;
    flash.put("bridge", "br/dev/0", &record.encode());

    let mut rebooted = Bridge::new(
        BridgeConfig::default(),
        flash,
        MockRadio::new(),
        MockTimers::default(),
        MockFabric::new(),
    );
    assert_eq!(
        rebooted.init(&mut CollectingSink::new()),
        Err(BridgeError::InvalidArgument)
    );
}

#[test]
fn commands_before_init_are_refused() {
    let mut bridge: TestBridge = Bridge::new(
        BridgeConfig::default(),
        MockStorage::new(),
        MockRadio::new(),
        MockTimers::default(),
        MockFabric::new(),
    );
    let mut sink = CollectingSink::new();
    assert_eq!(
        bridge.execute(BridgeCommand::Scan, &mut sink),
        Err(BridgeError::IncorrectState)
    );
    bridge.init(&mut sink).unwrap();
    assert_eq!(bridge.init(&mut sink), Err(BridgeError::AlreadyInitialized));
}

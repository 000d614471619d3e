//! Connectivity & recovery tests: pairing links, loss, back-off and
//! reconnection, driven through radio events and timer expiries.

use super::mock_hw::{address, MockRadio, MockTimers, RadioCall};
use blebridge::config::{BridgeConfig, MAX_CONNECTED_DEVICES};
use blebridge::connectivity::{
    BleConnectivityManager, BleStatus, CharacteristicList, ConnHandle, DisconnectReason, LinkState, Notice,
    RadioEvent, ServiceId, MAX_NOTIFICATION_LEN,
};
use blebridge::error::BridgeError;
use blebridge::events::TimerId;

struct Rig {
    m: BleConnectivityManager,
    radio: MockRadio,
    timers: MockTimers,
}

impl Rig {
    fn new() -> Self {
        Self {
            m: BleConnectivityManager::new(&BridgeConfig::default()),
            radio: MockRadio::new(),
            timers: MockTimers::default(),
        }
    }

    fn event(&mut self, e: RadioEvent) -> Option<Notice> {
        self.m.on_radio_event(e, &mut self.radio, &mut self.timers)
    }

    fn fire(&mut self, id: TimerId) -> Option<Notice> {
        self.m.on_timer(id, &mut self.radio, &mut self.timers)
    }

    fn advertise(&mut self, n: u8) {
        self.event(RadioEvent::Advertisement {
            address: address(n),
            rssi: -55,
            service: Some(ServiceId::LedButton),
        });
    }

    /// Scan, see device `n`, track it and bring its first link up.
    fn pair(&mut self, n: u8) {
        self.m.scan(&mut self.radio, &mut self.timers).unwrap();
        self.advertise(n);
        assert_eq!(self.fire(TimerId::ScanWindow), Some(Notice::ScanCompleted));
        self.m.add_provider(address(n), ServiceId::LedButton).unwrap();
        self.m
            .connect(address(n), None, &mut self.radio, &mut self.timers)
            .unwrap();
        assert_eq!(self.m.status(), BleStatus::Pairing);
        self.event(RadioEvent::Connected {
            address: address(n),
            conn: ConnHandle(u16::from(n)),
        });
        let notice = self.event(RadioEvent::DiscoveryCompleted {
            conn: ConnHandle(u16::from(n)),
            result: Ok(CharacteristicList::new()),
        });
        assert!(matches!(notice, Some(Notice::LinkReady { first_connection: true, .. })));
    }

    fn lose(&mut self, n: u8) {
        let notice = self.event(RadioEvent::Disconnected {
            conn: ConnHandle(u16::from(n)),
            reason: DisconnectReason::SupervisionTimeout,
        });
        assert_eq!(notice, Some(Notice::ConnectionLost { address: address(n) }));
    }
}

#[test]
fn paired_device_reports_connected() {
    let mut rig = Rig::new();
    assert_eq!(rig.m.status(), BleStatus::NoDevices);
    rig.pair(1);
    assert_eq!(rig.m.status(), BleStatus::Connected);
    assert_eq!(rig.m.link_state(&address(1)), Some(LinkState::Connected));
    assert_eq!(rig.m.connection_of(&address(1)), Some(ConnHandle(1)));
    assert!(rig.radio.calls.contains(&RadioCall::Discover(ConnHandle(1), ServiceId::LedButton)));
}

#[test]
fn tracking_the_same_address_twice_is_conflict() {
    let mut rig = Rig::new();
    rig.m.add_provider(address(1), ServiceId::LedButton).unwrap();
    assert_eq!(
        rig.m.add_provider(address(1), ServiceId::LedButton),
        Err(BridgeError::Conflict)
    );
    assert_eq!(rig.m.status(), BleStatus::Idle);
}

#[test]
fn connection_table_is_bounded() {
    let mut rig = Rig::new();
    for n in 0..MAX_CONNECTED_DEVICES as u8 {
        rig.m.add_provider(address(n), ServiceId::LedButton).unwrap();
    }
    assert_eq!(
        rig.m.add_provider(address(200), ServiceId::LedButton),
        Err(BridgeError::ResourceExhausted)
    );
}

#[test]
fn failed_first_connection_is_reported_not_retried() {
    let mut rig = Rig::new();
    rig.m.scan(&mut rig.radio, &mut rig.timers).unwrap();
    rig.advertise(1);
    rig.fire(TimerId::ScanWindow);
    rig.m.add_provider(address(1), ServiceId::LedButton).unwrap();
    rig.m.connect(address(1), None, &mut rig.radio, &mut rig.timers).unwrap();

    let notice = rig.event(RadioEvent::ConnectFailed {
        address: address(1),
        status: 0x3E,
    });
    assert_eq!(
        notice,
        Some(Notice::FirstConnectionFailed {
            address: address(1),
            error: BridgeError::Internal
        })
    );
    assert_eq!(rig.m.recovery_pending(), 0);
    assert!(rig.timers.recovery.is_none());
}

#[test]
fn lost_device_is_recovered_when_seen_again() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    assert_eq!(rig.m.status(), BleStatus::LostConnection);
    assert_eq!(rig.m.recovery_pending(), 1);
    assert_eq!(rig.timers.recovery, Some(10_000));

    // Recovery interval elapses: a recovery scan starts.
    assert_eq!(rig.fire(TimerId::Recovery), None);
    assert_eq!(rig.timers.scan_window, Some(5_000));
    assert!(!rig.m.is_scanning(), "recovery scans are not user scans");
    rig.advertise(1);
    assert_eq!(rig.fire(TimerId::ScanWindow), None);
    assert_eq!(rig.m.link_state(&address(1)), Some(LinkState::Reconnecting));
    assert_eq!(rig.m.recovery_pending(), 0);

    rig.event(RadioEvent::Connected {
        address: address(1),
        conn: ConnHandle(9),
    });
    let notice = rig.event(RadioEvent::DiscoveryCompleted {
        conn: ConnHandle(9),
        result: Ok(CharacteristicList::new()),
    });
    assert!(matches!(
        notice,
        Some(Notice::LinkReady { first_connection: false, .. })
    ));
    assert_eq!(rig.m.status(), BleStatus::Connected);
}

#[test]
fn absent_device_backs_off_up_to_the_ceiling() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(rig.m.recovery_interval_ms());
        rig.fire(TimerId::Recovery);
        rig.fire(TimerId::ScanWindow);
    }
    assert_eq!(seen, vec![10_000, 20_000, 40_000, 60_000, 60_000]);
    assert_eq!(rig.timers.recovery, Some(60_000));
    assert_eq!(rig.m.recovery_pending(), 1);
}

#[test]
fn successful_recovery_resets_the_interval() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.fire(TimerId::Recovery);
    rig.fire(TimerId::ScanWindow);
    assert_eq!(rig.m.recovery_interval_ms(), 20_000);

    rig.fire(TimerId::Recovery);
    rig.advertise(1);
    rig.fire(TimerId::ScanWindow);
    rig.event(RadioEvent::Connected {
        address: address(1),
        conn: ConnHandle(4),
    });
    rig.event(RadioEvent::DiscoveryCompleted {
        conn: ConnHandle(4),
        result: Ok(CharacteristicList::new()),
    });
    assert_eq!(rig.m.recovery_interval_ms(), 10_000);
}

#[test]
fn failed_reconnect_leaves_the_queue_and_is_reported() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.fire(TimerId::Recovery);
    rig.advertise(1);
    rig.fire(TimerId::ScanWindow);
    assert_eq!(rig.m.recovery_pending(), 0);

    let notice = rig.event(RadioEvent::ConnectFailed {
        address: address(1),
        status: 2,
    });
    assert_eq!(
        notice,
        Some(Notice::RecoveryFailed {
            address: address(1),
            error: BridgeError::Internal
        })
    );
    assert_eq!(rig.m.link_state(&address(1)), Some(LinkState::Lost));
    assert_eq!(rig.m.recovery_pending(), 0, "the owner decides on a retry");
    assert_eq!(rig.m.recovery_interval_ms(), 20_000);

    // Queued again, the next attempt waits out the longer interval.
    rig.m.queue_recovery(address(1), &mut rig.timers).unwrap();
    assert_eq!(rig.m.recovery_pending(), 1);
    assert_eq!(rig.timers.recovery, Some(20_000));
}

#[test]
fn refused_reconnect_is_dequeued_after_one_attempt() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.fire(TimerId::Recovery);
    rig.advertise(1);
    rig.radio.fail_connect = true;

    let notice = rig.fire(TimerId::ScanWindow);
    assert!(matches!(
        notice,
        Some(Notice::RecoveryFailed { address: a, .. }) if a == address(1)
    ));
    assert_eq!(rig.m.recovery_pending(), 0);
    assert_eq!(rig.radio.connects(), 2, "pairing connect plus one reconnect");
    assert_eq!(rig.m.link_state(&address(1)), Some(LinkState::Lost));
    assert_eq!(rig.m.recovery_interval_ms(), 20_000);
}

#[test]
fn other_lost_devices_stay_queued_after_a_failed_reconnect() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.pair(2);
    rig.lose(1);
    rig.lose(2);
    rig.fire(TimerId::Recovery);
    rig.advertise(1);
    rig.radio.fail_connect = true;
    rig.fire(TimerId::ScanWindow);

    assert_eq!(rig.m.recovery_pending(), 1);
    assert_eq!(rig.timers.recovery, Some(20_000));
}

#[test]
fn user_scan_defers_recovery() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.m.scan(&mut rig.radio, &mut rig.timers).unwrap();
    let scans_before = rig.radio.calls.iter().filter(|c| **c == RadioCall::StartScan).count();

    rig.fire(TimerId::Recovery);
    let scans_after = rig.radio.calls.iter().filter(|c| **c == RadioCall::StartScan).count();
    assert_eq!(scans_before, scans_after, "no recovery scan during a user scan");
    assert!(rig.timers.recovery.is_some(), "rescheduled");
    assert_eq!(rig.m.status(), BleStatus::Scanning);
}

#[test]
fn recovery_advertisements_do_not_leak_into_scan_results() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.fire(TimerId::Recovery);
    rig.advertise(7);
    rig.fire(TimerId::ScanWindow);
    assert_eq!(rig.m.scan_results().len(), 1);
    assert_eq!(rig.m.scan_results()[0].address, address(1));
}

#[test]
fn removing_a_lost_device_cancels_its_recovery() {
    let mut rig = Rig::new();
    rig.pair(1);
    rig.lose(1);
    rig.m
        .remove_provider(address(1), &mut rig.radio, &mut rig.timers)
        .unwrap();
    assert_eq!(rig.m.recovery_pending(), 0);
    assert!(rig.timers.recovery.is_none());
    assert!(!rig.m.is_tracked(&address(1)));
    assert_eq!(rig.m.status(), BleStatus::NoDevices);
}

#[test]
fn restored_device_waits_in_recovery_queue() {
    let mut rig = Rig::new();
    rig.m.add_provider(address(3), ServiceId::LedButton).unwrap();
    rig.m.queue_recovery(address(3), &mut rig.timers).unwrap();
    assert_eq!(rig.m.link_state(&address(3)), Some(LinkState::Lost));
    assert_eq!(rig.m.status(), BleStatus::LostConnection);
    assert_eq!(
        rig.m.queue_recovery(address(4), &mut rig.timers),
        Err(BridgeError::NotFound)
    );
}

#[test]
fn notifications_flow_only_from_connected_links() {
    let mut rig = Rig::new();
    rig.pair(1);
    let mut data: heapless::Vec<u8, MAX_NOTIFICATION_LEN> = heapless::Vec::new();
    data.push(1).unwrap();
    let notice = rig.event(RadioEvent::Notification {
        conn: ConnHandle(1),
        handle: 0x12,
        data: data.clone(),
    });
    assert_eq!(
        notice,
        Some(Notice::Notification {
            address: address(1),
            handle: 0x12,
            data: data.clone()
        })
    );
    rig.lose(1);
    assert_eq!(
        rig.event(RadioEvent::Notification {
            conn: ConnHandle(1),
            handle: 0x12,
            data
        }),
        None
    );
}

//! Scan coordinator integration tests
//!
//! Drives the coordinator through the real channel bridge against scripted
//! mock USB workers, covering the full lifecycle: plain listings, granted and
//! denied permission round-trips, per-device and global timeouts,
//! cancellation with partial results, overlapping-scan rejection, and
//! stale-event safety.
//!
//! Run with: `cargo test -p scanner --test scan_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockUsb, PermissionScript, mock_printer, mock_privileged_printer,
};
use common::{SessionEpoch, UsbCommand, UsbEvent, create_usb_bridge};
use protocol::{CancelStatus, DeviceKey, PrinterDescriptor, ReadError, ScanError};
use scanner::scan::{ScanHandle, ScanTimeouts, spawn_coordinator};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Short ceilings so timeout paths complete quickly
fn fast_timeouts() -> ScanTimeouts {
    ScanTimeouts {
        per_device: Duration::from_millis(200),
        global: Duration::from_secs(5),
    }
}

/// Ceilings that cannot fire during a test
fn generous_timeouts() -> ScanTimeouts {
    ScanTimeouts {
        per_device: Duration::from_secs(30),
        global: Duration::from_secs(60),
    }
}

fn spawn_with_mock(mock: MockUsb, timeouts: ScanTimeouts) -> ScanHandle {
    let (bridge, worker) = create_usb_bridge();
    mock.spawn(worker);
    spawn_coordinator(bridge, timeouts)
}

async fn scan(handle: &ScanHandle, include_serials: bool) -> Result<Vec<PrinterDescriptor>, ScanError> {
    tokio::time::timeout(DEFAULT_TEST_TIMEOUT, handle.start_scan(include_serials))
        .await
        .expect("scan did not resolve within the test timeout")
}

#[tokio::test]
async fn plain_scan_returns_full_snapshot_without_round_trips() {
    // Silent scripts would hang any permission round-trip; the plain path
    // must not be affected by them.
    let snapshot = vec![
        mock_printer(1, "ACME", "Plain"),
        mock_privileged_printer(2, "CITIZEN", "CL-S521"),
    ];
    let mock = MockUsb::new(snapshot).permission(DeviceKey(2), PermissionScript::Silent);
    let handle = spawn_with_mock(mock, generous_timeouts());

    let started = Instant::now();
    let devices = scan(&handle, false).await.unwrap();

    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.serial_number.is_none()));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "plain scan must resolve without waiting on any event"
    );
}

#[tokio::test]
async fn scan_with_no_privileged_targets_completes_directly() {
    let snapshot = vec![
        mock_printer(1, "ACME", "Plain"),
        mock_printer(2, "Zebra", "ZD410"),
    ];
    let handle = spawn_with_mock(MockUsb::new(snapshot), generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.serial_number.is_none()));
}

#[tokio::test]
async fn empty_snapshot_yields_empty_result() {
    let handle = spawn_with_mock(MockUsb::new(vec![]), generous_timeouts());
    let devices = scan(&handle, true).await.unwrap();
    assert!(devices.is_empty());
}

#[tokio::test]
async fn collector_failure_is_a_scan_level_error() {
    let handle = spawn_with_mock(
        MockUsb::failing_collector("libusb init failed"),
        generous_timeouts(),
    );

    let err = scan(&handle, true).await.unwrap_err();
    match err {
        ScanError::Collector(e) => assert!(e.to_string().contains("libusb init failed")),
        other => panic!("expected Collector error, got {:?}", other),
    }
}

// Scenario A: plain deviceX + privileged deviceY, grant, read returns SN123
#[tokio::test]
async fn granted_target_gets_its_serial_number() {
    let snapshot = vec![
        mock_printer(1, "ACME", "Plain"),
        mock_privileged_printer(2, "CITIZEN", "CL-S521"),
    ];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(2), PermissionScript::Grant)
        .serial(DeviceKey(2), "SN123");
    let handle = spawn_with_mock(mock, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_id, DeviceKey(1));
    assert_eq!(devices[0].serial_number, None);
    assert_eq!(devices[1].device_id, DeviceKey(2));
    assert_eq!(devices[1].serial_number.as_deref(), Some("SN123"));
}

// Scenario B: denial downgrades to an absent serial, not a scan failure
#[tokio::test]
async fn denied_target_is_kept_with_absent_serial() {
    let snapshot = vec![
        mock_printer(1, "ACME", "Plain"),
        mock_privileged_printer(2, "CITIZEN", "CL-S521"),
    ];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(2), PermissionScript::Deny)
        .serial(DeviceKey(2), "SN123");
    let handle = spawn_with_mock(mock, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[1].serial_number, None);
}

// Scenario C: a permission decision that never arrives is bounded by the
// per-device ceiling
#[tokio::test]
async fn silent_broker_is_bounded_by_the_per_device_ceiling() {
    let snapshot = vec![
        mock_privileged_printer(1, "CITIZEN", "CL-S521"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
    ];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::Silent)
        .permission(DeviceKey(2), PermissionScript::Grant)
        .serial(DeviceKey(2), "SN-2");
    let handle = spawn_with_mock(mock, fast_timeouts());

    let started = Instant::now();
    let devices = scan(&handle, true).await.unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "the silent target must consume its ceiling"
    );
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].serial_number, None);
    assert_eq!(devices[1].serial_number.as_deref(), Some("SN-2"));
}

#[tokio::test]
async fn failed_serial_read_does_not_abort_the_scan() {
    let snapshot = vec![
        mock_privileged_printer(1, "CITIZEN", "CL-S521"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
    ];
    let mock = MockUsb::new(snapshot)
        .failing_serial(
            DeviceKey(1),
            ReadError::Transport {
                device: DeviceKey(1),
                message: "pipe error".to_string(),
            },
        )
        .serial(DeviceKey(2), "SN-2");
    let handle = spawn_with_mock(mock, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();

    assert_eq!(devices[0].serial_number, None);
    assert_eq!(devices[1].serial_number.as_deref(), Some("SN-2"));
}

#[tokio::test]
async fn already_granted_target_skips_the_round_trip() {
    let snapshot = vec![mock_privileged_printer(1, "CITIZEN", "CL-S521")];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::AlreadyGranted)
        .serial(DeviceKey(1), "SN-PRE");
    let handle = spawn_with_mock(mock, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();
    assert_eq!(devices[0].serial_number.as_deref(), Some("SN-PRE"));
}

// Scenario D: a second scan while one is active is rejected without
// disturbing the active scan
#[tokio::test]
async fn overlapping_scan_is_rejected_with_scan_in_progress() {
    let snapshot = vec![mock_privileged_printer(1, "CITIZEN", "CL-S521")];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::Grant)
        .serial(DeviceKey(1), "SN123")
        .event_delay(Duration::from_millis(300));
    let handle = spawn_with_mock(mock, generous_timeouts());

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start_scan(true).await })
    };

    // Let the first scan reach its permission wait
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = scan(&handle, true).await;
    assert_eq!(second.unwrap_err(), ScanError::ScanInProgress);

    let devices = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(devices[0].serial_number.as_deref(), Some("SN123"));
}

// Scenario E: cancellation delivers partial results to the scan's caller
#[tokio::test]
async fn cancel_delivers_partial_results_once() {
    let snapshot = vec![
        mock_privileged_printer(1, "CITIZEN", "CL-S521"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
        mock_privileged_printer(3, "CITIZEN", "CT-S310"),
    ];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::Grant)
        .serial(DeviceKey(1), "SN-1")
        .permission(DeviceKey(2), PermissionScript::Silent)
        .permission(DeviceKey(3), PermissionScript::Silent);
    let handle = spawn_with_mock(mock, generous_timeouts());

    let scan_task = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start_scan(true).await })
    };

    // First target completes, second hangs; cancel while it waits
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.cancel_scan().await;
    assert_eq!(status, CancelStatus::Cancelled);

    let devices = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, scan_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0].serial_number.as_deref(), Some("SN-1"));
    assert_eq!(devices[1].serial_number, None);
    assert_eq!(devices[2].serial_number, None);

    // The session is gone; a further cancel has nothing to act on
    assert_eq!(handle.cancel_scan().await, CancelStatus::NothingToCancel);
}

#[tokio::test]
async fn cancel_without_active_scan_reports_nothing_to_cancel() {
    let handle = spawn_with_mock(MockUsb::new(vec![]), generous_timeouts());
    assert_eq!(handle.cancel_scan().await, CancelStatus::NothingToCancel);
}

#[tokio::test]
async fn global_ceiling_forces_partial_completion() {
    let snapshot = vec![
        mock_privileged_printer(1, "CITIZEN", "CL-S521"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
    ];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::Silent)
        .permission(DeviceKey(2), PermissionScript::Grant)
        .serial(DeviceKey(2), "SN-2");
    let timeouts = ScanTimeouts {
        per_device: Duration::from_secs(30),
        global: Duration::from_millis(300),
    };
    let handle = spawn_with_mock(mock, timeouts);

    // The first target never resolves, so the global ceiling ends the scan
    // before the second target is even visited.
    let devices = scan(&handle, true).await.unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.serial_number.is_none()));

    // The session was destroyed through the normal finalization path, so a
    // new scan is accepted afterwards.
    let devices = scan(&handle, true).await.unwrap();
    assert_eq!(devices.len(), 2);
}

#[tokio::test]
async fn privileged_targets_are_visited_in_enumeration_order() {
    let snapshot = vec![
        mock_privileged_printer(5, "CITIZEN", "CL-S521"),
        mock_printer(6, "ACME", "Plain"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
        mock_privileged_printer(9, "CITIZEN", "CT-S310"),
    ];

    let visited = Arc::new(Mutex::new(Vec::new()));
    let (bridge, worker) = create_usb_bridge();
    {
        let visited = Arc::clone(&visited);
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            while let Ok(cmd) = worker.next_command().await {
                match cmd {
                    UsbCommand::ListPrinters { response } => {
                        let _ = response.send(Ok(snapshot.clone()));
                    }
                    UsbCommand::HasPermission { response, .. } => {
                        let _ = response.send(false);
                    }
                    UsbCommand::RequestPermission { device, epoch } => {
                        visited.lock().unwrap().push(device);
                        let _ = worker
                            .send_event_async(UsbEvent::PermissionResult {
                                device,
                                granted: true,
                                epoch,
                            })
                            .await;
                    }
                    UsbCommand::ReadSerial { device, response } => {
                        let _ = response.send(Ok(format!("SN-{}", device)));
                    }
                    UsbCommand::Shutdown => break,
                }
            }
        });
    }
    let handle = spawn_coordinator(bridge, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();

    assert_eq!(
        *visited.lock().unwrap(),
        vec![DeviceKey(5), DeviceKey(2), DeviceKey(9)]
    );
    // The result keeps the snapshot order, plain devices included
    let ids: Vec<DeviceKey> = devices.iter().map(|d| d.device_id).collect();
    assert_eq!(ids, vec![DeviceKey(5), DeviceKey(6), DeviceKey(2), DeviceKey(9)]);
}

#[tokio::test]
async fn stale_permission_events_are_ignored() {
    let snapshot = vec![
        mock_privileged_printer(1, "CITIZEN", "CL-S521"),
        mock_privileged_printer(2, "CITIZEN", "CL-E321"),
    ];

    let (bridge, worker) = create_usb_bridge();
    {
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            while let Ok(cmd) = worker.next_command().await {
                match cmd {
                    UsbCommand::ListPrinters { response } => {
                        let _ = response.send(Ok(snapshot.clone()));
                    }
                    UsbCommand::HasPermission { response, .. } => {
                        let _ = response.send(false);
                    }
                    UsbCommand::RequestPermission { device, epoch } => {
                        // Two stale events first: one for a device that is
                        // not the cursor target, one from a wrong epoch. If
                        // either advanced the cursor, the real grant below
                        // would no longer match and the scan would lose a
                        // serial number.
                        let _ = worker
                            .send_event_async(UsbEvent::PermissionResult {
                                device: DeviceKey(999),
                                granted: true,
                                epoch,
                            })
                            .await;
                        let _ = worker
                            .send_event_async(UsbEvent::PermissionResult {
                                device,
                                granted: false,
                                epoch: SessionEpoch(epoch.0 + 50),
                            })
                            .await;
                        let _ = worker
                            .send_event_async(UsbEvent::PermissionResult {
                                device,
                                granted: true,
                                epoch,
                            })
                            .await;
                    }
                    UsbCommand::ReadSerial { device, response } => {
                        let _ = response.send(Ok(format!("SN-{}", device)));
                    }
                    UsbCommand::Shutdown => break,
                }
            }
        });
    }
    let handle = spawn_coordinator(bridge, generous_timeouts());

    let devices = scan(&handle, true).await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].serial_number.as_deref(), Some("SN-1"));
    assert_eq!(devices[1].serial_number.as_deref(), Some("SN-2"));
}

#[tokio::test]
async fn consecutive_scans_reuse_the_coordinator() {
    let snapshot = vec![mock_privileged_printer(1, "CITIZEN", "CL-S521")];
    let mock = MockUsb::new(snapshot)
        .permission(DeviceKey(1), PermissionScript::Grant)
        .serial(DeviceKey(1), "SN123");
    let handle = spawn_with_mock(mock, generous_timeouts());

    for _ in 0..3 {
        let devices = scan(&handle, true).await.unwrap();
        assert_eq!(devices[0].serial_number.as_deref(), Some("SN123"));
    }
}

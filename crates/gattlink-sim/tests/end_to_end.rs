//! End-to-end tests driving both sessions through the virtual radio

use std::time::Duration;

use gattlink_central::{LinkPhase, ScanRecord};
use gattlink_core::protocol::{CHARACTERISTIC_UUID, DEVICE_NAME};
use gattlink_core::{ConnectionState, MessageDirection, PeerAddress};
use gattlink_sim::{RadioCall, RadioConfig, SimulatedPair};
use tokio::sync::watch;
use tokio::time::timeout;

// ----------------------------------------------------------------------------
// Test Helpers
// ----------------------------------------------------------------------------

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const LONG_MESSAGE: &str = "HELLO WORLD THIS IS A LONGER MESSAGE!";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, predicate: F)
where
    F: FnMut(&T) -> bool,
{
    timeout(TEST_TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("session dropped");
}

/// Poll `condition` until it holds, yielding to the event pumps in between
async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Advertise, scan, connect and wait until both sides consider the link usable
async fn establish(pair: &SimulatedPair) -> PeerAddress {
    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;

    pair.central.start_scan();
    wait_for(&mut pair.central.subscribe_devices(), |d| !d.is_empty()).await;
    let address = pair.central.devices()[0].address.clone();
    pair.central.stop_scan();

    pair.central.connect(&address);
    wait_for(&mut pair.central.subscribe_phase(), |p| *p == LinkPhase::Ready).await;
    eventually(|| pair.peripheral.subscriber_count() == 1).await;
    address
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_full_message_exchange() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();

    let address = establish(&pair).await;
    assert_eq!(address, pair.radio.config().peripheral_address);

    // A connected peripheral stops advertising.
    eventually(|| !pair.peripheral.is_advertising()).await;
    assert!(!pair.radio.is_advertising());
    assert_eq!(
        pair.central.connection_state(),
        ConnectionState::Connected {
            peer_address: address.clone()
        }
    );
    assert_eq!(
        pair.peripheral.connection_state(),
        ConnectionState::Connected {
            peer_address: pair.radio.config().central_address.clone()
        }
    );

    // Requested 512, the peripheral allows up to 517.
    assert_eq!(pair.central.mtu(), 512);
    eventually(|| pair.peripheral.mtu() == 512).await;

    // Central to peripheral
    assert!(pair.central.send_message("hello peripheral"));
    wait_for(&mut pair.peripheral.subscribe_messages(), |m| !m.is_empty()).await;
    let inbound = pair.peripheral.messages();
    assert_eq!(inbound[0].content, "hello peripheral");
    assert_eq!(inbound[0].direction, MessageDirection::Received);
    assert_eq!(
        pair.radio.count(|c| matches!(c, RadioCall::SendResponse(..))),
        2,
        "one response for the CCCD write, one for the message"
    );

    // Peripheral to central
    let mut received = pair.central.subscribe_received();
    let report = pair.peripheral.send_message("hello central");
    assert!(report.is_success());
    assert_eq!(report.chunks, 1);

    let data = timeout(TEST_TIMEOUT, received.recv()).await.unwrap().unwrap();
    assert_eq!(data.characteristic, CHARACTERISTIC_UUID);
    assert_eq!(data.data, b"hello central");

    let log = pair.central.messages();
    assert_eq!(log[0].direction, MessageDirection::Sent);
    assert_eq!(log.last().unwrap().content, "hello central");
}

#[tokio::test]
async fn test_default_mtu_splits_notifications() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default().with_max_mtu(23)).unwrap();
    establish(&pair).await;
    assert_eq!(pair.central.mtu(), 23);
    eventually(|| pair.peripheral.mtu() == 23).await;

    let mut received = pair.central.subscribe_received();
    let report = pair.peripheral.send_message(LONG_MESSAGE);
    assert_eq!(report.chunks, 2);
    assert!(report.is_success());

    // Chunks carry no framing; each arrives as its own notification.
    let first = timeout(TEST_TIMEOUT, received.recv()).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, received.recv()).await.unwrap().unwrap();
    assert_eq!(first.data, b"HELLO WORLD THIS IS ");
    assert_eq!(second.data, b"A LONGER MESSAGE!");

    let contents: Vec<_> = pair
        .central
        .messages()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["HELLO WORLD THIS IS ", "A LONGER MESSAGE!"]);

    // The sender logs the whole text once, however many chunks it took.
    let sent = pair.peripheral.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].direction, MessageDirection::Sent);
    assert_eq!(sent[0].content, LONG_MESSAGE);
    assert_eq!(pair.radio.count(|c| matches!(c, RadioCall::Notify(..))), 2);
}

#[tokio::test]
async fn test_central_disconnect_clears_both_sides() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    establish(&pair).await;

    pair.central.disconnect();
    wait_for(&mut pair.central.subscribe_connection_state(), |s| {
        *s == ConnectionState::Disconnected
    })
    .await;
    wait_for(&mut pair.peripheral.subscribe_connection_state(), |s| {
        *s == ConnectionState::Disconnected
    })
    .await;

    assert_eq!(pair.central.transport_handle(), None);
    assert_eq!(pair.central.phase(), LinkPhase::Idle);
    assert_eq!(pair.central.mtu(), 23);
    eventually(|| pair.peripheral.subscriber_count() == 0).await;
    eventually(|| pair.peripheral.mtu() == 23).await;
    assert!(!pair.radio.is_linked());

    let report = pair.peripheral.send_message("anyone?");
    assert!(report.had_no_subscribers());
    assert_eq!(pair.radio.count(|c| matches!(c, RadioCall::Notify(..))), 0);
}

#[tokio::test]
async fn test_connect_then_immediate_disconnect() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;

    let address = pair.radio.config().peripheral_address.clone();
    pair.central.connect(&address);
    pair.central.disconnect();

    wait_for(&mut pair.central.subscribe_connection_state(), |s| {
        *s == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(pair.central.transport_handle(), None);
    eventually(|| !pair.radio.is_linked()).await;
    assert_eq!(pair.radio.count(|c| matches!(c, RadioCall::Close(_))), 1);
}

#[tokio::test]
async fn test_reconnect_after_readvertising() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    let address = establish(&pair).await;

    pair.central.disconnect();
    wait_for(&mut pair.central.subscribe_connection_state(), |s| {
        *s == ConnectionState::Disconnected
    })
    .await;
    eventually(|| pair.peripheral.connection_state() == ConnectionState::Disconnected).await;

    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;
    pair.central.connect(&address);
    wait_for(&mut pair.central.subscribe_phase(), |p| *p == LinkPhase::Ready).await;
    eventually(|| pair.peripheral.subscriber_count() == 1).await;

    // Same server reused across advertising rounds.
    assert_eq!(
        pair.radio.count(|c| matches!(c, RadioCall::OpenServer(_))),
        1
    );
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_lists_named_devices_by_signal() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default().with_peripheral_rssi(-60)).unwrap();
    pair.radio.add_bystander(ScanRecord {
        address: PeerAddress::from("11:11:11:11:11:11"),
        name: Some("Close Tag".to_string()),
        rssi: -30,
        advertisement: Vec::new(),
    });
    pair.radio.add_bystander(ScanRecord {
        address: PeerAddress::from("22:22:22:22:22:22"),
        name: None,
        rssi: -20,
        advertisement: Vec::new(),
    });

    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;
    pair.central.start_scan();
    wait_for(&mut pair.central.subscribe_devices(), |d| d.len() == 2).await;

    let devices = pair.central.devices();
    assert_eq!(devices[0].name, "Close Tag");
    assert_eq!(devices[1].name, DEVICE_NAME);
    assert_eq!(devices[1].rssi, -60);
    assert!(!devices[1].advertisement.is_empty());
    assert!(pair.central.is_scanning());

    pair.central.stop_scan();
    assert!(!pair.radio.is_scanning());
}

#[tokio::test]
async fn test_advertiser_appearing_mid_scan_is_listed() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();

    pair.central.start_scan();
    assert!(pair.central.devices().is_empty());

    pair.peripheral.start_advertising();
    wait_for(&mut pair.central.subscribe_devices(), |d| d.len() == 1).await;
    assert_eq!(pair.central.devices()[0].name, DEVICE_NAME);
}

// ----------------------------------------------------------------------------
// Fault Injection
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_to_silent_peer_fails() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();

    // Peripheral never advertised.
    pair.central
        .connect(&pair.radio.config().peripheral_address.clone());

    wait_for(&mut pair.central.subscribe_connection_state(), |s| s.is_error()).await;
    assert_eq!(
        pair.central.connection_state(),
        ConnectionState::Error {
            message: "Connection error: 133".to_string()
        }
    );
    assert_eq!(pair.central.transport_handle(), None);
    assert_eq!(pair.radio.count(|c| matches!(c, RadioCall::Close(_))), 1);
}

#[tokio::test]
async fn test_injected_connection_status() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    pair.radio.update_faults(|f| f.connect_status = Some(8));
    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;

    pair.central
        .connect(&pair.radio.config().peripheral_address.clone());

    wait_for(&mut pair.central.subscribe_connection_state(), |s| s.is_error()).await;
    assert_eq!(
        pair.central.connection_state(),
        ConnectionState::Error {
            message: "Connection error: 8".to_string()
        }
    );
    // The peripheral never saw a link.
    assert_eq!(pair.peripheral.connection_state(), ConnectionState::Disconnected);
    assert!(pair.peripheral.is_advertising());
}

#[tokio::test]
async fn test_refused_connect() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    pair.radio.update_faults(|f| f.refuse_connect = true);

    pair.central.connect(&PeerAddress::from("AA:BB:CC:DD:EE:FF"));

    assert!(pair.central.connection_state().is_error());
    assert_eq!(pair.central.phase(), LinkPhase::Idle);
    assert_eq!(pair.central.transport_handle(), None);
}

#[tokio::test]
async fn test_refused_notifies_are_reported() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default().with_max_mtu(23)).unwrap();
    establish(&pair).await;
    pair.radio.update_faults(|f| f.fail_notify = true);

    let report = pair.peripheral.send_message(LONG_MESSAGE);

    assert_eq!(report.chunks, 2);
    assert_eq!(report.failed_chunks, 2);
    assert_eq!(report.notifications, 2);
    assert!(!report.is_success());
    assert!(!report.had_no_subscribers());
}

#[tokio::test]
async fn test_scan_failure_surfaces_code() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    pair.radio.update_faults(|f| f.scan_failure = Some(2));

    pair.central.start_scan();

    wait_for(&mut pair.central.subscribe_scanning(), |s| !*s).await;
    wait_for(&mut pair.central.subscribe_connection_state(), |s| s.is_error()).await;
    assert_eq!(
        pair.central.connection_state(),
        ConnectionState::Error {
            message: "Scan failed with error: 2".to_string()
        }
    );
}

#[tokio::test]
async fn test_advertise_failure_leaves_flag_clear() {
    init_tracing();
    let pair = SimulatedPair::new(RadioConfig::default()).unwrap();
    pair.radio.update_faults(|f| f.advertise_failure = Some(1));

    pair.peripheral.start_advertising();
    eventually(|| {
        pair.radio
            .count(|c| matches!(c, RadioCall::StartAdvertising(_)))
            == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!pair.peripheral.is_advertising());
    assert!(!pair.radio.is_advertising());

    // Clearing the fault lets a retry through.
    pair.radio.update_faults(|f| f.advertise_failure = None);
    pair.peripheral.start_advertising();
    wait_for(&mut pair.peripheral.subscribe_advertising(), |a| *a).await;
}

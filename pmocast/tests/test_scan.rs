mod common;

use std::time::Duration;

use common::{WAIT, harness, harness_with, wait};
use pmocast::simulator::ConnectBehaviour;
use pmocast::{
    CastError, CastEvent, Completion, ControllerOptions, Device, DeviceCapabilities, ScanFilter,
    ScanSummary,
};

fn speaker(id: &str, name: &str) -> Device {
    Device::new(id, name).with_capabilities(DeviceCapabilities::AUDIO_OUT)
}

#[test]
fn test_restart_keeps_single_subscription() {
    let h = harness();
    let (first_updates, first_done) = h.start_scan(ScanFilter::default());
    let (second_updates, second_done) = h.start_scan(ScanFilter::default());
    let (third_updates, _third_done) = h.start_scan(ScanFilter::default());

    assert_eq!(wait(&first_done), Err(CastError::Superseded));
    assert_eq!(wait(&second_done), Err(CastError::Superseded));
    assert_eq!(h.discovery.max_concurrent(), 1);
    assert_eq!(h.discovery.live_subscriptions(), 1);
    assert_eq!(h.discovery.started().len(), 3);
    assert_eq!(h.discovery.stopped().len(), 2);

    h.discovery.publish(vec![Device::new("d1", "Kitchen")]);
    h.flush();
    assert!(first_updates.try_recv().is_err());
    assert!(second_updates.try_recv().is_err());
    assert_eq!(third_updates.recv_timeout(WAIT).unwrap().len(), 1);
}

#[test]
fn test_late_report_from_stopped_subscription_is_dropped() {
    let h = harness();
    let (_old_updates, _old_done) = h.start_scan(ScanFilter::default());
    let stale = h.discovery.started()[0];
    let (updates, _done) = h.start_scan(ScanFilter::default());

    assert!(h.discovery.publish_to(stale, vec![Device::new("ghost", "Ghost")]));
    h.flush();
    assert!(updates.try_recv().is_err());
    assert!(h.controller.devices().is_empty());
}

#[test]
fn test_stop_without_scan_is_noop() {
    let h = harness();
    let (done, rx) = Completion::channel();
    h.controller.stop_scan(done);
    assert_eq!(wait(&rx), Ok(()));
    assert!(h.discovery.stopped().is_empty());
    assert!(h.drain().is_empty());
}

#[test]
fn test_stop_reports_summary_and_forgets_devices() {
    let h = harness();
    let (updates, scan_done) = h.discover(vec![
        Device::new("d1", "Living room"),
        Device::new("d2", "Kitchen"),
    ]);
    assert_eq!(updates.recv_timeout(WAIT).unwrap().len(), 2);
    assert_eq!(h.controller.devices().len(), 2);
    assert_eq!(h.controller.routes().len(), 2);
    assert!(h.controller.is_scanning());

    let (done, stopped) = Completion::channel();
    h.controller.stop_scan(done);
    assert_eq!(wait(&stopped), Ok(()));
    assert_eq!(
        wait(&scan_done),
        Ok(ScanSummary {
            updates: 1,
            devices: 2
        })
    );

    assert!(!h.controller.is_scanning());
    assert!(h.controller.devices().is_empty());
    assert_eq!(h.discovery.live_subscriptions(), 0);

    let availability: Vec<bool> = h
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            CastEvent::ReceiverListener { available } => Some(available),
            _ => None,
        })
        .collect();
    assert_eq!(availability, vec![true, false]);
}

#[test]
fn test_stop_keeps_devices_when_configured() {
    let options = ControllerOptions {
        clear_devices_on_scan_stop: false,
        ..ControllerOptions::default()
    };
    let h = harness_with(options, ConnectBehaviour::Accept);
    h.discover(vec![Device::new("d1", "Living room")]);

    let (done, stopped) = Completion::channel();
    h.controller.stop_scan(done);
    assert_eq!(wait(&stopped), Ok(()));
    assert_eq!(h.controller.devices().len(), 1);
}

#[test]
fn test_capability_filter_applies_to_updates() {
    let h = harness();
    let filter = ScanFilter::default().with_capabilities(DeviceCapabilities::VIDEO_OUT);
    let (updates, _done) = h.start_scan(filter);

    h.discovery.publish(vec![
        Device::new("tv", "Television"),
        speaker("sp", "Speaker"),
    ]);
    let delivered = updates.recv_timeout(WAIT).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id.as_str(), "tv");
}

#[test]
fn test_registry_follows_latest_list() {
    let h = harness();
    let (updates, _done) = h.discover(vec![
        Device::new("d1", "Living room"),
        Device::new("d2", "Kitchen"),
    ]);
    h.discovery.publish(vec![Device::new("d2", "Kitchen")]);
    h.flush();

    assert_eq!(updates.try_iter().count(), 2);
    let ids: Vec<String> = h
        .controller
        .devices()
        .iter()
        .map(|device| device.id.to_string())
        .collect();
    assert_eq!(ids, vec!["d2".to_string()]);
}

#[test]
fn test_timeout_stops_scan() {
    let h = harness();
    let filter = ScanFilter::default().with_timeout(Duration::from_millis(50));
    let (_updates, done) = h.start_scan(filter);
    assert!(h.controller.is_scanning());

    assert_eq!(wait(&done), Ok(ScanSummary::default()));
    assert!(!h.controller.is_scanning());
    assert_eq!(h.discovery.live_subscriptions(), 0);
}

#[test]
fn test_configured_timeout_is_default() {
    let options = ControllerOptions {
        scan_timeout: Some(Duration::from_millis(50)),
        ..ControllerOptions::default()
    };
    let h = harness_with(options, ConnectBehaviour::Accept);
    let (_updates, done) = h.start_scan(ScanFilter::default());
    assert_eq!(wait(&done), Ok(ScanSummary::default()));
}

#[test]
fn test_dropped_receiver_stops_scan() {
    let h = harness();
    let (updates, done) = h.start_scan(ScanFilter::default());
    drop(updates);

    h.discovery.publish(vec![Device::new("d1", "Living room")]);
    assert_eq!(wait(&done), Ok(ScanSummary::default()));
    h.flush();
    assert!(!h.controller.is_scanning());
    assert_eq!(h.discovery.live_subscriptions(), 0);
    assert!(h.controller.devices().is_empty());
}

#[test]
fn test_discovery_failure_fails_scan() {
    let h = harness();
    let (_updates, done) = h.discover(vec![Device::new("d1", "Living room")]);
    h.discovery.fail(7);

    assert_eq!(wait(&done), Err(CastError::transport(7)));
    h.flush();
    assert!(!h.controller.is_scanning());
    assert!(h.controller.devices().is_empty());
}

#[test]
fn test_refused_start_fails_scan() {
    let h = harness();
    h.discovery.fail_next_start(2000);
    let (updates, done) = h.start_scan(ScanFilter::default());

    assert_eq!(wait(&done), Err(CastError::transport(2000)));
    assert!(!h.controller.is_scanning());
    assert!(updates.recv_timeout(Duration::from_millis(50)).is_err());
}

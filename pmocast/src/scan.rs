//! Route scanning.
//!
//! At most one discovery subscription is live at any time. Restarting a scan
//! walks through `Stopping -> Idle -> Starting -> Active`: the previous
//! subscription is stopped on the transport and its request resolved with
//! `Superseded` before the new subscription is started. Every subscription
//! gets a fresh generation; reports tagged with another generation are
//! dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::errors::{CastError, CastResult};
use crate::model::{Device, DeviceCapabilities};
use crate::tracker::{Completion, RequestSlot};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanFilter {
    /// Only devices advertising all of these are reported.
    pub capabilities: DeviceCapabilities,
    /// Stop on our own after this long. `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl ScanFilter {
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final outcome of a scan that was stopped normally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Device lists delivered to the application.
    pub updates: usize,
    /// Size of the last delivered list.
    pub devices: usize,
}

#[derive(Clone, Debug)]
pub enum DiscoveryReport {
    Devices(Vec<Device>),
    Failed(i32),
}

type Deliver = Arc<dyn Fn(u64, DiscoveryReport) -> bool + Send + Sync>;

/// Handle given to the discovery transport for one subscription.
#[derive(Clone)]
pub struct DiscoverySink {
    subscription: u64,
    deliver: Deliver,
}

impl DiscoverySink {
    pub fn new<F>(subscription: u64, deliver: F) -> Self
    where
        F: Fn(u64, DiscoveryReport) -> bool + Send + Sync + 'static,
    {
        Self {
            subscription,
            deliver: Arc::new(deliver),
        }
    }

    pub fn subscription(&self) -> u64 {
        self.subscription
    }

    /// Returns false once nobody listens anymore.
    pub fn publish(&self, devices: Vec<Device>) -> bool {
        (self.deliver)(self.subscription, DiscoveryReport::Devices(devices))
    }

    pub fn fail(&self, code: i32) -> bool {
        (self.deliver)(self.subscription, DiscoveryReport::Failed(code))
    }
}

impl fmt::Debug for DiscoverySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverySink")
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// The mDNS (or other) browser feeding device lists.
pub trait DiscoveryTransport: Send {
    fn start_discovery(
        &mut self,
        subscription: u64,
        filter: &ScanFilter,
        sink: DiscoverySink,
    ) -> CastResult<()>;

    /// Must not return before the subscription has stopped publishing.
    fn stop_discovery(&mut self, subscription: u64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Stopping(u64),
    Starting(u64),
    Active(u64),
}

/// What happened to a discovery report.
#[derive(Debug)]
pub enum ScanUpdate {
    Stale,
    Delivered(Vec<Device>),
    /// The application dropped its receiver; the scan was stopped.
    ReceiverGone(ScanSummary),
    Failed,
}

struct ActiveScan {
    subscription: u64,
    filter: ScanFilter,
    updates: Sender<Vec<Device>>,
    summary: ScanSummary,
}

pub struct ScanCoordinator {
    transport: Box<dyn DiscoveryTransport>,
    phase: ScanPhase,
    request: RequestSlot<ScanSummary>,
    active: Option<ActiveScan>,
    scanning: Arc<AtomicBool>,
}

impl ScanCoordinator {
    pub fn new(transport: Box<dyn DiscoveryTransport>) -> Self {
        Self {
            transport,
            phase: ScanPhase::Idle,
            request: RequestSlot::new("scan"),
            active: None,
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag mirroring [`ScanCoordinator::is_active`] for readers on other threads.
    pub fn scanning_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.scanning)
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn subscription(&self) -> Option<u64> {
        self.active.as_ref().map(|scan| scan.subscription)
    }

    fn set_phase(&mut self, phase: ScanPhase) {
        debug!(from = ?self.phase, to = ?phase, "Scan phase");
        self.phase = phase;
        self.scanning
            .store(matches!(phase, ScanPhase::Active(_)), Ordering::SeqCst);
    }

    /// Starts a scan, draining any active one first. Returns the new
    /// subscription, or `None` when the transport refused to start (the
    /// completion then carries the error).
    pub fn start<F>(
        &mut self,
        filter: ScanFilter,
        updates: Sender<Vec<Device>>,
        completion: Completion<ScanSummary>,
        make_sink: F,
    ) -> Option<u64>
    where
        F: FnOnce(u64) -> DiscoverySink,
    {
        if let Some(previous) = self.active.take() {
            self.set_phase(ScanPhase::Stopping(previous.subscription));
            self.transport.stop_discovery(previous.subscription);
            drop(previous.updates);
            self.set_phase(ScanPhase::Idle);
        }

        let subscription = self.request.supersede(completion);
        self.set_phase(ScanPhase::Starting(subscription));

        match self
            .transport
            .start_discovery(subscription, &filter, make_sink(subscription))
        {
            Ok(()) => {
                info!(subscription, "Route scan started");
                self.active = Some(ActiveScan {
                    subscription,
                    filter,
                    updates,
                    summary: ScanSummary::default(),
                });
                self.set_phase(ScanPhase::Active(subscription));
                Some(subscription)
            }
            Err(err) => {
                warn!(subscription, error = %err, "Failed to start route scan");
                self.request.resolve(subscription, Err(err));
                self.set_phase(ScanPhase::Idle);
                None
            }
        }
    }

    /// Stops the active scan, resolving its request with the summary.
    /// `None` when no scan was running.
    pub fn stop(&mut self) -> Option<ScanSummary> {
        let scan = self.active.take()?;
        self.set_phase(ScanPhase::Stopping(scan.subscription));
        self.transport.stop_discovery(scan.subscription);
        drop(scan.updates);
        self.request.resolve(scan.subscription, Ok(scan.summary));
        self.set_phase(ScanPhase::Idle);
        info!(
            subscription = scan.subscription,
            updates = scan.summary.updates,
            "Route scan stopped"
        );
        Some(scan.summary)
    }

    pub fn on_report(&mut self, subscription: u64, report: DiscoveryReport) -> ScanUpdate {
        if self.phase != ScanPhase::Active(subscription) {
            debug!(subscription, phase = ?self.phase, "Dropping report from stale scan");
            return ScanUpdate::Stale;
        }

        match report {
            DiscoveryReport::Devices(devices) => self.deliver(devices),
            DiscoveryReport::Failed(code) => {
                self.fail(CastError::transport(code));
                ScanUpdate::Failed
            }
        }
    }

    fn deliver(&mut self, devices: Vec<Device>) -> ScanUpdate {
        let Some(scan) = self.active.as_mut() else {
            return ScanUpdate::Stale;
        };

        let devices: Vec<Device> = devices
            .into_iter()
            .filter(|device| device.capabilities.contains(scan.filter.capabilities))
            .collect();

        if scan.updates.send(devices.clone()).is_err() {
            info!(
                subscription = scan.subscription,
                "Scan receiver dropped, stopping scan"
            );
            return match self.stop() {
                Some(summary) => ScanUpdate::ReceiverGone(summary),
                None => ScanUpdate::Stale,
            };
        }

        scan.summary.updates += 1;
        scan.summary.devices = devices.len();
        debug!(
            subscription = scan.subscription,
            devices = devices.len(),
            "Delivered route update"
        );
        ScanUpdate::Delivered(devices)
    }

    fn fail(&mut self, error: CastError) {
        let Some(scan) = self.active.take() else {
            return;
        };
        warn!(subscription = scan.subscription, error = %error, "Route scan failed");
        self.set_phase(ScanPhase::Stopping(scan.subscription));
        self.transport.stop_discovery(scan.subscription);
        drop(scan.updates);
        self.request.resolve(scan.subscription, Err(error));
        self.set_phase(ScanPhase::Idle);
    }

    /// Stops the scan if `subscription` is still the active one.
    pub fn on_timeout(&mut self, subscription: u64) -> Option<ScanSummary> {
        if self.subscription() != Some(subscription) {
            debug!(subscription, "Ignoring timeout of a finished scan");
            return None;
        }
        info!(subscription, "Route scan timed out");
        self.stop()
    }

    /// Stops discovery and abandons the pending request (resolved `Cancelled`).
    pub fn shutdown(&mut self) {
        if let Some(scan) = self.active.take() {
            self.transport.stop_discovery(scan.subscription);
        }
        drop(self.request.take_current());
        self.set_phase(ScanPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedDiscovery;
    use crossbeam_channel::{Receiver, unbounded};
    use std::sync::Mutex;

    type Reports = Arc<Mutex<Vec<(u64, DiscoveryReport)>>>;

    fn coordinator() -> (ScanCoordinator, SimulatedDiscovery, Reports) {
        let discovery = SimulatedDiscovery::new();
        let scan = ScanCoordinator::new(Box::new(discovery.clone()));
        (scan, discovery, Arc::new(Mutex::new(Vec::new())))
    }

    fn sink_into(reports: &Reports) -> impl FnOnce(u64) -> DiscoverySink + use<> {
        let reports = Arc::clone(reports);
        move |subscription| {
            DiscoverySink::new(subscription, move |subscription, report| {
                reports.lock().unwrap().push((subscription, report));
                true
            })
        }
    }

    fn start(
        scan: &mut ScanCoordinator,
        reports: &Reports,
        filter: ScanFilter,
    ) -> (
        Option<u64>,
        Receiver<Vec<Device>>,
        Receiver<CastResult<ScanSummary>>,
    ) {
        let (tx, rx) = unbounded();
        let (completion, done) = Completion::channel();
        let subscription = scan.start(filter, tx, completion, sink_into(reports));
        (subscription, rx, done)
    }

    #[test]
    fn restart_drains_previous_scan() {
        let (mut scan, discovery, reports) = coordinator();
        let (first, first_rx, first_done) = start(&mut scan, &reports, ScanFilter::default());
        let (second, _second_rx, second_done) = start(&mut scan, &reports, ScanFilter::default());

        let first = first.unwrap();
        let second = second.unwrap();
        assert!(second > first);
        assert_eq!(first_done.try_recv().unwrap(), Err(CastError::Superseded));
        assert!(second_done.try_recv().is_err());
        assert!(first_rx.recv().is_err());
        assert_eq!(discovery.max_concurrent(), 1);
        assert_eq!(discovery.stopped(), vec![first]);

        assert!(matches!(
            scan.on_report(first, DiscoveryReport::Devices(vec![Device::new("a", "A")])),
            ScanUpdate::Stale
        ));
    }

    #[test]
    fn updates_are_filtered_and_counted() {
        let (mut scan, _discovery, reports) = coordinator();
        let filter = ScanFilter::default().with_capabilities(DeviceCapabilities::AUDIO_OUT);
        let (subscription, rx, done) = start(&mut scan, &reports, filter);
        let subscription = subscription.unwrap();

        let devices = vec![
            Device::new("a", "Speaker").with_capabilities(DeviceCapabilities::AUDIO_OUT),
            Device::new("b", "Frame").with_capabilities(DeviceCapabilities::VIDEO_OUT),
        ];
        match scan.on_report(subscription, DiscoveryReport::Devices(devices)) {
            ScanUpdate::Delivered(list) => assert_eq!(list.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap()[0].id.as_str(), "a");

        assert_eq!(
            scan.stop(),
            Some(ScanSummary {
                updates: 1,
                devices: 1
            })
        );
        assert_eq!(
            done.try_recv().unwrap(),
            Ok(ScanSummary {
                updates: 1,
                devices: 1
            })
        );
        assert_eq!(scan.stop(), None);
        assert_eq!(scan.phase(), ScanPhase::Idle);
    }

    #[test]
    fn dropped_receiver_stops_the_scan() {
        let (mut scan, discovery, reports) = coordinator();
        let (subscription, rx, done) = start(&mut scan, &reports, ScanFilter::default());
        drop(rx);

        let update = scan.on_report(
            subscription.unwrap(),
            DiscoveryReport::Devices(vec![Device::new("a", "A")]),
        );
        assert!(matches!(update, ScanUpdate::ReceiverGone(_)));
        assert!(done.try_recv().unwrap().is_ok());
        assert_eq!(discovery.live_subscriptions(), 0);
        assert!(!scan.scanning_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn failures_resolve_with_transport_error() {
        let (mut scan, discovery, reports) = coordinator();
        discovery.fail_next_start(8);
        let (subscription, _rx, done) = start(&mut scan, &reports, ScanFilter::default());
        assert!(subscription.is_none());
        assert_eq!(done.try_recv().unwrap(), Err(CastError::transport(8)));

        let (subscription, _rx, done) = start(&mut scan, &reports, ScanFilter::default());
        let subscription = subscription.unwrap();
        assert!(matches!(
            scan.on_report(subscription, DiscoveryReport::Failed(7)),
            ScanUpdate::Failed
        ));
        assert_eq!(done.try_recv().unwrap(), Err(CastError::transport(7)));
        assert!(!scan.is_active());
    }

    #[test]
    fn stale_timeouts_are_ignored() {
        let (mut scan, _discovery, reports) = coordinator();
        let (first, _rx1, _done1) = start(&mut scan, &reports, ScanFilter::default());
        let (second, _rx2, done2) = start(&mut scan, &reports, ScanFilter::default());
        assert_eq!(scan.on_timeout(first.unwrap()), None);
        assert!(scan.is_active());
        assert!(scan.on_timeout(second.unwrap()).is_some());
        assert!(done2.try_recv().unwrap().is_ok());
    }
}

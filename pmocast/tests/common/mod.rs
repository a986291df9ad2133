#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use pmocast::simulator::{ConnectBehaviour, SimulatedDiscovery, SimulatedReceiver};
use pmocast::{
    CastController, CastEvent, CastResult, Completion, ControllerOptions, Device, DeviceFilter,
    ScanFilter, ScanSummary, SessionSnapshot,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub controller: CastController,
    pub discovery: SimulatedDiscovery,
    pub receiver: SimulatedReceiver,
    pub events: Receiver<CastEvent>,
}

pub fn harness() -> Harness {
    harness_with(ControllerOptions::default(), ConnectBehaviour::Accept)
}

pub fn harness_with(options: ControllerOptions, behaviour: ConnectBehaviour) -> Harness {
    let discovery = SimulatedDiscovery::new();
    let receiver = SimulatedReceiver::new();
    receiver.set_connect_behaviour(behaviour);
    let controller = CastController::spawn(
        options,
        Box::new(discovery.clone()),
        Box::new(receiver.clone()),
    )
    .unwrap();
    let events = controller.subscribe();
    Harness {
        controller,
        discovery,
        receiver,
        events,
    }
}

pub fn wait<T>(rx: &Receiver<CastResult<T>>) -> CastResult<T> {
    rx.recv_timeout(WAIT).expect("completion was not resolved in time")
}

impl Harness {
    /// Waits until the controller has processed everything posted so far.
    pub fn flush(&self) {
        let (done, rx) = Completion::channel();
        self.controller.flush(done);
        wait(&rx).unwrap();
    }

    /// Events observed so far, after a flush.
    pub fn drain(&self) -> Vec<CastEvent> {
        self.flush();
        self.events.try_iter().collect()
    }

    pub fn drain_names(&self) -> Vec<&'static str> {
        self.drain().iter().map(CastEvent::name).collect()
    }

    pub fn start_scan(
        &self,
        filter: ScanFilter,
    ) -> (Receiver<Vec<Device>>, Receiver<CastResult<ScanSummary>>) {
        let (done, done_rx) = Completion::channel();
        let updates = self.controller.start_scan(filter, done);
        self.flush();
        (updates, done_rx)
    }

    /// Runs a scan that reports `devices`, leaving it active.
    pub fn discover(
        &self,
        devices: Vec<Device>,
    ) -> (Receiver<Vec<Device>>, Receiver<CastResult<ScanSummary>>) {
        let (updates, done) = self.start_scan(ScanFilter::default());
        self.discovery.publish(devices);
        self.flush();
        (updates, done)
    }

    pub fn request(&self, filter: DeviceFilter) -> Receiver<CastResult<Arc<SessionSnapshot>>> {
        let (done, rx) = Completion::channel();
        self.controller.request_session(filter, done);
        rx
    }

    /// Discovers a single device and connects to it.
    pub fn connected(&self) -> Arc<SessionSnapshot> {
        self.discover(vec![Device::new("d1", "Living room")]);
        let snapshot = wait(&self.request(DeviceFilter::by_id("d1"))).unwrap();
        self.drain();
        snapshot
    }

    pub fn end(&self, mode: pmocast::EndMode) -> CastResult<()> {
        let (done, rx) = Completion::channel();
        self.controller.end_session(mode, done);
        wait(&rx)
    }
}

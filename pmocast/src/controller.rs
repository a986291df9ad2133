//! The cast controller: a single actor thread owning the scan coordinator,
//! the session state machine and the device registry.
//!
//! Application commands, receiver events and discovery reports all travel
//! through one ordered inbox, so every transition is applied atomically with
//! respect to every source. Callers never block: outcomes come back through
//! [`Completion`]s, which run on the controller thread and must not wait on
//! the controller themselves.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{CastError, CastResult};
use crate::events::{CastEvent, CastEventBus};
use crate::media::{ContentTypeSniffer, ExtensionSniffer, LoadRequest, MediaCommand};
use crate::model::{Device, DeviceId, EndMode, MediaStatus, RouteInfo, SessionSnapshot, SessionState};
use crate::registry::{DeviceFilter, DeviceRegistry};
use crate::scan::{
    DiscoveryReport, DiscoverySink, DiscoveryTransport, ScanCoordinator, ScanFilter, ScanSummary,
    ScanUpdate,
};
use crate::session::{SessionController, SessionView};
use crate::status::decode_media_status;
use crate::tracker::Completion;
use crate::transport::{DeviceTransport, TransportEvent, TransportSink};

/// Receiver application launched when none is configured.
pub const DEFAULT_APP_ID: &str = "CC1AD845";

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerOptions {
    pub app_id: String,
    /// Default scan timeout; `None` scans until stopped.
    pub scan_timeout: Option<Duration>,
    /// Forget discovered devices when a scan stops.
    pub clear_devices_on_scan_stop: bool,
    /// Used by [`CastController::end_current_session`].
    pub default_end_mode: EndMode,
    /// Handed to transports that honour it.
    pub connect_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            scan_timeout: None,
            clear_devices_on_scan_stop: true,
            default_end_mode: EndMode::Stop,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &pmocastconfig::Config) -> anyhow::Result<Self> {
        let scan_timeout = match config.get_scan_timeout_secs()? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let default_end_mode = config
            .get_default_end_mode()?
            .parse::<EndMode>()
            .map_err(|err| anyhow::anyhow!("session.default_end_mode: {err}"))?;

        Ok(Self {
            app_id: config.get_app_id()?,
            scan_timeout,
            clear_devices_on_scan_stop: config.get_scan_clear_devices_on_stop()?,
            default_end_mode,
            connect_timeout: Duration::from_secs(config.get_connect_timeout_secs()?),
        })
    }
}

enum Command {
    StartScan {
        filter: ScanFilter,
        updates: Sender<Vec<Device>>,
        done: Completion<ScanSummary>,
    },
    StopScan {
        done: Completion<()>,
    },
    Discovery {
        subscription: u64,
        report: DiscoveryReport,
    },
    ScanTimeout {
        subscription: u64,
    },
    RequestSession {
        filter: DeviceFilter,
        done: Completion<Arc<SessionSnapshot>>,
    },
    CancelSessionRequest {
        done: Completion<()>,
    },
    EndSession {
        mode: EndMode,
        done: Completion<()>,
    },
    AddChannel {
        namespace: String,
        done: Completion<()>,
    },
    RemoveChannel {
        namespace: String,
        done: Completion<()>,
    },
    SendMessage {
        namespace: String,
        message: String,
        done: Completion<()>,
    },
    Media {
        command: MediaCommand,
        done: Completion<Option<MediaStatus>>,
    },
    MediaResult {
        session_id: String,
        load: bool,
        outcome: CastResult<Option<Value>>,
        done: Completion<Option<MediaStatus>>,
    },
    Transport(TransportEvent),
    Flush {
        done: Completion<()>,
    },
    Shutdown,
}

impl Command {
    /// Resolves the completion carried by a command that could not be
    /// delivered.
    fn reject(self, error: CastError) {
        match self {
            Command::StartScan { done, .. } => done.fail(error),
            Command::StopScan { done }
            | Command::CancelSessionRequest { done }
            | Command::EndSession { done, .. }
            | Command::AddChannel { done, .. }
            | Command::RemoveChannel { done, .. }
            | Command::SendMessage { done, .. }
            | Command::Flush { done } => done.fail(error),
            Command::RequestSession { done, .. } => done.fail(error),
            Command::Media { done, .. } | Command::MediaResult { done, .. } => done.fail(error),
            Command::Discovery { .. }
            | Command::ScanTimeout { .. }
            | Command::Transport(_)
            | Command::Shutdown => {}
        }
    }
}

/// Handle on the controller thread. Dropping it shuts the thread down.
pub struct CastController {
    inbox: Sender<Command>,
    events: CastEventBus,
    registry: Arc<RwLock<DeviceRegistry>>,
    session: Arc<SessionView>,
    scanning: Arc<AtomicBool>,
    options: ControllerOptions,
    sniffer: Arc<dyn ContentTypeSniffer>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CastController {
    /// Starts the controller thread with the extension-based content sniffer.
    pub fn spawn(
        options: ControllerOptions,
        discovery: Box<dyn DiscoveryTransport>,
        transport: Box<dyn DeviceTransport>,
    ) -> io::Result<Self> {
        Self::spawn_with_sniffer(options, discovery, transport, Arc::new(ExtensionSniffer))
    }

    pub fn spawn_with_sniffer(
        options: ControllerOptions,
        discovery: Box<dyn DiscoveryTransport>,
        mut transport: Box<dyn DeviceTransport>,
        sniffer: Arc<dyn ContentTypeSniffer>,
    ) -> io::Result<Self> {
        let (inbox, commands) = unbounded::<Command>();
        let events = CastEventBus::new();
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let scan = ScanCoordinator::new(discovery);
        let scanning = scan.scanning_flag();
        let session = SessionController::new();
        let view = session.view();

        let sink_inbox = inbox.clone();
        transport.attach(TransportSink::new(move |event| {
            sink_inbox.send(Command::Transport(event)).is_ok()
        }));

        let actor = Actor {
            inbox: inbox.clone(),
            options: options.clone(),
            events: events.clone(),
            registry: Arc::clone(&registry),
            scan,
            session,
            transport,
            available: false,
        };

        let worker = thread::Builder::new()
            .name("cast-controller".into())
            .spawn(move || actor.run(commands))?;

        info!(app = options.app_id.as_str(), "Cast controller started");

        Ok(Self {
            inbox,
            events,
            registry,
            session: view,
            scanning,
            options,
            sniffer,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn post(&self, command: Command) {
        if let Err(err) = self.inbox.send(command) {
            debug!("Cast controller closed, rejecting command");
            err.into_inner().reject(CastError::ControllerClosed);
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Ordered stream of observable events.
    pub fn subscribe(&self) -> Receiver<CastEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn current_session(&self) -> Option<Arc<SessionSnapshot>> {
        self.session.snapshot()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<RwLock<DeviceRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .list()
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes()
    }

    /// Starts (or restarts) route scanning. The returned receiver yields
    /// every device list until the scan stops; `done` resolves when it does.
    pub fn start_scan(
        &self,
        filter: ScanFilter,
        done: Completion<ScanSummary>,
    ) -> Receiver<Vec<Device>> {
        let (updates, rx) = unbounded();
        self.post(Command::StartScan {
            filter,
            updates,
            done,
        });
        rx
    }

    pub fn stop_scan(&self, done: Completion<()>) {
        self.post(Command::StopScan { done });
    }

    /// Connects to the first known device matching `filter`.
    pub fn request_session(&self, filter: DeviceFilter, done: Completion<Arc<SessionSnapshot>>) {
        self.post(Command::RequestSession { filter, done });
    }

    pub fn select_route(&self, id: &DeviceId, done: Completion<Arc<SessionSnapshot>>) {
        self.request_session(DeviceFilter::by_id(id.as_str()), done);
    }

    pub fn cancel_session_request(&self, done: Completion<()>) {
        self.post(Command::CancelSessionRequest { done });
    }

    pub fn end_session(&self, mode: EndMode, done: Completion<()>) {
        self.post(Command::EndSession { mode, done });
    }

    pub fn end_current_session(&self, done: Completion<()>) {
        self.end_session(self.options.default_end_mode, done);
    }

    pub fn add_message_listener(&self, namespace: &str, done: Completion<()>) {
        self.post(Command::AddChannel {
            namespace: namespace.to_string(),
            done,
        });
    }

    pub fn remove_message_listener(&self, namespace: &str, done: Completion<()>) {
        self.post(Command::RemoveChannel {
            namespace: namespace.to_string(),
            done,
        });
    }

    pub fn send_message(&self, namespace: &str, message: &str, done: Completion<()>) {
        self.post(Command::SendMessage {
            namespace: namespace.to_string(),
            message: message.to_string(),
            done,
        });
    }

    fn media(&self, command: CastResult<MediaCommand>, done: Completion<Option<MediaStatus>>) {
        match command {
            Ok(command) => self.post(Command::Media { command, done }),
            Err(err) => done.fail(err),
        }
    }

    pub fn load_media(&self, request: LoadRequest, done: Completion<Option<MediaStatus>>) {
        let command = request
            .normalized(self.sniffer.as_ref())
            .map(MediaCommand::Load);
        self.media(command, done);
    }

    pub fn load_media_with_headers(
        &self,
        request: LoadRequest,
        headers: BTreeMap<String, String>,
        token: Option<String>,
        done: Completion<Option<MediaStatus>>,
    ) {
        self.load_media(request.with_auth(headers, token), done);
    }

    /// Loads `url` with sniffed content and stream types, autoplaying.
    pub fn launch_media(&self, url: &str, done: Completion<Option<MediaStatus>>) {
        self.load_media(LoadRequest::new(url), done);
    }

    pub fn play(&self, done: Completion<Option<MediaStatus>>) {
        self.media(Ok(MediaCommand::Play), done);
    }

    pub fn pause(&self, done: Completion<Option<MediaStatus>>) {
        self.media(Ok(MediaCommand::Pause), done);
    }

    pub fn seek(&self, seconds: f64, done: Completion<Option<MediaStatus>>) {
        self.media(MediaCommand::seek(seconds), done);
    }

    pub fn next(&self, done: Completion<Option<MediaStatus>>) {
        self.media(Ok(MediaCommand::Next), done);
    }

    pub fn prev(&self, done: Completion<Option<MediaStatus>>) {
        self.media(Ok(MediaCommand::Prev), done);
    }

    pub fn set_volume(&self, level: f64, done: Completion<Option<MediaStatus>>) {
        self.media(MediaCommand::volume(level), done);
    }

    pub fn set_muted(&self, muted: bool, done: Completion<Option<MediaStatus>>) {
        self.media(Ok(MediaCommand::SetMuted(muted)), done);
    }

    pub fn set_repeat_mode(&self, mode: &str, done: Completion<Option<MediaStatus>>) {
        self.media(MediaCommand::repeat_mode(mode), done);
    }

    /// Resolves once every command posted before it has been processed.
    pub fn flush(&self, done: Completion<()>) {
        self.post(Command::Flush { done });
    }

    /// Stops the controller thread and waits for it. Pending requests
    /// resolve `Cancelled`, later commands fail with `ControllerClosed`.
    /// Must not be called from a completion.
    pub fn shutdown(&self) {
        let _ = self.inbox.send(Command::Shutdown);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Cast controller thread panicked");
            }
        }
    }
}

impl Drop for CastController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Actor {
    inbox: Sender<Command>,
    options: ControllerOptions,
    events: CastEventBus,
    registry: Arc<RwLock<DeviceRegistry>>,
    scan: ScanCoordinator,
    session: SessionController,
    transport: Box<dyn DeviceTransport>,
    available: bool,
}

impl Actor {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }

        info!("Cast controller stopping");
        self.scan.shutdown();
        self.session.shutdown();
        for command in commands.try_iter() {
            command.reject(CastError::ControllerClosed);
        }
        drop(commands);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::StartScan {
                filter,
                updates,
                done,
            } => self.start_scan(filter, updates, done),
            Command::StopScan { done } => {
                self.stop_scan(true);
                done.succeed(());
            }
            Command::Discovery {
                subscription,
                report,
            } => self.on_discovery(subscription, report),
            Command::ScanTimeout { subscription } => {
                if self.scan.on_timeout(subscription).is_some() {
                    self.after_scan_stopped(true);
                }
            }
            Command::RequestSession { filter, done } => self.request_session(filter, done),
            Command::CancelSessionRequest { done } => done.resolve(self.session.cancel()),
            Command::EndSession { mode, done } => {
                self.session
                    .end(mode, done, self.transport.as_mut(), &self.events)
            }
            Command::AddChannel { namespace, done } => {
                done.resolve(self.session.add_channel(&namespace).map(|_| ()))
            }
            Command::RemoveChannel { namespace, done } => {
                done.resolve(self.session.remove_channel(&namespace).map(|_| ()))
            }
            Command::SendMessage {
                namespace,
                message,
                done,
            } => match self.session.message_target(&namespace) {
                Ok(session_id) => {
                    debug!(namespace = namespace.as_str(), "Sending message");
                    self.transport
                        .send_message(&session_id, &namespace, &message, done)
                }
                Err(err) => done.fail(err),
            },
            Command::Media { command, done } => self.media_command(command, done),
            Command::MediaResult {
                session_id,
                load,
                outcome,
                done,
            } => self.media_result(&session_id, load, outcome, done),
            Command::Transport(event) => self.on_transport(event),
            Command::Flush { done } => done.succeed(()),
            Command::Shutdown => {}
        }
    }

    fn start_scan(
        &mut self,
        filter: ScanFilter,
        updates: Sender<Vec<Device>>,
        done: Completion<ScanSummary>,
    ) {
        let timeout = filter.timeout.or(self.options.scan_timeout);
        let inbox = self.inbox.clone();
        let started = self.scan.start(filter, updates, done, move |subscription| {
            DiscoverySink::new(subscription, move |subscription, report| {
                inbox
                    .send(Command::Discovery {
                        subscription,
                        report,
                    })
                    .is_ok()
            })
        });

        if let (Some(subscription), Some(timeout)) = (started, timeout) {
            self.arm_scan_timeout(subscription, timeout);
        }
    }

    fn arm_scan_timeout(&self, subscription: u64, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        let inbox = self.inbox.clone();
        let spawned = thread::Builder::new()
            .name("cast-scan-timer".into())
            .spawn(move || {
                thread::sleep(timeout);
                let _ = inbox.send(Command::ScanTimeout { subscription });
            });
        if let Err(err) = spawned {
            warn!(subscription, error = %err, "Failed to arm scan timeout");
        }
    }

    fn stop_scan(&mut self, forget_devices: bool) {
        if self.scan.stop().is_some() {
            self.after_scan_stopped(forget_devices);
        }
    }

    fn after_scan_stopped(&mut self, forget_devices: bool) {
        if forget_devices && self.options.clear_devices_on_scan_stop {
            let forgotten = self
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!(forgotten, "Cleared device registry");
            self.set_available(false);
        }
    }

    fn on_discovery(&mut self, subscription: u64, report: DiscoveryReport) {
        match self.scan.on_report(subscription, report) {
            ScanUpdate::Delivered(devices) => {
                let available = !devices.is_empty();
                let change = self
                    .registry
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace_all(devices);
                if !change.is_empty() {
                    debug!(
                        added = change.added.len(),
                        updated = change.updated.len(),
                        removed = change.removed.len(),
                        "Device registry updated"
                    );
                }
                self.set_available(available);
            }
            ScanUpdate::ReceiverGone(_) => self.after_scan_stopped(true),
            ScanUpdate::Failed => self.after_scan_stopped(true),
            ScanUpdate::Stale => {}
        }
    }

    fn set_available(&mut self, available: bool) {
        if self.available != available {
            self.available = available;
            self.events
                .broadcast(CastEvent::ReceiverListener { available });
        }
    }

    fn request_session(&mut self, filter: DeviceFilter, done: Completion<Arc<SessionSnapshot>>) {
        if self.session.state() != SessionState::Idle {
            debug!(state = %self.session.state(), "Session request while busy");
            done.fail(CastError::Busy);
            return;
        }

        let device = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .find(&filter);
        let Some(device) = device else {
            done.fail(CastError::DeviceNotFound(filter.to_string()));
            return;
        };

        // The scan request resolves before the connect attempt starts. The
        // registry is kept so the session's device stays reachable.
        self.stop_scan(false);

        self.session.begin(
            &device,
            &self.options.app_id,
            done,
            self.transport.as_mut(),
            &self.events,
        );
    }

    fn media_command(&mut self, command: MediaCommand, done: Completion<Option<MediaStatus>>) {
        let session_id = match self.session.media_target() {
            Ok(session_id) => session_id,
            Err(err) => {
                done.fail(err);
                return;
            }
        };
        let load = matches!(command, MediaCommand::Load(_));
        debug!(command = command.name(), session = session_id.as_str(), "Media command");

        let inbox = self.inbox.clone();
        let reply_session = session_id.clone();
        let reply = Completion::new(move |outcome| {
            let _ = inbox.send(Command::MediaResult {
                session_id: reply_session,
                load,
                outcome,
                done,
            });
        });
        self.transport.media_command(&session_id, command, reply);
    }

    fn media_result(
        &mut self,
        session_id: &str,
        load: bool,
        outcome: CastResult<Option<Value>>,
        done: Completion<Option<MediaStatus>>,
    ) {
        let payload = match outcome {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                done.succeed(None);
                return;
            }
            Err(err) => {
                done.fail(err);
                return;
            }
        };

        match decode_media_status(&payload, session_id) {
            Ok(status) => {
                if load {
                    self.session.on_media_loaded(status.clone(), &self.events);
                }
                done.succeed(Some(status));
            }
            Err(err) => {
                warn!(error = %err, "Dropping malformed media status");
                done.succeed(None);
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MessageReceived { namespace, message } => {
                self.events
                    .broadcast(CastEvent::ReceiverMessage { namespace, message });
            }
            TransportEvent::AvailabilityChanged { available } => {
                self.available = available;
                self.events
                    .broadcast(CastEvent::ReceiverListener { available });
            }
            TransportEvent::ResumeOffered { snapshot } => {
                let device = self
                    .registry
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .find(&DeviceFilter::by_name(&snapshot.receiver.friendly_name));
                self.session.on_resume_offered(snapshot, device.as_ref());
            }
            other => self
                .session
                .handle(other, self.transport.as_mut(), &self.events),
        }
    }
}

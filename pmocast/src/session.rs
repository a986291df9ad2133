//! Session lifecycle state machine.
//!
//! ```text
//! Idle --request--> Connecting --accepted--> Connected --end--> Ending --confirmed--> Idle
//!   |                   |  rejected/cancel -> Idle      |  disconnected/lost -> Idle
//!   +--resume offer--> Resuming --confirmed--> Connected
//!                           +--failed--> Idle
//! ```
//!
//! The controller owns one [`SessionController`] and feeds it every input on
//! its own thread. Transitions publish the new state and snapshot to the
//! shared [`SessionView`] before any completion or observer runs, so readers
//! woken by either already see the new state.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::{debug, info, warn};

use crate::channels::ChannelManager;
use crate::errors::{CastError, CastResult, codes};
use crate::events::{CastEvent, CastEventBus};
use crate::model::{Device, EndMode, MediaStatus, SessionEndStatus, SessionSnapshot, SessionState};
use crate::status::decode_session_status;
use crate::tracker::{Completion, RequestSlot};
use crate::transport::{DeviceTransport, TransportEvent};

const STATUS_CONNECTED: &str = "connected";
const STATUS_RESUMING: &str = "resuming";
const STATUS_SUSPENDED: &str = "suspended";

/// Read model of the session, shared with callers.
#[derive(Debug)]
pub struct SessionView {
    state: RwLock<SessionState>,
    snapshot: RwLock<Option<Arc<SessionSnapshot>>>,
}

impl SessionView {
    fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            snapshot: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Option<Arc<SessionSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: SessionState, snapshot: Option<Arc<SessionSnapshot>>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

struct Session {
    device: Weak<Device>,
    snapshot: Arc<SessionSnapshot>,
}

pub struct SessionController {
    state: SessionState,
    session: Option<Session>,
    request: RequestSlot<Arc<SessionSnapshot>>,
    connecting: Option<Weak<Device>>,
    pending_end: Vec<Completion<()>>,
    channels: ChannelManager,
    view: Arc<SessionView>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
            request: RequestSlot::new("session"),
            connecting: None,
            pending_end: Vec::new(),
            channels: ChannelManager::new(),
            view: Arc::new(SessionView::new()),
        }
    }

    pub fn view(&self) -> Arc<SessionView> {
        Arc::clone(&self.view)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> Option<Arc<SessionSnapshot>> {
        self.session.as_ref().map(|s| Arc::clone(&s.snapshot))
    }

    /// The device of the current session, while the registry still knows it.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.session.as_ref().and_then(|s| s.device.upgrade())
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.snapshot.session_id.as_str())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state");
        }
        self.state = state;
        self.view.publish(state, self.snapshot());
    }

    fn replace_snapshot(&mut self, snapshot: SessionSnapshot) -> Option<Arc<SessionSnapshot>> {
        let session = self.session.as_mut()?;
        let snapshot = Arc::new(snapshot);
        session.snapshot = Arc::clone(&snapshot);
        self.view.publish(self.state, Some(Arc::clone(&snapshot)));
        Some(snapshot)
    }

    /// `Idle -> Connecting`. Any other state fails the newcomer with `Busy`
    /// and leaves the current request alone.
    pub fn begin(
        &mut self,
        device: &Arc<Device>,
        app_id: &str,
        completion: Completion<Arc<SessionSnapshot>>,
        transport: &mut dyn DeviceTransport,
        events: &CastEventBus,
    ) {
        if self.state != SessionState::Idle {
            debug!(state = %self.state, device = device.id.as_str(), "Session request rejected, busy");
            completion.fail(CastError::Busy);
            return;
        }
        let Some(attempt) = self.request.install_exclusive(completion) else {
            return;
        };

        self.connecting = Some(Arc::downgrade(device));
        self.set_state(SessionState::Connecting);
        info!(
            device = device.id.as_str(),
            name = device.name.as_str(),
            attempt,
            "Connecting to receiver"
        );

        if let Err(err) = transport.connect(attempt, device, app_id) {
            self.fail_attempt(err, events);
        }
    }

    fn fail_attempt(&mut self, error: CastError, events: &CastEventBus) {
        let code = match &error {
            CastError::Transport { code, .. } => *code,
            _ => codes::INTERNAL_ERROR,
        };
        warn!(code, error = %error, "Session start failed");

        self.connecting = None;
        self.set_state(SessionState::Idle);
        if let Some((_, completion)) = self.request.take_current() {
            completion.fail(error);
        }
        events.broadcast(CastEvent::session_start_failed(code));
    }

    /// `Connecting -> Idle`, resolving the request with `Cancelled`. Once the
    /// receiver has accepted, there is nothing left to cancel.
    pub fn cancel(&mut self) -> CastResult<()> {
        if self.state != SessionState::Connecting {
            return Err(CastError::NoPendingRequest);
        }
        self.connecting = None;
        self.set_state(SessionState::Idle);
        if let Some((attempt, completion)) = self.request.take_current() {
            info!(attempt, "Session request cancelled");
            completion.fail(CastError::Cancelled);
        }
        Ok(())
    }

    pub fn end(
        &mut self,
        mode: EndMode,
        completion: Completion<()>,
        transport: &mut dyn DeviceTransport,
        events: &CastEventBus,
    ) {
        match self.state {
            SessionState::Idle | SessionState::Ending => completion.succeed(()),
            SessionState::Connecting => {
                let _ = self.cancel();
                completion.succeed(());
            }
            SessionState::Connected | SessionState::Resuming => {
                let Some(session_id) = self.session_id().map(str::to_string) else {
                    completion.succeed(());
                    return;
                };
                info!(session = session_id.as_str(), mode = mode.as_str(), "Ending session");
                self.set_state(SessionState::Ending);
                match transport.disconnect(&session_id, mode) {
                    Ok(()) => self.pending_end.push(completion),
                    Err(err) => {
                        warn!(session = session_id.as_str(), error = %err, "Disconnect failed");
                        self.finish(SessionEndStatus::Error, err.code(), events);
                        completion.fail(err);
                    }
                }
            }
        }
    }

    fn finish(&mut self, status: SessionEndStatus, code: Option<i32>, events: &CastEventBus) {
        let session = self.session.take();
        let dropped = self.channels.clear();
        self.set_state(SessionState::Idle);

        if let Some(session) = session {
            info!(
                session = session.snapshot.session_id.as_str(),
                status = status.as_str(),
                channels = dropped,
                "Session ended"
            );
            events.broadcast(CastEvent::SessionEnded {
                session: session.snapshot,
                status,
                code,
            });
        }
        for completion in self.pending_end.drain(..) {
            completion.succeed(());
        }
    }

    /// Applies a receiver-originated event. Messages and availability changes
    /// are not session state and are left to the caller.
    pub fn handle(
        &mut self,
        event: TransportEvent,
        transport: &mut dyn DeviceTransport,
        events: &CastEventBus,
    ) {
        match event {
            TransportEvent::ConnectAccepted { attempt, snapshot } => {
                self.on_connect_accepted(attempt, snapshot, transport, events)
            }
            TransportEvent::ConnectRejected { attempt, code } => {
                self.on_connect_rejected(attempt, code, events)
            }
            TransportEvent::Disconnected { session_id, clean } => {
                self.on_disconnected(&session_id, clean, events)
            }
            TransportEvent::StatusUpdate {
                session_id,
                payload,
            } => self.on_status(&session_id, &payload, events),
            TransportEvent::Suspended { session_id } => self.on_suspended(&session_id, events),
            TransportEvent::TransportLost { code } => self.on_transport_lost(code, events),
            TransportEvent::ResumeOffered { snapshot } => self.on_resume_offered(snapshot, None),
            TransportEvent::ResumeConfirmed { session_id } => {
                self.on_resume_confirmed(&session_id, events)
            }
            TransportEvent::ResumeFailed { session_id } => self.on_resume_failed(&session_id),
            TransportEvent::MessageReceived { .. } | TransportEvent::AvailabilityChanged { .. } => {}
        }
    }

    fn on_connect_accepted(
        &mut self,
        attempt: u64,
        snapshot: SessionSnapshot,
        transport: &mut dyn DeviceTransport,
        events: &CastEventBus,
    ) {
        if self.state != SessionState::Connecting || !self.request.is_current(attempt) {
            warn!(
                attempt,
                session = snapshot.session_id.as_str(),
                "Receiver accepted a stale attempt, leaving its session"
            );
            if let Err(err) = transport.disconnect(&snapshot.session_id, EndMode::Leave) {
                warn!(error = %err, "Failed to leave orphaned session");
            }
            return;
        }

        let snapshot = Arc::new(snapshot.with_status(STATUS_CONNECTED));
        self.session = Some(Session {
            device: self.connecting.take().unwrap_or_default(),
            snapshot: Arc::clone(&snapshot),
        });
        self.set_state(SessionState::Connected);
        info!(
            attempt,
            session = snapshot.session_id.as_str(),
            app = snapshot.app_id.as_str(),
            "Session started"
        );

        self.request.resolve(attempt, Ok(Arc::clone(&snapshot)));
        events.broadcast(CastEvent::SessionStarted(Arc::clone(&snapshot)));
        events.broadcast(CastEvent::SessionUpdate(snapshot));
    }

    fn on_connect_rejected(&mut self, attempt: u64, code: i32, events: &CastEventBus) {
        if self.state != SessionState::Connecting || !self.request.is_current(attempt) {
            debug!(attempt, code, "Ignoring rejection of a stale attempt");
            return;
        }
        self.fail_attempt(CastError::transport(code), events);
    }

    fn is_current_session(&self, session_id: &str) -> bool {
        self.session_id() == Some(session_id)
    }

    fn on_disconnected(&mut self, session_id: &str, clean: bool, events: &CastEventBus) {
        let live = matches!(
            self.state,
            SessionState::Connected | SessionState::Resuming | SessionState::Ending
        );
        if !live || !self.is_current_session(session_id) {
            debug!(session = session_id, state = %self.state, "Ignoring disconnect of unknown session");
            return;
        }
        let status = if clean {
            SessionEndStatus::Stopped
        } else {
            SessionEndStatus::Error
        };
        self.finish(status, None, events);
    }

    fn on_status(&mut self, session_id: &str, payload: &serde_json::Value, events: &CastEventBus) {
        if !matches!(self.state, SessionState::Connected | SessionState::Resuming) {
            debug!(state = %self.state, "Discarding status push outside of a session");
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.snapshot.session_id != session_id {
            debug!(session = session_id, "Discarding status push for another session");
            return;
        }

        let status = if self.state == SessionState::Connected {
            STATUS_CONNECTED
        } else {
            session.snapshot.status.as_str()
        };
        let next = match decode_session_status(payload, &session.snapshot, status) {
            Ok(next) => next,
            Err(err) => {
                warn!(session = session_id, error = %err, "Dropping malformed status push");
                return;
            }
        };

        let Some(snapshot) = self.replace_snapshot(next) else {
            return;
        };
        // A resuming session is announced on confirmation only.
        if self.state == SessionState::Connected {
            events.broadcast(CastEvent::SessionUpdate(Arc::clone(&snapshot)));
            for media in &snapshot.media {
                events.broadcast(CastEvent::MediaUpdate(media.clone()));
            }
        }
    }

    fn on_suspended(&mut self, session_id: &str, events: &CastEventBus) {
        if self.state != SessionState::Connected || !self.is_current_session(session_id) {
            debug!(session = session_id, "Ignoring suspension");
            return;
        }
        let Some(current) = self.snapshot() else {
            return;
        };
        info!(session = session_id, "Session suspended");
        if let Some(snapshot) = self.replace_snapshot(current.with_status(STATUS_SUSPENDED)) {
            events.broadcast(CastEvent::SessionUpdate(snapshot));
        }
    }

    fn on_transport_lost(&mut self, code: i32, events: &CastEventBus) {
        match self.state {
            SessionState::Idle => debug!(code, "Transport lost while idle"),
            SessionState::Connecting => self.fail_attempt(CastError::transport(code), events),
            SessionState::Connected | SessionState::Resuming | SessionState::Ending => {
                warn!(code, "Transport lost");
                self.finish(SessionEndStatus::Error, Some(code), events);
            }
        }
    }

    /// `Idle -> Resuming` with the session the receiver still runs.
    pub fn on_resume_offered(&mut self, snapshot: SessionSnapshot, device: Option<&Arc<Device>>) {
        if self.state != SessionState::Idle {
            debug!(state = %self.state, session = snapshot.session_id.as_str(), "Ignoring resume offer");
            return;
        }
        info!(session = snapshot.session_id.as_str(), "Resuming session");
        self.session = Some(Session {
            device: device.map(Arc::downgrade).unwrap_or_default(),
            snapshot: Arc::new(snapshot.with_status(STATUS_RESUMING)),
        });
        self.set_state(SessionState::Resuming);
    }

    fn on_resume_confirmed(&mut self, session_id: &str, events: &CastEventBus) {
        if self.state != SessionState::Resuming || !self.is_current_session(session_id) {
            debug!(session = session_id, "Ignoring resume confirmation");
            return;
        }
        let Some(current) = self.snapshot() else {
            return;
        };
        self.state = SessionState::Connected;
        let Some(snapshot) = self.replace_snapshot(current.with_status(STATUS_CONNECTED)) else {
            return;
        };
        info!(session = session_id, "Session resumed");
        events.broadcast(CastEvent::SessionResumed(Arc::clone(&snapshot)));
        events.broadcast(CastEvent::SessionUpdate(snapshot));
    }

    fn on_resume_failed(&mut self, session_id: &str) {
        if self.state != SessionState::Resuming || !self.is_current_session(session_id) {
            debug!(session = session_id, "Ignoring resume failure");
            return;
        }
        info!(session = session_id, "Resume failed, dropping session");
        self.session = None;
        self.channels.clear();
        self.set_state(SessionState::Idle);
    }

    /// Records the status returned by a load request and announces it.
    /// Replies for a session that is no longer connected are dropped.
    pub fn on_media_loaded(&mut self, media: MediaStatus, events: &CastEventBus) {
        if self.state != SessionState::Connected || !self.is_current_session(&media.session_id) {
            debug!(
                session = media.session_id.as_str(),
                media_session = media.media_session_id,
                "Dropping load reply of a finished session"
            );
            return;
        }
        let Some(current) = self.snapshot() else {
            return;
        };
        let mut next = (*current).clone();
        match next
            .media
            .iter_mut()
            .find(|m| m.media_session_id == media.media_session_id)
        {
            Some(entry) => *entry = media.clone(),
            None => next.media.push(media.clone()),
        }
        self.replace_snapshot(next);
        events.broadcast(CastEvent::MediaLoaded(media));
    }

    fn require_connected(&self) -> CastResult<&str> {
        match (self.state, self.session_id()) {
            (SessionState::Connected, Some(id)) => Ok(id),
            _ => Err(CastError::NoActiveSession),
        }
    }

    pub fn add_channel(&mut self, namespace: &str) -> CastResult<bool> {
        self.require_connected()?;
        self.channels.add(namespace)
    }

    pub fn remove_channel(&mut self, namespace: &str) -> CastResult<bool> {
        self.require_connected()?;
        Ok(self.channels.remove(namespace))
    }

    /// Session id to send `namespace` messages on.
    pub fn message_target(&self, namespace: &str) -> CastResult<String> {
        let session_id = self.require_connected()?;
        self.channels.ensure(namespace)?;
        Ok(session_id.to_string())
    }

    /// Session id to send media commands on.
    pub fn media_target(&self) -> CastResult<String> {
        self.require_connected().map(str::to_string)
    }

    /// Abandons pending requests (they resolve `Cancelled`) and forgets the
    /// session without notifying observers.
    pub fn shutdown(&mut self) {
        drop(self.request.take_current());
        self.pending_end.clear();
        self.connecting = None;
        self.session = None;
        self.channels.clear();
        self.set_state(SessionState::Idle);
    }
}

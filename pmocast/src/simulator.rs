//! In-process discovery and receiver transports.
//!
//! Both simulators are cheap handles over shared state: hand one clone to
//! the controller and keep another to script the receiver side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::errors::{CastError, CastResult};
use crate::media::MediaCommand;
use crate::model::{Device, EndMode, MediaStatus, ReceiverInfo, SessionSnapshot, Volume};
use crate::scan::{DiscoverySink, DiscoveryTransport, ScanFilter};
use crate::status::encode_media_status;
use crate::tracker::Completion;
use crate::transport::{DeviceTransport, TransportEvent, TransportSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DiscoveryState {
    live: HashMap<u64, DiscoverySink>,
    retired: HashMap<u64, DiscoverySink>,
    max_concurrent: usize,
    started: Vec<u64>,
    stopped: Vec<u64>,
    fail_next_start: Option<i32>,
}

/// Discovery transport driven by the test or demo.
#[derive(Clone, Default)]
pub struct SimulatedDiscovery {
    state: Arc<Mutex<DiscoveryState>>,
}

impl SimulatedDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `devices` on every live subscription. Returns how many
    /// subscriptions received them.
    pub fn publish(&self, devices: Vec<Device>) -> usize {
        let sinks: Vec<DiscoverySink> = lock(&self.state).live.values().cloned().collect();
        sinks
            .iter()
            .filter(|sink| sink.publish(devices.clone()))
            .count()
    }

    /// Publishes on a given subscription, even one that was stopped, as a
    /// late report still in flight would.
    pub fn publish_to(&self, subscription: u64, devices: Vec<Device>) -> bool {
        let sink = {
            let state = lock(&self.state);
            state
                .live
                .get(&subscription)
                .or_else(|| state.retired.get(&subscription))
                .cloned()
        };
        sink.is_some_and(|sink| sink.publish(devices))
    }

    /// Reports a failure on every live subscription.
    pub fn fail(&self, code: i32) {
        let sinks: Vec<DiscoverySink> = lock(&self.state).live.values().cloned().collect();
        for sink in sinks {
            sink.fail(code);
        }
    }

    pub fn fail_next_start(&self, code: i32) {
        lock(&self.state).fail_next_start = Some(code);
    }

    pub fn live_subscriptions(&self) -> usize {
        lock(&self.state).live.len()
    }

    /// Highest number of subscriptions that were live at the same time.
    pub fn max_concurrent(&self) -> usize {
        lock(&self.state).max_concurrent
    }

    pub fn started(&self) -> Vec<u64> {
        lock(&self.state).started.clone()
    }

    pub fn stopped(&self) -> Vec<u64> {
        lock(&self.state).stopped.clone()
    }
}

impl DiscoveryTransport for SimulatedDiscovery {
    fn start_discovery(
        &mut self,
        subscription: u64,
        _filter: &ScanFilter,
        sink: DiscoverySink,
    ) -> CastResult<()> {
        let mut state = lock(&self.state);
        if let Some(code) = state.fail_next_start.take() {
            return Err(CastError::transport(code));
        }
        state.live.insert(subscription, sink);
        state.started.push(subscription);
        state.max_concurrent = state.max_concurrent.max(state.live.len());
        debug!(subscription, "Simulated discovery started");
        Ok(())
    }

    fn stop_discovery(&mut self, subscription: u64) {
        let mut state = lock(&self.state);
        if let Some(sink) = state.live.remove(&subscription) {
            state.retired.insert(subscription, sink);
            state.stopped.push(subscription);
            debug!(subscription, "Simulated discovery stopped");
        }
    }
}

/// How the simulated receiver answers `connect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectBehaviour {
    Accept,
    Reject(i32),
    /// Nothing is reported until the test calls `accept` or `reject`.
    Manual,
}

/// Calls received by the simulated receiver.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    Connect {
        attempt: u64,
        device: String,
        app_id: String,
    },
    Disconnect {
        session_id: String,
        mode: EndMode,
    },
    SendMessage {
        session_id: String,
        namespace: String,
        message: String,
    },
    Media {
        session_id: String,
        command: MediaCommand,
    },
}

struct ReceiverState {
    sink: Option<TransportSink>,
    behaviour: ConnectBehaviour,
    confirm_disconnect: bool,
    message_error: Option<CastError>,
    hold_media: bool,
    held_media: Vec<(Completion<Option<Value>>, Option<Value>)>,
    calls: Vec<TransportCall>,
    attempts: HashMap<u64, (String, String)>,
    next_session: u64,
    next_media_session: i64,
}

impl Default for ReceiverState {
    fn default() -> Self {
        Self {
            sink: None,
            behaviour: ConnectBehaviour::Accept,
            confirm_disconnect: true,
            message_error: None,
            hold_media: false,
            held_media: Vec::new(),
            calls: Vec::new(),
            attempts: HashMap::new(),
            next_session: 0,
            next_media_session: 0,
        }
    }
}

/// Receiver protocol layer answering from memory.
#[derive(Clone, Default)]
pub struct SimulatedReceiver {
    state: Arc<Mutex<ReceiverState>>,
}

impl SimulatedReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect_behaviour(&self, behaviour: ConnectBehaviour) {
        lock(&self.state).behaviour = behaviour;
    }

    /// When false, `disconnect` waits for the test to push `Disconnected`.
    pub fn set_confirm_disconnect(&self, confirm: bool) {
        lock(&self.state).confirm_disconnect = confirm;
    }

    pub fn fail_messages_with(&self, error: Option<CastError>) {
        lock(&self.state).message_error = error;
    }

    /// When true, media replies wait for [`SimulatedReceiver::release_media_replies`].
    pub fn hold_media_replies(&self, hold: bool) {
        lock(&self.state).hold_media = hold;
    }

    /// Delivers held media replies in order. Returns how many were released.
    pub fn release_media_replies(&self) -> usize {
        let held = std::mem::take(&mut lock(&self.state).held_media);
        let released = held.len();
        for (completion, response) in held {
            completion.succeed(response);
        }
        released
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.state).calls.clone()
    }

    pub fn last_attempt(&self) -> Option<u64> {
        lock(&self.state).calls.iter().rev().find_map(|call| match call {
            TransportCall::Connect { attempt, .. } => Some(*attempt),
            _ => None,
        })
    }

    /// Sessions disconnected with [`EndMode::Leave`].
    pub fn left_sessions(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Disconnect {
                    session_id,
                    mode: EndMode::Leave,
                } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Pushes an arbitrary receiver event.
    pub fn push(&self, event: TransportEvent) -> bool {
        let sink = lock(&self.state).sink.clone();
        sink.is_some_and(|sink| sink.emit(event))
    }

    pub fn accept(&self, attempt: u64) -> Option<SessionSnapshot> {
        let snapshot = {
            let mut state = lock(&self.state);
            let (device, app_id) = state.attempts.get(&attempt).cloned()?;
            state.next_session += 1;
            simulated_snapshot(&device, &app_id, &format!("sim-session-{}", state.next_session))
        };
        self.push(TransportEvent::ConnectAccepted {
            attempt,
            snapshot: snapshot.clone(),
        });
        Some(snapshot)
    }

    pub fn reject(&self, attempt: u64, code: i32) -> bool {
        self.push(TransportEvent::ConnectRejected { attempt, code })
    }

    pub fn push_status(&self, session_id: &str, payload: Value) -> bool {
        self.push(TransportEvent::StatusUpdate {
            session_id: session_id.to_string(),
            payload,
        })
    }

    pub fn push_message(&self, namespace: &str, message: &str) -> bool {
        self.push(TransportEvent::MessageReceived {
            namespace: namespace.to_string(),
            message: message.to_string(),
        })
    }
}

/// Snapshot a receiver reports right after launching `app_id`.
pub fn simulated_snapshot(friendly_name: &str, app_id: &str, session_id: &str) -> SessionSnapshot {
    SessionSnapshot {
        app_id: app_id.to_string(),
        display_name: "Default Media Receiver".to_string(),
        session_id: session_id.to_string(),
        app_images: Vec::new(),
        receiver: ReceiverInfo {
            friendly_name: friendly_name.to_string(),
            label: friendly_name.to_ascii_lowercase().replace(' ', "-"),
            volume: Volume {
                level: 1.0,
                muted: false,
            },
        },
        media: Vec::new(),
        status: String::new(),
    }
}

impl DeviceTransport for SimulatedReceiver {
    fn attach(&mut self, sink: TransportSink) {
        lock(&self.state).sink = Some(sink);
    }

    fn connect(&mut self, attempt: u64, device: &Device, app_id: &str) -> CastResult<()> {
        let behaviour = {
            let mut state = lock(&self.state);
            state.calls.push(TransportCall::Connect {
                attempt,
                device: device.id.0.clone(),
                app_id: app_id.to_string(),
            });
            state
                .attempts
                .insert(attempt, (device.name.clone(), app_id.to_string()));
            state.behaviour
        };

        match behaviour {
            ConnectBehaviour::Accept => {
                self.accept(attempt);
            }
            ConnectBehaviour::Reject(code) => {
                self.reject(attempt, code);
            }
            ConnectBehaviour::Manual => {}
        }
        Ok(())
    }

    fn disconnect(&mut self, session_id: &str, mode: EndMode) -> CastResult<()> {
        let confirm = {
            let mut state = lock(&self.state);
            state.calls.push(TransportCall::Disconnect {
                session_id: session_id.to_string(),
                mode,
            });
            state.confirm_disconnect
        };
        if confirm {
            self.push(TransportEvent::Disconnected {
                session_id: session_id.to_string(),
                clean: true,
            });
        }
        Ok(())
    }

    fn send_message(
        &mut self,
        session_id: &str,
        namespace: &str,
        message: &str,
        completion: Completion<()>,
    ) {
        let outcome = {
            let mut state = lock(&self.state);
            state.calls.push(TransportCall::SendMessage {
                session_id: session_id.to_string(),
                namespace: namespace.to_string(),
                message: message.to_string(),
            });
            match &state.message_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        };
        completion.resolve(outcome);
    }

    fn media_command(
        &mut self,
        session_id: &str,
        command: MediaCommand,
        completion: Completion<Option<Value>>,
    ) {
        let response = {
            let mut state = lock(&self.state);
            state.calls.push(TransportCall::Media {
                session_id: session_id.to_string(),
                command: command.clone(),
            });
            let response = match command {
                MediaCommand::Load(request) => {
                    state.next_media_session += 1;
                    let status = MediaStatus {
                        media_session_id: state.next_media_session,
                        current_time: request.current_time,
                        playback_rate: 1.0,
                        player_state: Some(
                            if request.autoplay { "PLAYING" } else { "PAUSED" }.to_string(),
                        ),
                        is_alive: true,
                        volume: Volume {
                            level: 1.0,
                            muted: false,
                        },
                        custom_data: Value::Null,
                        session_id: session_id.to_string(),
                        ..MediaStatus::default()
                    };
                    // Receivers echo the loaded item as it was sent.
                    let mut document = encode_media_status(&status);
                    if let Value::Object(map) = &mut document {
                        map.insert("media".to_string(), request.wire_payload());
                    }
                    Some(document)
                }
                _ => None,
            };
            if state.hold_media {
                state.held_media.push((completion, response));
                return;
            }
            response
        };
        completion.succeed(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn discovery_tracks_live_subscriptions() {
        let mut discovery = SimulatedDiscovery::new();
        let (tx, rx) = unbounded();
        let sink = DiscoverySink::new(1, move |subscription, report| {
            tx.send((subscription, report)).is_ok()
        });
        discovery
            .start_discovery(1, &ScanFilter::default(), sink)
            .unwrap();
        assert_eq!(discovery.publish(vec![Device::new("a", "A")]), 1);
        assert_eq!(rx.try_recv().unwrap().0, 1);

        discovery.stop_discovery(1);
        assert_eq!(discovery.live_subscriptions(), 0);
        assert_eq!(discovery.publish(vec![]), 0);
        assert!(discovery.publish_to(1, vec![]));
        assert_eq!(discovery.stopped(), vec![1]);
    }

    #[test]
    fn receiver_accepts_and_records() {
        let mut receiver = SimulatedReceiver::new();
        let (tx, rx) = unbounded();
        receiver.attach(TransportSink::new(move |event| tx.send(event).is_ok()));

        receiver
            .connect(3, &Device::new("d1", "Den"), "CC1AD845")
            .unwrap();
        match rx.try_recv().unwrap() {
            TransportEvent::ConnectAccepted { attempt, snapshot } => {
                assert_eq!(attempt, 3);
                assert_eq!(snapshot.receiver.friendly_name, "Den");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(receiver.last_attempt(), Some(3));
    }
}
